//! Outgoing text helpers

/// Cut `text` down to at most `max_chars` characters
pub fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Every piece but the first starts with `start`, every piece but the
/// last ends with `end`, so readers can tell a message continues. With
/// `max_messages` set, pieces beyond it are dropped.
pub fn split_message(
    text: &str,
    max_chars: usize,
    start: &str,
    end: &str,
    max_messages: Option<usize>,
) -> Vec<String> {
    let total = text.chars().count();
    if total <= max_chars {
        return vec![text.to_string()];
    }

    let markers = start.chars().count() + end.chars().count();
    let room = max_chars.saturating_sub(markers).max(1);
    let chars: Vec<char> = text.chars().collect();

    let chunks: Vec<String> = chars.chunks(room).map(|c| c.iter().collect()).collect();
    let last = chunks.len() - 1;
    let mut pieces: Vec<String> = chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut piece = String::new();
            if i > 0 {
                piece.push_str(start);
            }
            piece.push_str(&chunk);
            if i < last {
                piece.push_str(end);
            }
            piece
        })
        .collect();

    if let Some(max) = max_messages {
        pieces.truncate(max.max(1));
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[test]
    fn test_short_message_is_not_split() {
        assert_eq!(split_message("hello", 10, "... ", " ...", None), vec!["hello"]);
    }

    #[test]
    fn test_split_adds_markers() {
        let pieces = split_message("abcdefghij", 6, "<", ">", None);
        assert_eq!(pieces, vec!["abcd>", "<efgh>", "<ij"]);
        assert!(pieces.iter().all(|p| p.chars().count() <= 6));
    }

    #[test]
    fn test_split_respects_max_messages() {
        let pieces = split_message("abcdefghij", 6, "<", ">", Some(2));
        assert_eq!(pieces, vec!["abcd>", "<efgh>"]);
    }
}
