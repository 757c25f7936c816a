//! Wire text encoding
//!
//! Inbound frames are decoded to `String`, outbound commands encoded to
//! bytes, both through the configured encoding with replacement of
//! malformed or unmappable sequences.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use tracing::warn;

/// Text codec for the configured character encoding
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    encoding: &'static Encoding,
}

impl Codec {
    /// Resolve a WHATWG label, falling back to UTF-8 for unknown labels
    pub fn for_label(label: &str) -> Self {
        let encoding = Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
            warn!("Unknown encoding '{}', using UTF-8", label);
            UTF_8
        });
        Self { encoding }
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Decode an inbound frame.
    ///
    /// With UTF-8 configured, input that fails validation is assumed to
    /// be windows-1252 so non-UTF-8 senders still come through readable.
    pub fn decode(&self, bytes: &[u8]) -> String {
        if self.encoding == UTF_8 {
            match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => WINDOWS_1252.decode(bytes).0.into_owned(),
            }
        } else {
            self.encoding.decode(bytes).0.into_owned()
        }
    }

    /// Encode an outbound command
    pub fn encode(&self, text: &str) -> Vec<u8> {
        if self.encoding == UTF_8 {
            return text.as_bytes().to_vec();
        }
        self.encoding.encode(text).0.into_owned()
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self { encoding: UTF_8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passthrough() {
        let codec = Codec::for_label("utf-8");
        assert_eq!(codec.decode("héllo ★".as_bytes()), "héllo ★");
        assert_eq!(codec.encode("héllo ★"), "héllo ★".as_bytes());
    }

    #[test]
    fn test_invalid_utf8_falls_back_to_windows_1252() {
        let codec = Codec::default();
        // 0xE9 is 'é' in windows-1252 and invalid as a lone UTF-8 byte
        assert_eq!(codec.decode(b"caf\xE9"), "café");
    }

    #[test]
    fn test_latin1_encoding() {
        let codec = Codec::for_label("latin1");
        assert_eq!(codec.name(), "windows-1252");
        assert_eq!(codec.encode("café"), b"caf\xE9".to_vec());
        assert_eq!(codec.decode(b"caf\xE9"), "café");
    }

    #[test]
    fn test_unknown_label_defaults_to_utf8() {
        assert_eq!(Codec::for_label("klingon").name(), "UTF-8");
    }
}
