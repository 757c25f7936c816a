//! Outgoing message queue
//!
//! Commands are queued in one of two lanes, private messages and
//! everything else, and drained round-robin so a flood in one lane cannot
//! starve the other. Order is kept within a lane, not across lanes.
//!
//! Outgoing commands look like `ROOM|TEXT`, with private messages sent as
//! a `/pm` slash command:
//!
//! ```text
//! techcode|how do i code lol??
//! |/pm scotteh, party animal
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::encoding::Codec;
use crate::transport::FrameWriter;

/// Queue lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Private,
    Broadcast,
}

/// Decide which lane a raw command belongs in.
///
/// Only a leading `/pm` slash command counts as private; `//` escapes a
/// literal slash and is plain chat.
pub fn classify(message: &str) -> Channel {
    let rest = message.split_once('|').map_or("", |(_, rest)| rest);
    if !rest.starts_with('/') || rest.starts_with("//") {
        return Channel::Broadcast;
    }
    match rest.split_whitespace().next() {
        Some("/pm") => Channel::Private,
        _ => Channel::Broadcast,
    }
}

#[derive(Debug, Default)]
struct QueueState {
    private: VecDeque<String>,
    broadcast: VecDeque<String>,
    /// Lanes currently present in `order`
    queued: HashSet<Channel>,
    /// Round-robin order of lanes with pending work
    order: VecDeque<Channel>,
    /// The sender stops once the lanes run dry
    finishing: bool,
}

impl QueueState {
    fn lane(&mut self, channel: Channel) -> &mut VecDeque<String> {
        match channel {
            Channel::Private => &mut self.private,
            Channel::Broadcast => &mut self.broadcast,
        }
    }
}

/// Fair two-lane queue feeding the single sender loop
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw command
    pub fn enqueue(&self, message: impl Into<String>) {
        let message = message.into();
        let channel = classify(&message);
        trace!("Queueing {:?} message: {}", channel, message);

        let mut state = self.state.lock();
        state.lane(channel).push_back(message);
        if state.queued.insert(channel) {
            state.order.push_back(channel);
        }
        drop(state);
        self.ready.notify_one();
    }

    /// Take the next command in round-robin order
    pub fn pop(&self) -> Option<String> {
        let mut state = self.state.lock();
        let channel = state.order.pop_front()?;
        let message = state.lane(channel).pop_front();
        if state.lane(channel).is_empty() {
            state.queued.remove(&channel);
        } else {
            state.order.push_back(channel);
        }
        message
    }

    /// Wait for and take the next command; `None` once finishing and empty
    pub async fn next(&self) -> Option<String> {
        loop {
            if let Some(message) = self.pop() {
                return Some(message);
            }
            if self.state.lock().finishing {
                return None;
            }
            self.ready.notified().await;
        }
    }

    /// Let the sender send what is pending, then stop
    pub fn finish(&self) {
        self.state.lock().finishing = true;
        self.ready.notify_one();
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.private.len() + state.broadcast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything pending and stop finishing
    pub fn clear(&self) {
        *self.state.lock() = QueueState::default();
    }

    /// Drain the queue to `writer` until the task is cancelled, or until
    /// the queue runs dry after `finish`.
    ///
    /// A failed write drops that command and moves on.
    pub async fn process(
        self: Arc<Self>,
        mut writer: Box<dyn FrameWriter>,
        codec: Codec,
        mut limiter: RateLimiter,
    ) {
        loop {
            if let Some(delay) = limiter.throttle() {
                trace!("Throttling outgoing messages for {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            let Some(message) = self.next().await else {
                debug!("Outgoing queue drained");
                return;
            };
            let message = message.trim_end();

            match writer.send(codec.encode(message)).await {
                Ok(()) => {
                    limiter.record(Instant::now());
                    debug!(target: "showdown_bot::outgoing", "{}", message);
                }
                Err(e) => {
                    error!("Could not send message (connectivity problems): {}: {}", message, e);
                }
            }
        }
    }
}

/// Client-side model of the server's flood-control queue.
///
/// Keeps a history of send times and estimates how many of those the
/// server has drained since, at `messages_per_second`. When the estimate
/// of outstanding messages reaches the server's queue size, the sender
/// waits one tick before the next send.
#[derive(Debug)]
pub struct RateLimiter {
    messages_per_second: f64,
    max_queue_size: usize,
    log: VecDeque<Instant>,
    capacity: usize,
}

impl RateLimiter {
    pub fn new(messages_per_second: f64, max_queue_size: usize) -> Self {
        let capacity = max_queue_size.max(1) * 2;
        Self {
            messages_per_second,
            max_queue_size,
            log: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Delay between two sends at the configured rate
    pub fn tick(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.messages_per_second).unwrap_or(Duration::MAX)
    }

    /// How long to wait before the next send, if at all
    pub fn throttle(&mut self) -> Option<Duration> {
        // Zero, negative and NaN rates turn limiting off
        if self.messages_per_second.is_nan() || self.messages_per_second <= 0.0 || self.log.len() < 2 {
            return None;
        }

        let elapsed: f64 = self
            .log
            .iter()
            .zip(self.log.iter().skip(1))
            .map(|(first, second)| second.duration_since(*first).as_secs_f64())
            .sum();
        let processed = (elapsed * self.messages_per_second).floor() as i64;
        let outstanding = self.log.len() as i64 - processed;

        if outstanding <= 0 {
            self.log.clear();
            None
        } else if outstanding >= self.max_queue_size as i64 {
            Some(self.tick())
        } else {
            None
        }
    }

    /// Note a completed send
    pub fn record(&mut self, at: Instant) {
        self.log.push_back(at);
        if self.log.len() > self.capacity {
            self.log.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingWriter;

    #[test]
    fn test_classify() {
        assert_eq!(classify("|/pm scotteh, party animal"), Channel::Private);
        assert_eq!(classify("|/join techcode"), Channel::Broadcast);
        assert_eq!(classify("techcode|how do i code lol??"), Channel::Broadcast);
        assert_eq!(classify("techcode|//pm not a command"), Channel::Broadcast);
        assert_eq!(classify("|/pmx someone"), Channel::Broadcast);
        assert_eq!(classify("no separator"), Channel::Broadcast);
    }

    #[test]
    fn test_lanes_keep_their_own_order() {
        let queue = OutgoingQueue::new();
        let sent = [
            "|/pm a, 1",
            "lobby|x",
            "lobby|y",
            "|/pm a, 2",
            "|/pm a, 3",
            "lobby|z",
        ];
        for message in sent {
            queue.enqueue(message);
        }
        assert_eq!(queue.len(), 6);

        let drained: Vec<String> = std::iter::from_fn(|| queue.pop()).collect();
        let private: Vec<&str> = drained
            .iter()
            .map(String::as_str)
            .filter(|m| classify(m) == Channel::Private)
            .collect();
        let broadcast: Vec<&str> = drained
            .iter()
            .map(String::as_str)
            .filter(|m| classify(m) == Channel::Broadcast)
            .collect();

        assert_eq!(private, vec!["|/pm a, 1", "|/pm a, 2", "|/pm a, 3"]);
        assert_eq!(broadcast, vec!["lobby|x", "lobby|y", "lobby|z"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_round_robin_interleaves_lanes() {
        let queue = OutgoingQueue::new();
        queue.enqueue("lobby|1");
        queue.enqueue("lobby|2");
        queue.enqueue("lobby|3");
        queue.enqueue("|/pm a, 1");

        assert_eq!(queue.pop().as_deref(), Some("lobby|1"));
        assert_eq!(queue.pop().as_deref(), Some("|/pm a, 1"));
        assert_eq!(queue.pop().as_deref(), Some("lobby|2"));
        assert_eq!(queue.pop().as_deref(), Some("lobby|3"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_clear() {
        let queue = OutgoingQueue::new();
        queue.enqueue("lobby|1");
        queue.enqueue("|/pm a, 1");
        queue.clear();
        assert!(queue.pop().is_none());

        queue.enqueue("lobby|2");
        assert_eq!(queue.pop().as_deref(), Some("lobby|2"));
    }

    #[test]
    fn test_burst_below_cap_is_not_throttled() {
        let mut limiter = RateLimiter::new(3.0, 5);
        let now = Instant::now();
        for _ in 0..4 {
            assert!(limiter.throttle().is_none());
            limiter.record(now);
        }
        assert!(limiter.throttle().is_none());
    }

    #[test]
    fn test_burst_at_cap_is_throttled() {
        let mut limiter = RateLimiter::new(3.0, 5);
        let now = Instant::now();
        for _ in 0..5 {
            limiter.record(now);
        }
        assert_eq!(limiter.throttle(), Some(Duration::from_secs_f64(1.0 / 3.0)));
    }

    #[test]
    fn test_drained_history_is_cleared() {
        let mut limiter = RateLimiter::new(2.0, 5);
        let start = Instant::now();
        limiter.record(start);
        limiter.record(start + Duration::from_secs(1));
        limiter.record(start + Duration::from_secs(2));
        // 2s elapsed at 2/s drains 4 >= 3 sent
        assert!(limiter.throttle().is_none());
        assert_eq!(limiter.history_len(), 0);
    }

    #[test]
    fn test_partially_drained_history_is_kept() {
        let mut limiter = RateLimiter::new(1.0, 3);
        let start = Instant::now();
        for i in 0..4 {
            limiter.record(start + Duration::from_millis(100 * i));
        }
        // 0.3s at 1/s drains nothing, 4 outstanding >= 3
        assert!(limiter.throttle().is_some());
        assert_eq!(limiter.history_len(), 4);
    }

    #[test]
    fn test_unusable_rates_do_not_panic() {
        let now = Instant::now();
        for rate in [f64::NAN, 0.0, -1.0] {
            let mut limiter = RateLimiter::new(rate, 1);
            limiter.record(now);
            limiter.record(now);
            assert!(limiter.throttle().is_none());
        }

        // The reciprocal of a tiny rate doesn't fit in a Duration
        let mut limiter = RateLimiter::new(1e-300, 1);
        limiter.record(now);
        limiter.record(now);
        assert_eq!(limiter.throttle(), Some(Duration::MAX));
        assert_eq!(RateLimiter::new(f64::INFINITY, 1).tick(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_sends_pending_then_stops() {
        let queue = Arc::new(OutgoingQueue::new());
        let (writer, sent) = RecordingWriter::new();
        queue.enqueue("|/leave lobby");
        queue.enqueue("|/logout");
        queue.finish();

        let task = tokio::spawn(Arc::clone(&queue).process(
            Box::new(writer),
            Codec::default(),
            RateLimiter::new(3.0, 300),
        ));
        let finished = tokio::time::timeout(Duration::from_secs(1), task).await;

        assert!(finished.is_ok());
        assert_eq!(*sent.lock(), vec!["|/leave lobby".to_string(), "|/logout".to_string()]);

        queue.clear();
        queue.enqueue("lobby|again");
        assert_eq!(queue.next().await.as_deref(), Some("lobby|again"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_sends_in_order_and_survives_write_errors() {
        let queue = Arc::new(OutgoingQueue::new());
        let (writer, sent) = RecordingWriter::failing_on("lobby|bad");
        let task = tokio::spawn(Arc::clone(&queue).process(
            Box::new(writer),
            Codec::default(),
            RateLimiter::new(100.0, 300),
        ));

        queue.enqueue("lobby|one\n");
        queue.enqueue("lobby|bad");
        queue.enqueue("lobby|two");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*sent.lock(), vec!["lobby|one".to_string(), "lobby|two".to_string()]);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_throttles_at_cap() {
        let queue = Arc::new(OutgoingQueue::new());
        let (writer, sent) = RecordingWriter::new();
        let task = tokio::spawn(Arc::clone(&queue).process(
            Box::new(writer),
            Codec::default(),
            RateLimiter::new(1.0, 2),
        ));

        for i in 0..4 {
            queue.enqueue(format!("lobby|{}", i));
        }
        // Two go out immediately, then the limiter holds the third for a tick
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sent.lock().len(), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sent.lock().len(), 4);
        task.abort();
    }
}
