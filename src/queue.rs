//! Thread-safe message queue bridging the capture thread and its owner.
//!
//! Single producer (the capture thread) / single consumer (the owning
//! thread). Every successful insertion yields exactly one `ItemAdded`
//! change, and the consumer observes changes in insertion order by
//! draining from its own event loop. The capture thread never touches
//! consumer state directly; this channel is the whole hand-off.

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use crate::events::CapturedMessage;

/// A change observed on the queue. Delivery handlers react to `ItemAdded`
/// and ignore everything else.
#[derive(Debug, Clone)]
pub enum QueueChange {
    ItemAdded(CapturedMessage),
    /// Buffered items were abandoned wholesale. Not a delivery.
    Cleared,
}

/// Producer half, held by the capture thread.
#[derive(Clone)]
pub struct QueueSender {
    tx: Sender<QueueChange>,
}

impl QueueSender {
    /// Insert one message. Exactly one `ItemAdded` reaches the consumer per
    /// call; returns false once the consumer side is gone.
    pub fn push(&self, message: CapturedMessage) -> bool {
        self.tx.send(QueueChange::ItemAdded(message)).is_ok()
    }

    /// Mark everything sent so far as abandoned.
    pub fn clear(&self) -> bool {
        self.tx.send(QueueChange::Cleared).is_ok()
    }
}

/// Consumer half, owned by the thread that constructed the receiver.
pub struct MessageQueue {
    rx: Receiver<QueueChange>,
}

impl MessageQueue {
    /// Fresh unbounded queue; producer to the capture thread, consumer
    /// stays with the owner.
    pub fn channel() -> (QueueSender, MessageQueue) {
        let (tx, rx) = channel::unbounded();
        (QueueSender { tx }, MessageQueue { rx })
    }

    /// Next pending change, if any. Never blocks.
    pub fn try_next(&self) -> Option<QueueChange> {
        match self.rx.try_recv() {
            Ok(change) => Some(change),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain every pending change into `handler`, in insertion order.
    /// Returns how many changes were handled.
    pub fn drain(&self, mut handler: impl FnMut(QueueChange)) -> usize {
        let mut handled = 0;
        while let Some(change) = self.try_next() {
            handler(change);
            handled += 1;
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProcessInfo;
    use chrono::Local;
    use std::thread;
    use std::time::{Duration, Instant};

    fn message(seq: u64, text: &str) -> CapturedMessage {
        CapturedMessage {
            sequence_id: seq,
            timestamp: Local::now(),
            text: text.as_bytes().to_vec(),
            process: ProcessInfo { process_id: 1, process_name: String::new() },
        }
    }

    fn added_text(change: QueueChange) -> Option<String> {
        match change {
            QueueChange::ItemAdded(m) => Some(m.text_lossy().into_owned()),
            QueueChange::Cleared => None,
        }
    }

    #[test]
    fn changes_arrive_in_insertion_order() {
        let (tx, queue) = MessageQueue::channel();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            assert!(tx.push(message(i as u64, text)));
        }

        let mut seen = Vec::new();
        let handled = queue.drain(|c| seen.extend(added_text(c)));
        assert_eq!(handled, 3);
        assert_eq!(seen, ["first", "second", "third"]);
    }

    #[test]
    fn one_change_per_insertion() {
        let (tx, queue) = MessageQueue::channel();
        tx.push(message(1, "only"));
        assert_eq!(queue.drain(|_| {}), 1);
        assert_eq!(queue.drain(|_| {}), 0);
    }

    #[test]
    fn cleared_is_a_distinct_change() {
        let (tx, queue) = MessageQueue::channel();
        tx.push(message(1, "kept"));
        tx.clear();

        let mut kinds = Vec::new();
        queue.drain(|c| kinds.push(added_text(c).is_some()));
        assert_eq!(kinds, [true, false]);
    }

    #[test]
    fn push_fails_once_consumer_is_gone() {
        let (tx, queue) = MessageQueue::channel();
        drop(queue);
        assert!(!tx.push(message(1, "lost")));
    }

    #[test]
    fn producer_thread_order_is_preserved() {
        let (tx, queue) = MessageQueue::channel();
        let producer = thread::spawn(move || {
            for i in 0..100u64 {
                assert!(tx.push(message(i, &i.to_string())));
            }
        });

        let mut seqs = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while seqs.len() < 100 && Instant::now() < deadline {
            queue.drain(|c| {
                if let QueueChange::ItemAdded(m) = c {
                    seqs.push(m.sequence_id);
                }
            });
            thread::sleep(Duration::from_millis(1));
        }
        producer.join().unwrap();

        assert_eq!(seqs, (0..100).collect::<Vec<_>>());
    }
}
