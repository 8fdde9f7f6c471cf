use radio_common::{Message, Prioritized, PriorityQueue, RadioDelegate, RadioId};
use std::sync::Arc;
use tracing::{debug, trace};

/// Work for the dispatcher, tagged with the connection it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A decoded message.
    Message {
        /// Registered id of the sending connection.
        from: RadioId,
        /// The message as decoded.
        message: Message,
    },
    /// The connection registered as `from` has closed.
    Disconnected {
        /// Registered id of the closed connection.
        from: RadioId,
    },
}

impl Prioritized for Inbound {
    fn priority(&self) -> i32 {
        match self {
            Self::Message { message, .. } => message.priority,
            // Ties go by arrival, so this lands after anything already queued.
            Self::Disconnected { .. } => i32::MIN,
        }
    }
}

/// Single consumer of the global inbound queue.
///
/// Hands every message to the delegate in priority order, ties by arrival,
/// and returns once the queue is closed and drained.
pub async fn run<D: RadioDelegate + ?Sized>(queue: Arc<PriorityQueue<Inbound>>, delegate: Arc<D>) {
    let mut delivered: u64 = 0;
    while let Some(inbound) = queue.pop().await {
        match inbound {
            Inbound::Message { from, message } => {
                trace!(%from, kind = %message.kind(), priority = message.priority, "dispatching");
                delegate.on_message(from, message);
                delivered += 1;
            }
            Inbound::Disconnected { from } => {
                trace!(%from, "dispatching disconnect");
                delegate.on_disconnect(from);
            }
        }
    }
    debug!(delivered, "dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_common::{Coordinates, RadioConfig};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(RadioId, Message)>>,
        gone: Mutex<Vec<(RadioId, usize)>>,
    }

    impl RadioDelegate for Recorder {
        fn location(&self) -> Coordinates {
            Coordinates::default()
        }

        fn config(&self) -> RadioConfig {
            RadioConfig::default()
        }

        fn on_message(&self, from: RadioId, message: Message) {
            self.seen.lock().unwrap().push((from, message));
        }

        fn on_disconnect(&self, peer: RadioId) {
            let delivered = self.seen.lock().unwrap().len();
            self.gone.lock().unwrap().push((peer, delivered));
        }
    }

    fn inbound(seq: u32, priority: i32, body: &str) -> Inbound {
        let from = RadioId::new("PLN", seq);
        Inbound::Message {
            from,
            message: Message::data(from, Coordinates::default(), body.as_bytes())
                .with_priority(priority),
        }
    }

    #[tokio::test]
    async fn delivers_highest_priority_first_then_arrival_order() {
        let queue = Arc::new(PriorityQueue::new(16));
        let recorder = Arc::new(Recorder::default());

        queue.push(inbound(2, 3, "p2")).await.unwrap();
        queue.push(inbound(3, 3, "p3")).await.unwrap();
        queue.push(inbound(1, 9, "p1")).await.unwrap();
        queue.close();

        run(Arc::clone(&queue), Arc::clone(&recorder)).await;

        let seen = recorder.seen.lock().unwrap();
        let order: Vec<u32> = seen
            .iter()
            .map(|(from, _)| from.to_string()[3..].parse().unwrap())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(seen[1].1.payload, radio_common::Payload::Data(b"p2".to_vec()));
    }

    #[tokio::test]
    async fn stops_when_queue_closes() {
        let queue = Arc::new(PriorityQueue::<Inbound>::new(4));
        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(run(Arc::clone(&queue), Arc::clone(&recorder)));

        queue.push(inbound(1, 1, "x")).await.unwrap();
        queue.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_follows_messages_already_queued() {
        let queue = Arc::new(PriorityQueue::new(16));
        let recorder = Arc::new(Recorder::default());
        let gone = RadioId::new("PLN", 1);

        queue.push(inbound(1, 1, "last words")).await.unwrap();
        queue.push(inbound(1, i32::MIN, "lowest")).await.unwrap();
        queue.push(Inbound::Disconnected { from: gone }).await.unwrap();
        queue.push(inbound(2, 5, "other plane")).await.unwrap();
        queue.close();

        run(Arc::clone(&queue), Arc::clone(&recorder)).await;

        assert_eq!(recorder.seen.lock().unwrap().len(), 3);
        assert_eq!(*recorder.gone.lock().unwrap(), vec![(gone, 3)]);
    }
}
