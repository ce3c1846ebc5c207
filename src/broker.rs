//! The message broker boundary. The concrete wire client (connect,
//! receive-batch, send, ack) is an external collaborator named only by
//! contract — this module defines that contract as two traits plus one
//! concrete, in-memory realization used both by tests and as the crate's
//! shipped default. Swapping in a real client means implementing
//! `Consumer` and `Producer` against that client's wire protocol; nothing
//! else in this crate needs to change.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::RelayError;

/// One unit of work. `receipt_handle` is opaque and upstream-specific; it
/// is never propagated downstream (only tag/keys/body are copied, per the
/// forwarding rule).
#[derive(Debug, Clone)]
pub struct Message {
    pub tag: String,
    pub keys: String,
    pub body: Vec<u8>,
    pub receipt_handle: String,
}

impl Message {
    /// Build the downstream message carried across the relay: same
    /// tag/keys/body, no receipt handle (the original's handle means
    /// nothing on the target topic).
    pub fn to_forwarded(&self) -> Message {
        Message {
            tag: self.tag.clone(),
            keys: self.keys.clone(),
            body: self.body.clone(),
            receipt_handle: String::new(),
        }
    }
}

pub trait Consumer: Send + Sync {
    /// Pull up to `batch_size` messages, each invisible to other consumers
    /// for `invisible_duration` until acked. Returns an empty vec (not an
    /// error) when nothing is available.
    fn receive(
        &self,
        batch_size: u32,
        invisible_duration: Duration,
    ) -> Result<Vec<Message>, RelayError>;

    /// Acknowledge a message, permanently removing it from the upstream
    /// topic. Ack failure is non-fatal to the caller — see the worker loop.
    fn ack(&self, message: &Message) -> Result<(), RelayError>;
}

pub trait Producer: Send + Sync {
    /// Publish synchronously; returns once the broker has accepted it.
    fn send(&self, message: &Message) -> Result<(), RelayError>;
}

/// An in-process broker keyed by topic name. Consumers and producers
/// constructed against the same topic string share a queue, so a scheduler
/// whose upstream and downstream topics are distinct strings gets two
/// independent queues, exactly like a real broker would provide.
#[derive(Default)]
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, Arc<Mutex<VecDeque<Message>>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn topic(&self, name: &str) -> Arc<Mutex<VecDeque<Message>>> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Test/operator hook: push a message directly onto a topic, as if a
    /// producer elsewhere in the system had written it.
    pub fn publish(&self, topic: &str, message: Message) {
        self.topic(topic).lock().unwrap().push_back(message);
    }

    pub fn consumer(self: &Arc<Self>, topic: &str) -> InMemoryConsumer {
        InMemoryConsumer {
            queue: self.topic(topic),
        }
    }

    pub fn producer(self: &Arc<Self>, topic: &str) -> InMemoryProducer {
        InMemoryProducer {
            queue: self.topic(topic),
        }
    }

    pub fn len(&self, topic: &str) -> usize {
        self.topic(topic).lock().unwrap().len()
    }
}

pub struct InMemoryConsumer {
    queue: Arc<Mutex<VecDeque<Message>>>,
}

impl Consumer for InMemoryConsumer {
    fn receive(
        &self,
        batch_size: u32,
        _invisible_duration: Duration,
    ) -> Result<Vec<Message>, RelayError> {
        let mut queue = self.queue.lock().unwrap();
        let n = (batch_size as usize).min(queue.len());
        Ok(queue.drain(..n).collect())
    }

    fn ack(&self, _message: &Message) -> Result<(), RelayError> {
        // The in-memory queue removes a message on receive already; a real
        // broker would require this explicit ack to make the removal
        // permanent instead of merely invisible.
        Ok(())
    }
}

pub struct InMemoryProducer {
    queue: Arc<Mutex<VecDeque<Message>>>,
}

impl Producer for InMemoryProducer {
    fn send(&self, message: &Message) -> Result<(), RelayError> {
        self.queue.lock().unwrap().push_back(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(body: &str) -> Message {
        Message {
            tag: "t".to_string(),
            keys: "k".to_string(),
            body: body.as_bytes().to_vec(),
            receipt_handle: "rh-1".to_string(),
        }
    }

    #[test]
    fn forward_drops_receipt_handle() {
        let forwarded = msg("hello").to_forwarded();
        assert!(forwarded.receipt_handle.is_empty());
        assert_eq!(forwarded.body, b"hello");
    }

    #[test]
    fn producer_then_consumer_round_trip() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer("topic-a");
        let consumer = broker.consumer("topic-a");

        producer.send(&msg("one")).unwrap();
        producer.send(&msg("two")).unwrap();

        let received = consumer.receive(10, Duration::from_secs(30)).unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].body, b"one");
    }

    #[test]
    fn receive_respects_batch_size() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer("topic-b");
        let consumer = broker.consumer("topic-b");
        for i in 0..5 {
            producer.send(&msg(&i.to_string())).unwrap();
        }

        let batch = consumer.receive(3, Duration::from_secs(30)).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(broker.len("topic-b"), 2);
    }

    #[test]
    fn distinct_topics_are_independent() {
        let broker = InMemoryBroker::new();
        broker.producer("a").send(&msg("only-a")).unwrap();
        let b_consumer = broker.consumer("b");
        assert!(b_consumer.receive(10, Duration::from_secs(1)).unwrap().is_empty());
    }
}
