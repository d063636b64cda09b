//! Channel-like structures that only propagate messages when stepped, so
//! observers see a tick's events together after the tick completes.

use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use thiserror::Error;
use tracing::trace;

/// Each message is named in the trace output
pub trait TracedMessage {
    fn name(&self) -> &'static str;
}

/// An mpmc channel that requires manual stepping for messages to propagate.
/// Messages sit in a sender's outbox until the step; after that, they sit in
/// every receiver's inbox.
#[derive(Debug)]
pub struct StepChannel<T: Clone + TracedMessage> {
    senders: Vec<Sender<T>>,
    receivers: Vec<Receiver<T>>,
}

impl<T: Clone + TracedMessage> Default for StepChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + TracedMessage> StepChannel<T> {
    pub fn new() -> Self {
        StepChannel {
            senders: vec![],
            receivers: vec![],
        }
    }

    pub fn sender(&mut self, outbox_capacity: impl Into<Option<usize>>) -> Sender<T> {
        let inner = Arc::new(Mutex::new(InnerSender {
            outbox: VecDeque::new(),
            outbox_capacity: outbox_capacity.into(),
        }));
        self.senders.push(Sender(inner.clone()));
        Sender(inner)
    }

    pub fn receiver(&mut self, inbox_capacity: impl Into<Option<usize>>) -> Receiver<T> {
        let inner = Arc::new(Mutex::new(InnerReceiver {
            inbox: VecDeque::new(),
            inbox_capacity: inbox_capacity.into(),
        }));
        self.receivers.push(Receiver(inner.clone()));
        Receiver(inner)
    }

    pub fn step(&mut self) -> Result<(), ChannelError> {
        for s in self.senders.iter() {
            let mut s_inner = s.0.lock();

            while let Some(msg) = s_inner.outbox.pop_front() {
                for r in self.receivers.iter() {
                    let mut r_inner = r.0.lock();

                    if let Some(inbox_capacity) = r_inner.inbox_capacity {
                        if r_inner.inbox.len() >= inbox_capacity {
                            return Err(ChannelError::QueueFull);
                        }
                    }

                    r_inner.inbox.push_back(msg.clone());
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct Sender<T>(Arc<Mutex<InnerSender<T>>>);

#[derive(Debug)]
pub struct InnerSender<T> {
    outbox: VecDeque<T>,
    outbox_capacity: Option<usize>,
}

impl<T: TracedMessage> Sender<T> {
    pub fn try_send(&mut self, item: T) -> Result<(), ChannelError> {
        let mut inner = self.0.lock();

        if let Some(capacity) = inner.outbox_capacity {
            if inner.outbox.len() >= capacity {
                return Err(ChannelError::QueueFull);
            }
        }

        trace!(message = item.name(), "Channel send");
        inner.outbox.push_back(item);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.0.lock().outbox.clear();
    }
}

#[derive(Debug)]
pub struct Receiver<T>(Arc<Mutex<InnerReceiver<T>>>);

#[derive(Debug)]
pub struct InnerReceiver<T> {
    inbox: VecDeque<T>,
    inbox_capacity: Option<usize>,
}

impl<T: TracedMessage> Receiver<T> {
    pub fn recv(&mut self) -> Option<T> {
        let msg = self.0.lock().inbox.pop_front();
        if let Some(m) = msg.as_ref() {
            trace!(message = m.name(), "Channel recv");
        }
        msg
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.0.lock().inbox.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.0.lock().inbox.clear();
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Queue full")]
    QueueFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Ping(u8);

    impl TracedMessage for Ping {
        fn name(&self) -> &'static str {
            "ping"
        }
    }

    #[test]
    fn messages_wait_for_step() {
        let mut ch = StepChannel::new();
        let mut tx = ch.sender(None);
        let mut rx_a = ch.receiver(None);
        let mut rx_b = ch.receiver(None);

        tx.try_send(Ping(1)).unwrap();
        assert_eq!(rx_a.recv(), None);

        ch.step().unwrap();
        assert_eq!(rx_a.recv(), Some(Ping(1)));
        assert_eq!(rx_b.drain(), vec![Ping(1)]);
        assert_eq!(rx_a.recv(), None);
    }

    #[test]
    fn bounded_outbox() {
        let mut ch = StepChannel::new();
        let mut tx = ch.sender(1);
        tx.try_send(Ping(1)).unwrap();
        assert!(matches!(tx.try_send(Ping(2)), Err(ChannelError::QueueFull)));
    }
}
