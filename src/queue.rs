//! in-memory work queue between the producer and its background sender
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_channel::{Receiver, Sender, TryRecvError};
use bytes::Bytes;
use futures::future::{select, Either};

use crate::cluster::TopicPartition;
use crate::error::ProducerError;
use crate::executor::Executor;

/// one message waiting to be batched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub destination: TopicPartition,
    pub payload: Bytes,
    pub key: Option<Bytes>,
}

#[derive(Debug)]
pub(crate) enum QueueItem {
    Message(Envelope),
    Stop,
}

#[derive(Debug)]
pub(crate) enum Dequeued {
    Item(QueueItem),
    TimedOut,
    /// every sending half was dropped and the queue is empty
    Closed,
}

/// sending half, shared by every caller of the producer
///
/// the channel itself is unbounded; capacity is enforced on `try_enqueue` so
/// that the stop marker can always be delivered
pub(crate) struct WorkQueue {
    sender: Sender<QueueItem>,
    capacity: Option<usize>,
    // serializes the capacity check with the push
    enqueue: Mutex<()>,
    // set as soon as the stop marker is queued, read by the receiver
    stop_sent: Arc<AtomicBool>,
}

pub(crate) struct QueueReceiver {
    receiver: Receiver<QueueItem>,
    stop_sent: Arc<AtomicBool>,
}

impl WorkQueue {
    /// a capacity of 0 means unbounded
    pub fn new(capacity: usize) -> (WorkQueue, QueueReceiver) {
        let (sender, receiver) = async_channel::unbounded();
        let stop_sent = Arc::new(AtomicBool::new(false));
        let queue = WorkQueue {
            sender,
            capacity: if capacity == 0 { None } else { Some(capacity) },
            enqueue: Mutex::new(()),
            stop_sent: stop_sent.clone(),
        };
        (
            queue,
            QueueReceiver {
                receiver,
                stop_sent,
            },
        )
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// adds an envelope without waiting
    pub fn try_enqueue(&self, envelope: Envelope) -> Result<(), ProducerError> {
        let _guard = self.enqueue.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(capacity) = self.capacity {
            let depth = self.sender.len();
            if depth >= capacity {
                return Err(ProducerError::QueueFull { depth });
            }
        }
        self.sender
            .try_send(QueueItem::Message(envelope))
            .map_err(|_| ProducerError::Closed)
    }

    /// queues the stop marker, ignoring capacity
    ///
    /// returns false if the marker was already queued or the receiver is gone
    pub fn enqueue_stop(&self) -> bool {
        if self.stop_sent.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _guard = self.enqueue.lock().unwrap_or_else(|e| e.into_inner());
        self.sender.try_send(QueueItem::Stop).is_ok()
    }
}

impl QueueReceiver {
    /// whether the stop marker was queued, even if it was not dequeued yet
    pub fn stop_requested(&self) -> bool {
        self.stop_sent.load(Ordering::Acquire)
    }

    /// waits at most `timeout` for the next item
    ///
    /// a zero timeout only takes an item that is already queued
    pub async fn dequeue<Exe: Executor>(&self, executor: &Exe, timeout: Duration) -> Dequeued {
        match self.receiver.try_recv() {
            Ok(item) => return Dequeued::Item(item),
            Err(TryRecvError::Closed) => return Dequeued::Closed,
            Err(TryRecvError::Empty) => {}
        }
        if timeout.is_zero() {
            return Dequeued::TimedOut;
        }

        let recv = self.receiver.recv();
        futures::pin_mut!(recv);
        match select(recv, executor.delay(timeout)).await {
            Either::Left((Ok(item), _)) => Dequeued::Item(item),
            Either::Left((Err(_), _)) => Dequeued::Closed,
            Either::Right(_) => Dequeued::TimedOut,
        }
    }
}
