//! background sender of an asynchronous producer
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::{
    channel::oneshot,
    future::{AbortHandle, Abortable},
};

use crate::{
    cluster::{ClusterClient, ProduceRequest, TopicPartition},
    compression::Compression,
    error::Error,
    executor::Executor,
    message::MessageSetEncoder,
    producer::ProducerStats,
    queue::{Dequeued, Envelope, QueueItem, QueueReceiver},
    retry_op::Dispatcher,
};

/// drains the work queue in cycles, turning envelopes into produce requests
///
/// a cycle collects up to `batch_size` envelopes (fewer when requests are
/// carried over from the previous cycle) or whatever arrived before
/// `batch_interval` elapsed, then sends everything in one dispatch
pub(crate) struct BatchCollector<C: ClusterClient, Exe: Executor> {
    receiver: QueueReceiver,
    dispatcher: Dispatcher<C, Exe>,
    encoder: Arc<dyn MessageSetEncoder>,
    compression: Compression,
    batch_size: usize,
    batch_interval: Duration,
    executor: Exe,
    stats: Arc<ProducerStats>,
}

/// lifecycle handles of a spawned collector
pub(crate) struct SenderHandle {
    pub abort: AbortHandle,
    /// resolves once the collector returned or was aborted
    pub done: oneshot::Receiver<()>,
}

impl<C: ClusterClient, Exe: Executor> BatchCollector<C, Exe> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        receiver: QueueReceiver,
        dispatcher: Dispatcher<C, Exe>,
        encoder: Arc<dyn MessageSetEncoder>,
        compression: Compression,
        batch_size: usize,
        batch_interval: Duration,
        executor: Exe,
        stats: Arc<ProducerStats>,
    ) -> Self {
        BatchCollector {
            receiver,
            dispatcher,
            encoder,
            compression,
            batch_size,
            batch_interval,
            executor,
            stats,
        }
    }

    /// spawns the collector on its executor
    pub fn spawn(self) -> Result<SenderHandle, Error> {
        let executor = self.executor.clone();
        let (abort, registration) = AbortHandle::new_pair();
        let (tx, done) = oneshot::channel();
        let task = Abortable::new(self.run(), registration);

        executor
            .spawn(Box::pin(async move {
                if task.await.is_err() {
                    debug!("producer background sender aborted");
                }
                let _ = tx.send(());
            }))
            .map_err(|_| Error::Executor)?;

        Ok(SenderHandle { abort, done })
    }

    pub async fn run(self) {
        debug!("starting producer background sender");
        if let Err(e) = self.dispatcher.client.reinitialize().await {
            error!("could not reinitialize the sender's cluster client: {}", e);
        }

        let mut carry_over: Vec<ProduceRequest> = Vec::new();
        loop {
            let budget = self.batch_size.saturating_sub(carry_over.len());
            let (envelopes, stop) = self.collect(budget).await;

            let mut requests = std::mem::take(&mut carry_over);
            requests.extend(self.encode(envelopes));

            if !requests.is_empty() {
                trace!("sending {} produce requests", requests.len());
                carry_over = self.dispatcher.dispatch(requests).await;
            }

            if stop {
                break;
            }
        }

        if !carry_over.is_empty() {
            warn!(
                "producer stopped with {} produce requests waiting for a retry, dropping them",
                carry_over.len()
            );
            self.stats.record_dropped(carry_over.len());
        }
        debug!("producer background sender stopped");
    }

    /// takes up to `budget` envelopes before the cycle deadline
    ///
    /// the returned flag is set when the stop marker was seen or every
    /// producer handle is gone. A cycle filled by carry-over does not read
    /// the queue and only checks whether the marker was queued.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
    async fn collect(&self, budget: usize) -> (Vec<Envelope>, bool) {
        let mut envelopes = Vec::new();
        if budget == 0 {
            let stop = self.receiver.stop_requested();
            if stop {
                debug!("stop requested while the batch is full of retries");
            }
            return (envelopes, stop);
        }

        let deadline = Instant::now() + self.batch_interval;
        while envelopes.len() < budget {
            let timeout = deadline.saturating_duration_since(Instant::now());
            if timeout.is_zero() {
                break;
            }
            match self.receiver.dequeue(&self.executor, timeout).await {
                Dequeued::Item(QueueItem::Message(envelope)) => envelopes.push(envelope),
                Dequeued::Item(QueueItem::Stop) => {
                    debug!("producer background sender received the stop marker");
                    return (envelopes, true);
                }
                Dequeued::Closed => {
                    debug!("producer work queue closed");
                    return (envelopes, true);
                }
                Dequeued::TimedOut => break,
            }
        }
        (envelopes, false)
    }

    /// one request per destination, in the order destinations were first seen
    fn encode(&self, envelopes: Vec<Envelope>) -> Vec<ProduceRequest> {
        let mut groups: Vec<(TopicPartition, Vec<(Bytes, Option<Bytes>)>)> = Vec::new();
        let mut positions: HashMap<TopicPartition, usize> = HashMap::new();

        for Envelope {
            destination,
            payload,
            key,
        } in envelopes
        {
            let position = match positions.get(&destination) {
                Some(position) => *position,
                None => {
                    positions.insert(destination.clone(), groups.len());
                    groups.push((destination, Vec::new()));
                    groups.len() - 1
                }
            };
            groups[position].1.push((payload, key));
        }

        let mut requests = Vec::with_capacity(groups.len());
        for (destination, messages) in groups {
            match self
                .encoder
                .encode_message_set(&messages, &self.compression)
            {
                Ok(set) => requests.push(ProduceRequest::new(destination, set)),
                Err(e) => {
                    error!(
                        "could not encode {} messages for {}, dropping them: {}",
                        messages.len(),
                        destination,
                        e
                    );
                    self.stats.record_dropped(1);
                }
            }
        }
        requests
    }
}
