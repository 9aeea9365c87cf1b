//! Producer facade
//!
//! A [Producer] sends either synchronously, one produce request per call
//! through the caller's [ClusterClient], or asynchronously: messages are put
//! on a work queue that a background sender drains in batches, retrying
//! failed requests according to [RetryOptions]. Asynchronous delivery is best
//! effort: queued messages are lost if the process dies, and delivery errors
//! are logged, never reported to the caller.
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use futures::future::{select, Either};

use crate::{
    batch::{BatchCollector, SenderHandle},
    cluster::{ClusterClient, ProduceRequest, ProduceResponse, RequiredAcks, TopicPartition},
    compression::Compression,
    error::{Error, ProducerError},
    executor::Executor,
    message::{KafkaMessageSetEncoder, MessageSetEncoder, SerializeMessage},
    queue::{Envelope, WorkQueue},
    retry_op::{Dispatcher, RetryOptions},
    routing_policy::{PartitionRouter, RoutingPolicy},
};

/// default wait for the background sender when stopping
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

const MAX_TOPIC_LENGTH: usize = 249;
const UNBATCHED_INTERVAL: Duration = Duration::from_secs(3600);

/// Configuration of a [Producer]
#[derive(Clone, Debug)]
pub struct ProducerOptions {
    /// queue messages and send them from a background task
    pub asynchronous: bool,
    /// group queued messages into batches; implies `asynchronous`
    pub batch_send: bool,
    pub required_acks: RequiredAcks,
    /// how long the broker may wait for acknowledgements
    pub ack_timeout: Duration,
    pub compression: Compression,
    /// maximum number of messages collected in one cycle
    pub batch_size: u32,
    /// maximum time spent collecting one cycle
    pub batch_interval: Duration,
    /// maximum number of queued messages, 0 for no limit
    pub queue_capacity: usize,
    pub retry_options: RetryOptions,
    /// partition selection for [Producer::send_to_topic]
    pub routing_policy: RoutingPolicy,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        ProducerOptions {
            asynchronous: false,
            batch_send: false,
            required_acks: RequiredAcks::Leader,
            ack_timeout: Duration::from_millis(1000),
            compression: Compression::None,
            batch_size: 20,
            batch_interval: Duration::from_secs(20),
            queue_capacity: 0,
            retry_options: RetryOptions::default(),
            routing_policy: RoutingPolicy::default(),
        }
    }
}

impl ProducerOptions {
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    /// batches of at most `batch_size` messages, sent at least every
    /// `batch_interval`
    pub fn with_batch_send(mut self, batch_size: u32, batch_interval: Duration) -> Self {
        self.batch_send = true;
        self.batch_size = batch_size;
        self.batch_interval = batch_interval;
        self
    }

    pub fn with_required_acks(mut self, required_acks: RequiredAcks) -> Self {
        self.required_acks = required_acks;
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_retry_options(mut self, retry_options: RetryOptions) -> Self {
        self.retry_options = retry_options;
        self
    }

    pub fn with_routing_policy(mut self, routing_policy: RoutingPolicy) -> Self {
        self.routing_policy = routing_policy;
        self
    }

    /// checks the options and resolves the batching parameters
    ///
    /// without `batch_send`, every queued message is sent on its own
    pub(crate) fn normalize(mut self) -> Result<Self, ProducerError> {
        if self.batch_send {
            self.asynchronous = true;
            if self.batch_size == 0 {
                return Err(ProducerError::InvalidConfig(
                    "batch size must be greater than 0".to_string(),
                ));
            }
            if self.batch_interval.is_zero() {
                return Err(ProducerError::InvalidConfig(
                    "batch interval must be greater than 0".to_string(),
                ));
            }
        } else {
            self.batch_size = 1;
            self.batch_interval = UNBATCHED_INTERVAL;
        }

        if !self.compression.is_supported() {
            return Err(ProducerError::UnsupportedCodec(
                self.compression.name().to_string(),
            ));
        }
        Ok(self)
    }
}

/// counters shared by a producer and its background sender
#[derive(Debug, Default)]
pub(crate) struct ProducerStats {
    messages_enqueued: AtomicU64,
    requests_sent: AtomicU64,
    requests_retried: AtomicU64,
    requests_dropped: AtomicU64,
}

impl ProducerStats {
    pub fn record_enqueued(&self, count: usize) {
        self.messages_enqueued
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, count: usize) {
        self.requests_sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_retried(&self, count: usize) {
        self.requests_retried
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: usize) {
        self.requests_dropped
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_retried: self.requests_retried.load(Ordering::Relaxed),
            requests_dropped: self.requests_dropped.load(Ordering::Relaxed),
        }
    }
}

/// producer counters at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// messages accepted by the asynchronous queue
    pub messages_enqueued: u64,
    /// produce requests handed to the cluster client, retries included
    pub requests_sent: u64,
    pub requests_retried: u64,
    /// requests given up on: retry limit, fatal errors, encoding errors, or
    /// still pending a retry at shutdown
    pub requests_dropped: u64,
}

/// Helper structure to prepare a producer
///
/// ```rust,no_run
/// # async fn run<C: logbatch::ClusterClient>(client: C) -> Result<(), logbatch::Error> {
/// use std::time::Duration;
/// use logbatch::{Producer, ProducerOptions, TokioExecutor};
///
/// let producer = Producer::builder(client, TokioExecutor)
///     .with_options(ProducerOptions::default().with_batch_send(100, Duration::from_secs(1)))
///     .build()?;
/// producer.send_messages("events", 0, vec![b"hello".to_vec()]).await?;
/// producer.stop(Duration::from_secs(5)).await;
/// # Ok(())
/// # }
/// ```
pub struct ProducerBuilder<C: ClusterClient, Exe: Executor> {
    client: C,
    executor: Exe,
    options: Option<ProducerOptions>,
    encoder: Option<Arc<dyn MessageSetEncoder>>,
}

impl<C: ClusterClient, Exe: Executor> ProducerBuilder<C, Exe> {
    pub fn new(client: C, executor: Exe) -> Self {
        ProducerBuilder {
            client,
            executor,
            options: None,
            encoder: None,
        }
    }

    pub fn with_options(self, options: ProducerOptions) -> Self {
        ProducerBuilder {
            options: Some(options),
            ..self
        }
    }

    /// replaces the message set encoder, [KafkaMessageSetEncoder] by default
    pub fn with_encoder<E: MessageSetEncoder>(self, encoder: E) -> Self {
        ProducerBuilder {
            encoder: Some(Arc::new(encoder)),
            ..self
        }
    }

    /// validates the options and, in asynchronous mode, spawns the
    /// background sender on an independent client handle
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
    pub fn build(self) -> Result<Producer<C, Exe>, Error> {
        let ProducerBuilder {
            client,
            executor,
            options,
            encoder,
        } = self;
        let options = options.unwrap_or_default().normalize()?;
        let encoder = encoder.unwrap_or_else(|| Arc::new(KafkaMessageSetEncoder));
        let stats = Arc::new(ProducerStats::default());

        let (queue, sender) = if options.asynchronous {
            let (queue, receiver) = WorkQueue::new(options.queue_capacity);
            let dispatcher = Dispatcher::new(
                client.clone_independent(),
                options.required_acks,
                options.ack_timeout,
                options.retry_options.clone(),
                executor.clone(),
                stats.clone(),
            );
            let collector = BatchCollector::new(
                receiver,
                dispatcher,
                encoder.clone(),
                options.compression.clone(),
                options.batch_size as usize,
                options.batch_interval,
                executor.clone(),
                stats.clone(),
            );
            let handle = collector.spawn()?;
            debug!(
                "started asynchronous producer (batch size {}, interval {:?})",
                options.batch_size, options.batch_interval
            );
            (Some(queue), Some(handle))
        } else {
            (None, None)
        };

        Ok(Producer {
            router: PartitionRouter::new(options.routing_policy.clone()),
            client,
            executor,
            options,
            encoder,
            queue,
            sender: Mutex::new(sender),
            stopped: AtomicBool::new(false),
            stats,
        })
    }
}

/// a producer sending to arbitrary topic partitions of a cluster
pub struct Producer<C: ClusterClient, Exe: Executor> {
    client: C,
    executor: Exe,
    options: ProducerOptions,
    encoder: Arc<dyn MessageSetEncoder>,
    /// present in asynchronous mode only
    queue: Option<WorkQueue>,
    sender: Mutex<Option<SenderHandle>>,
    stopped: AtomicBool,
    stats: Arc<ProducerStats>,
    router: PartitionRouter,
}

impl<C: ClusterClient, Exe: Executor> Producer<C, Exe> {
    pub fn builder(client: C, executor: Exe) -> ProducerBuilder<C, Exe> {
        ProducerBuilder::new(client, executor)
    }

    pub fn options(&self) -> &ProducerOptions {
        &self.options
    }

    pub fn is_asynchronous(&self) -> bool {
        self.queue.is_some()
    }

    /// number of messages waiting in the asynchronous queue
    pub fn queue_len(&self) -> usize {
        self.queue.as_ref().map(|q| q.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// sends unkeyed messages to a partition
    ///
    /// synchronous producers return the broker responses; asynchronous
    /// producers return an empty list once every message is queued
    pub async fn send_messages<T, I>(
        &self,
        topic: &str,
        partition: i32,
        messages: I,
    ) -> Result<Vec<ProduceResponse>, Error>
    where
        T: SerializeMessage,
        I: IntoIterator<Item = T>,
    {
        self.send(topic, partition, None, messages).await
    }

    /// sends messages that all carry `key`
    pub async fn send_keyed_messages<K, T, I>(
        &self,
        topic: &str,
        partition: i32,
        key: K,
        messages: I,
    ) -> Result<Vec<ProduceResponse>, Error>
    where
        K: SerializeMessage,
        T: SerializeMessage,
        I: IntoIterator<Item = T>,
    {
        let key = K::serialize_message(key)?;
        self.send(topic, partition, Some(key), messages).await
    }

    /// sends unkeyed messages to a partition chosen by the routing policy
    ///
    /// the partitions of a topic are looked up once and cached until a send
    /// fails with a routing error
    pub async fn send_to_topic<T, I>(
        &self,
        topic: &str,
        messages: I,
    ) -> Result<Vec<ProduceResponse>, Error>
    where
        T: SerializeMessage,
        I: IntoIterator<Item = T>,
    {
        self.route_and_send(topic, None, messages).await
    }

    /// sends messages that all carry `key` to a partition chosen by the
    /// routing policy
    pub async fn send_keyed_to_topic<K, T, I>(
        &self,
        topic: &str,
        key: K,
        messages: I,
    ) -> Result<Vec<ProduceResponse>, Error>
    where
        K: SerializeMessage,
        T: SerializeMessage,
        I: IntoIterator<Item = T>,
    {
        let key = K::serialize_message(key)?;
        self.route_and_send(topic, Some(key), messages).await
    }

    async fn route_and_send<T, I>(
        &self,
        topic: &str,
        key: Option<Bytes>,
        messages: I,
    ) -> Result<Vec<ProduceResponse>, Error>
    where
        T: SerializeMessage,
        I: IntoIterator<Item = T>,
    {
        validate_topic(topic)?;
        let partitions = match self.router.cached_partitions(topic) {
            Some(partitions) => partitions,
            None => {
                let partitions = self.client.partitions_for_topic(topic).await?;
                self.router.cache_partitions(topic, partitions.clone());
                partitions
            }
        };
        let partition = self.router.choose(topic, key.as_deref(), &partitions)?;
        trace!("routing message for topic {} to partition {}", topic, partition);

        let result = self.send(topic, partition, key, messages).await;
        if let Err(Error::Cluster(e)) = &result {
            if e.requires_metadata_refresh() {
                debug!("forgetting the partitions of {} after: {}", topic, e);
                self.router.forget_partitions(topic);
            }
        }
        result
    }

    async fn send<T, I>(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        messages: I,
    ) -> Result<Vec<ProduceResponse>, Error>
    where
        T: SerializeMessage,
        I: IntoIterator<Item = T>,
    {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ProducerError::Closed.into());
        }
        validate_topic(topic)?;
        if partition < 0 {
            return Err(ProducerError::validation(
                "partition",
                format!("partition must not be negative, got {}", partition),
            )
            .into());
        }

        let payloads = messages
            .into_iter()
            .map(T::serialize_message)
            .collect::<Result<Vec<Bytes>, Error>>()?;
        if payloads.is_empty() {
            return Err(
                ProducerError::validation("messages", "at least one message is required").into(),
            );
        }

        let destination = TopicPartition::new(topic, partition);
        match &self.queue {
            Some(queue) => {
                self.enqueue(queue, destination, key, payloads)?;
                Ok(Vec::new())
            }
            None => self.send_sync(destination, key, payloads).await,
        }
    }

    fn enqueue(
        &self,
        queue: &WorkQueue,
        destination: TopicPartition,
        key: Option<Bytes>,
        payloads: Vec<Bytes>,
    ) -> Result<(), Error> {
        for payload in payloads {
            let envelope = Envelope {
                destination: destination.clone(),
                payload,
                key: key.clone(),
            };
            if let Err(e) = queue.try_enqueue(envelope) {
                warn!("could not queue message for {}: {}", destination, e);
                return Err(e.into());
            }
            self.stats.record_enqueued(1);
        }
        Ok(())
    }

    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
    async fn send_sync(
        &self,
        destination: TopicPartition,
        key: Option<Bytes>,
        payloads: Vec<Bytes>,
    ) -> Result<Vec<ProduceResponse>, Error> {
        let messages: Vec<(Bytes, Option<Bytes>)> =
            payloads.into_iter().map(|p| (p, key.clone())).collect();
        let set = self
            .encoder
            .encode_message_set(&messages, &self.options.compression)?;
        let request = ProduceRequest::new(destination, set);

        self.stats.record_sent(1);
        let responses = self
            .client
            .send_produce_requests(
                std::slice::from_ref(&request),
                self.options.required_acks,
                self.options.ack_timeout,
            )
            .await?;
        Ok(responses)
    }

    /// stops the producer
    ///
    /// in asynchronous mode, the background sender is asked to send what it
    /// collected and exit; if it is still running after `timeout` it is
    /// aborted. Calling it again does nothing. Sends fail with
    /// [ProducerError::Closed] afterwards.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
    pub async fn stop(&self, timeout: Duration) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let handle = match handle {
            Some(handle) => handle,
            None => return,
        };

        if let Some(queue) = &self.queue {
            queue.enqueue_stop();
        }

        match select(handle.done, self.executor.delay(timeout)).await {
            Either::Left(_) => debug!("producer stopped"),
            Either::Right(_) => {
                warn!(
                    "producer background sender still running after {:?}, aborting it",
                    timeout
                );
                handle.abort.abort();
            }
        }
    }
}

impl<C: ClusterClient, Exe: Executor> Drop for Producer<C, Exe> {
    /// stops like [Producer::stop] with [DEFAULT_STOP_TIMEOUT], without
    /// waiting: a detached task aborts the background sender if it is still
    /// running once the timeout elapsed
    fn drop(&mut self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self
            .sender
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let (queue, SenderHandle { abort, done }) = match (&self.queue, handle) {
            (Some(queue), Some(handle)) => (queue, handle),
            _ => return,
        };

        debug!("producer dropped without stop, flushing in the background");
        queue.enqueue_stop();

        let delay = self.executor.delay(DEFAULT_STOP_TIMEOUT);
        let watchdog_abort = abort.clone();
        let watchdog = async move {
            if let Either::Right(_) = select(done, delay).await {
                warn!(
                    "producer background sender still running {:?} after the producer was dropped, aborting it",
                    DEFAULT_STOP_TIMEOUT
                );
                watchdog_abort.abort();
            }
        };
        if self.executor.spawn(Box::pin(watchdog)).is_err() {
            warn!("could not watch the producer background sender, aborting it");
            abort.abort();
        }
    }
}

/// topic names follow the broker's rules: 1 to 249 characters out of
/// `[a-zA-Z0-9._-]`, and neither `.` nor `..`
fn validate_topic(topic: &str) -> Result<(), ProducerError> {
    if topic.is_empty() {
        return Err(ProducerError::validation(
            "topic",
            "topic name must not be empty",
        ));
    }
    if topic == "." || topic == ".." {
        return Err(ProducerError::validation(
            "topic",
            format!("topic name cannot be \"{}\"", topic),
        ));
    }
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err(ProducerError::validation(
            "topic",
            format!(
                "topic name is {} characters long, the maximum is {}",
                topic.len(),
                MAX_TOPIC_LENGTH
            ),
        ));
    }
    if let Some(c) = topic
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(ProducerError::validation(
            "topic",
            format!("illegal character {:?} in topic name", c),
        ));
    }
    Ok(())
}
