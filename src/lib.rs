//! # Batching producer for Kafka-like partitioned logs
//!
//! This crate is the publishing core of a client for a partitioned, broker
//! based message log. It takes messages addressed to a topic partition and
//! either sends them right away or queues them for a background sender that
//! groups them into batched produce requests and retries failed requests
//! with backoff and metadata refreshes.
//!
//! Broker connections and metadata live behind the [ClusterClient] trait,
//! and message sets are built by a [MessageSetEncoder] ([KafkaMessageSetEncoder]
//! by default). The background sender runs on an [Executor], with
//! implementations for tokio (`tokio-runtime` feature, on by default) and
//! async-std (`async-std-runtime` feature).
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use logbatch::{
//!     ClusterClient, Error, Producer, ProducerOptions, RetryOptions, TokioExecutor,
//! };
//!
//! async fn publish<C: ClusterClient>(client: C) -> Result<(), Error> {
//!     let options = ProducerOptions::default()
//!         .with_batch_send(50, Duration::from_millis(200))
//!         .with_queue_capacity(10_000)
//!         .with_retry_options(RetryOptions::default().with_limit(3));
//!
//!     let producer = Producer::builder(client, TokioExecutor)
//!         .with_options(options)
//!         .build()?;
//!
//!     for i in 0..100u32 {
//!         producer
//!             .send_keyed_messages("events", 0, b"sensor-1", vec![i.to_be_bytes().to_vec()])
//!             .await?;
//!     }
//!
//!     // flushes what is still queued
//!     producer.stop(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```
#[macro_use]
extern crate log;

mod batch;
pub mod cluster;
pub mod compression;
pub mod error;
pub mod executor;
pub mod message;
pub mod producer;
mod queue;
pub mod retry_op;
pub mod routing_policy;

#[cfg(all(test, feature = "tokio-runtime"))]
mod test_utils;

pub use cluster::{ClusterClient, ProduceRequest, ProduceResponse, RequiredAcks, TopicPartition};
pub use compression::Compression;
pub use error::Error;
#[cfg(feature = "async-std-runtime")]
pub use executor::AsyncStdExecutor;
pub use executor::Executor;
#[cfg(feature = "tokio-runtime")]
pub use executor::TokioExecutor;
pub use message::{
    decode_message_set, DecodedMessage, KafkaMessageSetEncoder, MessageSet, MessageSetEncoder,
    SerializeMessage,
};
pub use producer::{
    Producer, ProducerBuilder, ProducerOptions, StatsSnapshot, DEFAULT_STOP_TIMEOUT,
};
pub use queue::Envelope;
pub use retry_op::RetryOptions;
pub use routing_policy::{CustomRoutingPolicy, RoutingPolicy};

#[cfg(test)]
mod tests {
    use log::{Metadata, Record};

    pub struct SimpleLogger {
        pub tag: &'static str,
    }

    impl log::Log for SimpleLogger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                println!(
                    "{} {}\t{}\t{}\t{}",
                    chrono::Utc::now(),
                    self.tag,
                    record.level(),
                    record.module_path().unwrap_or_default(),
                    record.args()
                );
            }
        }

        fn flush(&self) {}
    }

    pub static TEST_LOGGER: SimpleLogger = SimpleLogger { tag: "" };
}
