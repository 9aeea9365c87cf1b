//! Cluster client boundary
//!
//! connection management, topic metadata and the request/response exchange
//! with brokers live behind [ClusterClient]; the producer only talks to the
//! cluster through it
use std::{fmt, time::Duration};

use async_trait::async_trait;

use crate::error::ClusterError;
use crate::message::MessageSet;

/// a topic partition, the unit of batching and routing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new<S: Into<String>>(topic: S, partition: i32) -> Self {
        TopicPartition {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// acknowledgements the broker must collect before answering a produce request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequiredAcks {
    /// no ack is required
    None,
    /// answer once the leader wrote the messages to its log
    #[default]
    Leader,
    /// answer once the messages are committed by all in-sync replicas
    All,
}

impl RequiredAcks {
    /// value sent on the wire
    pub fn as_i16(self) -> i16 {
        match self {
            RequiredAcks::None => 0,
            RequiredAcks::Leader => 1,
            RequiredAcks::All => -1,
        }
    }
}

/// an encoded message set addressed to one partition
///
/// `retries` counts how many times the request was carried over to a new
/// dispatch cycle after a failure
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceRequest {
    pub destination: TopicPartition,
    pub messages: MessageSet,
    pub retries: u32,
}

impl ProduceRequest {
    pub fn new(destination: TopicPartition, messages: MessageSet) -> Self {
        ProduceRequest {
            destination,
            messages,
            retries: 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.destination.topic
    }

    pub fn partition(&self) -> i32 {
        self.destination.partition
    }

    /// the same request, counted as retried once more
    pub(crate) fn retried(self) -> Self {
        ProduceRequest {
            retries: self.retries + 1,
            ..self
        }
    }
}

/// broker answer for one produce request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceResponse {
    pub destination: TopicPartition,
    pub error_code: i16,
    /// offset assigned to the first message of the set
    pub offset: i64,
}

/// Access to the brokers of a cluster
///
/// Implementations own their connections. [clone_independent] must return a
/// handle that does not share connection state with `self`: the background
/// sender of an asynchronous producer works on such a handle so that its
/// requests never interleave with synchronous sends.
///
/// [clone_independent]: ClusterClient::clone_independent
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    fn clone_independent(&self) -> Self
    where
        Self: Sized;

    /// drops and reopens broker connections
    async fn reinitialize(&self) -> Result<(), ClusterError>;

    /// sends the requests, grouped by leader broker
    ///
    /// a partial failure must be reported as
    /// [ClusterError::FailedPayloads] with the indices of the failed requests
    async fn send_produce_requests(
        &self,
        requests: &[ProduceRequest],
        acks: RequiredAcks,
        timeout: Duration,
    ) -> Result<Vec<ProduceResponse>, ClusterError>;

    /// reloads topic and partition leadership metadata
    async fn refresh_metadata(&self) -> Result<(), ClusterError>;

    /// partition ids of a topic, from the cached metadata
    async fn partitions_for_topic(&self, topic: &str) -> Result<Vec<i32>, ClusterError>;
}
