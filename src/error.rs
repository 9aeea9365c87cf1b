//! Error types
use std::{fmt, io};

use crate::cluster::TopicPartition;

#[derive(Debug)]
pub enum Error {
    Producer(ProducerError),
    Cluster(ClusterError),
    Codec(CodecError),
    Custom(String),
    Executor,
}

impl From<ProducerError> for Error {
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
    fn from(err: ProducerError) -> Self {
        Error::Producer(err)
    }
}

impl From<ClusterError> for Error {
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
    fn from(err: ClusterError) -> Self {
        Error::Cluster(err)
    }
}

impl From<CodecError> for Error {
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
    fn from(err: CodecError) -> Self {
        Error::Codec(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Producer(e) => write!(f, "producer error: {}", e),
            Error::Cluster(e) => write!(f, "cluster error: {}", e),
            Error::Codec(e) => write!(f, "codec error: {}", e),
            Error::Custom(e) => write!(f, "error: {}", e),
            Error::Executor => write!(f, "could not spawn task"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Producer(e) => Some(e),
            Error::Cluster(e) => Some(e),
            Error::Codec(e) => Some(e),
            Error::Custom(_) => None,
            Error::Executor => None,
        }
    }
}

/// Errors raised by the producer itself, before anything reaches the cluster
#[derive(Debug)]
pub enum ProducerError {
    /// the options cannot describe a working producer
    InvalidConfig(String),
    /// the requested compression codec is not compiled in
    UnsupportedCodec(String),
    /// an argument of a send call was rejected
    Validation {
        argument: &'static str,
        reason: String,
    },
    /// the asynchronous queue is at capacity; `depth` is the number of
    /// queued items at the time of the rejection
    QueueFull { depth: usize },
    /// the producer was stopped
    Closed,
}

impl ProducerError {
    pub(crate) fn validation<S: Into<String>>(argument: &'static str, reason: S) -> Self {
        ProducerError::Validation {
            argument,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProducerError::InvalidConfig(s) => write!(f, "invalid producer configuration: {}", s),
            ProducerError::UnsupportedCodec(s) => write!(f, "codec {} unsupported", s),
            ProducerError::Validation { argument, reason } => {
                write!(f, "invalid argument `{}`: {}", argument, reason)
            }
            ProducerError::QueueFull { depth } => write!(
                f,
                "producer async queue overfilled, current queue size {}",
                depth
            ),
            ProducerError::Closed => write!(f, "the producer was stopped"),
        }
    }
}

impl std::error::Error for ProducerError {}

/// Errors reported by a [ClusterClient](crate::ClusterClient)
///
/// This is a closed set: the dispatcher decides what to retry by matching on
/// the variant.
#[derive(Debug)]
pub enum ClusterError {
    /// some requests of a batch failed; the indices point into the request
    /// slice that was sent, every other request was delivered
    FailedPayloads(Vec<usize>),
    /// the broker did not acknowledge within the ack timeout
    RequestTimedOut,
    /// no broker could be reached
    BrokerUnavailable(String),
    LeaderNotAvailable(TopicPartition),
    NotLeaderForPartition(TopicPartition),
    UnknownTopicOrPartition(TopicPartition),
    Connection(io::Error),
    /// any error the dispatcher must not retry
    Fatal(String),
}

impl ClusterError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClusterError::Fatal(_))
    }

    /// the cluster is overloaded or unreachable, wait before trying again
    ///
    /// a timed out request is retried in the next cycle without waiting
    pub fn requires_backoff(&self) -> bool {
        matches!(
            self,
            ClusterError::FailedPayloads(_)
                | ClusterError::BrokerUnavailable(_)
                | ClusterError::LeaderNotAvailable(_)
                | ClusterError::Connection(_)
        )
    }

    /// routing information is probably stale
    pub fn requires_metadata_refresh(&self) -> bool {
        matches!(
            self,
            ClusterError::NotLeaderForPartition(_)
                | ClusterError::UnknownTopicOrPartition(_)
                | ClusterError::LeaderNotAvailable(_)
                | ClusterError::Connection(_)
        )
    }
}

impl From<io::Error> for ClusterError {
    fn from(err: io::Error) -> Self {
        ClusterError::Connection(err)
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClusterError::FailedPayloads(failed) => {
                write!(f, "{} produce requests failed", failed.len())
            }
            ClusterError::RequestTimedOut => write!(f, "request timed out"),
            ClusterError::BrokerUnavailable(s) => write!(f, "all brokers unavailable: {}", s),
            ClusterError::LeaderNotAvailable(tp) => {
                write!(f, "leader not available for {}", tp)
            }
            ClusterError::NotLeaderForPartition(tp) => {
                write!(f, "broker is not the leader for {}", tp)
            }
            ClusterError::UnknownTopicOrPartition(tp) => {
                write!(f, "unknown topic or partition {}", tp)
            }
            ClusterError::Connection(e) => write!(f, "connection error: {}", e),
            ClusterError::Fatal(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for ClusterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClusterError::Connection(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum CodecError {
    UnsupportedCodec(u8),
    Io(io::Error),
    Truncated,
    Checksum { expected: u32, actual: u32 },
    InvalidMagic(i8),
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        CodecError::Io(err)
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::UnsupportedCodec(id) => write!(f, "codec 0x{:02x} unsupported", id),
            CodecError::Io(e) => write!(f, "compression error: {}", e),
            CodecError::Truncated => write!(f, "message set is truncated"),
            CodecError::Checksum { expected, actual } => write!(
                f,
                "checksum mismatch: expected {:08x}, found {:08x}",
                expected, actual
            ),
            CodecError::InvalidMagic(m) => write!(f, "unknown message magic byte {}", m),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_flags() {
        let tp = TopicPartition::new("orders", 0);

        assert!(ClusterError::FailedPayloads(vec![0]).requires_backoff());
        assert!(!ClusterError::FailedPayloads(vec![0]).requires_metadata_refresh());

        assert!(ClusterError::NotLeaderForPartition(tp.clone()).requires_metadata_refresh());
        assert!(!ClusterError::NotLeaderForPartition(tp.clone()).requires_backoff());

        assert!(ClusterError::LeaderNotAvailable(tp.clone()).requires_backoff());
        assert!(ClusterError::LeaderNotAvailable(tp).requires_metadata_refresh());

        assert!(ClusterError::RequestTimedOut.is_retryable());
        assert!(!ClusterError::RequestTimedOut.requires_backoff());
        assert!(!ClusterError::RequestTimedOut.requires_metadata_refresh());
        assert!(!ClusterError::Fatal("boom".to_string()).is_retryable());
        assert!(!ClusterError::Fatal("boom".to_string()).requires_backoff());
    }

    #[test]
    fn queue_full_reports_depth() {
        let err: Error = ProducerError::QueueFull { depth: 3 }.into();
        assert_eq!(
            err.to_string(),
            "producer error: producer async queue overfilled, current queue size 3"
        );
    }

    #[test]
    fn validation_names_argument() {
        let err = ProducerError::validation("topic", "must not be empty");
        assert_eq!(err.to_string(), "invalid argument `topic`: must not be empty");
    }
}
