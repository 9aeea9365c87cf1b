use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use log::LevelFilter;

use crate::{
    cluster::{ClusterClient, ProduceRequest, ProduceResponse, RequiredAcks, TopicPartition},
    error::ClusterError,
    executor::Executor,
    tests::TEST_LOGGER,
};

pub(crate) fn init_logger() {
    let _result = log::set_logger(&TEST_LOGGER);
    log::set_max_level(LevelFilter::Debug);
}

/// a produce call seen by [MockCluster]
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub requests: Vec<ProduceRequest>,
    pub at: Instant,
}

type Behavior = Arc<dyn Fn(&[ProduceRequest]) -> Result<(), ClusterError> + Send + Sync>;

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<RecordedCall>>,
    refreshes: AtomicUsize,
    reinitializations: AtomicUsize,
    clones: AtomicUsize,
    partition_lookups: AtomicUsize,
}

/// in-memory cluster answering produce calls with a scripted outcome
///
/// every handle, independent clones included, records into the same state
#[derive(Clone)]
pub(crate) struct MockCluster {
    state: Arc<MockState>,
    behavior: Option<Behavior>,
    partitions: HashMap<String, Vec<i32>>,
    fail_refresh: bool,
    fail_reinitialize: bool,
}

impl MockCluster {
    pub fn new() -> Self {
        MockCluster {
            state: Arc::new(MockState::default()),
            behavior: None,
            partitions: HashMap::new(),
            fail_refresh: false,
            fail_reinitialize: false,
        }
    }

    /// outcome of each produce call, success if not set
    pub fn with_behavior<F>(mut self, behavior: F) -> Self
    where
        F: Fn(&[ProduceRequest]) -> Result<(), ClusterError> + Send + Sync + 'static,
    {
        self.behavior = Some(Arc::new(behavior));
        self
    }

    pub fn with_partitions(mut self, topic: &str, partitions: Vec<i32>) -> Self {
        self.partitions.insert(topic.to_string(), partitions);
        self
    }

    pub fn with_failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub fn with_failing_reinitialize(mut self) -> Self {
        self.fail_reinitialize = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn send_count(&self) -> usize {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn refresh_count(&self) -> usize {
        self.state.refreshes.load(Ordering::SeqCst)
    }

    pub fn reinitialize_count(&self) -> usize {
        self.state.reinitializations.load(Ordering::SeqCst)
    }

    pub fn clone_count(&self) -> usize {
        self.state.clones.load(Ordering::SeqCst)
    }

    pub fn partition_lookups(&self) -> usize {
        self.state.partition_lookups.load(Ordering::SeqCst)
    }

    /// number of live handles on the shared state, this one included
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.state)
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    fn clone_independent(&self) -> Self {
        self.state.clones.fetch_add(1, Ordering::SeqCst);
        self.clone()
    }

    async fn reinitialize(&self) -> Result<(), ClusterError> {
        self.state.reinitializations.fetch_add(1, Ordering::SeqCst);
        if self.fail_reinitialize {
            return Err(ClusterError::BrokerUnavailable("mock".to_string()));
        }
        Ok(())
    }

    async fn send_produce_requests(
        &self,
        requests: &[ProduceRequest],
        _acks: RequiredAcks,
        _timeout: Duration,
    ) -> Result<Vec<ProduceResponse>, ClusterError> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                requests: requests.to_vec(),
                at: Instant::now(),
            });

        if let Some(behavior) = &self.behavior {
            behavior(requests)?;
        }
        Ok(requests
            .iter()
            .map(|r| ProduceResponse {
                destination: r.destination.clone(),
                error_code: 0,
                offset: 0,
            })
            .collect())
    }

    async fn refresh_metadata(&self) -> Result<(), ClusterError> {
        self.state.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(ClusterError::BrokerUnavailable("mock".to_string()));
        }
        Ok(())
    }

    async fn partitions_for_topic(&self, topic: &str) -> Result<Vec<i32>, ClusterError> {
        self.state.partition_lookups.fetch_add(1, Ordering::SeqCst);
        self.partitions
            .get(topic)
            .cloned()
            .ok_or_else(|| ClusterError::UnknownTopicOrPartition(TopicPartition::new(topic, -1)))
    }
}

/// executor that accepts tasks and never runs them
#[derive(Clone, Default)]
pub(crate) struct ParkedExecutor {
    parked: Arc<Mutex<Vec<Pin<Box<dyn Future<Output = ()> + Send>>>>>,
}

impl Executor for ParkedExecutor {
    fn spawn(&self, f: Pin<Box<dyn Future<Output = ()> + Send>>) -> Result<(), ()> {
        self.parked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(f);
        Ok(())
    }

    fn delay(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}
