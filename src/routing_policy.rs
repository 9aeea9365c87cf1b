use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use murmur3::murmur3_32;
use rand::Rng;

use crate::error::ProducerError;

/// how [Producer::send_to_topic](crate::Producer::send_to_topic) picks a
/// partition
#[derive(Clone)]
pub enum RoutingPolicy {
    /// cycle through the partitions of each topic, optionally starting at a
    /// random one
    RoundRobin { random_start: bool },
    /// hash the message key; unkeyed messages are distributed round robin
    Hashed,
    Custom(Arc<dyn CustomRoutingPolicy>),
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        RoutingPolicy::RoundRobin {
            random_start: false,
        }
    }
}

impl fmt::Debug for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RoutingPolicy::RoundRobin { random_start } => f
                .debug_struct("RoundRobin")
                .field("random_start", random_start)
                .finish(),
            RoutingPolicy::Hashed => write!(f, "Hashed"),
            RoutingPolicy::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl RoutingPolicy {
    pub fn compute_partition_index_for_key(key: &[u8], partition_count: usize) -> usize {
        // fixed seed, so a key maps to the same partition across restarts
        let hash = murmur3_32(&mut &key[..], 0).unwrap_or(0);
        (hash % partition_count as u32) as usize
    }
}

pub trait CustomRoutingPolicy: Send + Sync {
    /// returns an index into `partitions`, which is never empty
    fn route(&self, topic: &str, key: Option<&[u8]>, partitions: &[i32]) -> usize;
}

/// routing state of a producer: round robin cursors and the partitions of
/// every topic seen so far
pub(crate) struct PartitionRouter {
    policy: RoutingPolicy,
    cursors: Mutex<HashMap<String, usize>>,
    partitions: Mutex<HashMap<String, Vec<i32>>>,
}

impl PartitionRouter {
    pub fn new(policy: RoutingPolicy) -> Self {
        PartitionRouter {
            policy,
            cursors: Mutex::new(HashMap::new()),
            partitions: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_partitions(&self, topic: &str) -> Option<Vec<i32>> {
        self.partitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .cloned()
    }

    pub fn cache_partitions(&self, topic: &str, partitions: Vec<i32>) {
        self.partitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string(), partitions);
    }

    /// drops the cached partitions of `topic`, the next send looks them up again
    pub fn forget_partitions(&self, topic: &str) {
        self.partitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic);
    }

    pub fn choose(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        partitions: &[i32],
    ) -> Result<i32, ProducerError> {
        if partitions.is_empty() {
            return Err(ProducerError::validation(
                "topic",
                format!("topic {} has no partitions", topic),
            ));
        }

        let index = match (&self.policy, key) {
            (RoutingPolicy::RoundRobin { random_start }, _) => {
                self.next(topic, partitions.len(), *random_start)
            }
            (RoutingPolicy::Hashed, Some(key)) => {
                RoutingPolicy::compute_partition_index_for_key(key, partitions.len())
            }
            (RoutingPolicy::Hashed, None) => self.next(topic, partitions.len(), false),
            (RoutingPolicy::Custom(policy), key) => policy.route(topic, key, partitions),
        };

        partitions.get(index).copied().ok_or_else(|| {
            ProducerError::validation(
                "partition",
                format!(
                    "routing policy chose index {} but topic {} has {} partitions",
                    index,
                    topic,
                    partitions.len()
                ),
            )
        })
    }

    fn next(&self, topic: &str, partition_count: usize, random_start: bool) -> usize {
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        let cursor = cursors.entry(topic.to_string()).or_insert_with(|| {
            if random_start {
                rand::thread_rng().gen_range(0..partition_count)
            } else {
                0
            }
        });
        let index = *cursor % partition_count;
        *cursor = cursor.wrapping_add(1);
        index
    }
}
