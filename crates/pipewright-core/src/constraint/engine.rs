use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use pipewright_types::constraint::{
    AcquireOutcome, ConstraintKind, Consumer, ConsumerState, ResourceConstraint, ResourceSnapshot,
};
use pipewright_types::event::OrchestrationEvent;
use tokio::sync::Mutex;

use super::ConstraintError;
use crate::event::EventBus;
use crate::repository::ConstraintRepository;

/// Result of an acquire call.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub outcome: AcquireOutcome,
    /// Other consumers admitted by this call (a completed barrier).
    pub granted: Vec<Consumer>,
}

pub struct ConstraintEngine<S> {
    store: S,
    bus: EventBus,
    ledgers: DashMap<String, Arc<Mutex<()>>>,
    sequence: AtomicU64,
}

impl<S: ConstraintRepository> ConstraintEngine<S> {
    pub fn new(store: S, bus: EventBus) -> Self {
        // Seeded from the clock so arrival order survives a restart.
        let seed = Utc::now().timestamp_micros().max(0) as u64;
        Self {
            store,
            bus,
            ledgers: DashMap::new(),
            sequence: AtomicU64::new(seed),
        }
    }

    /// Declare (or re-declare) a resource.
    pub async fn register(&self, constraint: ResourceConstraint) -> Result<(), ConstraintError> {
        if constraint.capacity == 0 {
            return Err(ConstraintError::InvalidRequest {
                key: constraint.key,
                message: "capacity must be at least 1".to_string(),
            });
        }
        self.store.save_constraint(&constraint).await?;
        tracing::debug!(
            resource_key = %constraint.key,
            capacity = constraint.capacity,
            kind = ?constraint.kind,
            "resource registered"
        );
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<ResourceConstraint>, ConstraintError> {
        Ok(self.store.get_constraint(key).await?)
    }

    fn ledger(&self, key: &str) -> Arc<Mutex<()>> {
        self.ledgers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Request `permits` on `key` for `consumer_id`. Repeating a request
    /// for a consumer that is already queued or admitted reports its
    /// current state without queueing it twice.
    pub async fn acquire(
        &self,
        key: &str,
        consumer_id: &str,
        permits: u32,
        priority: i32,
    ) -> Result<Acquisition, ConstraintError> {
        let ledger = self.ledger(key);
        let _guard = ledger.lock().await;

        let constraint = self
            .store
            .get_constraint(key)
            .await?
            .ok_or_else(|| ConstraintError::UnknownResource(key.to_string()))?;

        if let Some(existing) = self.store.find_open_consumer(key, consumer_id).await? {
            let outcome = match existing.state {
                ConsumerState::Active => AcquireOutcome::Granted,
                _ => AcquireOutcome::Queued,
            };
            return Ok(Acquisition {
                outcome,
                granted: Vec::new(),
            });
        }

        if permits == 0 {
            return Err(ConstraintError::InvalidRequest {
                key: key.to_string(),
                message: "permits must be at least 1".to_string(),
            });
        }
        if constraint.kind == ConstraintKind::Barrier && permits != 1 {
            return Err(ConstraintError::InvalidRequest {
                key: key.to_string(),
                message: "barrier parties take exactly one permit".to_string(),
            });
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let consumer = Consumer::new(key, consumer_id, permits, priority, sequence);
        self.store.create_consumer(&consumer).await?;

        match constraint.kind {
            ConstraintKind::Restraint => self.acquire_restraint(&constraint, consumer).await,
            ConstraintKind::Barrier => self.acquire_barrier(&constraint, consumer).await,
        }
    }

    async fn acquire_restraint(
        &self,
        constraint: &ResourceConstraint,
        consumer: Consumer,
    ) -> Result<Acquisition, ConstraintError> {
        let active = self.active_permits(&constraint.key).await?;
        if active + consumer.permits <= constraint.capacity {
            self.grant(consumer).await?;
            return Ok(Acquisition {
                outcome: AcquireOutcome::Granted,
                granted: Vec::new(),
            });
        }

        let queue = self.wait_queue(&constraint.key).await?;
        let position = queue
            .iter()
            .position(|c| c.id == consumer.id)
            .unwrap_or(queue.len());
        tracing::debug!(
            resource_key = %constraint.key,
            consumer_id = %consumer.consumer_id,
            permits = consumer.permits,
            active,
            capacity = constraint.capacity,
            position,
            "resource request queued"
        );
        self.bus.publish(OrchestrationEvent::ResourceQueued {
            resource_key: constraint.key.clone(),
            consumer_id: consumer.consumer_id.clone(),
            permits: consumer.permits,
            position,
        });
        Ok(Acquisition {
            outcome: AcquireOutcome::Queued,
            granted: Vec::new(),
        })
    }

    async fn acquire_barrier(
        &self,
        constraint: &ResourceConstraint,
        consumer: Consumer,
    ) -> Result<Acquisition, ConstraintError> {
        let waiting = self
            .store
            .list_consumers(&constraint.key, &[ConsumerState::Blocked])
            .await?;
        if (waiting.len() as u32) < constraint.capacity {
            self.bus.publish(OrchestrationEvent::ResourceQueued {
                resource_key: constraint.key.clone(),
                consumer_id: consumer.consumer_id.clone(),
                permits: 1,
                position: waiting.len().saturating_sub(1),
            });
            return Ok(Acquisition {
                outcome: AcquireOutcome::Queued,
                granted: Vec::new(),
            });
        }

        tracing::debug!(
            resource_key = %constraint.key,
            parties = constraint.capacity,
            "barrier complete, releasing all parties"
        );
        let mut granted = Vec::with_capacity(waiting.len());
        for party in waiting.into_iter().take(constraint.capacity as usize) {
            let is_caller = party.id == consumer.id;
            let party = self.grant(party).await?;
            if !is_caller {
                granted.push(party);
            }
        }
        Ok(Acquisition {
            outcome: AcquireOutcome::Granted,
            granted,
        })
    }

    /// Release whatever `consumer_id` holds or waits for on `key`, then
    /// admit every queued consumer that now fits, highest priority first
    /// and by arrival within a priority. A waiter too large for the freed
    /// capacity stays queued without blocking smaller ones behind it.
    ///
    /// Returns the consumers admitted by this release.
    pub async fn release(&self, key: &str, consumer_id: &str) -> Result<Vec<Consumer>, ConstraintError> {
        let ledger = self.ledger(key);
        let _guard = ledger.lock().await;

        let Some(mut consumer) = self.store.find_open_consumer(key, consumer_id).await? else {
            return Ok(Vec::new());
        };
        let was_active = consumer.state == ConsumerState::Active;
        let expected = consumer.version;
        consumer.state = ConsumerState::Finished;
        consumer.released_at = Some(Utc::now());
        consumer.version = expected + 1;
        self.store.update_consumer_if_version(&consumer, expected).await?;

        if was_active {
            tracing::debug!(resource_key = %key, consumer_id, permits = consumer.permits, "resource released");
            self.bus.publish(OrchestrationEvent::ResourceReleased {
                resource_key: key.to_string(),
                consumer_id: consumer_id.to_string(),
                permits: consumer.permits,
            });
        }

        let Some(constraint) = self.store.get_constraint(key).await? else {
            return Ok(Vec::new());
        };
        if constraint.kind == ConstraintKind::Barrier {
            return Ok(Vec::new());
        }

        let mut active = self.active_permits(key).await?;
        let mut granted = Vec::new();
        for waiter in self.wait_queue(key).await? {
            if active + waiter.permits > constraint.capacity {
                continue;
            }
            active += waiter.permits;
            granted.push(self.grant(waiter).await?);
        }
        Ok(granted)
    }

    /// Capacity, active holders and the wait queue in admission order.
    pub async fn snapshot(&self, key: &str) -> Result<ResourceSnapshot, ConstraintError> {
        let constraint = self
            .store
            .get_constraint(key)
            .await?
            .ok_or_else(|| ConstraintError::UnknownResource(key.to_string()))?;
        let mut consumers = self.store.list_consumers(key, &[ConsumerState::Active]).await?;
        let active_permits = consumers.iter().map(|c| c.permits).sum();
        consumers.extend(self.wait_queue(key).await?);
        Ok(ResourceSnapshot {
            constraint,
            active_permits,
            consumers,
        })
    }

    async fn active_permits(&self, key: &str) -> Result<u32, ConstraintError> {
        Ok(self
            .store
            .list_consumers(key, &[ConsumerState::Active])
            .await?
            .iter()
            .map(|c| c.permits)
            .sum())
    }

    async fn wait_queue(&self, key: &str) -> Result<Vec<Consumer>, ConstraintError> {
        let mut queue = self.store.list_consumers(key, &[ConsumerState::Blocked]).await?;
        queue.sort_by_key(|c| (Reverse(c.priority), c.sequence));
        Ok(queue)
    }

    async fn grant(&self, mut consumer: Consumer) -> Result<Consumer, ConstraintError> {
        let expected = consumer.version;
        consumer.state = ConsumerState::Active;
        consumer.granted_at = Some(Utc::now());
        consumer.version = expected + 1;
        self.store.update_consumer_if_version(&consumer, expected).await?;
        tracing::debug!(
            resource_key = %consumer.resource_key,
            consumer_id = %consumer.consumer_id,
            permits = consumer.permits,
            "resource granted"
        );
        self.bus.publish(OrchestrationEvent::ResourceGranted {
            resource_key: consumer.resource_key.clone(),
            consumer_id: consumer.consumer_id.clone(),
            permits: consumer.permits,
        });
        Ok(consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;

    async fn engine_with(constraint: ResourceConstraint) -> ConstraintEngine<MemoryStore> {
        let engine = ConstraintEngine::new(MemoryStore::new(), EventBus::new(64));
        engine.register(constraint).await.unwrap();
        engine
    }

    /// Fixed-seed xorshift so a failing sequence reproduces.
    struct Sequence(u64);

    impl Sequence {
        fn below(&mut self, bound: u64) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0 % bound
        }
    }

    async fn assert_within_capacity(engine: &ConstraintEngine<MemoryStore>, key: &str) {
        let snapshot = engine.snapshot(key).await.unwrap();
        let capacity = snapshot.constraint.capacity;
        assert!(
            snapshot.active_permits <= capacity,
            "{} permits active on capacity {capacity}",
            snapshot.active_permits
        );
        for waiter in snapshot.consumers.iter().filter(|c| c.state == ConsumerState::Blocked) {
            assert!(
                snapshot.active_permits + waiter.permits > capacity,
                "{} waits for {} permits that fit",
                waiter.consumer_id,
                waiter.permits
            );
        }
    }

    #[tokio::test]
    async fn capacity_holds_over_mixed_sequences() {
        for seed in [0x9E37_79B9_7F4A_7C15_u64, 42, 7_777_777] {
            let engine = engine_with(ResourceConstraint::restraint("pool", 5)).await;
            let mut rng = Sequence(seed);
            let mut open = std::collections::HashSet::new();

            for _ in 0..400 {
                let consumer = format!("c{}", rng.below(12));
                if open.remove(&consumer) {
                    engine.release("pool", &consumer).await.unwrap();
                } else {
                    let permits = rng.below(4) as u32 + 1;
                    let priority = rng.below(3) as i32;
                    engine.acquire("pool", &consumer, permits, priority).await.unwrap();
                    open.insert(consumer);
                }
                assert_within_capacity(&engine, "pool").await;
            }

            for consumer in open {
                engine.release("pool", &consumer).await.unwrap();
            }
            let drained = engine.snapshot("pool").await.unwrap();
            assert_eq!(drained.active_permits, 0);
            assert!(drained.consumers.is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capacity_holds_under_concurrent_callers() {
        let engine = Arc::new(engine_with(ResourceConstraint::restraint("pool", 4)).await);

        let workers: Vec<_> = (0..8u64)
            .map(|worker| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let mut rng = Sequence(worker + 1);
                    for round in 0..40 {
                        let consumer = format!("w{worker}-{round}");
                        let permits = rng.below(3) as u32 + 1;
                        engine.acquire("pool", &consumer, permits, 0).await.unwrap();
                        let snapshot = engine.snapshot("pool").await.unwrap();
                        assert!(snapshot.active_permits <= 4);
                        tokio::task::yield_now().await;
                        engine.release("pool", &consumer).await.unwrap();
                        let snapshot = engine.snapshot("pool").await.unwrap();
                        assert!(snapshot.active_permits <= 4);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }

        let drained = engine.snapshot("pool").await.unwrap();
        assert_eq!(drained.active_permits, 0);
        assert!(drained.consumers.is_empty());
    }

    #[tokio::test]
    async fn large_request_stays_queued_while_smaller_fits() {
        let engine = engine_with(ResourceConstraint::restraint("db", 3)).await;

        let holder = engine.acquire("db", "holder", 2, 0).await.unwrap();
        assert_eq!(holder.outcome, AcquireOutcome::Granted);
        let big = engine.acquire("db", "big", 5, 0).await.unwrap();
        assert_eq!(big.outcome, AcquireOutcome::Queued);
        let medium = engine.acquire("db", "medium", 3, 0).await.unwrap();
        assert_eq!(medium.outcome, AcquireOutcome::Queued);

        let granted = engine.release("db", "holder").await.unwrap();
        let ids: Vec<&str> = granted.iter().map(|c| c.consumer_id.as_str()).collect();
        assert_eq!(ids, vec!["medium"]);

        let snap = engine.snapshot("db").await.unwrap();
        assert_eq!(snap.active_permits, 3);
        let big = snap.consumers.iter().find(|c| c.consumer_id == "big").unwrap();
        assert_eq!(big.state, ConsumerState::Blocked);
    }

    #[tokio::test]
    async fn higher_priority_admitted_first_then_arrival_order() {
        let engine = engine_with(ResourceConstraint::restraint("deploy", 1)).await;
        engine.acquire("deploy", "holder", 1, 0).await.unwrap();
        engine.acquire("deploy", "low-1", 1, 0).await.unwrap();
        engine.acquire("deploy", "high", 1, 10).await.unwrap();
        engine.acquire("deploy", "low-2", 1, 0).await.unwrap();

        let mut order = Vec::new();
        let mut current = "holder".to_string();
        for _ in 0..3 {
            let granted = engine.release("deploy", &current).await.unwrap();
            assert_eq!(granted.len(), 1);
            current = granted[0].consumer_id.clone();
            order.push(current.clone());
        }
        assert_eq!(order, vec!["high", "low-1", "low-2"]);
    }

    #[tokio::test]
    async fn repeated_acquire_is_idempotent() {
        let engine = engine_with(ResourceConstraint::restraint("db", 1)).await;
        assert_eq!(
            engine.acquire("db", "a", 1, 0).await.unwrap().outcome,
            AcquireOutcome::Granted
        );
        assert_eq!(
            engine.acquire("db", "a", 1, 0).await.unwrap().outcome,
            AcquireOutcome::Granted
        );
        assert_eq!(engine.snapshot("db").await.unwrap().consumers.len(), 1);
    }

    #[tokio::test]
    async fn barrier_grants_all_parties_together() {
        let engine = engine_with(ResourceConstraint::barrier("gate", 3)).await;
        assert_eq!(
            engine.acquire("gate", "a", 1, 0).await.unwrap().outcome,
            AcquireOutcome::Queued
        );
        assert_eq!(
            engine.acquire("gate", "b", 1, 0).await.unwrap().outcome,
            AcquireOutcome::Queued
        );
        let snap = engine.snapshot("gate").await.unwrap();
        assert!(snap.consumers.iter().all(|c| c.state == ConsumerState::Blocked));

        let last = engine.acquire("gate", "c", 1, 0).await.unwrap();
        assert_eq!(last.outcome, AcquireOutcome::Granted);
        let mut others: Vec<&str> = last.granted.iter().map(|c| c.consumer_id.as_str()).collect();
        others.sort_unstable();
        assert_eq!(others, vec!["a", "b"]);

        let snap = engine.snapshot("gate").await.unwrap();
        assert!(snap.consumers.iter().all(|c| c.state == ConsumerState::Active));
    }

    #[tokio::test]
    async fn releasing_a_waiter_leaves_the_holder() {
        let engine = engine_with(ResourceConstraint::restraint("db", 1)).await;
        engine.acquire("db", "holder", 1, 0).await.unwrap();
        engine.acquire("db", "waiter", 1, 0).await.unwrap();
        assert!(engine.release("db", "waiter").await.unwrap().is_empty());
        assert!(engine.release("db", "unknown").await.unwrap().is_empty());

        let snap = engine.snapshot("db").await.unwrap();
        assert_eq!(snap.consumers.len(), 1);
        assert_eq!(snap.active_permits, 1);
    }

    #[tokio::test]
    async fn unknown_resource_and_bad_requests_are_errors() {
        let engine = engine_with(ResourceConstraint::barrier("gate", 2)).await;
        assert!(matches!(
            engine.acquire("nope", "a", 1, 0).await,
            Err(ConstraintError::UnknownResource(_))
        ));
        assert!(matches!(
            engine.acquire("gate", "a", 2, 0).await,
            Err(ConstraintError::InvalidRequest { .. })
        ));
    }
}
