//! WorkerPool - a named set of workers addressed together

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::actor::WorkerHandle;
use super::messages::{EventKind, Payload, WorkerError, WorkerResponse, WorkerStatus};

#[derive(Debug, Default)]
pub struct WorkerPool {
    members: RwLock<BTreeMap<String, WorkerHandle>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Vec<WorkerHandle> {
        self.members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Add a worker under its own name
    pub fn add(&self, handle: WorkerHandle) -> Result<(), WorkerError> {
        debug!(worker = %handle.name(), "WorkerPool::add: called");
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        if members.contains_key(handle.name()) {
            return Err(WorkerError::DuplicateMember {
                worker: handle.name().to_string(),
            });
        }
        members.insert(handle.name().to_string(), handle);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<WorkerHandle> {
        debug!(%name, "WorkerPool::remove: called");
        self.members.write().unwrap_or_else(|e| e.into_inner()).remove(name)
    }

    pub fn get(&self, name: &str) -> Option<WorkerHandle> {
        self.members.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.members.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send an event to one member
    pub async fn send(&self, name: &str, kind: EventKind, payload: Payload, sync: bool) -> WorkerResponse {
        let handle = self.get(name).ok_or_else(|| WorkerError::UnknownMember {
            worker: name.to_string(),
        })?;
        handle.send(kind, payload, sync).await
    }

    /// Send an event to every member concurrently
    ///
    /// A failing member never prevents delivery to the others. Returns the
    /// errors collected along the way; with `sync` it resolves only after
    /// every member has handled the event.
    pub async fn broadcast(&self, kind: EventKind, payload: Payload, sync: bool) -> Vec<WorkerError> {
        let members = self.snapshot();
        debug!(%kind, sync, members = members.len(), "broadcast: called");
        let results = join_all(
            members
                .iter()
                .map(|handle| handle.send(kind, payload.clone(), sync)),
        )
        .await;
        results.into_iter().filter_map(Result::err).collect()
    }

    /// Shut every member down and wait for them to stop
    ///
    /// Never waits longer than `timeout`. Returns the names of members that
    /// had not stopped by then.
    pub async fn stop_all(&self, timeout: Duration) -> Vec<String> {
        let members = self.snapshot();
        debug!(members = members.len(), ?timeout, "stop_all: called");

        for err in self.broadcast(EventKind::Shutdown, Payload::Null, false).await {
            debug!(error = %err, "stop_all: shutdown not queued");
        }

        let deadline = Instant::now() + timeout;
        let waits = members.iter().map(|handle| async move {
            match tokio::time::timeout_at(deadline, handle.wait_stopped()).await {
                Ok(()) => None,
                Err(_) => Some(handle.name().to_string()),
            }
        });
        let stragglers: Vec<String> = join_all(waits).await.into_iter().flatten().collect();

        if stragglers.is_empty() {
            info!(members = members.len(), "All pool workers stopped");
        } else {
            for name in &stragglers {
                let status = self.get(name).map(|h| h.status()).unwrap_or(WorkerStatus::Stopping);
                warn!(worker = %name, %status, "Worker did not stop in time");
            }
        }
        stragglers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Worker;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Sleeper {
        delay: Duration,
        refreshed: Arc<AtomicUsize>,
    }

    fn sleeper(name: &str, delay: Duration, refreshed: Arc<AtomicUsize>) -> WorkerHandle {
        let mut worker = Worker::new(name, Sleeper { delay, refreshed });
        worker
            .register(EventKind::Init, |_s: &mut Sleeper, _p| Box::pin(async { Ok(()) }))
            .unwrap();
        worker
            .register(EventKind::Run, |_s: &mut Sleeper, _p| Box::pin(async { Ok(()) }))
            .unwrap();
        worker
            .register(EventKind::Refresh, |s: &mut Sleeper, _p| {
                Box::pin(async move {
                    tokio::time::sleep(s.delay).await;
                    s.refreshed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .unwrap();
        worker
            .register(EventKind::Shutdown, |s: &mut Sleeper, _p| {
                Box::pin(async move {
                    tokio::time::sleep(s.delay).await;
                    Ok(())
                })
            })
            .unwrap();
        worker.spawn().unwrap()
    }

    async fn running_pool(delays: &[(&str, u64)], refreshed: Arc<AtomicUsize>) -> WorkerPool {
        let pool = WorkerPool::new();
        for (name, ms) in delays {
            pool.add(sleeper(name, Duration::from_millis(*ms), refreshed.clone()))
                .unwrap();
        }
        assert!(pool.broadcast(EventKind::Init, Payload::Null, true).await.is_empty());
        assert!(pool.broadcast(EventKind::Run, Payload::Null, true).await.is_empty());
        pool
    }

    #[tokio::test]
    async fn test_duplicate_member_rejected() {
        let refreshed = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new();
        pool.add(sleeper("a", Duration::ZERO, refreshed.clone())).unwrap();
        let err = pool.add(sleeper("a", Duration::ZERO, refreshed)).unwrap_err();
        assert!(matches!(err, WorkerError::DuplicateMember { .. }));
        assert_eq!(pool.names(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_send_to_unknown_member() {
        let pool = WorkerPool::new();
        let err = pool.send("ghost", EventKind::Refresh, Payload::Null, true).await.unwrap_err();
        assert!(matches!(err, WorkerError::UnknownMember { .. }));
    }

    #[tokio::test]
    async fn test_sync_broadcast_is_concurrent() {
        let refreshed = Arc::new(AtomicUsize::new(0));
        let pool = running_pool(&[("a", 100), ("b", 100), ("c", 100)], refreshed.clone()).await;

        let started = Instant::now();
        let errors = pool.broadcast(EventKind::Refresh, Payload::Null, true).await;
        let elapsed = started.elapsed();

        assert!(errors.is_empty());
        assert_eq!(refreshed.load(Ordering::SeqCst), 3);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(250), "broadcast took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_broadcast_collects_errors_without_short_circuit() {
        let refreshed = Arc::new(AtomicUsize::new(0));
        let pool = running_pool(&[("a", 0), ("b", 0), ("c", 0)], refreshed.clone()).await;

        pool.send("b", EventKind::Shutdown, Payload::Null, true).await.unwrap();
        let errors = pool.broadcast(EventKind::Refresh, Payload::Null, true).await;

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].worker(), "b");
        assert_eq!(refreshed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_all_reports_stragglers() {
        let refreshed = Arc::new(AtomicUsize::new(0));
        let pool = running_pool(&[("fast", 0), ("slow", 2_000)], refreshed).await;

        let started = Instant::now();
        let stragglers = pool.stop_all(Duration::from_millis(200)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(stragglers, vec!["slow".to_string()]);
        assert_eq!(pool.get("fast").unwrap().status(), WorkerStatus::Stopped);
        assert_eq!(pool.get("slow").unwrap().status(), WorkerStatus::Stopping);
    }

    #[tokio::test]
    async fn test_stop_all_then_send_fails() {
        let refreshed = Arc::new(AtomicUsize::new(0));
        let pool = running_pool(&[("a", 0), ("b", 0)], refreshed.clone()).await;

        assert!(pool.stop_all(Duration::from_secs(1)).await.is_empty());
        let errors = pool.broadcast(EventKind::Refresh, Payload::Null, true).await;
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, WorkerError::NotAccepting { .. })));
        assert_eq!(refreshed.load(Ordering::SeqCst), 0);
    }
}
