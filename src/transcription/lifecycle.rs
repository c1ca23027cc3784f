//! # Model Lifecycle Management
//!
//! Owns the single expensive model resource: lazy loading on first use,
//! exclusive access during inference, and idle eviction under memory
//! pressure.
//!
//! ## Exclusion model:
//! One `tokio::sync::Mutex` guards the optional resource. The load check,
//! the load itself, inference, and unload all happen under that one lock:
//! - concurrent callers can never race to load the model twice,
//! - a second request blocks until the first releases the model,
//! - eviction can never observe (or interrupt) an in-flight inference.
//!
//! The idle check re-runs *inside* the lock before unloading, so a request
//! that marked activity while the evictor was waiting on the lock is not
//! evicted out from under it.

use crate::config::{IdleConfig, ModelConfig};
use crate::error::{AsrError, AsrResult};
use crate::transcription::model::WhisperResource;
use candle_core::Device;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A lazily populated, exclusively accessed resource slot.
///
/// Generic over the resource type so the locking discipline can be tested
/// without loading real model weights.
pub struct ResourceSlot<R> {
    slot: Mutex<Option<R>>,
    last_activity: StdMutex<Instant>,
}

impl<R> ResourceSlot<R> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            last_activity: StdMutex::new(Instant::now()),
        }
    }

    /// Record the current time as the last-activity timestamp.
    ///
    /// Called at the start of every request, read by the idle evictor.
    pub fn mark_active(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Time elapsed since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// Run `f` with exclusive access to the resource, loading it first if
    /// the slot is empty.
    ///
    /// A load failure propagates to the caller and leaves the slot empty,
    /// so a subsequent request can retry. The lock is released on all exit
    /// paths.
    pub async fn with_resource<T, L, Fut, F>(&self, load: L, f: F) -> AsrResult<T>
    where
        L: FnOnce() -> Fut,
        Fut: Future<Output = AsrResult<R>>,
        F: FnOnce(&mut R) -> AsrResult<T>,
    {
        let mut slot = self.slot.lock().await;

        if slot.is_none() {
            *slot = Some(load().await?);
        }

        match slot.as_mut() {
            Some(resource) => f(resource),
            // Unreachable: the slot was just populated above.
            None => Err(AsrError::Internal("resource slot empty after load".to_string())),
        }
    }

    /// Drop the resource. No-op when the slot is already empty.
    ///
    /// Acquires the same lock as `with_resource`, so an in-flight call
    /// always completes before the resource is released.
    pub async fn unload(&self) -> bool {
        let mut slot = self.slot.lock().await;
        slot.take().is_some()
    }

    /// Drop the resource only if it has been idle for at least `timeout`.
    ///
    /// The idleness check runs under the slot lock, making check-then-unload
    /// atomic with respect to concurrent `with_resource` calls.
    pub async fn unload_if_idle(&self, timeout: Duration) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.is_some() && self.idle_for() >= timeout {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

impl<R> Default for ResourceSlot<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the Whisper model resource and serializes all access to it.
pub struct ModelLifecycleManager {
    slot: ResourceSlot<WhisperResource>,
    model: ModelConfig,
    device: Device,
}

impl ModelLifecycleManager {
    pub fn new(model: ModelConfig, device: Device) -> Self {
        Self {
            slot: ResourceSlot::new(),
            model,
            device,
        }
    }

    /// Record request activity for the idle evictor.
    pub fn mark_active(&self) {
        self.slot.mark_active();
    }

    /// Run `f` with exclusive access to the loaded model.
    ///
    /// Loads the model on first use; only one inference executes at a time.
    /// Load failures surface as `AsrError::ModelLoad` and leave the slot
    /// empty for retry.
    pub async fn with_model<T, F>(&self, f: F) -> AsrResult<T>
    where
        F: FnOnce(&mut WhisperResource) -> AsrResult<T>,
    {
        let model = self.model.clone();
        let device = self.device.clone();
        self.slot
            .with_resource(
                || async move {
                    WhisperResource::load(&model, device)
                        .await
                        .map_err(|e| AsrError::ModelLoad(format!("{:#}", e)))
                },
                f,
            )
            .await
    }

    /// Release the model and free its memory. Safe when nothing is loaded.
    pub async fn unload(&self) -> bool {
        let unloaded = self.slot.unload().await;
        if unloaded {
            info!("Model unloaded");
        }
        unloaded
    }

    /// Release the model if it has been idle for at least `timeout`.
    pub async fn unload_if_idle(&self, timeout: Duration) -> bool {
        self.slot.unload_if_idle(timeout).await
    }

    pub async fn is_loaded(&self) -> bool {
        self.slot.is_loaded().await
    }

    pub fn idle_for(&self) -> Duration {
        self.slot.idle_for()
    }

    /// Configured model name, for status reporting.
    pub fn model_name(&self) -> &str {
        &self.model.name
    }

    /// Device the model runs on, for status reporting.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Background task that evicts the model after a configured idle window.
///
/// Runs for the lifetime of the process and stops when the shutdown
/// channel fires. Eviction goes through the same lock as inference, so a
/// request never observes the model disappearing mid-call.
pub struct IdleEvictor {
    manager: Arc<ModelLifecycleManager>,
    timeout: Duration,
    check_interval: Duration,
}

impl IdleEvictor {
    /// Build the evictor from configuration. Returns `None` when eviction
    /// is disabled (`timeout_secs == 0`).
    pub fn from_config(manager: Arc<ModelLifecycleManager>, idle: &IdleConfig) -> Option<Self> {
        if idle.timeout_secs == 0 {
            info!("Idle eviction disabled");
            return None;
        }
        Some(Self {
            manager,
            timeout: Duration::from_secs(idle.timeout_secs),
            check_interval: Duration::from_secs(idle.check_interval_secs),
        })
    }

    /// Spawn the eviction loop on the runtime.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            "Idle evictor started (timeout: {}s, check interval: {}s)",
            self.timeout.as_secs(),
            self.check_interval.as_secs()
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if self.manager.unload_if_idle(self.timeout).await {
                            info!(
                                "Model evicted after {}s of inactivity",
                                self.timeout.as_secs()
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Idle evictor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resource stand-in that tracks how many times the loader ran.
    struct TestResource {
        id: usize,
    }

    fn counting_loader(
        counter: Arc<AtomicUsize>,
    ) -> impl FnOnce() -> std::future::Ready<AsrResult<TestResource>> {
        move || {
            let id = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(TestResource { id }))
        }
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let slot = ResourceSlot::<TestResource>::new();
        let loads = Arc::new(AtomicUsize::new(0));

        let first = slot
            .with_resource(counting_loader(loads.clone()), |r| Ok(r.id))
            .await
            .unwrap();
        let second = slot
            .with_resource(counting_loader(loads.clone()), |r| Ok(r.id))
            .await
            .unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert!(slot.is_loaded().await);
    }

    #[tokio::test]
    async fn test_load_failure_leaves_slot_empty_for_retry() {
        let slot = ResourceSlot::<TestResource>::new();

        let result = slot
            .with_resource(
                || std::future::ready(Err(AsrError::ModelLoad("weights missing".to_string()))),
                |r: &mut TestResource| Ok(r.id),
            )
            .await;
        assert!(matches!(result, Err(AsrError::ModelLoad(_))));
        assert!(!slot.is_loaded().await);

        // A later request can still load successfully.
        let loads = Arc::new(AtomicUsize::new(0));
        let retry = slot
            .with_resource(counting_loader(loads.clone()), |r| Ok(r.id))
            .await;
        assert!(retry.is_ok());
        assert!(slot.is_loaded().await);
    }

    #[tokio::test]
    async fn test_failed_access_keeps_resource_loaded() {
        let slot = ResourceSlot::<TestResource>::new();
        let loads = Arc::new(AtomicUsize::new(0));

        let result: AsrResult<()> = slot
            .with_resource(counting_loader(loads.clone()), |_| {
                Err(AsrError::Inference("kernel failure".to_string()))
            })
            .await;
        assert!(matches!(result, Err(AsrError::Inference(_))));

        // The failure was request-scoped: the resource survives and no
        // reload happens on the next call.
        assert!(slot.is_loaded().await);
        slot.with_resource(counting_loader(loads.clone()), |r| Ok(r.id))
            .await
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_resource_access_never_overlaps() {
        let slot = Arc::new(ResourceSlot::<TestResource>::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let slot = slot.clone();
            let loads = loads.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            handles.push(tokio::spawn(async move {
                slot.with_resource(counting_loader(loads), |_| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unload_waits_for_in_flight_access() {
        let slot = Arc::new(ResourceSlot::<TestResource>::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let started = Instant::now();
        let worker = {
            let slot = slot.clone();
            let loads = loads.clone();
            tokio::spawn(async move {
                slot.with_resource(counting_loader(loads), |_| {
                    std::thread::sleep(Duration::from_millis(100));
                    Ok(())
                })
                .await
            })
        };

        // Give the worker time to acquire the slot, then try to evict.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let unloaded = slot.unload().await;

        // Unload blocked until the in-flight access released the lock.
        assert!(unloaded);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!slot.is_loaded().await);
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unload_is_noop_when_empty() {
        let slot = ResourceSlot::<TestResource>::new();
        assert!(!slot.unload().await);
    }

    #[tokio::test]
    async fn test_idle_eviction_respects_activity() {
        let slot = ResourceSlot::<TestResource>::new();
        let loads = Arc::new(AtomicUsize::new(0));
        slot.with_resource(counting_loader(loads), |_| Ok(()))
            .await
            .unwrap();

        slot.mark_active();
        assert!(!slot.unload_if_idle(Duration::from_millis(100)).await);
        assert!(slot.is_loaded().await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(slot.unload_if_idle(Duration::from_millis(100)).await);
        assert!(!slot.is_loaded().await);
    }
}
