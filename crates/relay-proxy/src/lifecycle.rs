//! Rotation and failure-driven replacement of the current engine

use crate::body::ResponseBody;
use crate::engine::{ProxyConfig, ProxyEngine};
use crate::rotation::{MaxAgePolicy, RotationPolicy};
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use http::{Request, Response};
use http_body::Body;
use relay_core::{BoxError, Result};
use relay_discovery::BackendResolver;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Observable state of a [`ProxyManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No engine yet, or the last creation attempt failed
    Uninitialized,
    /// An engine is serving calls
    Active,
    /// A replacement engine is being built
    Recycling,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Active => write!(f, "active"),
            Self::Recycling => write!(f, "recycling"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RotationReason {
    Initial,
    Expired,
    Failed,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Expired => write!(f, "expired"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Presents a single current [`ProxyEngine`] to callers and replaces it when
/// it gets too old or its backend misbehaves.
///
/// The current engine lives in an atomically swappable slot. Callers load it
/// without locking and keep their own `Arc`, so a swap never pulls an engine
/// out from under a call in progress; the old client is released once the
/// last such call finishes. Only one task builds a replacement at a time.
pub struct ProxyManager {
    service_name: String,
    resolver: Arc<dyn BackendResolver>,
    policy: Arc<dyn RotationPolicy>,
    config: ProxyConfig,
    current: ArcSwapOption<ProxyEngine>,
    recycle_lock: Mutex<()>,
    engines_created: AtomicU64,
}

impl fmt::Debug for ProxyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyManager")
            .field("service_name", &self.service_name)
            .field("resolver", &self.resolver.name())
            .field("policy", &self.policy)
            .field("state", &self.state())
            .field("engines_created", &self.engines_created())
            .finish()
    }
}

impl ProxyManager {
    /// Create a manager for `service_name`, rotating with [`MaxAgePolicy::default`]
    pub fn new(
        service_name: impl Into<String>,
        resolver: Arc<dyn BackendResolver>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            resolver,
            policy: Arc::new(MaxAgePolicy::default()),
            config,
            current: ArcSwapOption::empty(),
            recycle_lock: Mutex::new(()),
            engines_created: AtomicU64::new(0),
        }
    }

    /// Use a different rotation policy
    pub fn with_rotation_policy(mut self, policy: Arc<dyn RotationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Logical service this manager proxies to
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Number of engines built so far
    pub fn engines_created(&self) -> u64 {
        self.engines_created.load(Ordering::Relaxed)
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        if self.recycle_lock.try_lock().is_err() {
            LifecycleState::Recycling
        } else if self.current.load().is_some() {
            LifecycleState::Active
        } else {
            LifecycleState::Uninitialized
        }
    }

    /// The engine currently installed, without triggering creation or rotation
    pub fn current(&self) -> Option<Arc<ProxyEngine>> {
        self.current.load_full()
    }

    /// Forward one request through the current engine.
    ///
    /// A network failure marks that engine failed, and the next call gets a
    /// freshly resolved one. The failed request itself is not retried.
    pub async fn handle<B>(
        &self,
        req: Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let engine = self.engine().await?;
        engine.forward(req, remote_addr).await
    }

    /// Engine to use for the next call, creating or rotating it if needed
    pub async fn engine(&self) -> Result<Arc<ProxyEngine>> {
        if let Some(engine) = self.current.load_full() {
            if self.rotation_reason(&engine).is_none() {
                return Ok(engine);
            }
        }

        let _guard = self.recycle_lock.lock().await;

        // Another task may have already replaced it while we waited
        let previous = self.current.load_full();
        let reason = match &previous {
            Some(engine) => match self.rotation_reason(engine) {
                Some(reason) => reason,
                None => return Ok(Arc::clone(engine)),
            },
            None => RotationReason::Initial,
        };

        match self.create_engine().await {
            Ok(engine) => {
                let engine = Arc::new(engine);
                self.current.store(Some(Arc::clone(&engine)));
                self.engines_created.fetch_add(1, Ordering::Relaxed);

                match previous {
                    Some(old) => info!(
                        service = %self.service_name,
                        reason = %reason,
                        old_target = %old.target(),
                        new_target = %engine.target(),
                        "Rotated proxy engine"
                    ),
                    None => info!(
                        service = %self.service_name,
                        target = %engine.target(),
                        "Proxy engine ready"
                    ),
                }

                Ok(engine)
            }
            Err(e) => {
                // Leave the slot empty so the next call tries again from scratch
                self.current.store(None);
                warn!(
                    service = %self.service_name,
                    reason = %reason,
                    error = %e,
                    "Failed to create proxy engine"
                );
                Err(e)
            }
        }
    }

    /// Tear down the current engine and go back to uninitialized
    pub fn shutdown(&self) {
        if let Some(engine) = self.current.swap(None) {
            engine.shutdown();
            info!(service = %self.service_name, "Proxy manager shut down");
        }
    }

    fn rotation_reason(&self, engine: &ProxyEngine) -> Option<RotationReason> {
        if engine.is_failed() {
            Some(RotationReason::Failed)
        } else if self.policy.should_rotate(Instant::now(), engine.created_at()) {
            Some(RotationReason::Expired)
        } else {
            None
        }
    }

    async fn create_engine(&self) -> Result<ProxyEngine> {
        let target = self.resolver.resolve_backend(&self.service_name).await?;
        ProxyEngine::initialize(target, &self.config)
    }
}

impl Drop for ProxyManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::NeverRotate;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use relay_core::{Error, ProxyTarget};
    use relay_discovery::StaticResolver;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Hands out queued answers in order, repeating the last one
    #[derive(Debug)]
    struct ScriptedResolver {
        answers: SyncMutex<VecDeque<Result<ProxyTarget>>>,
        calls: AtomicU64,
    }

    impl ScriptedResolver {
        fn new(answers: Vec<Result<ProxyTarget>>) -> Arc<Self> {
            Arc::new(Self {
                answers: SyncMutex::new(answers.into()),
                calls: AtomicU64::new(0),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BackendResolver for ScriptedResolver {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn resolve_backend(&self, service_name: &str) -> Result<ProxyTarget> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock();
            match answers.len() {
                0 => Err(Error::resolution(service_name, "script exhausted")),
                1 => match &answers[0] {
                    Ok(target) => Ok(target.clone()),
                    Err(e) => Err(Error::resolution(service_name, e.to_string())),
                },
                _ => answers.pop_front().unwrap_or_else(|| {
                    Err(Error::resolution(service_name, "script exhausted"))
                }),
            }
        }
    }

    fn target(port: u16) -> ProxyTarget {
        ProxyTarget::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_first_call_initializes() {
        let resolver = Arc::new(StaticResolver::new(target(8080)));
        let manager = ProxyManager::new("users", resolver, ProxyConfig::default());
        assert_eq!(manager.state(), LifecycleState::Uninitialized);
        assert!(manager.current().is_none());

        let engine = manager.engine().await.unwrap();
        assert_eq!(engine.target(), &target(8080));
        assert_eq!(manager.state(), LifecycleState::Active);
        assert_eq!(manager.engines_created(), 1);

        // Same engine while fresh
        let again = manager.engine().await.unwrap();
        assert!(Arc::ptr_eq(&engine, &again));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotates_after_max_age() {
        let resolver = ScriptedResolver::new(vec![Ok(target(8001)), Ok(target(8002))]);
        let manager = ProxyManager::new("users", resolver.clone(), ProxyConfig::default())
            .with_rotation_policy(Arc::new(MaxAgePolicy::new(Duration::from_secs(240))));

        let first = manager.engine().await.unwrap();
        assert_eq!(first.target().port(), 8001);

        tokio::time::advance(Duration::from_secs(239)).await;
        let same = manager.engine().await.unwrap();
        assert!(Arc::ptr_eq(&first, &same));
        assert_eq!(resolver.calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = manager.engine().await.unwrap();
        assert_eq!(second.target().port(), 8002);
        assert_eq!(resolver.calls(), 2);
        assert_eq!(manager.engines_created(), 2);

        // The caller still holding the old engine can keep using it
        assert!(!first.is_shut_down());
        drop(same);
        drop(first);
    }

    #[tokio::test]
    async fn test_failed_engine_is_replaced_on_next_call() {
        let resolver = ScriptedResolver::new(vec![Ok(target(8001)), Ok(target(8002))]);
        let manager = ProxyManager::new("users", resolver.clone(), ProxyConfig::default())
            .with_rotation_policy(Arc::new(NeverRotate));

        let first = manager.engine().await.unwrap();
        first.mark_failed();

        let second = manager.engine().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.target().port(), 8002);
        assert!(!second.is_failed());
    }

    #[tokio::test]
    async fn test_resolution_failure_is_retried_without_backoff() {
        let resolver = ScriptedResolver::new(vec![
            Err(Error::resolution("users", "registry down")),
            Ok(target(8003)),
        ]);
        let manager = ProxyManager::new("users", resolver.clone(), ProxyConfig::default());

        let err = manager.engine().await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert_eq!(manager.state(), LifecycleState::Uninitialized);

        let engine = manager.engine().await.unwrap();
        assert_eq!(engine.target().port(), 8003);
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_initialization_failure_leaves_manager_uninitialized() {
        let resolver = ScriptedResolver::new(vec![Ok(ProxyTarget::new("127.0.0.1", 0))]);
        let manager = ProxyManager::new("users", resolver, ProxyConfig::default());

        let err = manager.engine().await.unwrap_err();
        assert!(matches!(err, Error::Initialization(_)));
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_replacement() {
        let resolver = ScriptedResolver::new(vec![Ok(target(8001)), Ok(target(8002))]);
        let manager = Arc::new(
            ProxyManager::new("users", resolver.clone(), ProxyConfig::default())
                .with_rotation_policy(Arc::new(NeverRotate)),
        );

        manager.engine().await.unwrap().mark_failed();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.engine().await.unwrap() })
            })
            .collect();

        let mut engines = Vec::new();
        for handle in handles {
            engines.push(handle.await.unwrap());
        }

        assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
        assert_eq!(engines[0].target().port(), 8002);
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_twice() {
        let resolver = Arc::new(StaticResolver::new(target(8080)));
        let manager = ProxyManager::new("users", resolver, ProxyConfig::default());

        let engine = manager.engine().await.unwrap();
        manager.shutdown();
        manager.shutdown();

        assert!(engine.is_shut_down());
        assert_eq!(manager.state(), LifecycleState::Uninitialized);

        // Usable again afterwards
        let fresh = manager.engine().await.unwrap();
        assert!(!fresh.is_shut_down());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::Uninitialized.to_string(), "uninitialized");
        assert_eq!(LifecycleState::Active.to_string(), "active");
        assert_eq!(LifecycleState::Recycling.to_string(), "recycling");
    }
}
