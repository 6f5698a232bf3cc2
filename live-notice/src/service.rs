//! The assembled service: shared state, collaborators and the loop lifecycle.

use std::fmt;
use std::sync::Arc;

use bili_status::{ClientSlot, StatusFetcher, StatusSource};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::monitor::{CycleState, MonitorConfig, PollLoop, Registry};
use crate::notification::{
    LogSink, NotificationDispatcher, NotificationFlags, NotificationSink, WebhookSink,
};
use crate::persistence::{JsonStateStore, Persister, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A loop from an earlier start is still running; nothing was done.
    AlreadyRunning,
}

struct LoopRuntime {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    state_rx: watch::Receiver<CycleState>,
}

/// Snapshot of the service for the `status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStatus {
    pub session_active: bool,
    pub loop_running: bool,
    pub tracked_count: usize,
    pub max_monitors: usize,
    pub state_file_present: bool,
    pub notifications_enabled: bool,
    pub end_notifications_enabled: bool,
    pub cycle: Option<CycleState>,
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "HTTP session: {}",
            if self.session_active { "active" } else { "closed" }
        )?;
        writeln!(
            f,
            "Monitor loop: {}",
            if self.loop_running { "running" } else { "stopped" }
        )?;
        writeln!(f, "Tracked: {}/{}", self.tracked_count, self.max_monitors)?;
        writeln!(
            f,
            "State file: {}",
            if self.state_file_present { "present" } else { "missing" }
        )?;
        write!(
            f,
            "Notifications: {}, end notifications: {}",
            on_off(self.notifications_enabled),
            on_off(self.end_notifications_enabled)
        )?;
        if let Some(cycle) = &self.cycle {
            write!(
                f,
                "\nPhase: {}, interval: {}s, consecutive failures: {}",
                cycle.phase,
                cycle.current_interval.as_secs(),
                cycle.consecutive_failures
            )?;
        }
        Ok(())
    }
}

/// Collaborators for [`LiveNotice::new`].
pub struct Components {
    pub monitor: MonitorConfig,
    pub source: Arc<dyn StatusSource>,
    pub sink: Arc<dyn NotificationSink>,
    pub store: Arc<dyn StateStore>,
    pub flags: NotificationFlags,
}

pub struct LiveNotice {
    pub(crate) registry: Arc<Registry>,
    pub(crate) source: Arc<dyn StatusSource>,
    pub(crate) persister: Arc<Persister>,
    flags: Arc<NotificationFlags>,
    dispatcher: Arc<NotificationDispatcher>,
    monitor: MonitorConfig,
    shutdown: CancellationToken,
    runtime: Mutex<Option<LoopRuntime>>,
}

impl LiveNotice {
    pub fn new(components: Components) -> Self {
        let Components {
            monitor,
            source,
            sink,
            store,
            flags,
        } = components;

        let registry = Arc::new(Registry::new(monitor.max_monitors));
        let flags = Arc::new(flags);
        let dispatcher = Arc::new(NotificationDispatcher::new(sink, flags.clone()));
        let persister = Arc::new(Persister::new(store, registry.clone(), flags.clone()));

        Self {
            registry,
            source,
            persister,
            flags,
            dispatcher,
            monitor,
            shutdown: CancellationToken::new(),
            runtime: Mutex::new(None),
        }
    }

    /// Wire up the HTTP fetcher, the configured sink and the JSON store.
    pub fn from_config(config: &AppConfig) -> Self {
        let client = ClientSlot::new(config.client_config());
        let source = Arc::new(StatusFetcher::with_url(client, config.api.status_url.clone()));

        let sink: Arc<dyn NotificationSink> = match &config.webhook {
            Some(webhook) => {
                info!(url = %webhook.url, "Delivering notifications to webhook");
                Arc::new(WebhookSink::new(webhook.clone()))
            }
            None => Arc::new(LogSink),
        };

        let store = JsonStateStore::in_dir(&config.state_dir())
            .with_legacy_path(config.legacy_state_file.clone());
        info!(path = %store.path().display(), "Using state file");

        Self::new(Components {
            monitor: config.monitor_config(),
            source,
            sink,
            store: Arc::new(store),
            flags: NotificationFlags::new(
                config.enable_notifications,
                config.enable_end_notifications,
            ),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn flags(&self) -> &Arc<NotificationFlags> {
        &self.flags
    }

    /// Acquire the client, load saved state and spawn the poll loop.
    ///
    /// Only one start runs at a time; a call while a loop is alive returns
    /// [`StartOutcome::AlreadyRunning`]. On failure the partial start is
    /// undone before the error is returned.
    pub async fn start(&self) -> Result<StartOutcome> {
        let mut gate = self.runtime.lock().await;
        if gate.as_ref().is_some_and(|rt| !rt.task.is_finished()) {
            info!("Monitor already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let cancel = self.shutdown.child_token();
        match self.launch(cancel.clone()).await {
            Ok(runtime) => {
                *gate = Some(runtime);
                info!(tracked = self.registry.len(), "Monitor started");
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                error!(error = %e, "Monitor failed to start");
                cancel.cancel();
                self.source.close();
                Err(e)
            }
        }
    }

    async fn launch(&self, cancel: CancellationToken) -> Result<LoopRuntime> {
        self.source.connect()?;
        self.persister.load().await?;

        let poll = PollLoop::new(
            &self.monitor,
            self.registry.clone(),
            self.source.clone(),
            self.dispatcher.clone(),
            self.persister.clone(),
        );
        let state_rx = poll.subscribe();
        let task = tokio::spawn(poll.run(cancel.clone()));

        Ok(LoopRuntime {
            cancel,
            task,
            state_rx,
        })
    }

    /// Save, stop the loop and release the HTTP client.
    pub async fn shutdown(&self) {
        let runtime = self.runtime.lock().await.take();

        if !self.registry.is_empty()
            && let Err(e) = self.persister.save().await
        {
            warn!(error = %e, "Failed to save state during shutdown");
        }

        if let Some(runtime) = runtime {
            runtime.cancel.cancel();
            if let Err(e) = runtime.task.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }

        self.source.close();
        info!("Monitor shut down");
    }

    pub async fn runtime_status(&self) -> RuntimeStatus {
        let gate = self.runtime.lock().await;
        let running = gate.as_ref().filter(|rt| !rt.task.is_finished());

        RuntimeStatus {
            session_active: self.source.is_connected(),
            loop_running: running.is_some(),
            tracked_count: self.registry.len(),
            max_monitors: self.registry.max_monitors(),
            state_file_present: self.persister.state_exists(),
            notifications_enabled: self.flags.notifications_enabled(),
            end_notifications_enabled: self.flags.end_notifications_enabled(),
            cycle: running.map(|rt| rt.state_rx.borrow().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use bili_status::{BatchStatus, StatusError};
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::persistence::{MemoryStateStore, PersistedState};

    #[derive(Default)]
    struct FakeSource {
        connected: AtomicBool,
        refuse: bool,
    }

    #[async_trait]
    impl StatusSource for FakeSource {
        async fn fetch_batch(&self, uids: &[String]) -> BatchStatus {
            BatchStatus {
                statuses: uids.iter().map(|u| (u.clone(), Default::default())).collect(),
                ..Default::default()
            }
        }

        fn connect(&self) -> std::result::Result<(), StatusError> {
            if self.refuse {
                return Err(StatusError::InvalidUid("refused".to_string()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl StateStore for BrokenStore {
        async fn load(&self) -> Result<Option<PersistedState>> {
            Err(crate::Error::Other("unreadable".to_string()))
        }

        async fn save(&self, _state: &PersistedState) -> Result<()> {
            Ok(())
        }

        fn exists(&self) -> bool {
            true
        }
    }

    fn service(source: Arc<FakeSource>, store: Arc<dyn StateStore>) -> LiveNotice {
        LiveNotice::new(Components {
            monitor: MonitorConfig::default(),
            source,
            sink: Arc::new(LogSink),
            store,
            flags: NotificationFlags::default(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_single_shot() {
        let source = Arc::new(FakeSource::default());
        let svc = service(source.clone(), Arc::new(MemoryStateStore::new()));

        assert_eq!(svc.start().await.unwrap(), StartOutcome::Started);
        assert_eq!(svc.start().await.unwrap(), StartOutcome::AlreadyRunning);

        let status = svc.runtime_status().await;
        assert!(status.session_active);
        assert!(status.loop_running);
        assert_eq!(status.tracked_count, 0);

        svc.shutdown().await;
        let status = svc.runtime_status().await;
        assert!(!status.loop_running);
        assert!(!status.session_active);
        assert!(status.cycle.is_none());
    }

    #[tokio::test]
    async fn test_start_failure_cleans_up() {
        let source = Arc::new(FakeSource::default());
        let svc = service(source.clone(), Arc::new(BrokenStore));

        assert!(svc.start().await.is_err());
        assert!(!source.is_connected());
        assert!(!svc.runtime_status().await.loop_running);

        let refusing = Arc::new(FakeSource {
            refuse: true,
            ..Default::default()
        });
        let svc = service(refusing, Arc::new(MemoryStateStore::new()));
        assert!(matches!(svc.start().await, Err(crate::Error::Status(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_loads_persisted_flags() {
        let store = Arc::new(MemoryStateStore::with_state(PersistedState {
            monitors: Vec::new(),
            status_cache: Default::default(),
            enable_notifications: false,
            enable_end_notifications: true,
        }));
        let svc = service(Arc::new(FakeSource::default()), store);

        svc.start().await.unwrap();
        assert!(!svc.flags().notifications_enabled());
        svc.shutdown().await;
    }

    #[test]
    fn test_status_display() {
        let status = RuntimeStatus {
            session_active: true,
            loop_running: false,
            tracked_count: 2,
            max_monitors: 50,
            state_file_present: true,
            notifications_enabled: true,
            end_notifications_enabled: false,
            cycle: None,
        };
        let text = status.to_string();
        assert!(text.contains("HTTP session: active"));
        assert!(text.contains("Monitor loop: stopped"));
        assert!(text.contains("Tracked: 2/50"));
        assert!(text.contains("end notifications: off"));
    }
}
