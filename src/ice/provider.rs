//! Cached ICE configuration with periodic refresh

use super::source::{HttpIceSource, IceServerSource};
use super::types::IceServerSet;
use crate::config::IceConfig;
use crate::utils::tasks::TaskHandle;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;

struct ProviderInner {
    source: Arc<dyn IceServerSource>,
    current: RwLock<Arc<IceServerSet>>,
}

impl ProviderInner {
    async fn refresh(&self, auth_token: Option<&str>) -> Arc<IceServerSet> {
        let set = match self.source.fetch(auth_token).await {
            Ok(servers) => match IceServerSet::fetched(servers) {
                Some(set) => {
                    tracing::debug!("Fetched {} ICE server(s)", set.len());
                    set
                }
                None => {
                    tracing::warn!("ICE endpoint returned no usable servers, using fallback");
                    IceServerSet::fallback()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to fetch ICE servers, using fallback: {}", e);
                IceServerSet::fallback()
            }
        };

        let set = Arc::new(set);
        *self.current.write() = set.clone();
        set
    }
}

/// Process-wide ICE server cache.
///
/// The list is swapped as a whole; callers holding an earlier snapshot keep
/// using it unchanged.
pub struct IceConfigProvider {
    inner: Arc<ProviderInner>,
    refresh_interval: Duration,
    timer: Mutex<Option<TaskHandle>>,
}

impl IceConfigProvider {
    pub fn new(source: Arc<dyn IceServerSource>, refresh_interval: Duration) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                source,
                current: RwLock::new(Arc::new(IceServerSet::fallback())),
            }),
            refresh_interval,
            timer: Mutex::new(None),
        }
    }

    /// Provider backed by the HTTP endpoint in `config`
    pub fn from_config(config: &IceConfig) -> Self {
        let source = HttpIceSource::new(config.endpoint.clone(), config.fetch_timeout);
        Self::new(Arc::new(source), config.refresh_interval)
    }

    /// Fetch a fresh list. Never fails: any fetch problem installs the
    /// fallback list.
    pub async fn refresh(&self, auth_token: Option<&str>) -> Arc<IceServerSet> {
        self.inner.refresh(auth_token).await
    }

    /// Last cached list
    pub fn current_servers(&self) -> Arc<IceServerSet> {
        self.inner.current.read().clone()
    }

    /// Start the background refresh. A no-op while a timer is already running.
    pub fn start_refresh_timer(&self, auth_token: Option<String>) {
        let mut timer = self.timer.lock();
        if timer.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            tracing::debug!("ICE refresh timer already running");
            return;
        }

        let weak: Weak<ProviderInner> = Arc::downgrade(&self.inner);
        let token = auth_token.map(Arc::<str>::from);
        *timer = Some(TaskHandle::interval(
            "ice-refresh",
            self.refresh_interval,
            move || {
                let weak = weak.clone();
                let token = token.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => {
                            inner.refresh(token.as_deref()).await;
                            true
                        }
                        None => false,
                    }
                }
            },
        ));
        tracing::info!(
            "Started ICE refresh timer ({}s interval)",
            self.refresh_interval.as_secs()
        );
    }

    pub fn stop_refresh_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
            tracing::info!("Stopped ICE refresh timer");
        }
    }

    pub fn is_refresh_timer_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}
