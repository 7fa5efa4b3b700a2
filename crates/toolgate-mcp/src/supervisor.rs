//! Connection Supervisor: owns every server handle end to end.
//!
//! All health state and the current registry live behind one lock, so a
//! transition caused by one conversation is visible to every other one the
//! moment it happens. The lock is never held across an await.

use crate::config::{validate_servers, ServerConfig, SupervisorConfig};
use crate::handle::{Health, HealthRecord, ServerHandle, Transition};
use crate::protocol::ServerInfo;
use crate::registry::ToolRegistry;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use toolgate_core::{GatewayError, GatewayResult};
use tracing::{debug, error, info, warn};

/// Cap on the delay between reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A server that could not be brought up.
#[derive(Debug, Clone, Serialize)]
pub struct ServerFailure {
    /// Server name.
    pub server: String,
    /// Why the connect or handshake failed.
    pub reason: String,
}

/// Outcome of [`Supervisor::start_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    /// Servers that completed the handshake, in configured order.
    pub ready: Vec<String>,
    /// Servers that did not, in configured order.
    pub failures: Vec<ServerFailure>,
}

impl StartupReport {
    /// True when every configured server came up.
    pub fn all_ready(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Point-in-time view of one configured server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Server name.
    pub name: String,
    /// Transport description.
    pub transport: String,
    /// Current health.
    pub health: Health,
    /// Tools in the server's own catalog, aliased or not.
    pub tool_count: usize,
    /// Identity reported during the handshake.
    pub server_info: Option<ServerInfo>,
    /// When the current session became Ready.
    pub connected_at: Option<DateTime<Utc>>,
    /// Last completed health check.
    pub last_health_check: Option<DateTime<Utc>>,
    /// Most recent failure reason.
    pub last_error: Option<String>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successful reconnects so far.
    pub reconnect_count: usize,
    /// A background reconnect is in progress.
    pub reconnecting: bool,
}

struct ServerSlot {
    config: ServerConfig,
    handle: Arc<ServerHandle>,
    health: HealthRecord,
    reconnecting: bool,
}

struct SupervisorState {
    slots: Vec<ServerSlot>,
    registry: Arc<ToolRegistry>,
}

/// Owns the configured servers, their health and the aggregated registry.
pub struct Supervisor {
    policy: SupervisorConfig,
    state: RwLock<SupervisorState>,
    stopped: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Validate the server list and set up one slot per server. Nothing is
    /// connected until [`start_all`](Self::start_all).
    pub fn new(configs: Vec<ServerConfig>, policy: SupervisorConfig) -> GatewayResult<Self> {
        policy.validate()?;
        validate_servers(&configs)?;

        let slots = configs
            .into_iter()
            .enumerate()
            .map(|(order, config)| ServerSlot {
                handle: Arc::new(ServerHandle::detached(&config, order, &policy)),
                config,
                health: HealthRecord::connecting(),
                reconnecting: false,
            })
            .collect();

        Ok(Self {
            policy,
            state: RwLock::new(SupervisorState {
                slots,
                registry: Arc::new(ToolRegistry::default()),
            }),
            stopped: AtomicBool::new(false),
            health_task: Mutex::new(None),
        })
    }

    /// Timeouts and retry policy in effect.
    pub fn policy(&self) -> &SupervisorConfig {
        &self.policy
    }

    /// Connect every server that has not been started yet, concurrently and
    /// with independent timeouts. Failures are recorded, never fatal.
    pub async fn start_all(&self) -> StartupReport {
        let pending: Vec<(usize, ServerConfig)> = {
            let state = self.state.read();
            state
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.health.health == Health::Connecting)
                .map(|(order, slot)| (order, slot.config.clone()))
                .collect()
        };

        info!(servers = pending.len(), "Starting tool servers");

        let attempts = pending.iter().map(|(order, config)| async move {
            (*order, ServerHandle::connect(config, *order, &self.policy).await)
        });
        let results = join_all(attempts).await;

        let mut report = StartupReport::default();
        let mut orphans = Vec::new();
        {
            let mut state = self.state.write();
            let stopped = self.stopped.load(Ordering::SeqCst);
            for (order, result) in results {
                let slot = &mut state.slots[order];
                match result {
                    Ok(handle) if !stopped => {
                        info!(server = %slot.config.name, tools = handle.tools().len(), "Tool server ready");
                        slot.handle = Arc::new(handle);
                        slot.health.mark_ready();
                        report.ready.push(slot.config.name.clone());
                    }
                    Ok(handle) => {
                        slot.health.mark_closed("supervisor stopped during startup");
                        orphans.push(handle);
                    }
                    Err(e) => {
                        warn!(server = %slot.config.name, error = %e, "Tool server failed to start");
                        let reason = e.to_string();
                        slot.health.mark_closed(reason.clone());
                        report.failures.push(ServerFailure {
                            server: slot.config.name.clone(),
                            reason,
                        });
                    }
                }
            }
            self.rebuild_registry(&mut state);
        }

        for handle in orphans {
            handle.close().await;
        }

        info!(
            ready = report.ready.len(),
            failed = report.failures.len(),
            tools = self.registry().len(),
            "Tool server startup complete"
        );
        report
    }

    /// Close every session concurrently and stop background work.
    ///
    /// Best effort and idempotent: calling it again finds nothing left to close.
    pub async fn stop_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }

        let handles: Vec<Arc<ServerHandle>> = {
            let mut state = self.state.write();
            for slot in &mut state.slots {
                if slot.health.health != Health::Closed {
                    slot.health.mark_closed("supervisor stopped");
                }
            }
            state.registry = Arc::new(ToolRegistry::default());
            state.slots.iter().map(|slot| slot.handle.clone()).collect()
        };

        let open = handles.iter().filter(|h| h.is_connected()).count();
        join_all(handles.iter().map(|handle| handle.close())).await;
        if open > 0 {
            info!(closed = open, "Tool servers stopped");
        } else {
            debug!("Tool servers already stopped");
        }
    }

    /// The current registry snapshot.
    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.state.read().registry.clone()
    }

    /// True if `handle` is still the live handle of its slot and that slot is Ready.
    pub fn is_current_ready(&self, handle: &Arc<ServerHandle>) -> bool {
        let state = self.state.read();
        state
            .slots
            .get(handle.order())
            .is_some_and(|slot| {
                Arc::ptr_eq(&slot.handle, handle) && slot.health.health == Health::Ready
            })
    }

    /// Health of `server`, or `None` if it is not configured.
    pub fn health(&self, server: &str) -> Option<Health> {
        let state = self.state.read();
        state
            .slots
            .iter()
            .find(|slot| slot.config.name == server)
            .map(|slot| slot.health.health)
    }

    /// True when `server` is Ready.
    pub fn is_ready(&self, server: &str) -> bool {
        self.health(server) == Some(Health::Ready)
    }

    /// Number of configured servers.
    pub fn server_count(&self) -> usize {
        self.state.read().slots.len()
    }

    /// Number of Ready servers.
    pub fn ready_count(&self) -> usize {
        self.state
            .read()
            .slots
            .iter()
            .filter(|slot| slot.health.health == Health::Ready)
            .count()
    }

    /// Number of handles whose session is still open.
    pub fn open_session_count(&self) -> usize {
        self.state
            .read()
            .slots
            .iter()
            .filter(|slot| slot.handle.is_connected())
            .count()
    }

    /// Status of every configured server, in configured order.
    pub fn status(&self) -> Vec<ServerStatus> {
        let state = self.state.read();
        state
            .slots
            .iter()
            .map(|slot| ServerStatus {
                name: slot.config.name.clone(),
                transport: slot.handle.transport().to_string(),
                health: slot.health.health,
                tool_count: slot.handle.tools().len(),
                server_info: slot.handle.server_info().cloned(),
                connected_at: slot.health.connected_at,
                last_health_check: slot.health.last_health_check,
                last_error: slot.health.last_error.clone(),
                consecutive_failures: slot.health.consecutive_failures,
                reconnect_count: slot.health.reconnect_count,
                reconnecting: slot.reconnecting,
            })
            .collect()
    }

    /// Feed a successful call or ping into the health rules.
    pub fn record_success(&self, handle: &Arc<ServerHandle>) {
        self.apply(handle, |record| record.record_success());
    }

    /// Feed a timeout or transport failure into the health rules.
    pub fn record_failure(&self, handle: &Arc<ServerHandle>, reason: &str) {
        let max = self.policy.max_consecutive_failures;
        let closed = self.apply(handle, |record| record.record_failure(reason, max));
        if closed {
            let handle = handle.clone();
            tokio::spawn(async move { handle.close().await });
        }
    }

    /// Returns true when the transition closed the server.
    fn apply(
        &self,
        handle: &Arc<ServerHandle>,
        update: impl FnOnce(&mut HealthRecord) -> Option<Transition>,
    ) -> bool {
        let mut state = self.state.write();
        let transition = match state.slots.get_mut(handle.order()) {
            Some(slot) if Arc::ptr_eq(&slot.handle, handle) => update(&mut slot.health),
            _ => return false,
        };
        let Some((from, to)) = transition else {
            return false;
        };

        let reason = state.slots[handle.order()].health.last_error.clone();
        match to {
            Health::Ready => info!(server = %handle.name(), from = %from, to = %to, "Server health changed"),
            _ => warn!(server = %handle.name(), from = %from, to = %to, reason = ?reason, "Server health changed"),
        }
        self.rebuild_registry(&mut state);
        to == Health::Closed
    }

    fn rebuild_registry(&self, state: &mut SupervisorState) {
        let ready: Vec<Arc<ServerHandle>> = state
            .slots
            .iter()
            .filter(|slot| slot.health.health == Health::Ready)
            .map(|slot| slot.handle.clone())
            .collect();
        state.registry = Arc::new(ToolRegistry::build(&ready, &self.policy.alias_separator));
        debug!(servers = ready.len(), tools = state.registry.len(), "Registry rebuilt");
    }

    /// Ping Ready and Degraded servers, and start a background
    /// reconnect for each Closed server that allows it.
    ///
    /// Returns once the pings are done; reconnects run on their own tasks
    /// so a long backoff never delays the next health pass.
    pub async fn health_check(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let (pings, reconnects) = {
            let mut state = self.state.write();
            let pings: Vec<Arc<ServerHandle>> = state
                .slots
                .iter()
                .filter(|slot| matches!(slot.health.health, Health::Ready | Health::Degraded))
                .map(|slot| slot.handle.clone())
                .collect();
            let reconnects: Vec<(usize, ServerConfig)> = state
                .slots
                .iter_mut()
                .enumerate()
                .filter(|(_, slot)| {
                    slot.health.health == Health::Closed
                        && slot.config.auto_reconnect
                        && !slot.reconnecting
                })
                .map(|(order, slot)| {
                    slot.reconnecting = true;
                    (order, slot.config.clone())
                })
                .collect();
            (pings, reconnects)
        };

        for (order, config) in reconnects {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = supervisor.finish_reconnect(order, &config).await {
                    error!(server = %config.name, error = %e, "Tool server reconnection failed");
                }
            });
        }

        let outcomes = join_all(pings.iter().map(|handle| async move {
            (handle, handle.ping().await)
        }))
        .await;

        for (handle, outcome) in outcomes {
            {
                let mut state = self.state.write();
                if let Some(slot) = state.slots.get_mut(handle.order()) {
                    if Arc::ptr_eq(&slot.handle, handle) {
                        slot.health.last_health_check = Some(Utc::now());
                    }
                }
            }
            match outcome {
                Ok(()) => self.record_success(handle),
                Err(e) => {
                    warn!(server = %handle.name(), error = %e, "Health check failed");
                    self.record_failure(handle, &format!("health check failed: {e}"));
                }
            }
        }
    }

    /// Reconnect a Closed server with exponential backoff and swap in the new
    /// handle. A server that is not Closed, or already reconnecting, is left
    /// alone.
    pub async fn reconnect(&self, server: &str) -> GatewayResult<()> {
        let (order, config) = {
            let mut state = self.state.write();
            let Some((order, slot)) = state
                .slots
                .iter_mut()
                .enumerate()
                .find(|(_, slot)| slot.config.name == server)
            else {
                return Err(GatewayError::NotFound(format!("server '{server}'")));
            };
            if slot.health.health != Health::Closed || slot.reconnecting {
                return Ok(());
            }
            slot.reconnecting = true;
            (order, slot.config.clone())
        };
        self.finish_reconnect(order, &config).await
    }

    /// Run the backoff for a slot already marked `reconnecting`.
    async fn finish_reconnect(&self, order: usize, config: &ServerConfig) -> GatewayResult<()> {
        let server = config.name.as_str();
        info!(server = %server, "Attempting tool server reconnection");
        let result = reconnect_with_backoff(config, order, &self.policy).await;

        let orphan = {
            let mut state = self.state.write();
            let stopped = self.stopped.load(Ordering::SeqCst);
            let slot = &mut state.slots[order];
            slot.reconnecting = false;
            match result {
                Ok(handle) if !stopped => {
                    slot.handle = Arc::new(handle);
                    slot.health.mark_ready();
                    slot.health.reconnect_count += 1;
                    info!(
                        server = %server,
                        tools = slot.handle.tools().len(),
                        reconnects = slot.health.reconnect_count,
                        "Tool server reconnected"
                    );
                    self.rebuild_registry(&mut state);
                    None
                }
                Ok(handle) => Some(handle),
                Err(e) => return Err(e),
            }
        };

        if let Some(handle) = orphan {
            handle.close().await;
        }
        Ok(())
    }

    /// Run [`health_check`](Self::health_check) every `health_check_interval_secs`.
    /// Does nothing when the interval is zero. The loop stops with
    /// [`stop_all`](Self::stop_all) or when the supervisor is dropped.
    pub fn start_health_loop(self: &Arc<Self>) {
        let secs = self.policy.health_check_interval_secs;
        if secs == 0 {
            debug!("Health checks disabled");
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(Duration::from_secs(secs));
            timer.tick().await;
            loop {
                timer.tick().await;
                let Some(supervisor) = weak.upgrade() else {
                    break;
                };
                supervisor.health_check().await;
            }
        });

        if let Some(previous) = self.health_task.lock().replace(task) {
            previous.abort();
        }
        info!(interval_secs = secs, "Health check loop started");
    }
}

/// Connect with exponential backoff: 1s, doubling, capped at [`MAX_BACKOFF`].
async fn reconnect_with_backoff(
    config: &ServerConfig,
    order: usize,
    policy: &SupervisorConfig,
) -> GatewayResult<ServerHandle> {
    let max_retries = policy.reconnect_retries.max(1);
    let mut delay = Duration::from_secs(1);

    for attempt in 1..=max_retries {
        match ServerHandle::connect(config, order, policy).await {
            Ok(handle) => return Ok(handle),
            Err(e) => {
                warn!(
                    server = %config.name,
                    attempt = attempt,
                    max_retries = max_retries,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "Reconnect failed, retrying"
                );
                if attempt < max_retries {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    Err(GatewayError::Connection {
        server: config.name.clone(),
        reason: format!("failed to reconnect after {max_retries} attempts"),
    })
}
