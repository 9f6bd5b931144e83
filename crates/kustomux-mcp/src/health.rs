//! Health loop — periodic liveness checks and reconnect driving.
//!
//! A ticker pings every connected endpoint and schedules reconnects for
//! anything failed or disconnected, with per-endpoint exponential backoff
//! (1 s doubling up to the configured ceiling). Child-exit notifications
//! from the supervisor bypass the tick cadence and schedule an immediate
//! reconnect.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use kustomux_core::RouterSettings;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::supervisor::{EndpointStatus, EndpointSupervisor};

/// First reconnect delay when no backoff is recorded.
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Next backoff delay: double, capped at the configured ceiling.
fn next_backoff(current: u64, max: u64) -> u64 {
    current.saturating_mul(2).min(max)
}

struct HealthState {
    running: bool,
    ticker: Option<JoinHandle<()>>,
    backoffs: HashMap<String, u64>,
    pending: HashMap<String, JoinHandle<()>>,
}

struct HealthShared {
    supervisor: EndpointSupervisor,
    settings: RouterSettings,
    state: Mutex<HealthState>,
}

/// Drives pings and reconnection for every supervised endpoint.
///
/// Cheap to clone; clones share the same scheduler state.
#[derive(Clone)]
pub struct HealthLoop {
    shared: Arc<HealthShared>,
}

impl HealthLoop {
    pub fn new(supervisor: EndpointSupervisor, settings: RouterSettings) -> Self {
        Self {
            shared: Arc::new(HealthShared {
                supervisor,
                settings,
                state: Mutex::new(HealthState {
                    running: false,
                    ticker: None,
                    backoffs: HashMap::new(),
                    pending: HashMap::new(),
                }),
            }),
        }
    }

    /// Start the ticker and register the child-exit callback. Calling
    /// `start` on a running loop is a no-op.
    pub async fn start(&self) {
        let mut state = self.shared.state.lock().await;
        if state.running {
            return;
        }
        state.running = true;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.shared
            .supervisor
            .set_exit_callback(Box::new(move |url| {
                let _ = tx.send(url.to_string());
            }))
            .await;

        let this = self.clone();
        let interval_secs = self.shared.settings.ping_interval_secs;
        state.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            // Tick work runs inline, so a slow round can never overlap the
            // next one; late ticks are skipped instead of bursting.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The interval's first tick completes immediately; consume it
            // so the first health check lands one full interval after start.
            ticker.tick().await;
            let mut channel_open = true;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.run_tick().await;
                    }
                    exited = rx.recv(), if channel_open => {
                        match exited {
                            Some(url) => {
                                info!(endpoint = %url, "child exit reported; scheduling immediate reconnect");
                                this.schedule_reconnect(&url, true).await;
                            }
                            None => channel_open = false,
                        }
                    }
                }
            }
        }));

        info!(interval_secs, "health loop started");
    }

    /// Stop the loop: cancel the ticker and every pending reconnect timer
    /// and clear all backoff state. Calling `stop` on a stopped loop is a
    /// no-op.
    pub async fn stop(&self) {
        let mut state = self.shared.state.lock().await;
        if !state.running {
            return;
        }
        state.running = false;
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        for (_, handle) in state.pending.drain() {
            handle.abort();
        }
        state.backoffs.clear();
        info!("health loop stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.shared.state.lock().await.running
    }

    /// Number of reconnect timers currently armed.
    pub async fn pending_reconnect_count(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    /// Recorded backoff for an endpoint, if any.
    pub async fn backoff_secs(&self, url: &str) -> Option<u64> {
        self.shared.state.lock().await.backoffs.get(url).copied()
    }

    async fn run_tick(&self) {
        if !self.shared.state.lock().await.running {
            return;
        }

        for report in self.shared.supervisor.statuses().await {
            match report.status {
                EndpointStatus::Connected => {
                    if self.shared.supervisor.ping(&report.url).await {
                        self.shared.state.lock().await.backoffs.remove(&report.url);
                    } else {
                        self.schedule_reconnect(&report.url, false).await;
                    }
                }
                EndpointStatus::Failed | EndpointStatus::Disconnected => {
                    self.schedule_reconnect(&report.url, false).await;
                }
                EndpointStatus::Connecting => {}
            }
        }
    }

    /// Arm a reconnect timer for an endpoint. Idempotent: if a timer is
    /// already pending nothing happens. `immediate` skips the backoff
    /// delay (used for child-exit notifications).
    ///
    /// Returns a boxed future rather than using `async fn`: this function
    /// and `run_reconnect` await each other indirectly via `tokio::spawn`,
    /// and rustc cannot prove the resulting opaque future types are `Send`
    /// without the recursion being broken by an explicit boxed type here.
    pub fn schedule_reconnect<'a>(
        &'a self,
        url: &'a str,
        immediate: bool,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.shared.state.lock().await;
            if !state.running {
                return;
            }
            if state.pending.contains_key(url) {
                debug!(endpoint = %url, "reconnect already scheduled");
                return;
            }

            let delay = if immediate {
                0
            } else {
                state
                    .backoffs
                    .get(url)
                    .copied()
                    .unwrap_or(INITIAL_BACKOFF_SECS)
            };
            debug!(endpoint = %url, delay_secs = delay, "reconnect scheduled");

            let this = self.clone();
            let endpoint = url.to_string();
            let handle = tokio::spawn(async move {
                if delay > 0 {
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
                this.run_reconnect(endpoint).await;
            });
            // Inserting while still holding the lock keeps the timer task from
            // observing the pending map before its own entry exists.
            state.pending.insert(url.to_string(), handle);
        })
    }

    async fn run_reconnect(&self, url: String) {
        {
            let mut state = self.shared.state.lock().await;
            state.pending.remove(&url);
            if !state.running {
                return;
            }
        }

        if self.shared.supervisor.reconnect(&url).await {
            let mut state = self.shared.state.lock().await;
            state.backoffs.remove(&url);
            info!(endpoint = %url, "reconnect succeeded; backoff cleared");
        } else {
            let next = {
                let mut state = self.shared.state.lock().await;
                let current = state
                    .backoffs
                    .get(&url)
                    .copied()
                    .unwrap_or(INITIAL_BACKOFF_SECS);
                let next = next_backoff(current, self.shared.settings.max_reconnect_backoff_secs);
                state.backoffs.insert(url.clone(), next);
                next
            };
            warn!(endpoint = %url, next_delay_secs = next, "reconnect failed; backing off");
            self.schedule_reconnect(&url, false).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ChildCommand;
    use kustomux_core::ClusterMapping;

    #[test]
    fn test_next_backoff_doubles_and_caps() {
        assert_eq!(next_backoff(1, 300), 2);
        assert_eq!(next_backoff(2, 300), 4);
        assert_eq!(next_backoff(4, 300), 8);
        assert_eq!(next_backoff(256, 300), 300);
        assert_eq!(next_backoff(300, 300), 300);
        assert_eq!(next_backoff(u64::MAX, 300), 300);
    }

    fn failed_endpoint_loop() -> HealthLoop {
        let supervisor = EndpointSupervisor::new(
            RouterSettings::default(),
            ChildCommand::parse("/nonexistent/kusto-mcp-server"),
        );
        HealthLoop::new(supervisor, RouterSettings::default())
    }

    #[tokio::test]
    async fn test_start_stop_idempotence() {
        let health = failed_endpoint_loop();
        assert!(!health.is_running().await);

        health.start().await;
        health.start().await;
        assert!(health.is_running().await);

        health.stop().await;
        health.stop().await;
        assert!(!health.is_running().await);

        // The loop can be started again after a stop.
        health.start().await;
        assert!(health.is_running().await);
        health.stop().await;
    }

    #[tokio::test]
    async fn test_schedule_is_refused_while_stopped() {
        let health = failed_endpoint_loop();
        health.schedule_reconnect("https://c1.example", false).await;
        assert_eq!(health.pending_reconnect_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_is_idempotent_per_endpoint() {
        let health = failed_endpoint_loop();
        health.start().await;

        health.schedule_reconnect("https://c1.example", false).await;
        health.schedule_reconnect("https://c1.example", false).await;
        health.schedule_reconnect("https://c1.example", false).await;
        assert_eq!(health.pending_reconnect_count().await, 1);

        health.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_after_failed_attempt() {
        let supervisor = EndpointSupervisor::new(
            RouterSettings::default(),
            ChildCommand::parse("/nonexistent/kusto-mcp-server"),
        );
        supervisor
            .initialize_all(&[ClusterMapping::parse("https://c1.example").unwrap()])
            .await;

        let health = HealthLoop::new(supervisor, RouterSettings::default());
        health.start().await;

        // No backoff recorded yet: the first attempt is armed for ~1 s.
        health.schedule_reconnect("https://c1.example", false).await;
        assert!(health.backoff_secs("https://c1.example").await.is_none());

        // Let the 1 s timer fire; the reconnect fails (unspawnable binary),
        // so the backoff doubles and the next attempt is re-armed.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(health.backoff_secs("https://c1.example").await, Some(2));
        assert_eq!(health.pending_reconnect_count().await, 1);

        health.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_armed_timers_and_clears_backoff() {
        let supervisor = EndpointSupervisor::new(
            RouterSettings::default(),
            ChildCommand::parse("/nonexistent/kusto-mcp-server"),
        );
        supervisor
            .initialize_all(&[ClusterMapping::parse("https://c1.example").unwrap()])
            .await;

        let health = HealthLoop::new(supervisor, RouterSettings::default());
        health.start().await;
        health.schedule_reconnect("https://c1.example", false).await;
        assert_eq!(health.pending_reconnect_count().await, 1);

        health.stop().await;
        assert_eq!(health.pending_reconnect_count().await, 0);
        assert!(health.backoff_secs("https://c1.example").await.is_none());

        // Even well past the armed delay, no attempt runs after stop.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(health.pending_reconnect_count().await, 0);
        assert!(health.backoff_secs("https://c1.example").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_schedule_skips_backoff_delay() {
        let supervisor = EndpointSupervisor::new(
            RouterSettings::default(),
            ChildCommand::parse("/nonexistent/kusto-mcp-server"),
        );
        supervisor
            .initialize_all(&[ClusterMapping::parse("https://c1.example").unwrap()])
            .await;

        let health = HealthLoop::new(supervisor, RouterSettings::default());
        health.start().await;

        health.schedule_reconnect("https://c1.example", true).await;
        // The immediate attempt runs without any timer delay; give the
        // task a moment to fail and record its backoff.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(health.backoff_secs("https://c1.example").await, Some(2));

        health.stop().await;
    }
}
