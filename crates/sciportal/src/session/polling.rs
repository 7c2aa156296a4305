//! Session list polling.
//!
//! The engine is stateless per run: each [`PollingEngine::start`] spawns an
//! independent loop that samples the session list until it is stable, a
//! tick fails, or the run is cancelled. Guarding against concurrent runs
//! is the caller's job.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::models::{Session, StatusPolicy};
use crate::client::{ServiceError, SessionApi};

/// Default delay between ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Delay before each tick.
    pub interval: Duration,
    /// Consecutive failed ticks that end a run. 1 makes the first failure terminal.
    pub max_consecutive_failures: u32,
    /// Which statuses keep the run going.
    pub policy: StatusPolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_consecutive_failures: 1,
            policy: StatusPolicy::default(),
        }
    }
}

/// Terminal result of a polling run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    /// The last observed list had no transient session.
    Stable,
    /// A tick failed and the failure budget is spent.
    Failed { error: ServiceError },
    /// The run was cancelled before reaching another outcome.
    Cancelled,
}

/// Receives the ticks of a polling run.
pub trait PollObserver: Send + Sync + 'static {
    /// Called right before a tick's request is issued. The returned ticket is
    /// handed back to [`PollObserver::tick_completed`].
    fn tick_issued(&self) -> u64 {
        0
    }

    /// Called with every successfully fetched list. Never called once the
    /// run is cancelled.
    ///
    /// Returns the list stability is judged on. An observer that keeps a
    /// newer list than this tick's response returns that one instead.
    fn tick_completed(&self, ticket: u64, sessions: Vec<Session>) -> Vec<Session>;
}

/// Handle to a running poll.
#[derive(Debug)]
pub struct PollHandle {
    token: CancellationToken,
    task: JoinHandle<PollOutcome>,
}

impl PollHandle {
    /// Stop the run. Pending timers and in-flight requests are dropped.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end. A task that panicked or was aborted ends
    /// the run as `Failed`.
    pub async fn outcome(self) -> PollOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Polling task ended abnormally: {}", e);
                PollOutcome::Failed {
                    error: ServiceError::transport("polling task", format!("poll aborted: {e}")),
                }
            }
        }
    }
}

/// Samples the session list until it settles.
#[derive(Clone)]
pub struct PollingEngine {
    api: Arc<dyn SessionApi>,
    config: PollingConfig,
}

impl PollingEngine {
    pub fn new(api: Arc<dyn SessionApi>, config: PollingConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Spawn a polling run.
    ///
    /// The first tick is issued one interval after the start, since callers
    /// start polling right after observing an unstable list.
    pub fn start(&self, observer: Arc<dyn PollObserver>) -> PollHandle {
        self.start_with_token(observer, CancellationToken::new())
    }

    /// Spawn a polling run cancelled by `token`.
    pub fn start_with_token(
        &self,
        observer: Arc<dyn PollObserver>,
        token: CancellationToken,
    ) -> PollHandle {
        let api = Arc::clone(&self.api);
        let config = self.config.clone();
        let task = tokio::spawn(run(api, config, observer, token.clone()));
        PollHandle { token, task }
    }
}

async fn run(
    api: Arc<dyn SessionApi>,
    config: PollingConfig,
    observer: Arc<dyn PollObserver>,
    token: CancellationToken,
) -> PollOutcome {
    let mut tick: u64 = 0;
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Polling cancelled after {} tick(s)", tick);
                return PollOutcome::Cancelled;
            }
            _ = tokio::time::sleep(config.interval) => {}
        }

        tick += 1;
        let ticket = observer.tick_issued();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Polling cancelled during tick {}", tick);
                return PollOutcome::Cancelled;
            }
            result = api.list_sessions() => result,
        };

        match result {
            Ok(sessions) => {
                failures = 0;
                if token.is_cancelled() {
                    return PollOutcome::Cancelled;
                }
                let current = observer.tick_completed(ticket, sessions);
                if config.policy.is_stable(&current) {
                    debug!("Session list stable after {} tick(s)", tick);
                    return PollOutcome::Stable;
                }
                debug!("Tick {}: session list still transitioning", tick);
            }
            Err(error) => {
                failures += 1;
                if failures >= config.max_consecutive_failures.max(1) {
                    warn!("Polling stopped at tick {}: {}", tick, error);
                    return PollOutcome::Failed { error };
                }
                warn!(
                    "Tick {} failed ({}/{}), retrying: {}",
                    tick, failures, config.max_consecutive_failures, error
                );
            }
        }
    }
}
