//! Session lifecycle coordinator.
//!
//! Owns the known session list, drives loads, creates and deletes, and
//! decides when polling runs. Presentation code observes it through the
//! [`EventBus`] and the read-only accessors.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::models::{Session, SessionForm, SessionRequest, SessionStatus, StatusPolicy};
use super::polling::{PollObserver, PollOutcome, PollingConfig, PollingEngine};
use crate::client::{ServiceResult, SessionApi};
use crate::events::{EventBus, PortalEvent};

/// Coarse coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorPhase {
    /// No list request or poll in flight.
    Idle,
    /// A list load or a polling run is in flight.
    Loading,
}

/// Why a session cannot be connected to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {name} ({id}) is not running ({status}); try again in a few moments")]
    NotRunning {
        id: String,
        name: String,
        status: SessionStatus,
    },

    #[error("Session {0} is running but has no connect URL")]
    MissingUrl(String),
}

#[derive(Debug)]
struct ActivePoll {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct State {
    /// Newest applied session list.
    sessions: Vec<Session>,
    /// Ticket of the response `sessions` came from.
    last_applied: u64,
    loads_in_flight: usize,
    active_poll: Option<ActivePoll>,
}

struct Inner {
    api: Arc<dyn SessionApi>,
    engine: PollingEngine,
    bus: EventBus,
    state: Mutex<State>,
    /// Polling token. Claimed by compare-and-swap and cleared only under the
    /// state lock, together with `active_poll`.
    polling_active: AtomicBool,
    next_ticket: AtomicU64,
    next_generation: AtomicU64,
    phase: watch::Sender<CoordinatorPhase>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamp a list request at issue time.
    fn issue_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the session list if `ticket` is newer than the last applied
    /// response. Returns the list to publish, which is always the newest.
    fn apply(&self, ticket: u64, sessions: Vec<Session>) -> Vec<Session> {
        let mut state = self.state();
        if ticket > state.last_applied {
            state.last_applied = ticket;
            state.sessions = sessions;
        } else {
            debug!(
                "Discarding stale session list (ticket {}, last applied {})",
                ticket, state.last_applied
            );
        }
        state.sessions.clone()
    }

    /// Recompute the phase. Runs under the watch lock so concurrent refreshes
    /// cannot publish an outdated phase last.
    fn refresh_phase(&self) {
        self.phase.send_if_modified(|current| {
            let loading =
                self.state().loads_in_flight > 0 || self.polling_active.load(Ordering::SeqCst);
            let phase = if loading {
                CoordinatorPhase::Loading
            } else {
                CoordinatorPhase::Idle
            };
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
    }

    fn is_current_poll(&self, generation: u64) -> bool {
        self.state()
            .active_poll
            .as_ref()
            .is_some_and(|poll| poll.generation == generation && !poll.token.is_cancelled())
    }

    fn policy(&self) -> &StatusPolicy {
        &self.engine.config().policy
    }

    /// Claim the polling token and record a new active poll. Must be called
    /// with the state lock held so the flag and `active_poll` change together.
    fn claim_poll(&self, state: &mut State) -> Option<(u64, CancellationToken)> {
        if self
            .polling_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        Some(self.install_poll(state))
    }

    fn install_poll(&self, state: &mut State) -> (u64, CancellationToken) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        state.active_poll = Some(ActivePoll {
            generation,
            token: token.clone(),
        });
        (generation, token)
    }

    /// Start a polling run unless one is active. Returns whether a run started.
    fn start_polling(self: &Arc<Self>) -> bool {
        let claimed = self.claim_poll(&mut self.state());
        let Some((generation, token)) = claimed else {
            debug!("Polling already active, not starting another run");
            return false;
        };
        self.refresh_phase();
        self.launch_poll(generation, token);
        true
    }

    fn launch_poll(self: &Arc<Self>, generation: u64, token: CancellationToken) {
        let observer = Arc::new(TickForwarder {
            inner: Arc::downgrade(self),
            generation,
        });
        let handle = self.engine.start_with_token(observer, token);
        info!("Started polling session list (run {})", generation);

        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            let outcome = handle.outcome().await;
            if let Some(inner) = inner.upgrade() {
                inner.finish_poll(generation, outcome);
            }
        });
    }

    /// Process the terminal outcome of the poll `generation`.
    ///
    /// A `Stable` outcome is checked against the newest applied list; if a
    /// load applied a transient session in the meantime, a new run takes
    /// over without publishing. The phase stays `Loading` until the final
    /// events are delivered.
    fn finish_poll(self: &Arc<Self>, generation: u64, outcome: PollOutcome) {
        let (sessions, successor) = {
            let mut state = self.state();
            match state.active_poll.as_ref() {
                Some(poll) if poll.generation == generation => {}
                _ => {
                    debug!("Ignoring outcome of superseded poll {}", generation);
                    return;
                }
            }
            if outcome == PollOutcome::Stable && !self.policy().is_stable(&state.sessions) {
                (Vec::new(), Some(self.install_poll(&mut state)))
            } else {
                state.active_poll = None;
                self.polling_active.store(false, Ordering::SeqCst);
                (state.sessions.clone(), None)
            }
        };

        if let Some((next, token)) = successor {
            debug!(
                "Poll {} ended stable but the newest list is transitioning, continuing as run {}",
                generation, next
            );
            self.launch_poll(next, token);
            return;
        }

        match outcome {
            PollOutcome::Stable => {
                info!("Session list stable ({} session(s))", sessions.len());
                self.bus.publish(PortalEvent::LoadSessionListDone { sessions });
                self.bus.publish(PortalEvent::PollingFinished {
                    outcome: PollOutcome::Stable,
                });
            }
            PollOutcome::Failed { error } => {
                warn!("Polling failed: {}", error);
                self.bus.publish(PortalEvent::PollingFinished {
                    outcome: PollOutcome::Failed { error },
                });
            }
            PollOutcome::Cancelled => debug!("Poll {} cancelled", generation),
        }
        self.refresh_phase();
    }
}

/// Keeps `loads_in_flight` accurate even if a load future is dropped.
struct LoadGuard<'a> {
    inner: &'a Inner,
}

impl<'a> LoadGuard<'a> {
    fn new(inner: &'a Inner) -> Self {
        inner.state().loads_in_flight += 1;
        inner.refresh_phase();
        Self { inner }
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state();
            state.loads_in_flight = state.loads_in_flight.saturating_sub(1);
        }
        self.inner.refresh_phase();
    }
}

/// Forwards poll ticks of one generation into the coordinator.
struct TickForwarder {
    inner: Weak<Inner>,
    generation: u64,
}

impl PollObserver for TickForwarder {
    fn tick_issued(&self) -> u64 {
        self.inner.upgrade().map_or(0, |inner| inner.issue_ticket())
    }

    fn tick_completed(&self, ticket: u64, sessions: Vec<Session>) -> Vec<Session> {
        let Some(inner) = self.inner.upgrade() else {
            return sessions;
        };
        if !inner.is_current_poll(self.generation) {
            return sessions;
        }
        let sessions = inner.apply(ticket, sessions);
        inner.bus.publish(PortalEvent::PollingContinue {
            sessions: sessions.clone(),
        });
        sessions
    }
}

/// Coordinates session discovery, polling, creation and deletion.
///
/// Cheap to clone; clones share state. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    pub fn new(api: Arc<dyn SessionApi>, config: PollingConfig) -> Self {
        let (phase, _) = watch::channel(CoordinatorPhase::Idle);
        let engine = PollingEngine::new(Arc::clone(&api), config);
        Self {
            inner: Arc::new(Inner {
                api,
                engine,
                bus: EventBus::new(),
                state: Mutex::new(State::default()),
                polling_active: AtomicBool::new(false),
                next_ticket: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
                phase,
            }),
        }
    }

    /// Event bus the coordinator publishes on.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn api(&self) -> Arc<dyn SessionApi> {
        Arc::clone(&self.inner.api)
    }

    pub fn policy(&self) -> &StatusPolicy {
        self.inner.policy()
    }

    /// Snapshot of the newest known session list.
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.state().sessions.clone()
    }

    pub fn phase(&self) -> CoordinatorPhase {
        *self.inner.phase.borrow()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.polling_active.load(Ordering::SeqCst)
    }

    /// Wait until no load or poll is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.phase.subscribe();
        let _ = rx.wait_for(|phase| *phase == CoordinatorPhase::Idle).await;
    }

    /// The service endpoints are known; perform the initial load.
    pub async fn endpoints_ready(&self) -> ServiceResult<Vec<Session>> {
        info!("Session service endpoints ready, loading session list");
        self.load_session_list().await
    }

    /// Fetch the session list once.
    ///
    /// Publishes exactly one of `LoadSessionListDone` or
    /// `LoadSessionListError`. When the list is not stable, a polling run is
    /// started unless one is already active.
    pub async fn load_session_list(&self) -> ServiceResult<Vec<Session>> {
        let _load = LoadGuard::new(&self.inner);
        let ticket = self.inner.issue_ticket();

        match self.inner.api.list_sessions().await {
            Ok(sessions) => {
                let sessions = self.inner.apply(ticket, sessions);
                debug!("Loaded {} session(s)", sessions.len());
                self.inner.bus.publish(PortalEvent::LoadSessionListDone {
                    sessions: sessions.clone(),
                });
                if !self.policy().is_stable(&sessions) {
                    self.inner.start_polling();
                }
                Ok(sessions)
            }
            Err(error) => {
                warn!("Failed to load session list: {}", error);
                self.inner.bus.publish(PortalEvent::LoadSessionListError {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Cancel the active polling run, if any. Returns whether one was active.
    pub fn cancel_polling(&self) -> bool {
        let poll = {
            let mut state = self.inner.state();
            let poll = state.active_poll.take();
            if poll.is_some() {
                self.inner.polling_active.store(false, Ordering::SeqCst);
            }
            poll
        };
        let Some(poll) = poll else {
            return false;
        };
        poll.token.cancel();
        self.inner.refresh_phase();
        info!("Cancelled polling run {}", poll.generation);
        true
    }

    /// Submit a new session request.
    ///
    /// On success publishes `SessionRequestOk` and reloads the list once.
    /// Failures are returned to the caller.
    pub async fn create_session(&self, form: &SessionForm) -> ServiceResult<SessionRequest> {
        let request = self.inner.api.create_session(form).await.inspect_err(|e| {
            warn!("Session request {} ({}) failed: {}", form.name, form.session_type, e);
        })?;

        info!("Session request {} ({}) accepted", request.name, request.session_type);
        self.inner.bus.publish(PortalEvent::SessionRequestOk {
            name: request.name.clone(),
            session_type: request.session_type.clone(),
        });
        let _ = self.load_session_list().await;
        Ok(request)
    }

    /// Delete a session.
    ///
    /// On success publishes `SessionDeleteOk` and reloads the list once.
    pub async fn delete_session(&self, session_id: &str) -> ServiceResult<()> {
        self.inner
            .api
            .delete_session(session_id)
            .await
            .inspect_err(|e| warn!("Failed to delete session {}: {}", session_id, e))?;

        info!("Deleted session {}", session_id);
        self.inner.bus.publish(PortalEvent::SessionDeleteOk {
            session_id: session_id.to_string(),
        });
        let _ = self.load_session_list().await;
        Ok(())
    }

    /// A session is usable only while it is running.
    pub fn is_usable(session: &Session) -> bool {
        session.is_usable()
    }

    /// Suggest a name for a new session of `session_type`.
    ///
    /// Uses the type followed by one more than the number of known sessions
    /// of that type, skipping names already taken.
    pub fn default_name_for(&self, session_type: &str) -> String {
        let state = self.inner.state();
        let mut index = state
            .sessions
            .iter()
            .filter(|s| s.session_type == session_type)
            .count()
            + 1;
        loop {
            let candidate = format!("{session_type}{index}");
            if !state.sessions.iter().any(|s| s.name == candidate) {
                return candidate;
            }
            index += 1;
        }
    }

    /// Resolve the connect URL of a known session.
    pub fn connect_target(&self, session_id: &str) -> Result<String, ConnectError> {
        let state = self.inner.state();
        let session = state
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .ok_or_else(|| ConnectError::NotFound(session_id.to_string()))?;

        if !session.is_usable() {
            return Err(ConnectError::NotRunning {
                id: session.id.clone(),
                name: session.name.clone(),
                status: session.status.clone(),
            });
        }
        session
            .connect_url
            .clone()
            .ok_or_else(|| ConnectError::MissingUrl(session.id.clone()))
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("phase", &self.phase())
            .field("polling", &self.is_polling())
            .finish()
    }
}
