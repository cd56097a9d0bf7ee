//! Session pool: lifecycle, liveness and leasing.
//!
//! The pool exclusively owns all sessions. Workflows borrow one
//! session per call through [`SessionPool::lease`]; the lease holds an
//! exclusive permit because the remote client library is not
//! re-entrant per session.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{ClientError, SelfIdentity, Transport, CAPTION_CAP};
use crate::config::SessionConfig;

use super::state::SessionState;

/// Pool-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session not logged in: {0}")]
    NotLoggedIn(String),

    #[error("cannot disable the last logged-in session")]
    LastSessionProtected,

    #[error("no sessions finished login")]
    NoSessionsAvailable,
}

/// Creates transports for sessions.
///
/// The production implementation wraps the remote client library and
/// checks the on-disk auth artefact; tests inject mocks.
pub trait TransportFactory: Send + Sync {
    /// Whether a persisted auth artefact exists for this session.
    fn artifact_exists(&self, config: &SessionConfig) -> bool;

    /// Instantiate a transport for this session.
    fn create(&self, config: &SessionConfig) -> Arc<dyn Transport>;
}

/// One pooled session.
pub struct Session {
    name: String,
    config: SessionConfig,
    enabled: AtomicBool,
    state: RwLock<SessionState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    identity: RwLock<Option<SelfIdentity>>,
    last_active: RwLock<Instant>,
    failure_reason: RwLock<Option<String>>,
    /// One outstanding remote call per session
    call_gate: Arc<Mutex<()>>,
}

impl Session {
    fn new(config: SessionConfig) -> Self {
        let state = if config.enabled {
            SessionState::NotLoggedIn
        } else {
            SessionState::Disabled
        };
        Self {
            name: config.name.clone(),
            enabled: AtomicBool::new(config.enabled),
            state: RwLock::new(state),
            transport: RwLock::new(None),
            identity: RwLock::new(None),
            last_active: RwLock::new(Instant::now()),
            failure_reason: RwLock::new(None),
            call_gate: Arc::new(Mutex::new(())),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap() = state;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn identity(&self) -> Option<SelfIdentity> {
        self.identity.read().unwrap().clone()
    }

    /// Caption cap for this session's account (premium gets the
    /// extended cap; unknown identity falls back to the normal cap).
    pub fn caption_cap(&self) -> usize {
        self.identity
            .read()
            .unwrap()
            .as_ref()
            .map(SelfIdentity::caption_cap)
            .unwrap_or(CAPTION_CAP)
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.read().unwrap()
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.failure_reason.read().unwrap().clone()
    }

    fn touch(&self) {
        *self.last_active.write().unwrap() = Instant::now();
    }
}

/// Exclusive, call-scoped borrow of a session.
pub struct SessionLease {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    _permit: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn caption_cap(&self) -> usize {
        self.session.caption_cap()
    }
}

/// Owns all sessions; elects which participate in a run.
pub struct SessionPool {
    sessions: BTreeMap<String, Arc<Session>>,
    factory: Box<dyn TransportFactory>,
    /// Serialises login so any interactive code-entry UI never overlaps
    login_gate: Arc<Mutex<()>>,
}

impl SessionPool {
    pub fn new(configs: Vec<SessionConfig>, factory: Box<dyn TransportFactory>) -> Self {
        let sessions = configs
            .into_iter()
            .map(|c| (c.name.clone(), Arc::new(Session::new(c))))
            .collect();
        Self {
            sessions,
            factory,
            login_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Start every enabled session: silent re-login where an auth
    /// artefact exists, `not_logged_in` otherwise. Succeeds when at
    /// least one session ends up logged in.
    pub async fn start_enabled(&self) -> Result<(), PoolError> {
        let mut tasks: JoinSet<()> = JoinSet::new();

        for (index, session) in self.sessions.values().enumerate() {
            if !session.is_enabled() {
                continue;
            }

            if !self.factory.artifact_exists(&session.config) {
                info!(session = %session.name(), "no auth artefact, awaiting enrolment");
                session.set_state(SessionState::NotLoggedIn);
                continue;
            }

            let session = session.clone();
            let transport = self.factory.create(&session.config);
            let gate = self.login_gate.clone();
            // Staggered starts keep the first remote calls from landing
            // at the same instant.
            let stagger = Duration::from_millis(200) * index as u32;

            tasks.spawn(async move {
                tokio::time::sleep(stagger).await;
                let _serial = gate.lock().await;
                silent_login(&session, transport).await;
            });
        }

        while tasks.join_next().await.is_some() {}

        if self.list_logged_in().is_empty() {
            return Err(PoolError::NoSessionsAvailable);
        }

        info!(logged_in = self.list_logged_in().len(), "session pool started");
        Ok(())
    }

    /// Terminate all sessions. Transient errors from the library's
    /// background cleanup are expected on shutdown and only logged.
    pub async fn stop_all(&self) {
        for session in self.sessions.values() {
            let transport = session.transport.read().unwrap().clone();
            if let Some(transport) = transport {
                if let Err(e) = transport.disconnect().await {
                    debug!(session = %session.name(), error = %e, "late disconnect error (expected on shutdown)");
                }
            }
            if session.state() == SessionState::LoggedIn {
                session.set_state(if session.is_enabled() {
                    SessionState::NotLoggedIn
                } else {
                    SessionState::Disabled
                });
            }
        }
        info!("session pool stopped");
    }

    /// Logged-in session names, ordered by name for deterministic
    /// assignment.
    pub fn list_logged_in(&self) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| s.state().is_ready())
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.get(name).cloned()
    }

    pub fn enable(&self, name: &str) -> Result<(), PoolError> {
        let session = self
            .sessions
            .get(name)
            .ok_or_else(|| PoolError::UnknownSession(name.to_string()))?;
        session.enabled.store(true, Ordering::Relaxed);
        if session.state() == SessionState::Disabled {
            session.set_state(SessionState::NotLoggedIn);
        }
        Ok(())
    }

    /// Disable a session. Refused for the sole logged-in session: the
    /// pool must keep at least one session able to work.
    pub fn disable(&self, name: &str) -> Result<(), PoolError> {
        let session = self
            .sessions
            .get(name)
            .ok_or_else(|| PoolError::UnknownSession(name.to_string()))?;

        let logged_in = self.list_logged_in();
        if session.state().is_ready() && logged_in.len() == 1 && logged_in[0] == name {
            return Err(PoolError::LastSessionProtected);
        }

        session.enabled.store(false, Ordering::Relaxed);
        session.set_state(SessionState::Disabled);
        info!(session = name, "session disabled");
        Ok(())
    }

    /// Borrow a session for one call. Waits while another call on the
    /// same session is outstanding.
    pub async fn lease(&self, name: &str) -> Result<SessionLease, PoolError> {
        let session = self
            .sessions
            .get(name)
            .ok_or_else(|| PoolError::UnknownSession(name.to_string()))?;

        if !session.state().is_ready() {
            return Err(PoolError::NotLoggedIn(name.to_string()));
        }

        let transport = session
            .transport
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| PoolError::NotLoggedIn(name.to_string()))?;

        let permit = session.call_gate.clone().lock_owned().await;
        session.touch();

        Ok(SessionLease {
            session: session.clone(),
            transport,
            _permit: permit,
        })
    }

    /// Transition a session to `error` after an unrecoverable failure.
    /// It drops out of `list_logged_in` but stays in the pool.
    pub fn mark_error(&self, name: &str, reason: &str) {
        if let Some(session) = self.sessions.get(name) {
            warn!(session = name, reason, "session marked errored");
            session.set_state(SessionState::Error);
            *session.failure_reason.write().unwrap() = Some(reason.to_string());
        }
    }
}

/// Connect, fetch the self identity and mark the session logged in.
async fn silent_login(session: &Arc<Session>, transport: Arc<dyn Transport>) {
    session.set_state(SessionState::LoggingIn);
    debug!(session = %session.name(), "silent re-login");

    match try_login(&transport).await {
        Ok(identity) => {
            info!(
                session = %session.name(),
                account = %identity.name,
                premium = identity.is_premium,
                "session logged in"
            );
            *session.transport.write().unwrap() = Some(transport);
            *session.identity.write().unwrap() = Some(identity);
            session.set_state(SessionState::LoggedIn);
            session.touch();
        }
        Err(e) => {
            warn!(session = %session.name(), error = %e, "login failed");
            *session.failure_reason.write().unwrap() = Some(e.to_string());
            session.set_state(SessionState::LoginFailed);
        }
    }
}

async fn try_login(transport: &Arc<dyn Transport>) -> Result<SelfIdentity, ClientError> {
    match transport.connect().await {
        Ok(()) => {}
        // A flood wait on connect gets one inline retry.
        Err(ClientError::FloodWait { seconds }) => {
            warn!(seconds, "flood wait during login, retrying once");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            transport.connect().await?;
        }
        Err(e) => return Err(e),
    }
    transport.self_identity().await
}
