//! Rate-limit admission, flood-wait policy and adaptive tuning.
//!
//! Three limiters layer per call: the global service limiter, the
//! op-class limiter and the per-session limiter. Admission takes a
//! permit from all three atomically or from none; the wait is
//! cancellable and consumes nothing when cancelled.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;
use crate::shutdown::CancelToken;

use super::bucket::TokenBucket;

/// Operation class for the mid-layer limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    Fetch,
    Download,
    Upload,
    Delete,
}

impl OpClass {
    fn index(self) -> usize {
        match self {
            Self::Fetch => 0,
            Self::Download => 1,
            Self::Upload => 2,
            Self::Delete => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Download => "download",
            Self::Upload => "upload",
            Self::Delete => "delete",
        }
    }
}

/// Admission failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("admission cancelled")]
    Cancelled,
}

/// What the caller should do about a flood-wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodAction {
    /// Short wait: absorb inline and retry on the same session
    Absorb(Duration),
    /// Long wait: the session is suspended until the deadline
    Suspend { until: Instant },
}

/// Point-in-time view of one session's limiter state.
#[derive(Debug, Clone)]
pub struct SessionLimitSnapshot {
    /// API calls admitted within the last 60 seconds
    pub calls_last_minute: usize,
    /// Remaining suspension, when suspended
    pub suspended_for: Option<Duration>,
    /// Flood-waits observed over the session's lifetime
    pub flood_waits: u32,
    /// Consecutive successes since the last failure
    pub success_streak: u32,
}

/// Controller-wide snapshot for scheduling decisions.
#[derive(Debug, Clone)]
pub struct ControllerSnapshot {
    pub sessions: BTreeMap<String, SessionLimitSnapshot>,
    /// Success fraction over the recent outcome window
    pub success_rate: f64,
    /// Current multiplicative reduction applied to class rates
    pub tuning_factor: f64,
}

const ROLLING_WINDOW: Duration = Duration::from_secs(60);
const TUNING_WINDOW: Duration = Duration::from_secs(120);
const OUTCOME_WINDOW: usize = 100;
const MIN_OUTCOMES_FOR_RESTORE: usize = 20;
const RESTORE_SUCCESS_RATE: f64 = 0.95;

struct SessionEntry {
    bucket: TokenBucket,
    calls: VecDeque<Instant>,
    suspended_until: Option<Instant>,
    flood_waits: u32,
    success_streak: u32,
}

impl SessionEntry {
    fn new(rate: u32) -> Self {
        Self {
            bucket: TokenBucket::per_minute(rate),
            calls: VecDeque::new(),
            suspended_until: None,
            flood_waits: 0,
            success_streak: 0,
        }
    }

    fn prune_calls(&mut self, now: Instant) {
        while let Some(front) = self.calls.front() {
            if now.saturating_duration_since(*front) > ROLLING_WINDOW {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

struct Inner {
    global: TokenBucket,
    classes: [TokenBucket; 4],
    class_base_rates: [u32; 4],
    sessions: HashMap<String, SessionEntry>,
    /// Recent call outcomes, true = success
    outcomes: VecDeque<bool>,
    /// Flood-wait observation times within the tuning window
    flood_times: VecDeque<Instant>,
    tuning_factor: f64,
}

impl Inner {
    /// Either take one permit from every layer, or report how long to
    /// wait before the next attempt.
    fn try_admit(&mut self, session: &str, class: OpClass, now: Instant) -> Result<(), Duration> {
        let entry = self
            .sessions
            .get_mut(session)
            .expect("session registered before admission");

        if let Some(until) = entry.suspended_until {
            if now < until {
                return Err(until.saturating_duration_since(now));
            }
            entry.suspended_until = None;
            debug!(session, "suspension expired");
        }

        let class_bucket = &mut self.classes[class.index()];

        if !self.global.available(now) {
            return Err(self.global.next_available(now));
        }
        if !class_bucket.available(now) {
            return Err(class_bucket.next_available(now));
        }
        if !entry.bucket.available(now) {
            return Err(entry.bucket.next_available(now));
        }

        self.global.take();
        class_bucket.take();
        entry.bucket.take();

        entry.prune_calls(now);
        entry.calls.push_back(now);
        Ok(())
    }

    fn apply_tuning(&mut self) {
        for (i, bucket) in self.classes.iter_mut().enumerate() {
            bucket.set_rate_per_minute(self.class_base_rates[i] as f64 * self.tuning_factor);
        }
    }

    fn record_outcome(&mut self, success: bool) {
        self.outcomes.push_back(success);
        while self.outcomes.len() > OUTCOME_WINDOW {
            self.outcomes.pop_front();
        }
    }

    fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        self.outcomes.iter().filter(|s| **s).count() as f64 / self.outcomes.len() as f64
    }
}

/// Shared rate-limit controller.
pub struct RateLimitController {
    config: RateLimitConfig,
    inner: Mutex<Inner>,
}

impl RateLimitController {
    pub fn new(config: RateLimitConfig) -> Self {
        let class_base_rates = [
            config.fetch_per_minute,
            config.download_per_minute,
            config.upload_per_minute,
            config.delete_per_minute,
        ];
        let inner = Inner {
            global: TokenBucket::per_minute(config.global_per_minute),
            classes: [
                TokenBucket::per_minute(config.fetch_per_minute),
                TokenBucket::per_minute(config.download_per_minute),
                TokenBucket::per_minute(config.upload_per_minute),
                TokenBucket::per_minute(config.delete_per_minute),
            ],
            class_base_rates,
            sessions: HashMap::new(),
            outcomes: VecDeque::new(),
            flood_times: VecDeque::new(),
            tuning_factor: 1.0,
        };
        Self { config, inner: Mutex::new(inner) }
    }

    /// Register a session with the controller. Idempotent.
    pub fn register_session(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        let rate = self.config.session_per_minute;
        inner
            .sessions
            .entry(name.to_string())
            .or_insert_with(|| SessionEntry::new(rate));
    }

    /// Acquire admission for one remote call.
    ///
    /// Waits through bucket exhaustion and session suspension. Returns
    /// `Cancelled` (consuming no permits) once the token fires.
    pub async fn admit(
        &self,
        session: &str,
        class: OpClass,
        cancel: &CancelToken,
    ) -> Result<(), AdmitError> {
        loop {
            if cancel.is_cancelled() {
                return Err(AdmitError::Cancelled);
            }

            let wait = {
                let mut inner = self.inner.lock().unwrap();
                inner.try_admit(session, class, Instant::now())
            };

            match wait {
                Ok(()) => return Ok(()),
                Err(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AdmitError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Observe a flood-wait and decide absorb-vs-suspend.
    pub fn on_flood_wait(&self, session: &str, seconds: u64) -> FloodAction {
        let wait = Duration::from_secs(seconds);
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        if let Some(entry) = inner.sessions.get_mut(session) {
            entry.flood_waits += 1;
            entry.success_streak = 0;
        }
        inner.record_outcome(false);

        inner.flood_times.push_back(now);
        while let Some(front) = inner.flood_times.front() {
            if now.saturating_duration_since(*front) > TUNING_WINDOW {
                inner.flood_times.pop_front();
            } else {
                break;
            }
        }

        if inner.flood_times.len() >= self.config.flood_wait_tolerance as usize
            && inner.tuning_factor > 0.1
        {
            inner.tuning_factor = (inner.tuning_factor * 0.5).max(0.1);
            inner.apply_tuning();
            inner.flood_times.clear();
            warn!(
                factor = inner.tuning_factor,
                "repeated flood waits, reducing op-class rates"
            );
        }

        if wait <= self.config.flood_wait_threshold {
            debug!(session, seconds, "absorbing short flood wait inline");
            FloodAction::Absorb(wait)
        } else {
            let until = now + wait;
            let entry = inner
                .sessions
                .get_mut(session)
                .expect("session registered before flood wait");
            entry.suspended_until = Some(until);
            warn!(session, seconds, "long flood wait, suspending session");
            FloodAction::Suspend { until }
        }
    }

    /// Observe a successful remote call.
    pub fn on_success(&self, session: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.sessions.get_mut(session) {
            entry.success_streak += 1;
        }
        inner.record_outcome(true);

        if inner.tuning_factor < 1.0
            && inner.outcomes.len() >= MIN_OUTCOMES_FOR_RESTORE
            && inner.success_rate() > RESTORE_SUCCESS_RATE
        {
            inner.tuning_factor = (inner.tuning_factor + 0.1).min(1.0);
            inner.apply_tuning();
            info!(factor = inner.tuning_factor, "sustained success, restoring op-class rates");
        }
    }

    /// Observe a failed remote call (non-flood).
    pub fn on_failure(&self, session: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.sessions.get_mut(session) {
            entry.success_streak = 0;
        }
        inner.record_outcome(false);
    }

    /// Suspend a session until a deadline (used when the caller learnt
    /// the wait out-of-band).
    pub fn suspend(&self, session: &str, until: Instant) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.sessions.get_mut(session) {
            entry.suspended_until = Some(until);
        }
    }

    /// Remaining suspension for a session, if any.
    pub fn suspension(&self, session: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.sessions.get_mut(session)?;
        match entry.suspended_until {
            Some(until) if now < until => Some(until.saturating_duration_since(now)),
            _ => {
                entry.suspended_until = None;
                None
            }
        }
    }

    /// Wait until a session's suspension expires.
    pub async fn wait_ready(&self, session: &str, cancel: &CancelToken) -> Result<(), AdmitError> {
        while let Some(remaining) = self.suspension(session) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AdmitError::Cancelled),
                _ = tokio::time::sleep(remaining) => {}
            }
        }
        Ok(())
    }

    /// Flood-wait threshold in effect.
    pub fn flood_wait_threshold(&self) -> Duration {
        self.config.flood_wait_threshold
    }

    /// Counters and deadlines for scheduling decisions.
    pub fn snapshot(&self) -> ControllerSnapshot {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let success_rate = inner.success_rate();
        let tuning_factor = inner.tuning_factor;

        let sessions = inner
            .sessions
            .iter_mut()
            .map(|(name, entry)| {
                entry.prune_calls(now);
                let snapshot = SessionLimitSnapshot {
                    calls_last_minute: entry.calls.len(),
                    suspended_for: entry
                        .suspended_until
                        .filter(|until| now < *until)
                        .map(|until| until.saturating_duration_since(now)),
                    flood_waits: entry.flood_waits,
                    success_streak: entry.success_streak,
                };
                (name.clone(), snapshot)
            })
            .collect();

        ControllerSnapshot { sessions, success_rate, tuning_factor }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> RateLimitController {
        let controller = RateLimitController::new(RateLimitConfig::default());
        controller.register_session("alpha");
        controller.register_session("bravo");
        controller
    }

    #[tokio::test(start_paused = true)]
    async fn admission_consumes_all_layers() {
        let ctl = controller();
        let cancel = CancelToken::new();

        ctl.admit("alpha", OpClass::Download, &cancel).await.unwrap();

        let snap = ctl.snapshot();
        assert_eq!(snap.sessions["alpha"].calls_last_minute, 1);
        assert_eq!(snap.sessions["bravo"].calls_last_minute, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_session_limit_waits() {
        let ctl = RateLimitController::new(RateLimitConfig {
            session_per_minute: 2,
            ..Default::default()
        });
        ctl.register_session("alpha");
        let cancel = CancelToken::new();

        ctl.admit("alpha", OpClass::Download, &cancel).await.unwrap();
        ctl.admit("alpha", OpClass::Download, &cancel).await.unwrap();

        // Third permit requires a refill; paused time makes the wait
        // deterministic.
        let start = Instant::now();
        ctl.admit("alpha", OpClass::Download, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_admission_consumes_nothing() {
        let ctl = RateLimitController::new(RateLimitConfig {
            session_per_minute: 1,
            ..Default::default()
        });
        ctl.register_session("alpha");
        let cancel = CancelToken::new();

        ctl.admit("alpha", OpClass::Upload, &cancel).await.unwrap();

        cancel.cancel();
        let err = ctl.admit("alpha", OpClass::Upload, &cancel).await.unwrap_err();
        assert_eq!(err, AdmitError::Cancelled);

        assert_eq!(ctl.snapshot().sessions["alpha"].calls_last_minute, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn short_flood_wait_absorbs() {
        let ctl = controller();
        match ctl.on_flood_wait("alpha", 5) {
            FloodAction::Absorb(wait) => assert_eq!(wait, Duration::from_secs(5)),
            other => panic!("expected absorb, got {other:?}"),
        }
        assert!(ctl.suspension("alpha").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn long_flood_wait_suspends() {
        let ctl = controller();
        match ctl.on_flood_wait("alpha", 120) {
            FloodAction::Suspend { .. } => {}
            other => panic!("expected suspend, got {other:?}"),
        }
        let remaining = ctl.suspension("alpha").unwrap();
        assert!(remaining > Duration::from_secs(115));

        // Other sessions are unaffected.
        assert!(ctl.suspension("bravo").is_none());

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(ctl.suspension("alpha").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_flood_waits_reduce_rates() {
        let ctl = controller();
        ctl.on_flood_wait("alpha", 3);
        ctl.on_flood_wait("alpha", 3);
        assert_eq!(ctl.snapshot().tuning_factor, 1.0);

        ctl.on_flood_wait("bravo", 3);
        assert!(ctl.snapshot().tuning_factor < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_success_restores_rates() {
        let ctl = controller();
        for _ in 0..3 {
            ctl.on_flood_wait("alpha", 3);
        }
        let reduced = ctl.snapshot().tuning_factor;
        assert!(reduced < 1.0);

        for _ in 0..100 {
            ctl.on_success("alpha");
        }
        assert!(ctl.snapshot().tuning_factor > reduced);
    }
}
