//! Background session validation.
//!
//! A [`ValidatingSessionManager`] owns at most one
//! [`SessionValidationScheduler`]. The default scheduler runs a sweep on a
//! fixed tokio interval until it is disabled or the manager is dropped.

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::key::SessionKey;
use crate::session::Session;

/// Outcome of one validation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    /// Sessions examined.
    pub validated: usize,
    /// Sessions found stopped or expired.
    pub invalidated: usize,
    /// Sessions whose validation failed for another reason.
    pub errors: usize,
}

impl ValidationSummary {
    pub fn new(validated: usize) -> Self {
        Self {
            validated,
            ..Self::default()
        }
    }
}

impl fmt::Display for ValidationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.validated == 0 {
            return write!(f, "No sessions to validate");
        }
        write!(f, "Validated {} sessions", self.validated)?;
        if self.invalidated == 0 {
            write!(f, ". No sessions were stopped or expired")?;
        } else {
            write!(f, ", [{}] sessions were stopped or expired", self.invalidated)?;
        }
        if self.errors > 0 {
            write!(f, ", {} could not be validated", self.errors)?;
        }
        Ok(())
    }
}

/// Session manager that can sweep all active sessions.
#[async_trait]
pub trait ValidatingSessionManager: Send + Sync {
    /// Validate every active session, routing failures through the same
    /// expiration/invalidation path foreground lookups use.
    async fn validate_sessions(&self) -> Result<ValidationSummary>;

    /// Start periodic validation, creating the scheduler if needed.
    fn enable_session_validation(&self) -> Result<()>;

    /// Stop periodic validation and drop the scheduler.
    fn disable_session_validation(&self);

    /// Enable validation when policy asks for it and it is not running yet.
    fn enable_session_validation_if_necessary(&self) -> Result<()>;

    /// Whether policy asks for background validation.
    fn is_session_validation_scheduler_enabled(&self) -> bool;

    /// Key used to address `session` during a sweep.
    fn create_session_key(&self, session: &Session) -> SessionKey {
        SessionKey::for_session(session)
    }
}

/// Recurring trigger for [`ValidatingSessionManager::validate_sessions`].
#[async_trait]
pub trait SessionValidationScheduler: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Begin periodic runs. Enabling a running scheduler is a no-op.
    fn enable_session_validation(&self) -> Result<()>;

    /// Stop future runs; an in-flight run completes. Safe to call repeatedly.
    fn disable_session_validation(&self) -> Result<()>;

    /// Run one sweep now.
    async fn run(&self);
}

/// Scheduler backed by a spawned tokio task and a cancellation token.
pub struct ExecutorSessionValidationScheduler {
    manager: Weak<dyn ValidatingSessionManager>,
    interval: Duration,
    token: Mutex<Option<CancellationToken>>,
}

impl ExecutorSessionValidationScheduler {
    /// Create a disabled scheduler that sweeps `manager` every `interval`.
    pub fn new(manager: Weak<dyn ValidatingSessionManager>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::IllegalArgument(
                "session validation interval must be greater than zero".into(),
            ));
        }
        Ok(Self {
            manager,
            interval,
            token: Mutex::new(None),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Run one sweep against `manager`. Returns `false` once the manager is gone.
async fn run_sweep(manager: &Weak<dyn ValidatingSessionManager>) -> bool {
    let Some(manager) = manager.upgrade() else {
        debug!("Session manager dropped, skipping validation run");
        return false;
    };
    match manager.validate_sessions().await {
        Ok(summary) => info!(
            validated = summary.validated,
            invalidated = summary.invalidated,
            errors = summary.errors,
            "{summary}"
        ),
        Err(e) => warn!(error = %e, "Session validation run failed"),
    }
    true
}

async fn validation_loop(
    manager: Weak<dyn ValidatingSessionManager>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Each run gets its own task so a panic cannot end the loop.
        let run_manager = manager.clone();
        match tokio::spawn(async move { run_sweep(&run_manager).await }).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => error!(error = %e, "Session validation run panicked"),
        }
    }
    debug!("Session validation loop exited");
}

#[async_trait]
impl SessionValidationScheduler for ExecutorSessionValidationScheduler {
    fn is_enabled(&self) -> bool {
        self.token.lock().is_some()
    }

    fn enable_session_validation(&self) -> Result<()> {
        let mut slot = self.token.lock();
        if slot.is_some() {
            debug!("Session validation already enabled");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::IllegalState(format!("session validation requires a tokio runtime: {e}"))
        })?;
        let token = CancellationToken::new();
        runtime.spawn(validation_loop(
            self.manager.clone(),
            self.interval,
            token.clone(),
        ));
        *slot = Some(token);

        info!(
            interval_secs = self.interval.as_secs(),
            "Session validation scheduler enabled"
        );
        Ok(())
    }

    fn disable_session_validation(&self) -> Result<()> {
        if let Some(token) = self.token.lock().take() {
            token.cancel();
            info!("Session validation scheduler disabled");
        }
        Ok(())
    }

    async fn run(&self) {
        run_sweep(&self.manager).await;
    }
}

impl Drop for ExecutorSessionValidationScheduler {
    fn drop(&mut self) {
        if let Some(token) = self.token.get_mut().take() {
            token.cancel();
        }
    }
}
