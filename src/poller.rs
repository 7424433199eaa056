//! The long-running poll loop.
//!
//! ```text
//! Unauthenticated -> Authenticating -> Ready -> Polling <-> Sleeping
//!                          |                       |
//!                          +--------> Fatal <------+
//! ```
//!
//! Any session error ends the loop. Everything downstream of the session
//! handles its own failures inside [`Pipeline::run_cycle`].

use crate::api::Classify;
use crate::error::SessionError;
use crate::outputs::store::NewsStore;
use crate::outputs::telegram::ChatSender;
use crate::pipeline::Pipeline;
use crate::scrapers::{Credentials, FeedSession};
use crate::utils::local_clock_after;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument};

/// Where the poller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Constructed, nothing loaded yet.
    Unauthenticated,
    /// Opening the feed and submitting credentials.
    Authenticating,
    /// Logged in, no cycle run yet.
    Ready,
    /// Reloading the feed and running a pipeline cycle.
    Polling,
    /// Waiting out the interval between cycles.
    Sleeping,
    /// A session error ended the loop. Terminal.
    Fatal,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Timing for the loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Sleep between the end of one cycle and the next reload.
    pub interval: Duration,
    /// Wait after submitting credentials, before confirming the login.
    pub auth_settle: Duration,
    /// Wait after each reload, before reading the page.
    pub reload_settle: Duration,
    /// Post "Sleeping until HH:MM" to the chat before each sleep.
    pub announce_sleep: bool,
    /// Stop after this many cycles. `None` runs until a fatal error.
    pub max_cycles: Option<u64>,
}

/// Drives one [`FeedSession`] through login and the poll loop.
///
/// The poller owns the session and the [`Pipeline`]. There is no re-login:
/// the first session error is final.
pub struct Poller<F, C, S, N> {
    session: F,
    credentials: Credentials,
    pipeline: Pipeline<C, S, N>,
    settings: PollSettings,
    state: PollState,
    cycles: u64,
}

impl<F, C, S, N> Poller<F, C, S, N>
where
    F: FeedSession,
    C: Classify,
    S: NewsStore,
    N: ChatSender,
{
    /// Create a poller in [`PollState::Unauthenticated`].
    ///
    /// # Arguments
    ///
    /// * `session` - The feed session, not yet opened
    /// * `credentials` - Login for the feed site
    /// * `pipeline` - Everything downstream of the page snapshot
    /// * `settings` - Interval, settle delays and cycle limit
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut poller = Poller::new(session, credentials, pipeline, poll_settings);
    /// poller.run().await?;
    /// ```
    pub fn new(
        session: F,
        credentials: Credentials,
        pipeline: Pipeline<C, S, N>,
        settings: PollSettings,
    ) -> Self {
        Self {
            session,
            credentials,
            pipeline,
            settings,
            state: PollState::Unauthenticated,
            cycles: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Cycles completed so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn transition(&mut self, next: PollState) {
        info!(from = %self.state, to = %next, "Poller state");
        self.state = next;
    }

    fn fail(&mut self, e: SessionError) -> SessionError {
        error!(state = %self.state, error = %e, "Session failed; stopping");
        self.transition(PollState::Fatal);
        e
    }

    /// Open the feed, log in and confirm the session.
    ///
    /// Waits `auth_settle` between submitting the form and confirming.
    /// Ends in [`PollState::Ready`] on success and [`PollState::Fatal`] on
    /// any error.
    #[instrument(level = "info", skip_all, fields(email = %self.credentials.email))]
    pub async fn authenticate(&mut self) -> Result<(), SessionError> {
        self.transition(PollState::Authenticating);
        if let Err(e) = self.session.open().await {
            return Err(self.fail(e));
        }
        if let Err(e) = self.session.login(&self.credentials).await {
            return Err(self.fail(e));
        }
        sleep(self.settings.auth_settle).await;
        if let Err(e) = self.session.confirm_login().await {
            return Err(self.fail(e));
        }
        self.transition(PollState::Ready);
        Ok(())
    }

    /// Reload the feed and run one pipeline cycle over it.
    ///
    /// Only the reload can fail. Failures inside the cycle are logged and
    /// counted by the pipeline.
    pub async fn poll_once(&mut self) -> Result<(), SessionError> {
        self.transition(PollState::Polling);
        if let Err(e) = self.session.reload().await {
            return Err(self.fail(e));
        }
        sleep(self.settings.reload_settle).await;

        self.cycles += 1;
        let report = self.pipeline.run_cycle(self.session.snapshot()).await;
        info!(cycle = self.cycles, analyzed = report.analyzed, "Poll complete");
        Ok(())
    }

    async fn pause(&mut self) {
        self.transition(PollState::Sleeping);
        if self.settings.announce_sleep {
            let text = format!("Sleeping until {}", local_clock_after(self.settings.interval));
            self.pipeline.notifier().announce(&text).await;
        }
        info!(interval_secs = self.settings.interval.as_secs(), "Sleeping");
        sleep(self.settings.interval).await;
    }

    fn limit_reached(&self) -> bool {
        self.settings.max_cycles.is_some_and(|max| self.cycles >= max)
    }

    /// Authenticate, then poll until a session error or the cycle limit.
    ///
    /// The limit is checked before every poll, so `max_cycles: Some(0)`
    /// authenticates and returns without touching the feed. The loop sleeps
    /// between cycles only, never after the last one.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the cycle limit is reached. Without a limit this only
    /// returns on error.
    ///
    /// # Errors
    ///
    /// The first [`SessionError`], after moving to [`PollState::Fatal`].
    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.authenticate().await?;
        while !self.limit_reached() {
            if self.cycles > 0 {
                self.pause().await;
            }
            self.poll_once().await?;
        }
        info!(cycles = self.cycles, "Reached cycle limit");
        Ok(())
    }
}
