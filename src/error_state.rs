use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::app::Logger;
use crate::indicator::Indicator;

/// Combined severity of every failure currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoError,
    Handleable,
    NoServerConnection,
    HandleableAndNoServerConnection,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoError => "no_error",
            ErrorKind::Handleable => "handleable",
            ErrorKind::NoServerConnection => "no_server_connection",
            ErrorKind::HandleableAndNoServerConnection => "handleable_and_no_server_connection",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    kind: ErrorKind,
    indicator: Box<dyn Indicator>,
    flash_period: Duration,
}

/// Process-wide error severity, shared by reference across workers.
///
/// Transitions either go through the convenience methods here, which take
/// the lock themselves, or through an [`ErrorGuard`] obtained from
/// [`ErrorState::lock`] when the caller already holds the lock.
pub struct ErrorState {
    inner: Mutex<Inner>,
    logger: Arc<Logger>,
}

impl ErrorState {
    pub fn new(indicator: Box<dyn Indicator>, flash_period: Duration, logger: Arc<Logger>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                kind: ErrorKind::NoError,
                indicator,
                flash_period,
            }),
            logger,
        }
    }

    /// Block until the lock is held. A poisoned lock is treated as fatal.
    pub fn lock(&self) -> ErrorGuard<'_> {
        match self.inner.lock() {
            Ok(inner) => ErrorGuard {
                inner: Some(inner),
                logger: &self.logger,
            },
            Err(poisoned) => ErrorGuard {
                inner: Some(poisoned.into_inner()),
                logger: &self.logger,
            }
            .raise_fatal("error state lock poisoned"),
        }
    }

    /// Current severity. Unlike the transitions this never halts.
    pub fn current(&self) -> ErrorKind {
        match self.inner.lock() {
            Ok(inner) => inner.kind,
            Err(poisoned) => poisoned.into_inner().kind,
        }
    }

    pub fn raise_handleable(&self) {
        self.lock().raise_handleable();
    }

    pub fn raise_no_connection(&self) {
        self.lock().raise_no_connection();
    }

    pub fn resolve_handleable(&self, resolve_none: bool) {
        self.lock().resolve_handleable(resolve_none);
    }

    pub fn resolve_no_connection(&self, resolve_none: bool) {
        self.lock().resolve_no_connection(resolve_none);
    }

    pub fn raise_fatal(&self, reason: &str) -> ! {
        self.lock().raise_fatal(reason)
    }
}

/// Proof that the error state lock is held.
///
/// Nested code that must escalate while its caller holds the lock takes
/// `&mut ErrorGuard` instead of locking again.
pub struct ErrorGuard<'a> {
    inner: Option<MutexGuard<'a, Inner>>,
    logger: &'a Logger,
}

impl ErrorGuard<'_> {
    pub fn current(&self) -> ErrorKind {
        self.inner
            .as_ref()
            .map(|inner| inner.kind)
            .unwrap_or(ErrorKind::Fatal)
    }

    /// A guard whose lock was released by a fatal transition cannot be used.
    fn state(&mut self) -> &mut Inner {
        match self.inner.as_deref_mut() {
            Some(inner) => inner,
            None => halt(),
        }
    }

    fn halt_if_fatal(&mut self) {
        if self.state().kind == ErrorKind::Fatal {
            self.inner = None;
            halt();
        }
    }

    fn transition(&mut self, to: ErrorKind) {
        let state = self.state();
        let from = state.kind;
        state.kind = to;
        self.logger.info(format!("error state {from} -> {to}"));
    }

    pub fn raise_handleable(&mut self) {
        self.halt_if_fatal();
        let kind = self.state().kind;
        match kind {
            ErrorKind::NoError => self.enter_steady(ErrorKind::Handleable),
            ErrorKind::NoServerConnection => {
                self.enter_steady(ErrorKind::HandleableAndNoServerConnection)
            }
            ErrorKind::Handleable | ErrorKind::HandleableAndNoServerConnection => {
                self.escalate("handleable error raised twice")
            }
            ErrorKind::Fatal => halt(),
        }
    }

    pub fn raise_no_connection(&mut self) {
        self.halt_if_fatal();
        let kind = self.state().kind;
        match kind {
            ErrorKind::NoError => {
                self.transition(ErrorKind::NoServerConnection);
                self.ensure_flashing();
            }
            ErrorKind::NoServerConnection => self.ensure_flashing(),
            ErrorKind::Handleable => self.transition(ErrorKind::HandleableAndNoServerConnection),
            ErrorKind::HandleableAndNoServerConnection => {}
            ErrorKind::Fatal => halt(),
        }
    }

    /// Clear the handleable flag. With `resolve_none`, clearing a flag that
    /// is not set is a no-op; otherwise it is fatal.
    pub fn resolve_handleable(&mut self, resolve_none: bool) {
        self.halt_if_fatal();
        let kind = self.state().kind;
        match kind {
            ErrorKind::Handleable => {
                self.transition(ErrorKind::NoError);
                self.state().indicator.set_steady(false);
            }
            ErrorKind::HandleableAndNoServerConnection => {
                self.transition(ErrorKind::NoServerConnection);
                self.ensure_flashing();
            }
            ErrorKind::NoError | ErrorKind::NoServerConnection => {
                if !resolve_none {
                    self.escalate("resolved a handleable error that was not raised");
                }
            }
            ErrorKind::Fatal => halt(),
        }
    }

    /// Clear the connectivity flag. With `resolve_none`, clearing a flag
    /// that is not set is a no-op; otherwise it is fatal.
    pub fn resolve_no_connection(&mut self, resolve_none: bool) {
        self.halt_if_fatal();
        let kind = self.state().kind;
        match kind {
            ErrorKind::NoServerConnection => {
                self.transition(ErrorKind::NoError);
                let state = self.state();
                state.indicator.stop_flashing();
                state.indicator.set_steady(false);
            }
            ErrorKind::HandleableAndNoServerConnection => {
                self.state().indicator.stop_flashing();
                self.transition(ErrorKind::Handleable);
            }
            ErrorKind::NoError | ErrorKind::Handleable => {
                if !resolve_none {
                    self.escalate("resolved a connection error that was not raised");
                }
            }
            ErrorKind::Fatal => halt(),
        }
    }

    /// Enter `Fatal`, release the lock and park the calling thread forever.
    pub fn raise_fatal(mut self, reason: &str) -> ! {
        self.escalate(reason)
    }

    fn escalate(&mut self, reason: &str) -> ! {
        self.logger.error(format!("fatal: {reason}"));
        self.enter_steady(ErrorKind::Fatal);
        self.inner = None;
        halt()
    }

    fn enter_steady(&mut self, to: ErrorKind) {
        self.transition(to);
        let state = self.state();
        state.indicator.stop_flashing();
        state.indicator.set_steady(true);
    }

    fn ensure_flashing(&mut self) {
        let state = self.state();
        if !state.indicator.is_flashing() {
            let period = state.flash_period;
            state.indicator.start_flashing(period);
        }
    }
}

/// Idle the calling thread permanently.
fn halt() -> ! {
    loop {
        thread::park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LogLevel;
    use crate::indicator::{IndicatorEvent, RecordingIndicator};
    use std::time::Instant;

    const PERIOD: Duration = Duration::from_millis(250);

    fn state() -> (Arc<ErrorState>, RecordingIndicator) {
        let recorder = RecordingIndicator::new();
        let logger = Arc::new(Logger::new(LogLevel::Error, None));
        let state = ErrorState::new(Box::new(recorder.clone()), PERIOD, logger);
        (Arc::new(state), recorder)
    }

    fn wait_for_fatal(state: &ErrorState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while state.current() != ErrorKind::Fatal {
            assert!(Instant::now() < deadline, "state never became fatal");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn in_worker<F>(state: &Arc<ErrorState>, f: F)
    where
        F: FnOnce(&ErrorState) + Send + 'static,
    {
        let state = Arc::clone(state);
        thread::spawn(move || f(&state));
    }

    #[test]
    fn no_connection_flashes_and_resolves_off() {
        let (state, recorder) = state();
        state.raise_no_connection();
        assert_eq!(state.current(), ErrorKind::NoServerConnection);
        assert!(recorder.is_flashing());

        state.raise_no_connection();
        assert_eq!(state.current(), ErrorKind::NoServerConnection);

        state.resolve_no_connection(false);
        assert_eq!(state.current(), ErrorKind::NoError);
        assert!(!recorder.is_flashing());
        assert_eq!(
            recorder.events(),
            vec![
                IndicatorEvent::StartFlashing(PERIOD),
                IndicatorEvent::StopFlashing,
                IndicatorEvent::Steady(false),
            ]
        );
    }

    #[test]
    fn handleable_then_no_connection_compose() {
        let (state, recorder) = state();
        state.raise_handleable();
        assert_eq!(state.current(), ErrorKind::Handleable);
        state.raise_no_connection();
        assert_eq!(state.current(), ErrorKind::HandleableAndNoServerConnection);
        assert!(!recorder.is_flashing());

        state.resolve_handleable(false);
        assert_eq!(state.current(), ErrorKind::NoServerConnection);
        assert!(recorder.is_flashing());

        state.resolve_no_connection(false);
        assert_eq!(state.current(), ErrorKind::NoError);
    }

    #[test]
    fn no_connection_then_handleable_goes_steady() {
        let (state, recorder) = state();
        state.raise_no_connection();
        state.raise_handleable();
        assert_eq!(state.current(), ErrorKind::HandleableAndNoServerConnection);
        assert!(!recorder.is_flashing());
        assert_eq!(recorder.events().last(), Some(&IndicatorEvent::Steady(true)));

        state.resolve_no_connection(false);
        assert_eq!(state.current(), ErrorKind::Handleable);
        state.resolve_handleable(false);
        assert_eq!(state.current(), ErrorKind::NoError);
        assert_eq!(recorder.events().last(), Some(&IndicatorEvent::Steady(false)));
    }

    #[test]
    fn resolve_none_tolerates_missing_flags() {
        let (state, _) = state();
        state.resolve_no_connection(true);
        state.resolve_handleable(true);
        assert_eq!(state.current(), ErrorKind::NoError);

        state.raise_handleable();
        state.resolve_no_connection(true);
        assert_eq!(state.current(), ErrorKind::Handleable);

        state.resolve_handleable(true);
        state.raise_no_connection();
        state.resolve_handleable(true);
        assert_eq!(state.current(), ErrorKind::NoServerConnection);
    }

    #[test]
    fn guard_allows_nested_transitions_under_one_lock() {
        let (state, _) = state();
        let mut guard = state.lock();
        guard.raise_handleable();
        guard.raise_no_connection();
        assert_eq!(guard.current(), ErrorKind::HandleableAndNoServerConnection);
        guard.resolve_no_connection(false);
        drop(guard);
        assert_eq!(state.current(), ErrorKind::Handleable);
    }

    #[test]
    fn double_handleable_is_fatal() {
        let (state, recorder) = state();
        state.raise_handleable();
        in_worker(&state, |state| state.raise_handleable());
        wait_for_fatal(&state);
        assert_eq!(recorder.events().last(), Some(&IndicatorEvent::Steady(true)));
    }

    #[test]
    fn strict_resolve_without_flag_is_fatal() {
        let (state, _) = state();
        in_worker(&state, |state| state.resolve_no_connection(false));
        wait_for_fatal(&state);
    }

    #[test]
    fn fatal_releases_lock_and_drags_other_workers() {
        let (state, recorder) = state();
        state.raise_no_connection();
        in_worker(&state, |state| state.raise_fatal("test"));
        wait_for_fatal(&state);
        assert!(!recorder.is_flashing());

        let (done_tx, done_rx) = crossbeam::channel::bounded::<()>(1);
        in_worker(&state, move |state| {
            state.resolve_no_connection(true);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(state.current(), ErrorKind::Fatal);
    }
}
