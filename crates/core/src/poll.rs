//! Consumer-side poll loop and completion state machine.
//!
//! A [`PollLoop`] owns the receiving half of a relay plus the consumer state
//! (`last_value`, completion). It holds non-`Send` callbacks, so it stays on
//! the context that built it; nothing here is shared with producers.
//!
//! Each [`tick`](PollLoop::tick) drains the relay, delivers every value in
//! order to the update callback, and flips `Running -> Complete` at the first
//! value `>= 100`, firing the completion callback once. Panics raised by
//! consumer callbacks are caught and discarded; they never stop delivery.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

use crate::channel::RelayReceiver;
use crate::config::RelayConfig;
use crate::error::{panic_message, CallbackFailure, CallbackKind};
use crate::progress::{ProgressValue, COMPLETE};

pub type UpdateCallback = Box<dyn FnMut(ProgressValue)>;
pub type CompletionCallback = Box<dyn FnOnce(ProgressValue)>;
/// Observer for discarded callback panics.
pub type ErrorSink = Box<dyn FnMut(&CallbackFailure)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Running,
    Complete,
}

/// State owned by the consumer context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumerState {
    last_value: ProgressValue,
    completed_at: Option<ProgressValue>,
}

impl ConsumerState {
    pub fn last_value(&self) -> ProgressValue {
        self.last_value
    }

    pub fn is_done(&self) -> bool {
        self.completed_at.is_some()
    }

    /// The value that triggered completion, if reached.
    pub fn completed_at(&self) -> Option<ProgressValue> {
        self.completed_at
    }

    pub fn state(&self) -> RelayState {
        if self.is_done() {
            RelayState::Complete
        } else {
            RelayState::Running
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Values drained and applied this tick.
    pub delivered: usize,
    /// Set on the tick that made the `Running -> Complete` transition.
    pub completed_now: Option<ProgressValue>,
}

/// Error sink that logs each discarded failure at `warn`.
pub fn tracing_error_sink() -> ErrorSink {
    Box::new(|failure: &CallbackFailure| {
        tracing::warn!("Discarded progress callback failure: {}", failure);
    })
}

pub struct PollLoop {
    receiver: RelayReceiver,
    state: ConsumerState,
    interval: Duration,
    on_update: Option<UpdateCallback>,
    on_result: Option<CompletionCallback>,
    error_sink: Option<ErrorSink>,
}

impl PollLoop {
    pub fn new(receiver: RelayReceiver, config: &RelayConfig) -> Self {
        Self {
            receiver,
            state: ConsumerState::default(),
            interval: config.poll_interval(),
            on_update: None,
            on_result: None,
            error_sink: config.log_callback_failures.then(tracing_error_sink),
        }
    }

    /// Bind the per-value update callback, replacing any previous one.
    pub fn on_update(&mut self, f: impl FnMut(ProgressValue) + 'static) -> &mut Self {
        self.on_update = Some(Box::new(f));
        self
    }

    /// Bind the completion callback. Has no effect once completion has
    /// already happened; it is not invoked retroactively.
    pub fn set_on_result(&mut self, f: impl FnOnce(ProgressValue) + 'static) -> &mut Self {
        self.on_result = Some(Box::new(f));
        self
    }

    pub fn set_error_sink(&mut self, f: impl FnMut(&CallbackFailure) + 'static) -> &mut Self {
        self.error_sink = Some(Box::new(f));
        self
    }

    pub fn consumer_state(&self) -> ConsumerState {
        self.state
    }

    pub fn state(&self) -> RelayState {
        self.state.state()
    }

    pub fn last_value(&self) -> ProgressValue {
        self.state.last_value
    }

    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one poll cycle: drain, deliver in order, complete at most once.
    pub fn tick(&mut self) -> TickReport {
        let values = self.receiver.drain();
        let mut report = TickReport {
            delivered: values.len(),
            completed_now: None,
        };

        for value in values {
            self.state.last_value = value;

            if let Some(cb) = self.on_update.as_mut() {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| cb(value))) {
                    self.discard(CallbackKind::Update, value, payload);
                }
            }

            if value >= COMPLETE && self.state.completed_at.is_none() {
                self.state.completed_at = Some(value);
                report.completed_now = Some(value);
                tracing::debug!("Progress relay complete at {}", value);

                if let Some(cb) = self.on_result.take() {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || cb(value))) {
                        self.discard(CallbackKind::Completion, value, payload);
                    }
                }
            }
        }

        if report.delivered > 0 {
            tracing::trace!(
                "Delivered {} progress values, last {}",
                report.delivered,
                self.state.last_value
            );
        }
        report
    }

    /// Poll forever on the current task, one tick per interval. Ticks never
    /// overlap; a slow tick delays the next one instead of bunching up.
    /// Drop the future to stop polling.
    pub async fn run(&mut self) {
        let mut ticker = self.ticker();
        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    /// Poll until completion and return the triggering value. Returns after
    /// the first tick if completion was already reached.
    pub async fn run_until_complete(&mut self) -> ProgressValue {
        let mut ticker = self.ticker();
        loop {
            ticker.tick().await;
            self.tick();
            if let Some(value) = self.state.completed_at {
                return value;
            }
        }
    }

    fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn discard(
        &mut self,
        kind: CallbackKind,
        value: ProgressValue,
        payload: Box<dyn std::any::Any + Send>,
    ) {
        let Some(sink) = self.error_sink.as_mut() else {
            return;
        };
        let failure = CallbackFailure {
            kind,
            value,
            message: panic_message(payload.as_ref()),
        };
        // A panicking sink is discarded too.
        let _ = panic::catch_unwind(AssertUnwindSafe(|| sink(&failure)));
    }
}

impl std::fmt::Debug for PollLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollLoop")
            .field("receiver", &self.receiver)
            .field("state", &self.state)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{relay, RelaySender};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup() -> (RelaySender, PollLoop) {
        let (tx, rx) = relay();
        (tx, PollLoop::new(rx, &RelayConfig::default()))
    }

    fn record_updates(poll: &mut PollLoop) -> Rc<RefCell<Vec<ProgressValue>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        poll.on_update(move |v| sink.borrow_mut().push(v));
        log
    }

    fn record_results(poll: &mut PollLoop) -> Rc<RefCell<Vec<ProgressValue>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        poll.set_on_result(move |v| sink.borrow_mut().push(v));
        log
    }

    #[test]
    fn initial_state() {
        let (_tx, poll) = setup();
        assert_eq!(poll.state(), RelayState::Running);
        assert_eq!(poll.last_value(), 0);
        assert!(!poll.is_done());
        assert_eq!(poll.interval(), Duration::from_millis(50));
    }

    #[test]
    fn updates_delivered_in_order() {
        let (tx, mut poll) = setup();
        let updates = record_updates(&mut poll);
        for v in [10, 45, 100] {
            tx.send(v);
        }
        let report = poll.tick();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.completed_now, Some(100));
        assert_eq!(*updates.borrow(), vec![10, 45, 100]);
        assert_eq!(poll.last_value(), 100);
        assert_eq!(poll.state(), RelayState::Complete);
    }

    #[test]
    fn completion_fires_once_on_first_terminal_value() {
        let (tx, mut poll) = setup();
        let results = record_results(&mut poll);
        for v in [50, 100, 100] {
            tx.send(v);
        }
        poll.tick();
        tx.send(100);
        poll.tick();
        assert_eq!(*results.borrow(), vec![100]);
    }

    #[test]
    fn completion_across_ticks() {
        let (tx, mut poll) = setup();
        let results = record_results(&mut poll);
        tx.send(20);
        assert_eq!(poll.tick().completed_now, None);
        assert!(!poll.is_done());
        tx.send(100);
        assert_eq!(poll.tick().completed_now, Some(100));
        assert_eq!(*results.borrow(), vec![100]);
    }

    #[test]
    fn over_range_value_triggers_completion() {
        let (tx, mut poll) = setup();
        let results = record_results(&mut poll);
        tx.send(150);
        poll.tick();
        assert_eq!(*results.borrow(), vec![150]);
        assert_eq!(poll.consumer_state().completed_at(), Some(150));
    }

    #[test]
    fn non_monotonic_values_delivered_as_sent() {
        let (tx, mut poll) = setup();
        let updates = record_updates(&mut poll);
        for v in [40, 20, 60] {
            tx.send(v);
        }
        poll.tick();
        assert_eq!(*updates.borrow(), vec![40, 20, 60]);
        assert_eq!(poll.last_value(), 60);
    }

    #[test]
    fn values_after_completion_still_delivered() {
        let (tx, mut poll) = setup();
        let updates = record_updates(&mut poll);
        for v in [100, 30] {
            tx.send(v);
        }
        poll.tick();
        assert_eq!(*updates.borrow(), vec![100, 30]);
        assert_eq!(poll.last_value(), 30);
        assert_eq!(poll.state(), RelayState::Complete);
    }

    #[test]
    fn ticks_after_completion_are_noops() {
        let (tx, mut poll) = setup();
        tx.send(100);
        poll.tick();
        for _ in 0..5 {
            assert_eq!(poll.tick(), TickReport::default());
        }
        assert_eq!(poll.state(), RelayState::Complete);
        assert_eq!(poll.last_value(), 100);
    }

    #[test]
    fn panicking_update_does_not_block_completion() {
        let (tx, mut poll) = setup();
        poll.on_update(|_| panic!("render failed"));
        let results = record_results(&mut poll);
        tx.send(30);
        tx.send(100);
        poll.tick();
        assert_eq!(poll.last_value(), 100);
        assert!(poll.is_done());
        assert_eq!(*results.borrow(), vec![100]);
    }

    #[test]
    fn panicking_update_skips_only_that_value() {
        let (tx, mut poll) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        poll.on_update(move |v| {
            if v == 20 {
                panic!("bad frame");
            }
            sink.borrow_mut().push(v);
        });
        for v in [10, 20, 30] {
            tx.send(v);
        }
        poll.tick();
        assert_eq!(*seen.borrow(), vec![10, 30]);
        assert_eq!(poll.last_value(), 30);
    }

    #[test]
    fn panicking_completion_is_contained() {
        let (tx, mut poll) = setup();
        poll.set_on_result(|_| panic!("done handler failed"));
        let updates = record_updates(&mut poll);
        tx.send(100);
        tx.send(100);
        let report = poll.tick();
        assert_eq!(report.completed_now, Some(100));
        assert_eq!(*updates.borrow(), vec![100, 100]);
        tx.send(100);
        poll.tick();
        assert!(poll.is_done());
    }

    #[test]
    fn error_sink_receives_failures() {
        let (tx, mut poll) = setup();
        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&failures);
        poll.set_error_sink(move |f| sink.borrow_mut().push(f.clone()));
        poll.on_update(|v| {
            if v == 30 {
                panic!("update {}", v);
            }
        });
        poll.set_on_result(|_| panic!("finish"));
        tx.send(30);
        tx.send(100);
        poll.tick();

        let failures = failures.borrow();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].kind, CallbackKind::Update);
        assert_eq!(failures[0].value, 30);
        assert_eq!(failures[0].message, "update 30");
        assert_eq!(failures[1].kind, CallbackKind::Completion);
        assert_eq!(failures[1].message, "finish");
    }

    #[test]
    fn panicking_error_sink_is_contained() {
        let (tx, mut poll) = setup();
        poll.set_error_sink(|_| panic!("sink failed"));
        poll.on_update(|_| panic!("update failed"));
        tx.send(100);
        poll.tick();
        assert!(poll.is_done());
    }

    #[test]
    fn on_result_bound_after_completion_never_fires() {
        let (tx, mut poll) = setup();
        tx.send(100);
        poll.tick();
        let results = record_results(&mut poll);
        tx.send(100);
        poll.tick();
        assert!(results.borrow().is_empty());
    }

    #[test]
    fn log_callback_failures_installs_sink() {
        let (_tx, rx) = relay();
        let cfg = RelayConfig {
            poll_ms: 10,
            log_callback_failures: true,
        };
        let poll = PollLoop::new(rx, &cfg);
        assert!(poll.error_sink.is_some());
        assert_eq!(poll.interval(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn run_keeps_polling_after_completion() {
        let (tx, mut poll) = setup();
        let updates = record_updates(&mut poll);
        let results = record_results(&mut poll);
        tx.send(10);
        tx.send(100);

        let outcome = tokio::time::timeout(Duration::from_secs(1), poll.run()).await;
        assert!(outcome.is_err());
        assert_eq!(*updates.borrow(), vec![10, 100]);
        assert_eq!(*results.borrow(), vec![100]);
        assert_eq!(poll.state(), RelayState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_complete_returns_trigger() {
        let (tx, mut poll) = setup();
        tx.send(99);
        tx.send(100);
        assert_eq!(poll.run_until_complete().await, 100);
        assert_eq!(poll.run_until_complete().await, 100);
    }
}
