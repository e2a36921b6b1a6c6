//! Delayed-operation scheduler.
//!
//! The driver polls [`Scheduler::next_action`] once per iteration.  Work is
//! considered in a fixed priority order:
//!
//! 1. one queued hotkey trigger,
//! 2. pause (the driver idles),
//! 3. the Adlib callback, when its interval has elapsed and it is not
//!    already running,
//! 4. one queued GUI event, when event mode is on,
//! 5. the pending operation (sleep or wait) against its condition and timeout.
//!
//! The decision is pure: time comes in as a wrapping millisecond tick and
//! every window/process question goes through the injected [`WaitProbe`].

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::host::WindowSearch;

/// Milliseconds elapsed between two wrapping ticks.
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Environment queries a pending wait needs answered.
pub trait WaitProbe {
    fn window_exists(&mut self, _search: &WindowSearch) -> bool {
        false
    }
    fn window_active(&mut self, _search: &WindowSearch) -> bool {
        false
    }
    fn process_exists(&mut self, _name: &str) -> bool {
        false
    }
    /// Exit code once the process behind `handle` has finished.
    fn process_exit_code(&mut self, _handle: u32) -> Option<i32> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaitKind {
    Sleep { duration: u32 },
    Window(WindowSearch),
    WindowClose(WindowSearch),
    WindowActive(WindowSearch),
    Process(String),
    ProcessClose(String),
    ProcessHandle(u32),
}

impl WaitKind {
    pub fn name(&self) -> &'static str {
        match self {
            WaitKind::Sleep { .. } => "sleep",
            WaitKind::Window(_) => "window",
            WaitKind::WindowClose(_) => "window close",
            WaitKind::WindowActive(_) => "window active",
            WaitKind::Process(_) => "process",
            WaitKind::ProcessClose(_) => "process close",
            WaitKind::ProcessHandle(_) => "process exit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub kind: WaitKind,
    pub start: u32,
    pub timeout: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    /// A waited-on process ended with this exit code.
    Exited(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyTrigger {
    pub key: String,
    /// Uppercase name of the user function to run.
    pub func: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuiTrigger {
    pub ctrl_id: i64,
    pub window: u64,
    pub func: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Adlib {
    func: String,
    interval: u32,
    last: u32,
}

/// What the driver should do this iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Hotkey(HotkeyTrigger),
    Paused,
    Adlib(String),
    GuiEvent(GuiTrigger),
    /// A pending operation is still unsatisfied.
    Waiting,
    /// The pending operation just finished.  `settle` asks for the
    /// post-wait idle that window and process waits get.
    Finished { outcome: WaitOutcome, settle: bool },
    Idle,
}

#[derive(Debug)]
pub struct Scheduler {
    hotkeys: VecDeque<HotkeyTrigger>,
    hotkey_capacity: usize,
    adlib: Option<Adlib>,
    adlib_running: bool,
    gui: VecDeque<GuiTrigger>,
    gui_event_mode: bool,
    pending: Option<PendingOperation>,
    outcome: Option<WaitOutcome>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new(64)
    }
}

impl Scheduler {
    pub fn new(hotkey_capacity: usize) -> Self {
        Scheduler {
            hotkeys: VecDeque::new(),
            hotkey_capacity: hotkey_capacity.max(1),
            adlib: None,
            adlib_running: false,
            gui: VecDeque::new(),
            gui_event_mode: false,
            pending: None,
            outcome: None,
        }
    }

    // ── Triggers ──────────────────────────────────────────────────────────────

    /// Queue a hotkey press.  Returns false when the queue is full and the
    /// press was dropped.
    pub fn queue_hotkey(&mut self, trigger: HotkeyTrigger) -> bool {
        if self.hotkeys.len() >= self.hotkey_capacity {
            warn!(key = %trigger.key, "hotkey queue full; dropping press");
            return false;
        }
        self.hotkeys.push_back(trigger);
        true
    }

    /// Queue a control event.  Outside on-event mode it is dropped.
    pub fn queue_gui_event(&mut self, trigger: GuiTrigger) {
        if !self.gui_event_mode {
            debug!(ctrl_id = trigger.ctrl_id, "gui event outside on-event mode");
            return;
        }
        self.gui.push_back(trigger);
    }

    pub fn set_gui_event_mode(&mut self, on: bool) {
        self.gui_event_mode = on;
        if !on {
            self.gui.clear();
        }
    }

    pub fn gui_event_mode(&self) -> bool {
        self.gui_event_mode
    }

    pub fn set_adlib(&mut self, func: String, interval: u32, now: u32) {
        debug!(%func, interval, "adlib enabled");
        self.adlib = Some(Adlib { func, interval, last: now });
    }

    pub fn clear_adlib(&mut self) {
        self.adlib = None;
    }

    /// The Adlib callback started by [`Action::Adlib`] has returned.
    pub fn finish_adlib(&mut self) {
        self.adlib_running = false;
    }

    // ── Pending operation ─────────────────────────────────────────────────────

    pub fn begin(&mut self, op: PendingOperation) {
        debug!(kind = op.kind.name(), timeout = ?op.timeout, "wait begins");
        self.outcome = None;
        self.pending = Some(op);
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        self.pending.as_ref()
    }

    /// Remove the pending operation for the duration of a callback.  The
    /// finished outcome goes with it through [`Scheduler::take_outcome`].
    pub fn take_pending(&mut self) -> Option<PendingOperation> {
        self.pending.take()
    }

    pub fn restore_pending(&mut self, op: Option<PendingOperation>, outcome: Option<WaitOutcome>) {
        self.pending = op;
        self.outcome = outcome;
    }

    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    pub fn take_outcome(&mut self) -> Option<WaitOutcome> {
        self.outcome.take()
    }

    // ── Decision ──────────────────────────────────────────────────────────────

    pub fn next_action<P: WaitProbe + ?Sized>(
        &mut self,
        now: u32,
        paused: bool,
        probe: &mut P,
    ) -> Action {
        if let Some(trigger) = self.hotkeys.pop_front() {
            return Action::Hotkey(trigger);
        }
        if paused {
            return Action::Paused;
        }
        if let Some(adlib) = &mut self.adlib {
            if !self.adlib_running && elapsed(now, adlib.last) >= adlib.interval {
                adlib.last = now;
                self.adlib_running = true;
                return Action::Adlib(adlib.func.clone());
            }
        }
        if self.gui_event_mode {
            if let Some(trigger) = self.gui.pop_front() {
                return Action::GuiEvent(trigger);
            }
        }

        let Some(op) = &self.pending else { return Action::Idle };
        let waited = elapsed(now, op.start);
        let satisfied = match &op.kind {
            WaitKind::Sleep { duration } => (waited >= *duration).then_some(WaitOutcome::Completed),
            WaitKind::Window(s) => probe.window_exists(s).then_some(WaitOutcome::Completed),
            WaitKind::WindowClose(s) => (!probe.window_exists(s)).then_some(WaitOutcome::Completed),
            WaitKind::WindowActive(s) => probe.window_active(s).then_some(WaitOutcome::Completed),
            WaitKind::Process(name) => probe.process_exists(name).then_some(WaitOutcome::Completed),
            WaitKind::ProcessClose(name) => {
                (!probe.process_exists(name)).then_some(WaitOutcome::Completed)
            }
            WaitKind::ProcessHandle(h) => probe.process_exit_code(*h).map(WaitOutcome::Exited),
        };
        let settle = !matches!(op.kind, WaitKind::Sleep { .. });
        let outcome = match (satisfied, op.timeout) {
            (Some(outcome), _) => outcome,
            (None, Some(timeout)) if waited >= timeout => WaitOutcome::TimedOut,
            (None, _) => return Action::Waiting,
        };
        debug!(kind = op.kind.name(), ?outcome, waited, "wait finished");
        self.pending = None;
        self.outcome = Some(outcome);
        Action::Finished { outcome, settle: settle && outcome != WaitOutcome::TimedOut }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        window: bool,
        process: bool,
        exit: Option<i32>,
        window_queries: usize,
    }

    impl WaitProbe for Probe {
        fn window_exists(&mut self, _: &WindowSearch) -> bool {
            self.window_queries += 1;
            self.window
        }
        fn process_exists(&mut self, _: &str) -> bool {
            self.process
        }
        fn process_exit_code(&mut self, _: u32) -> Option<i32> {
            self.exit
        }
    }

    fn hotkey(key: &str) -> HotkeyTrigger {
        HotkeyTrigger { key: key.into(), func: "ONKEY".into() }
    }

    fn window_wait(start: u32, timeout: Option<u32>) -> PendingOperation {
        PendingOperation { kind: WaitKind::Window(WindowSearch::title("Notepad")), start, timeout }
    }

    #[test]
    fn hotkey_wins_when_everything_is_ready() {
        let mut s = Scheduler::new(8);
        s.set_adlib("TICK".into(), 10, 0);
        s.begin(window_wait(0, None));
        s.queue_hotkey(hotkey("{F1}"));
        let mut probe = Probe { window: true, ..Probe::default() };

        assert_eq!(s.next_action(100, false, &mut probe), Action::Hotkey(hotkey("{F1}")));
        // Adlib and the wait were not consulted or consumed.
        assert!(s.pending().is_some());
        assert_eq!(probe.window_queries, 0);
        assert_eq!(s.next_action(100, false, &mut probe), Action::Adlib("TICK".into()));
    }

    #[test]
    fn hotkeys_are_served_even_while_paused() {
        let mut s = Scheduler::new(8);
        s.queue_hotkey(hotkey("a"));
        let mut probe = Probe::default();
        assert!(matches!(s.next_action(0, true, &mut probe), Action::Hotkey(_)));
        assert_eq!(s.next_action(0, true, &mut probe), Action::Paused);
    }

    #[test]
    fn hotkey_queue_is_bounded() {
        let mut s = Scheduler::new(2);
        assert!(s.queue_hotkey(hotkey("a")));
        assert!(s.queue_hotkey(hotkey("b")));
        assert!(!s.queue_hotkey(hotkey("c")));
        let mut probe = Probe::default();
        assert_eq!(s.next_action(0, false, &mut probe), Action::Hotkey(hotkey("a")));
        assert_eq!(s.next_action(0, false, &mut probe), Action::Hotkey(hotkey("b")));
        assert_eq!(s.next_action(0, false, &mut probe), Action::Idle);
    }

    #[test]
    fn adlib_does_not_reenter_while_running() {
        let mut s = Scheduler::default();
        s.set_adlib("TICK".into(), 50, 0);
        let mut probe = Probe::default();
        assert_eq!(s.next_action(10, false, &mut probe), Action::Idle);
        assert_eq!(s.next_action(50, false, &mut probe), Action::Adlib("TICK".into()));
        assert_eq!(s.next_action(200, false, &mut probe), Action::Idle);
        s.finish_adlib();
        assert_eq!(s.next_action(200, false, &mut probe), Action::Adlib("TICK".into()));
    }

    #[test]
    fn gui_events_need_event_mode() {
        let mut s = Scheduler::default();
        let ev = GuiTrigger { ctrl_id: 3, window: 1, func: "CLICK".into() };
        s.queue_gui_event(ev.clone());
        let mut probe = Probe::default();
        assert_eq!(s.next_action(0, false, &mut probe), Action::Idle);
        s.set_gui_event_mode(true);
        s.queue_gui_event(ev.clone());
        assert_eq!(s.next_action(0, false, &mut probe), Action::GuiEvent(ev));
    }

    #[test]
    fn sleep_completes_without_settle() {
        let mut s = Scheduler::default();
        s.begin(PendingOperation { kind: WaitKind::Sleep { duration: 100 }, start: 0, timeout: None });
        let mut probe = Probe::default();
        assert_eq!(s.next_action(99, false, &mut probe), Action::Waiting);
        assert_eq!(
            s.next_action(100, false, &mut probe),
            Action::Finished { outcome: WaitOutcome::Completed, settle: false }
        );
        assert_eq!(s.take_outcome(), Some(WaitOutcome::Completed));
        assert_eq!(s.next_action(101, false, &mut probe), Action::Idle);
    }

    #[test]
    fn window_wait_times_out_across_tick_wraparound() {
        let mut s = Scheduler::default();
        let start = u32::MAX - 10;
        s.begin(window_wait(start, Some(50)));
        let mut probe = Probe::default();
        assert_eq!(s.next_action(start.wrapping_add(49), false, &mut probe), Action::Waiting);
        assert_eq!(
            s.next_action(start.wrapping_add(50), false, &mut probe),
            Action::Finished { outcome: WaitOutcome::TimedOut, settle: false }
        );
    }

    #[test]
    fn satisfied_window_wait_asks_for_settle() {
        let mut s = Scheduler::default();
        s.begin(window_wait(0, Some(1000)));
        let mut probe = Probe { window: true, ..Probe::default() };
        assert_eq!(
            s.next_action(5, false, &mut probe),
            Action::Finished { outcome: WaitOutcome::Completed, settle: true }
        );
    }

    #[test]
    fn process_waits() {
        let mut s = Scheduler::default();
        let mut probe = Probe { process: true, ..Probe::default() };
        s.begin(PendingOperation { kind: WaitKind::ProcessClose("x".into()), start: 0, timeout: None });
        assert_eq!(s.next_action(1, false, &mut probe), Action::Waiting);
        probe.process = false;
        assert!(matches!(s.next_action(2, false, &mut probe), Action::Finished { .. }));

        s.begin(PendingOperation { kind: WaitKind::ProcessHandle(7), start: 0, timeout: None });
        probe.exit = Some(3);
        assert_eq!(
            s.next_action(3, false, &mut probe),
            Action::Finished { outcome: WaitOutcome::Exited(3), settle: true }
        );
    }

    #[test]
    fn taken_pending_is_invisible_until_restored() {
        let mut s = Scheduler::default();
        s.begin(window_wait(0, None));
        let saved = s.take_pending();
        let mut probe = Probe::default();
        assert_eq!(s.next_action(0, false, &mut probe), Action::Idle);
        s.restore_pending(saved, None);
        assert_eq!(s.next_action(0, false, &mut probe), Action::Waiting);
    }

    #[test]
    fn outcome_survives_a_nested_wait() {
        let mut s = Scheduler::default();
        s.begin(PendingOperation { kind: WaitKind::Sleep { duration: 5 }, start: 0, timeout: None });
        let mut probe = Probe::default();
        assert!(matches!(s.next_action(5, false, &mut probe), Action::Finished { .. }));
        let (op, outcome) = (s.take_pending(), s.take_outcome());
        s.begin(PendingOperation { kind: WaitKind::Sleep { duration: 1 }, start: 5, timeout: None });
        s.next_action(6, false, &mut probe);
        assert_eq!(s.take_outcome(), Some(WaitOutcome::Completed));
        s.restore_pending(op, outcome);
        assert_eq!(s.take_outcome(), Some(WaitOutcome::Completed));
        assert!(s.pending().is_none());
    }
}
