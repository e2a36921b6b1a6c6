//! Host event-loop boundary.
//!
//! The interpreter never touches the OS directly.  Everything it needs from
//! the outside world (a clock, idling, console output, hotkey registration,
//! window and process queries, launching programs) goes through [`Host`].
//!
//! [`HeadlessHost`] is a fully deterministic implementation: a virtual
//! millisecond clock, a scripted timeline of external changes, and captured
//! console output.  Integration tests and embedders drive scripts with it.
//! The CLI uses [`ConsoleHost`](crate::console::ConsoleHost).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::script::scheduler::WaitProbe;

// ── Window search criteria ────────────────────────────────────────────────────

/// How a window title is compared (`Opt("WinTitleMatchMode", n)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleMatch {
    /// 1: title starts with the search text.
    #[default]
    Prefix,
    /// 2: title contains the search text.
    Substring,
    /// 3: titles are identical.
    Exact,
    /// 4: the search text is a regular expression.
    Regex,
}

impl TitleMatch {
    pub fn from_mode(mode: i64) -> Option<TitleMatch> {
        match mode {
            1 => Some(TitleMatch::Prefix),
            2 => Some(TitleMatch::Substring),
            3 => Some(TitleMatch::Exact),
            4 => Some(TitleMatch::Regex),
            _ => None,
        }
    }

    pub fn mode(self) -> i64 {
        match self {
            TitleMatch::Prefix => 1,
            TitleMatch::Substring => 2,
            TitleMatch::Exact => 3,
            TitleMatch::Regex => 4,
        }
    }
}

/// Title/text criteria naming a window.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowSearch {
    pub title: String,
    /// Text that must appear somewhere in the window; empty matches all.
    pub text: String,
    pub mode: TitleMatch,
}

impl WindowSearch {
    pub fn title(title: impl Into<String>) -> Self {
        WindowSearch { title: title.into(), ..WindowSearch::default() }
    }

    pub fn matches(&self, title: &str, text: &str) -> bool {
        if !self.text.is_empty() && !text.contains(&self.text) {
            return false;
        }
        if self.title.is_empty() {
            return true;
        }
        match self.mode {
            TitleMatch::Prefix => title.starts_with(&self.title),
            TitleMatch::Substring => title.contains(&self.title),
            TitleMatch::Exact => title == self.title,
            // An invalid pattern matches nothing.
            TitleMatch::Regex => Regex::new(&self.title).is_ok_and(|re| re.is_match(title)),
        }
    }
}

// ── Host trait ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuiEvent {
    pub ctrl_id: i64,
    pub window: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A registered hotkey was pressed.
    Hotkey(String),
    Gui(GuiEvent),
}

/// Everything the host reports on one pump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pump {
    pub quit: bool,
    /// `Some` when the pause state changed.
    pub paused: Option<bool>,
    pub events: Vec<HostEvent>,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("cannot start process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("not supported by this host")]
    Unsupported,
}

pub trait Host: WaitProbe {
    /// Deliver pending OS messages.
    fn pump(&mut self) -> Pump;

    /// Wrapping millisecond clock.
    fn tick_count(&self) -> u32;

    /// Give up the processor for about `ms` milliseconds.
    fn idle(&mut self, ms: u32);

    fn console_write(&mut self, text: &str);

    /// Returns false when the key cannot be registered.
    fn register_hotkey(&mut self, _key: &str) -> bool {
        false
    }

    fn unregister_hotkey(&mut self, _key: &str) {}

    /// Start `command`; returns a handle for [`WaitProbe::process_exit_code`].
    fn run(&mut self, _command: &str, _dir: Option<&Path>) -> Result<u32, HostError> {
        Err(HostError::Unsupported)
    }
}

// ── HeadlessHost ──────────────────────────────────────────────────────────────

/// A scripted change applied when the virtual clock reaches its tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Event(HostEvent),
    OpenWindow { title: String, text: String },
    CloseWindow(String),
    Activate(String),
    StartProcess(String),
    /// End every process with this name.
    EndProcess { name: String, code: i32 },
    Pause(bool),
    Quit,
}

#[derive(Debug, Clone)]
struct Window {
    title: String,
    text: String,
}

#[derive(Debug, Clone)]
struct Process {
    name: String,
    handle: u32,
    exit: Option<i32>,
}

#[derive(Debug, Default)]
struct State {
    now: u32,
    timeline: BTreeMap<u32, Vec<Change>>,
    windows: Vec<Window>,
    /// Index into `windows`.
    active: Option<usize>,
    processes: Vec<Process>,
    next_handle: u32,
    hotkeys: Vec<String>,
    commands: Vec<String>,
    output: String,
    pumps: u64,
}

impl State {
    fn apply(&mut self, change: Change, pump: &mut Pump) {
        debug!(tick = self.now, ?change, "headless change");
        match change {
            Change::Event(HostEvent::Hotkey(key)) => {
                if self.hotkeys.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
                    pump.events.push(HostEvent::Hotkey(key));
                }
            }
            Change::Event(ev) => pump.events.push(ev),
            Change::OpenWindow { title, text } => {
                self.windows.push(Window { title, text });
                self.active = Some(self.windows.len() - 1);
            }
            Change::CloseWindow(title) => {
                self.windows.retain(|w| w.title != title);
                self.active = self.windows.len().checked_sub(1);
            }
            Change::Activate(title) => {
                if let Some(i) = self.windows.iter().position(|w| w.title == title) {
                    self.active = Some(i);
                }
            }
            Change::StartProcess(name) => {
                self.spawn(name);
            }
            Change::EndProcess { name, code } => {
                for p in self.processes.iter_mut().filter(|p| p.name.eq_ignore_ascii_case(&name)) {
                    p.exit.get_or_insert(code);
                }
            }
            Change::Pause(on) => pump.paused = Some(on),
            Change::Quit => pump.quit = true,
        }
    }

    fn spawn(&mut self, name: String) -> u32 {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.processes.push(Process { name, handle, exit: None });
        handle
    }

    fn advance(&mut self, ms: u32) -> Pump {
        let mut pump = Pump::default();
        let target = self.now.wrapping_add(ms);
        // Timeline keys never wrap: headless runs start at tick 0.
        while let Some(entry) = self.timeline.first_entry() {
            if *entry.key() > target {
                break;
            }
            let (tick, changes) = entry.remove_entry();
            self.now = self.now.max(tick);
            for change in changes {
                self.apply(change, &mut pump);
            }
        }
        self.now = target;
        pump
    }
}

/// Deterministic [`Host`] with a virtual clock.
///
/// Clones share state, so a test can keep one handle for inspection after
/// boxing another into the interpreter.  The clock advances one millisecond
/// per pump and by the requested amount on `idle`; scripted changes fire
/// when the clock reaches their tick.
#[derive(Debug, Clone, Default)]
pub struct HeadlessHost {
    state: Rc<RefCell<State>>,
    /// Changes collected during `idle`, reported by the next pump.
    held: Rc<RefCell<Pump>>,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `change` for virtual tick `tick`.
    pub fn at(&self, tick: u32, change: Change) -> &Self {
        self.state.borrow_mut().timeline.entry(tick).or_default().push(change);
        self
    }

    pub fn hotkey_at(&self, tick: u32, key: &str) -> &Self {
        self.at(tick, Change::Event(HostEvent::Hotkey(key.to_owned())))
    }

    pub fn gui_event_at(&self, tick: u32, ctrl_id: i64, window: u64) -> &Self {
        self.at(tick, Change::Event(HostEvent::Gui(GuiEvent { ctrl_id, window })))
    }

    pub fn open_window(&self, title: &str, text: &str) -> &Self {
        let mut st = self.state.borrow_mut();
        st.windows.push(Window { title: title.to_owned(), text: text.to_owned() });
        st.active = Some(st.windows.len() - 1);
        drop(st);
        self
    }

    pub fn start_process(&self, name: &str) -> u32 {
        self.state.borrow_mut().spawn(name.to_owned())
    }

    /// Everything the script wrote to the console.
    pub fn output(&self) -> String {
        self.state.borrow().output.clone()
    }

    pub fn now(&self) -> u32 {
        self.state.borrow().now
    }

    /// Hotkeys currently registered by the script.
    pub fn hotkeys(&self) -> Vec<String> {
        self.state.borrow().hotkeys.clone()
    }

    /// Command lines passed to [`Host::run`].
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn pump_count(&self) -> u64 {
        self.state.borrow().pumps
    }
}

impl WaitProbe for HeadlessHost {
    fn window_exists(&mut self, search: &WindowSearch) -> bool {
        self.state.borrow().windows.iter().any(|w| search.matches(&w.title, &w.text))
    }

    fn window_active(&mut self, search: &WindowSearch) -> bool {
        let st = self.state.borrow();
        st.active
            .and_then(|i| st.windows.get(i))
            .is_some_and(|w| search.matches(&w.title, &w.text))
    }

    fn process_exists(&mut self, name: &str) -> bool {
        self.state
            .borrow()
            .processes
            .iter()
            .any(|p| p.exit.is_none() && p.name.eq_ignore_ascii_case(name))
    }

    fn process_exit_code(&mut self, handle: u32) -> Option<i32> {
        self.state.borrow().processes.iter().find(|p| p.handle == handle)?.exit
    }
}

impl Host for HeadlessHost {
    fn pump(&mut self) -> Pump {
        let mut held = std::mem::take(&mut *self.held.borrow_mut());
        let mut st = self.state.borrow_mut();
        st.pumps += 1;
        let fresh = st.advance(1);
        held.quit |= fresh.quit;
        if fresh.paused.is_some() {
            held.paused = fresh.paused;
        }
        held.events.extend(fresh.events);
        held
    }

    fn tick_count(&self) -> u32 {
        self.state.borrow().now
    }

    fn idle(&mut self, ms: u32) {
        let fresh = self.state.borrow_mut().advance(ms);
        let mut held = self.held.borrow_mut();
        held.quit |= fresh.quit;
        if fresh.paused.is_some() {
            held.paused = fresh.paused;
        }
        held.events.extend(fresh.events);
    }

    fn console_write(&mut self, text: &str) {
        self.state.borrow_mut().output.push_str(text);
    }

    fn register_hotkey(&mut self, key: &str) -> bool {
        let mut st = self.state.borrow_mut();
        if !st.hotkeys.iter().any(|k| k.eq_ignore_ascii_case(key)) {
            st.hotkeys.push(key.to_owned());
        }
        true
    }

    fn unregister_hotkey(&mut self, key: &str) {
        self.state.borrow_mut().hotkeys.retain(|k| !k.eq_ignore_ascii_case(key));
    }

    /// Registers a running process named after the program.  It ends when
    /// the timeline says so.
    fn run(&mut self, command: &str, _dir: Option<&Path>) -> Result<u32, HostError> {
        let mut st = self.state.borrow_mut();
        st.commands.push(command.to_owned());
        let program = command.split_whitespace().next().unwrap_or(command);
        let name = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_owned());
        Ok(st.spawn(name))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
