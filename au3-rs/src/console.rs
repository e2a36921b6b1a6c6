//! The host used by the `au3` binary.
//!
//! There is no window system behind a terminal: window probes always report
//! "no such window", and hotkeys cannot be registered.  Processes are real.
//! Commands run through `sh -c`, handles are OS process ids, and
//! `ProcessExists` looks at `/proc` as well as at our own children.
//!
//! Quit and pause requests arrive from signal handlers on other threads
//! through [`Signals`].

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::host::{Host, HostError, Pump, WindowSearch};
use crate::script::scheduler::WaitProbe;

// ── Signals ───────────────────────────────────────────────────────────────────

/// Flags shared between the signal-handling task and the host.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    quit: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl Signals {
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    /// Flip the pause state; returns the new one.
    pub fn toggle_pause(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }
}

// ── ConsoleHost ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Spawned {
    name: String,
    child: Child,
    exit: Option<i32>,
}

#[derive(Debug)]
pub struct ConsoleHost {
    start: Instant,
    signals: Signals,
    /// Pause state last reported through `pump`.
    reported_pause: bool,
    children: HashMap<u32, Spawned>,
}

impl ConsoleHost {
    pub fn new(signals: Signals) -> Self {
        ConsoleHost { start: Instant::now(), signals, reported_pause: false, children: HashMap::new() }
    }

    fn reap(&mut self, handle: u32) -> Option<i32> {
        let spawned = self.children.get_mut(&handle)?;
        if spawned.exit.is_none() {
            match spawned.child.try_wait() {
                Ok(Some(status)) => {
                    // Killed by a signal: no code.
                    let code = status.code().unwrap_or(-1);
                    debug!(handle, code, "child exited");
                    spawned.exit = Some(code);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(handle, error = %e, "cannot poll child");
                    spawned.exit = Some(-1);
                }
            }
        }
        spawned.exit
    }
}

/// Program name of a command line, the way `/proc/<pid>/comm` shows it.
fn program_name(command: &str) -> String {
    let program = command.split_whitespace().next().unwrap_or(command);
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_owned())
}

/// Any process on the system whose name matches.
fn system_process_exists(name: &str) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else { return false };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|e| std::fs::read_to_string(e.path().join("comm")).ok())
        .any(|comm| comm.trim_end().eq_ignore_ascii_case(name))
}

impl WaitProbe for ConsoleHost {
    fn window_exists(&mut self, _search: &WindowSearch) -> bool {
        false
    }

    fn window_active(&mut self, _search: &WindowSearch) -> bool {
        false
    }

    fn process_exists(&mut self, name: &str) -> bool {
        let handles: Vec<u32> = self
            .children
            .iter()
            .filter(|(_, s)| s.name.eq_ignore_ascii_case(name))
            .map(|(h, _)| *h)
            .collect();
        if handles.into_iter().any(|h| self.reap(h).is_none()) {
            return true;
        }
        system_process_exists(name)
    }

    fn process_exit_code(&mut self, handle: u32) -> Option<i32> {
        self.reap(handle)
    }
}

impl Host for ConsoleHost {
    fn pump(&mut self) -> Pump {
        let paused = self.signals.paused.load(Ordering::SeqCst);
        let changed = paused != self.reported_pause;
        self.reported_pause = paused;
        Pump {
            quit: self.signals.quit.load(Ordering::SeqCst),
            paused: changed.then_some(paused),
            events: Vec::new(),
        }
    }

    fn tick_count(&self) -> u32 {
        // Wraps like the 32-bit tick counter scripts expect.
        self.start.elapsed().as_millis() as u32
    }

    fn idle(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms.max(1))));
    }

    fn console_write(&mut self, text: &str) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            warn!(error = %e, "console write failed");
        }
    }

    fn run(&mut self, command: &str, dir: Option<&Path>) -> Result<u32, HostError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn()?;
        let handle = child.id();
        debug!(%command, handle, "spawned");
        self.children.insert(handle, Spawned { name: program_name(command), child, exit: None });
        Ok(handle)
    }
}

impl Drop for ConsoleHost {
    fn drop(&mut self) {
        // Children outlive the script; reap the ones already done.
        let handles: Vec<u32> = self.children.keys().copied().collect();
        for h in handles {
            self.reap(h);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
