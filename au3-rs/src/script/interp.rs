//! Statement-execution driver.
//!
//! The [`Interpreter`] owns every piece of run-time state: variables, the
//! block stack, soft error codes, the scheduler and the host.  Execution is
//! one re-entrant loop, [`Interpreter::execute`], which is entered again for
//! every user-function call, every callback (Adlib, hotkey, GUI event) and
//! every blocking wait.  Each nested entry goes through a [`CallGuard`] that
//! snapshots the caller's context and puts it back when the guard drops, on
//! success and on error alike.
//!
//! One loop iteration:
//!
//! 1. pump the host (quit and pause signals, hotkey and GUI events),
//! 2. stop if quitting,
//! 3. poll the scheduler; anything it handled restarts the loop, and a
//!    blocking wait whose operation has finished returns,
//! 4. lex the line at the program counter (through the cache) and execute it.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::host::{Host, HostEvent, TitleMatch, WindowSearch};
use crate::var::{DeclScope, VarStore};

use super::builtins::catalogue;
use super::error::{ErrorKind, ScriptError};
use super::expand::{expand, ExpandFlags};
use super::expr::{evaluate, Argument, EvalContext};
use super::functions::{BuiltinId, FunctionTable, UserFunction, UserFunctions};
use super::lexer::{Keyword, LineCache, TokenLine};
use super::macros;
use super::prescan::prescan;
use super::scheduler::{
    Action, GuiTrigger, HotkeyTrigger, PendingOperation, Scheduler, WaitKind, WaitOutcome,
};
use super::source::Script;
use super::value::{Array, Value};

/// Grow the native stack when less than this is left before a nested entry.
const RED_ZONE: usize = 128 * 1024;
const STACK_CHUNK: usize = 1024 * 1024;

/// Host idle slice while a wait is unsatisfied.
const WAIT_SLICE_MS: u32 = 10;
/// Host idle slice while paused.
const PAUSE_SLICE_MS: u32 = 50;

// ── Execution kinds and states ────────────────────────────────────────────────

/// Why [`Interpreter::execute`] was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Main,
    Function,
    Adlib,
    Hotkey,
    GuiEvent,
    /// A sleep or wait: only the scheduler runs until the operation ends.
    Blocking,
}

impl CallKind {
    /// Callbacks interrupt unrelated code, so they must not leak soft errors.
    fn is_callback(self) -> bool {
        matches!(self, CallKind::Adlib | CallKind::Hotkey | CallKind::GuiEvent)
    }
}

/// Externally visible driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Run,
    Paused,
    Sleeping,
    Waiting(&'static str),
    Quit,
}

/// What the driver does after a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    Jump(usize),
    /// Leave the current function or callback.
    Return,
}

/// An open control structure.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Block {
    If,
    While { line: usize },
    Do { line: usize },
    For { line: usize, var: String, limit: Value, step: Value },
    Select,
}

impl Block {
    pub(crate) fn keyword(&self) -> Keyword {
        match self {
            Block::If => Keyword::If,
            Block::While { .. } => Keyword::While,
            Block::Do { .. } => Keyword::Do,
            Block::For { .. } => Keyword::For,
            Block::Select => Keyword::Select,
        }
    }

    /// Opening keyword and line of a loop block.
    pub(crate) fn loop_start(&self) -> Option<(Keyword, usize)> {
        match self {
            Block::While { line } | Block::Do { line } | Block::For { line, .. } => {
                Some((self.keyword(), *line))
            }
            _ => None,
        }
    }
}

/// Settings scripts change with `Opt()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Options {
    pub expand: ExpandFlags,
    pub must_declare: bool,
    pub win_wait_delay: u32,
    pub title_match: TitleMatch,
}

enum Poll {
    Handled,
    Idle,
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interpreter {
    pub(crate) config: Config,
    pub(crate) host: Box<dyn Host>,
    builtins: Rc<FunctionTable>,
    pub(crate) functions: Rc<UserFunctions>,
    pub(crate) script: Rc<Script>,
    cache: LineCache,
    pub(crate) vars: VarStore,
    pub(crate) blocks: Vec<Block>,
    /// First block owned by the active call frame.
    pub(crate) block_base: usize,
    pc: usize,
    pub(crate) quitting: bool,
    host_quit: bool,
    paused: bool,
    depth: usize,
    pub(crate) error: i32,
    pub(crate) extended: i32,
    pub(crate) return_value: Value,
    pub(crate) exit_code: i32,
    pub(crate) scheduler: Scheduler,
    /// Hotkey → uppercase callback name.
    pub(crate) hotkeys: HashMap<String, String>,
    /// GUI control id → uppercase callback name.
    pub(crate) gui_handlers: HashMap<i64, String>,
    /// Criteria of the last window wait, addressed as `[LAST]`.
    pub(crate) window_search: WindowSearch,
    pub(crate) options: Options,
    pub(crate) hotkey_pressed: String,
    pub(crate) gui_event: (i64, u64),
    pub(crate) num_params: usize,
    rng: u64,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter").finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Pre-scan `script` and prepare it to run on `host`.
    pub fn new(script: Script, config: Config, host: Box<dyn Host>) -> Result<Self, ScriptError> {
        let builtins = Rc::new(FunctionTable::new(catalogue()));
        let functions = prescan(&script, &builtins)?;
        let options = Options {
            expand: ExpandFlags { env: config.expand_env_strings, vars: config.expand_var_strings },
            must_declare: config.must_declare_vars,
            win_wait_delay: config.win_wait_delay,
            title_match: TitleMatch::default(),
        };
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x2545_f491_4f6c_dd1d);
        Ok(Interpreter {
            cache: LineCache::new(config.lexer_cache_size),
            scheduler: Scheduler::new(config.hotkey_queue),
            config,
            host,
            builtins,
            functions: Rc::new(functions),
            script: Rc::new(script),
            vars: VarStore::new(),
            blocks: Vec::new(),
            block_base: 0,
            pc: 0,
            quitting: false,
            host_quit: false,
            paused: false,
            depth: 0,
            error: 0,
            extended: 0,
            return_value: Value::default(),
            exit_code: 0,
            hotkeys: HashMap::new(),
            gui_handlers: HashMap::new(),
            window_search: WindowSearch::default(),
            options,
            hotkey_pressed: String::new(),
            gui_event: (0, 0),
            num_params: 0,
            rng: seed | 1,
        })
    }

    /// Build from in-memory source with the default configuration.
    pub fn from_source(src: &str, host: Box<dyn Host>) -> Result<Self, ScriptError> {
        Self::with_config(src, Config::default(), host)
    }

    pub fn with_config(src: &str, config: Config, host: Box<dyn Host>) -> Result<Self, ScriptError> {
        let script = Script::from_source("script.au3", src)?;
        Self::new(script, config, host)
    }

    /// Expose script arguments as `$CmdLine` (element 0 is the count) and
    /// `$CmdLineRaw`.
    pub fn set_cmdline(&mut self, args: &[String]) {
        let mut values = vec![Value::from(args.len() as i64)];
        values.extend(args.iter().map(|a| Value::from(a.as_str())));
        self.vars.set_global("CMDLINE", Value::from(Array::from_values(values)));
        self.vars.set_global("CMDLINERAW", Value::from(args.join(" ")));
    }

    /// Run the start hook, the main flow and the exit hook.  Returns the
    /// script's exit code.
    pub fn run(&mut self) -> Result<i32, ScriptError> {
        let result = self.run_hooks_and_main();
        self.quitting = true;
        result.map(|()| self.exit_code)
    }

    fn run_hooks_and_main(&mut self) -> Result<(), ScriptError> {
        if let Some(start) = self.functions.get("ONAUTOITSTART") {
            debug!("running start hook");
            self.call_function(CallKind::Function, &start, Vec::new())?;
        }
        if !self.quitting {
            self.pc = 0;
            self.execute(CallKind::Main)?;
        }
        if self.host_quit {
            return Ok(());
        }
        if let Some(exit) = self.functions.get("ONAUTOITEXIT") {
            debug!(code = self.exit_code, "running exit hook");
            self.quitting = false;
            self.call_function(CallKind::Function, &exit, Vec::new())?;
        }
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> RunState {
        if self.quitting {
            return RunState::Quit;
        }
        if self.paused {
            return RunState::Paused;
        }
        match self.scheduler.pending().map(|op| &op.kind) {
            Some(WaitKind::Sleep { .. }) => RunState::Sleeping,
            Some(kind) => RunState::Waiting(kind.name()),
            None => RunState::Run,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// `(@error, @extended)`.
    pub fn soft_error(&self) -> (i32, i32) {
        (self.error, self.extended)
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.vars.global(&name.to_ascii_uppercase())
    }

    /// Number of open blocks across all call frames.
    pub fn block_depth(&self) -> usize {
        self.blocks.len()
    }

    /// Active nested entries (calls, callbacks and waits).
    pub fn call_depth(&self) -> usize {
        self.depth
    }

    /// `(hits, misses)` of the token cache.
    pub fn lexer_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    pub(crate) fn builtin_table(&self) -> &FunctionTable {
        &self.builtins
    }

    // ── Driver loop ───────────────────────────────────────────────────────────

    /// The re-entrant statement loop.  Returns when the script ends (`Main`),
    /// the function returns, the pending operation finishes (`Blocking`) or
    /// the interpreter is quitting.
    pub(crate) fn execute(&mut self, kind: CallKind) -> Result<(), ScriptError> {
        loop {
            self.pump();
            if self.quitting {
                return Ok(());
            }
            if let Poll::Handled = self.poll()? {
                continue;
            }
            if kind == CallKind::Blocking {
                return Ok(());
            }
            let line = self.pc;
            if line >= self.script.len() {
                return Ok(());
            }
            match self.step(line) {
                Ok(Flow::Next) => self.pc = line + 1,
                Ok(Flow::Jump(to)) => self.pc = to,
                Ok(Flow::Return) => return Ok(()),
                Err(e) if e.kind == ErrorKind::Quitting => return Ok(()),
                Err(e) => {
                    self.quitting = true;
                    return Err(self.script.locate(e, line));
                }
            }
        }
    }

    fn step(&mut self, line: usize) -> Result<Flow, ScriptError> {
        let tokens = self.lex(line)?;
        self.exec_statement(&tokens, line)
    }

    /// Tokens of global line `line`, through the cache.
    pub(crate) fn lex(&mut self, line: usize) -> Result<TokenLine, ScriptError> {
        Ok(self.cache.lex(line, self.script.text(line), &self.builtins)?)
    }

    fn pump(&mut self) {
        let pump = self.host.pump();
        if pump.quit && !self.host_quit {
            debug!("host requested quit");
            self.host_quit = true;
            self.quitting = true;
        }
        if let Some(paused) = pump.paused {
            debug!(paused, "pause state changed");
            self.paused = paused;
        }
        for event in pump.events {
            match event {
                HostEvent::Hotkey(key) => match self.hotkeys.get(&key) {
                    Some(func) => {
                        let func = func.clone();
                        self.scheduler.queue_hotkey(HotkeyTrigger { key, func });
                    }
                    None => debug!(%key, "hotkey without a handler"),
                },
                HostEvent::Gui(ev) => {
                    if let Some(func) = self.gui_handlers.get(&ev.ctrl_id) {
                        let func = func.clone();
                        self.scheduler.queue_gui_event(GuiTrigger {
                            ctrl_id: ev.ctrl_id,
                            window: ev.window,
                            func,
                        });
                    }
                }
            }
        }
    }

    fn poll(&mut self) -> Result<Poll, ScriptError> {
        let now = self.host.tick_count();
        let action = self.scheduler.next_action(now, self.paused, &mut *self.host);
        match action {
            Action::Idle => return Ok(Poll::Idle),
            Action::Waiting => self.host.idle(WAIT_SLICE_MS),
            Action::Paused => self.host.idle(PAUSE_SLICE_MS),
            Action::Finished { settle, .. } => {
                if settle && self.options.win_wait_delay > 0 {
                    self.host.idle(self.options.win_wait_delay);
                }
            }
            Action::Hotkey(trigger) => {
                let prev = std::mem::replace(&mut self.hotkey_pressed, trigger.key);
                let result = self.run_callback(CallKind::Hotkey, &trigger.func);
                self.hotkey_pressed = prev;
                result?;
            }
            Action::Adlib(func) => {
                let result = self.run_callback(CallKind::Adlib, &func);
                self.scheduler.finish_adlib();
                result?;
            }
            Action::GuiEvent(trigger) => {
                let prev = std::mem::replace(&mut self.gui_event, (trigger.ctrl_id, trigger.window));
                let result = self.run_callback(CallKind::GuiEvent, &trigger.func);
                self.gui_event = prev;
                result?;
            }
        }
        Ok(Poll::Handled)
    }

    fn run_callback(&mut self, kind: CallKind, name: &str) -> Result<(), ScriptError> {
        let Some(func) = self.functions.get(name) else {
            warn!(function = name, "callback names no function");
            return Ok(());
        };
        debug!(function = name, ?kind, "callback");
        self.call_function(kind, &func, Vec::new()).map(|_| ())
    }

    // ── Nested entries ────────────────────────────────────────────────────────

    /// Abandon the current statement once a nested call has started the quit.
    fn stop_if_quitting(&self) -> Result<(), ScriptError> {
        if self.quitting {
            return Err(ErrorKind::Quitting.into());
        }
        Ok(())
    }

    fn check_depth(&self) -> Result<(), ScriptError> {
        if self.depth >= self.config.max_recursion {
            return Err(ErrorKind::RecursionLimit(self.config.max_recursion).into());
        }
        Ok(())
    }

    /// Call a user function (or run a callback).  Omitted trailing
    /// parameters take their defaults; `ByRef` parameters are copied back to
    /// the caller's variables after the callee's scope is gone.
    pub(crate) fn call_function(
        &mut self,
        kind: CallKind,
        func: &Rc<UserFunction>,
        args: Vec<Argument>,
    ) -> Result<Value, ScriptError> {
        if args.len() < func.min_args || args.len() > func.max_args {
            return Err(ErrorKind::Arity {
                name: func.name.clone(),
                given: args.len(),
                min: func.min_args,
                max: func.max_args,
            }
            .into());
        }
        self.check_depth()?;

        let given = args.len();
        let mut values = Vec::with_capacity(func.params.len());
        for (i, param) in func.params.iter().enumerate() {
            let value = match (args.get(i), &param.default) {
                (Some(arg), _) => arg.value.clone(),
                (None, Some(tokens)) => evaluate(self, tokens, 0)?.0,
                (None, None) => Value::default(),
            };
            values.push(value);
        }

        debug!(function = %func.name, ?kind, depth = self.depth + 1, "enter");
        let callee: &UserFunction = func;
        let (ret, by_ref) =
            stacker::maybe_grow(RED_ZONE, STACK_CHUNK, || self.invoke(kind, callee, values, given))?;
        if self.quitting {
            return Ok(ret);
        }

        for ((arg, param), value) in args.iter().zip(&func.params).zip(by_ref) {
            let (Some(var), Some(value)) = (&arg.var, value) else { continue };
            if param.by_ref && !self.vars.lookup(var).is_some_and(|(v, _)| v.constant) {
                self.vars.assign(var, value)?;
            }
        }
        Ok(ret)
    }

    fn invoke(
        &mut self,
        kind: CallKind,
        func: &UserFunction,
        values: Vec<Value>,
        given: usize,
    ) -> Result<(Value, Vec<Option<Value>>), ScriptError> {
        let mut frame = CallGuard::enter(self, kind);
        for (param, value) in func.params.iter().zip(values) {
            frame.vars.declare(&param.name, value, false, DeclScope::Local)?;
        }
        frame.num_params = given;
        frame.return_value = Value::default();
        frame.pc = func.body_start;
        frame.execute(kind)?;

        let ret = std::mem::take(&mut frame.return_value);
        let by_ref = func
            .params
            .iter()
            .map(|p| if p.by_ref { frame.vars.get_local(&p.name).cloned() } else { None })
            .collect();
        Ok((ret, by_ref))
    }

    /// Block on `kind` until it is satisfied, times out, or the script quits.
    /// Callbacks keep running meanwhile.
    pub(crate) fn wait(&mut self, kind: WaitKind, timeout: Option<u32>) -> Result<WaitOutcome, ScriptError> {
        self.check_depth()?;
        let op = PendingOperation { kind, start: self.host.tick_count(), timeout };
        let mut frame = CallGuard::enter(self, CallKind::Blocking);
        frame.scheduler.begin(op);
        frame.execute(CallKind::Blocking)?;
        Ok(frame.scheduler.take_outcome().unwrap_or(WaitOutcome::TimedOut))
    }

    // ── Helpers for built-ins ─────────────────────────────────────────────────

    /// Criteria for a window built-in; `[LAST]` reuses the previous wait's.
    pub(crate) fn window_criteria(&self, title: &str, text: &str) -> WindowSearch {
        if title.eq_ignore_ascii_case("[LAST]") {
            return self.window_search.clone();
        }
        WindowSearch { title: title.to_owned(), text: text.to_owned(), mode: self.options.title_match }
    }

    pub(crate) fn seed_random(&mut self, seed: u64) {
        self.rng = seed | 1;
    }

    /// xorshift64.
    pub(crate) fn next_random(&mut self) -> u64 {
        let mut s = self.rng;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.rng = s;
        s
    }
}

// ── CallGuard ─────────────────────────────────────────────────────────────────

/// Snapshot of the caller's context, restored when the guard drops.
///
/// Function and callback entries get a fresh local scope and block base;
/// callbacks additionally get their soft error codes restored so they cannot
/// disturb the code they interrupted.  The interrupted wait and any outcome it
/// already reached are set aside for the duration.  A blocking entry owns the pending
/// operation it started and cancels it on the way out.
pub(crate) struct CallGuard<'a> {
    interp: &'a mut Interpreter,
    kind: CallKind,
    saved: Saved,
}

/// Caller state held by a [`CallGuard`].  Kept apart from the guard's own
/// fields so that writes through `DerefMut` always reach the interpreter.
struct Saved {
    pc: usize,
    blocks: usize,
    block_base: usize,
    pending: Option<PendingOperation>,
    outcome: Option<WaitOutcome>,
    window_search: WindowSearch,
    error: i32,
    extended: i32,
    num_params: usize,
}

impl<'a> CallGuard<'a> {
    fn enter(interp: &'a mut Interpreter, kind: CallKind) -> Self {
        let (pending, outcome) = match kind {
            CallKind::Blocking => (None, None),
            _ => (interp.scheduler.take_pending(), interp.scheduler.take_outcome()),
        };
        let saved = Saved {
            pc: interp.pc,
            blocks: interp.blocks.len(),
            block_base: interp.block_base,
            pending,
            outcome,
            window_search: interp.window_search.clone(),
            error: interp.error,
            extended: interp.extended,
            num_params: interp.num_params,
        };
        interp.depth += 1;
        if kind != CallKind::Blocking {
            interp.vars.push_scope();
            interp.block_base = interp.blocks.len();
        }
        CallGuard { interp, kind, saved }
    }
}

impl Deref for CallGuard<'_> {
    type Target = Interpreter;

    fn deref(&self) -> &Interpreter {
        self.interp
    }
}

impl DerefMut for CallGuard<'_> {
    fn deref_mut(&mut self) -> &mut Interpreter {
        self.interp
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let saved = &mut self.saved;
        let it = &mut *self.interp;
        it.depth -= 1;
        it.pc = saved.pc;
        it.blocks.truncate(saved.blocks);
        it.block_base = saved.block_base;
        it.window_search = std::mem::take(&mut saved.window_search);
        it.num_params = saved.num_params;
        if self.kind == CallKind::Blocking {
            it.scheduler.cancel_pending();
        } else {
            it.vars.pop_scope();
            it.scheduler.restore_pending(saved.pending.take(), saved.outcome.take());
        }
        if self.kind.is_callback() {
            it.error = saved.error;
            it.extended = saved.extended;
        }
        debug!(kind = ?self.kind, depth = it.depth, "leave");
    }
}

// ── EvalContext ───────────────────────────────────────────────────────────────

impl EvalContext for Interpreter {
    fn get_var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    fn macro_value(&mut self, name: &str) -> Result<Value, ScriptError> {
        macros::value(self, name)
    }

    fn builtin_arity(&self, id: BuiltinId) -> Option<(&'static str, usize, usize)> {
        self.builtins.get(id).map(|d| (d.name, d.min_args, d.max_args))
    }

    fn call_builtin(&mut self, id: BuiltinId, args: Vec<Value>) -> Result<Value, ScriptError> {
        self.stop_if_quitting()?;
        let def = *self
            .builtins
            .get(id)
            .ok_or_else(|| ScriptError::new(ErrorKind::UnknownFunction(format!("#{}", id.0))))?;
        self.error = 0;
        self.extended = 0;
        let result = (def.func)(self, &args)?;
        self.stop_if_quitting()?;
        self.error = result.error;
        self.extended = result.extended;
        Ok(result.value)
    }

    fn call_user(&mut self, name: &str, args: Vec<Argument>) -> Result<Value, ScriptError> {
        let func = self
            .functions
            .get(name)
            .ok_or_else(|| ScriptError::new(ErrorKind::UnknownFunction(name.to_owned())))?;
        self.error = 0;
        self.extended = 0;
        let value = self.call_function(CallKind::Function, &func, args)?;
        self.stop_if_quitting()?;
        Ok(value)
    }

    fn string_literal(&mut self, text: &str) -> Result<Value, ScriptError> {
        let flags = self.options.expand;
        if !flags.any() {
            return Ok(Value::Str(text.to_owned()));
        }
        Ok(Value::Str(expand(text, flags, self)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
