//! Built-in functions.
//!
//! Every built-in has the same shape: it receives the interpreter and its
//! already-evaluated arguments (arity checked by the caller) and returns a
//! [`CallResult`].  Recoverable failures never abort the script; they come
//! back as soft `@error` / `@extended` codes.  Only interpreter-level faults
//! (a nested call overflowing the recursion limit, say) are `Err`.
//!
//! String positions are 1-based and count characters, not bytes.

use aho_corasick::AhoCorasick;
use regex::Regex;
use tracing::{debug, warn};

use crate::host::TitleMatch;

use super::error::ScriptError;
use super::expr::Argument;
use super::functions::{BuiltinDef, CallResult};
use super::interp::{CallKind, Interpreter};
use super::scheduler::{elapsed, WaitKind, WaitOutcome};
use super::value::{Array, Number, Value};

type Outcome = Result<CallResult, ScriptError>;

const DEFAULT_ADLIB_MS: u32 = 250;

/// `@error` / `@extended` left by `Call()` when the target cannot be called.
const CALL_FAILED: i32 = 0xDEAD;
const CALL_FAILED_EXT: i32 = 0xBEEF;

/// The full table handed to [`FunctionTable::new`](super::functions::FunctionTable::new).
pub fn catalogue() -> Vec<BuiltinDef> {
    macro_rules! def {
        ($name:literal, $func:expr, $min:expr, $max:expr) => {
            BuiltinDef { name: $name, func: $func, min_args: $min, max_args: $max }
        };
    }
    vec![
        // Console, environment and options
        def!("ConsoleWrite", console_write, 1, 1),
        def!("EnvGet", env_get, 1, 1),
        def!("EnvSet", env_set, 1, 2),
        def!("SetError", set_error, 1, 3),
        def!("SetExtended", set_extended, 1, 2),
        def!("Opt", opt, 1, 2),
        def!("AutoItSetOption", opt, 1, 2),
        // Types and conversion
        def!("IsArray", is_array, 1, 1),
        def!("IsInt", is_int, 1, 1),
        def!("IsFloat", is_float, 1, 1),
        def!("IsString", is_string, 1, 1),
        def!("IsNumber", is_number, 1, 1),
        def!("IsDeclared", is_declared, 1, 1),
        def!("Int", int, 1, 1),
        def!("Number", number, 1, 1),
        def!("String", string, 1, 1),
        def!("UBound", ubound, 1, 2),
        // Math
        def!("Abs", abs, 1, 1),
        def!("Mod", modulo, 2, 2),
        def!("Round", round, 1, 2),
        def!("Sqrt", sqrt, 1, 1),
        def!("Exp", exp, 1, 1),
        def!("Log", log, 1, 1),
        def!("Random", random, 0, 3),
        def!("SRandom", srandom, 1, 1),
        def!("BitAND", bit_and, 2, 255),
        def!("BitOR", bit_or, 2, 255),
        def!("BitXOR", bit_xor, 2, 255),
        def!("BitNOT", bit_not, 1, 1),
        // Strings
        def!("StringLen", string_len, 1, 1),
        def!("StringUpper", string_upper, 1, 1),
        def!("StringLower", string_lower, 1, 1),
        def!("StringLeft", string_left, 2, 2),
        def!("StringRight", string_right, 2, 2),
        def!("StringTrimLeft", string_trim_left, 2, 2),
        def!("StringTrimRight", string_trim_right, 2, 2),
        def!("StringMid", string_mid, 2, 3),
        def!("StringInStr", string_in_str, 2, 4),
        def!("StringReplace", string_replace, 3, 5),
        def!("StringSplit", string_split, 2, 3),
        def!("StringRegExp", string_regexp, 2, 3),
        def!("Asc", asc, 1, 1),
        def!("Chr", chr, 1, 1),
        def!("Hex", hex, 1, 2),
        def!("Dec", dec, 1, 1),
        // Dynamic calls
        def!("Eval", eval, 1, 1),
        def!("Call", call, 1, 255),
        // Time and waits
        def!("Sleep", sleep, 1, 1),
        def!("TimerInit", timer_init, 0, 0),
        def!("TimerDiff", timer_diff, 1, 1),
        def!("WinExists", win_exists, 1, 2),
        def!("WinActive", win_active, 1, 2),
        def!("WinWait", win_wait, 1, 3),
        def!("WinWaitClose", win_wait_close, 1, 3),
        def!("WinWaitActive", win_wait_active, 1, 3),
        def!("ProcessExists", process_exists, 1, 1),
        def!("ProcessWait", process_wait, 1, 2),
        def!("ProcessWaitClose", process_wait_close, 1, 2),
        def!("Run", run, 1, 2),
        def!("RunWait", run_wait, 1, 2),
        // Triggers
        def!("AdlibEnable", adlib_enable, 1, 2),
        def!("AdlibDisable", adlib_disable, 0, 0),
        def!("HotKeySet", hotkey_set, 1, 2),
        def!("GUICtrlSetOnEvent", gui_ctrl_set_on_event, 2, 2),
    ]
}

// ── Argument helpers ──────────────────────────────────────────────────────────

fn str_arg(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::as_str).unwrap_or_default()
}

fn int_arg(args: &[Value], i: usize, default: i64) -> i64 {
    args.get(i).map(Value::as_int64).unwrap_or(default)
}

fn float_arg(args: &[Value], i: usize, default: f64) -> f64 {
    args.get(i).map(Value::as_float).unwrap_or(default)
}

fn flag(b: bool) -> CallResult {
    CallResult::ok(b)
}

fn chars_of(s: &str) -> Vec<char> {
    s.chars().collect()
}

/// Character count clamped into `0..=len`.
fn clamp_count(n: i64, len: usize) -> usize {
    usize::try_from(n).unwrap_or(0).min(len)
}

/// 1-based character position of byte offset `at` in `s`.
fn char_pos(s: &str, at: usize) -> i64 {
    s[..at].chars().count() as i64 + 1
}

/// A timeout argument in seconds; 0 (or omitted) waits forever.
fn timeout_ms(args: &[Value], i: usize) -> Option<u32> {
    let secs = float_arg(args, i, 0.0);
    (secs > 0.0).then(|| (secs * 1000.0).min(f64::from(u32::MAX)) as u32)
}

fn finder(needle: &str, case_sensitive: bool) -> Option<AhoCorasick> {
    AhoCorasick::builder()
        .ascii_case_insensitive(!case_sensitive)
        .build([needle])
        .map_err(|e| warn!(error = %e, "cannot build matcher"))
        .ok()
}

// ── Console, environment and options ──────────────────────────────────────────

fn console_write(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let text = str_arg(args, 0);
    it.host.console_write(&text);
    Ok(CallResult::ok(text.chars().count() as i64))
}

fn env_get(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(CallResult::ok(std::env::var(str_arg(args, 0)).unwrap_or_default()))
}

fn env_set(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let name = str_arg(args, 0);
    if name.is_empty() || name.contains(['=', '\0']) {
        return Ok(CallResult::fail(1, 0));
    }
    match args.get(1) {
        Some(v) => std::env::set_var(&name, v.as_str()),
        None => std::env::remove_var(&name),
    }
    Ok(CallResult::ok(1))
}

fn set_error(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let value = args.get(2).cloned().unwrap_or(Value::Int32(1));
    Ok(CallResult::fail(args[0].as_int32(), value).with_extended(int_arg(args, 1, 0) as i32))
}

fn set_extended(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let value = args.get(1).cloned().unwrap_or(Value::Int32(1));
    Ok(CallResult::ok(value).with_extended(args[0].as_int32()))
}

/// `Opt(name [, value])`: returns the previous setting.
fn opt(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let name = str_arg(args, 0).to_ascii_lowercase();
    let new = args.get(1);
    let opts = &mut it.options;
    let prev = match name.as_str() {
        "expandenvstrings" => {
            let prev = opts.expand.env;
            if let Some(v) = new {
                opts.expand.env = v.as_bool();
            }
            Value::from(prev)
        }
        "expandvarstrings" => {
            let prev = opts.expand.vars;
            if let Some(v) = new {
                opts.expand.vars = v.as_bool();
            }
            Value::from(prev)
        }
        "mustdeclarevars" => {
            let prev = opts.must_declare;
            if let Some(v) = new {
                opts.must_declare = v.as_bool();
            }
            Value::from(prev)
        }
        "wintitlematchmode" => {
            let prev = opts.title_match.mode();
            if let Some(v) = new {
                match TitleMatch::from_mode(v.as_int64()) {
                    Some(mode) => opts.title_match = mode,
                    None => return Ok(CallResult::fail(1, prev)),
                }
            }
            Value::from(prev)
        }
        "winwaitdelay" => {
            let prev = opts.win_wait_delay;
            if let Some(v) = new {
                opts.win_wait_delay = u32::try_from(v.as_int64()).unwrap_or(0);
            }
            Value::from(i64::from(prev))
        }
        "guioneventmode" => {
            let prev = it.scheduler.gui_event_mode();
            if let Some(v) = new {
                it.scheduler.set_gui_event_mode(v.as_bool());
            }
            Value::from(prev)
        }
        _ => {
            debug!(option = %name, "unknown option");
            return Ok(CallResult::fail(1, 0));
        }
    };
    Ok(CallResult::ok(prev))
}

// ── Types and conversion ──────────────────────────────────────────────────────

fn is_array(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(flag(args[0].is_array()))
}

fn is_int(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(flag(match &args[0] {
        Value::Int32(_) | Value::Int64(_) => true,
        Value::Float(x) => x.is_finite() && x.fract() == 0.0,
        _ => false,
    }))
}

fn is_float(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(flag(matches!(&args[0], Value::Float(x) if x.fract() != 0.0)))
}

fn is_string(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(flag(matches!(args[0], Value::Str(_))))
}

fn is_number(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(flag(matches!(args[0], Value::Int32(_) | Value::Int64(_) | Value::Float(_))))
}

/// 1 for a global, -1 for a local, 0 when undeclared.
fn is_declared(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let name = str_arg(args, 0);
    let name = name.strip_prefix('$').unwrap_or(&name).to_ascii_uppercase();
    let code = match it.vars.scope_of(&name) {
        Some(crate::var::Scope::Global) => 1,
        Some(crate::var::Scope::Local) => -1,
        None => 0,
    };
    Ok(CallResult::ok(code))
}

fn int(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let v = match args[0].number() {
        Number::Int(n) => Value::from_i64(n),
        Number::Float(x) => Value::from_i64(x.trunc() as i64),
    };
    Ok(CallResult::ok(v))
}

fn number(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(CallResult::ok(args[0].to_number()))
}

fn string(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(CallResult::ok(args[0].as_str()))
}

/// `UBound($a [, dim])`: size of dimension `dim` (1-based, default 1), or
/// the number of dimensions when `dim` is 0.
fn ubound(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let Some(array) = args[0].as_array() else {
        return Ok(CallResult::fail(1, 0));
    };
    let dim = int_arg(args, 1, 1);
    if dim == 0 {
        return Ok(CallResult::ok(array.dims().len() as i64));
    }
    match usize::try_from(dim - 1).ok().and_then(|d| array.bound(d)) {
        Some(size) => Ok(CallResult::ok(size as i64)),
        None => Ok(CallResult::fail(2, 0)),
    }
}

// ── Math ──────────────────────────────────────────────────────────────────────

fn abs(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let v = match args[0].number() {
        Number::Int(n) => n.checked_abs().map(Value::from_i64).unwrap_or(Value::Float((n as f64).abs())),
        Number::Float(x) => Value::Float(x.abs()),
    };
    Ok(CallResult::ok(v))
}

fn modulo(_: &mut Interpreter, args: &[Value]) -> Outcome {
    if args[1].as_float() == 0.0 {
        return Ok(CallResult::fail(1, Value::Float(f64::NAN)));
    }
    Ok(CallResult::ok(args[0].arith_rem(&args[1])))
}

fn round(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let x = args[0].as_float();
    let places = int_arg(args, 1, 0).clamp(0, 15) as i32;
    let scale = 10f64.powi(places);
    Ok(CallResult::ok(Value::Float((x * scale).round() / scale)))
}

fn sqrt(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let x = args[0].as_float();
    if x < 0.0 {
        return Ok(CallResult::fail(1, 0));
    }
    Ok(CallResult::ok(Value::Float(x.sqrt())))
}

fn exp(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(CallResult::ok(Value::Float(args[0].as_float().exp())))
}

fn log(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let x = args[0].as_float();
    if x <= 0.0 {
        return Ok(CallResult::fail(1, 0));
    }
    Ok(CallResult::ok(Value::Float(x.ln())))
}

/// `Random([min [, max [, flag]]])`: a float in `[min, max)`, or with
/// flag 1 an integer in `[min, max]`.
fn random(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let (min, max) = match args.len() {
        0 => (0.0, 1.0),
        1 => (0.0, args[0].as_float()),
        _ => (args[0].as_float(), args[1].as_float()),
    };
    if min > max {
        return Ok(CallResult::fail(1, 0));
    }
    if int_arg(args, 2, 0) == 1 {
        let (lo, hi) = (min as i64, max as i64);
        let span = hi.wrapping_sub(lo) as u64 + 1;
        let offset = if span == 0 { it.next_random() } else { it.next_random() % span };
        return Ok(CallResult::ok(Value::from_i64(lo.wrapping_add(offset as i64))));
    }
    let unit = (it.next_random() >> 11) as f64 / (1u64 << 53) as f64;
    Ok(CallResult::ok(Value::Float(min + unit * (max - min))))
}

fn srandom(it: &mut Interpreter, args: &[Value]) -> Outcome {
    it.seed_random(args[0].as_int64() as u64);
    Ok(CallResult::ok(1))
}

fn bit_fold(args: &[Value], f: fn(i32, i32) -> i32) -> CallResult {
    let acc = args.iter().skip(1).fold(args[0].as_int32(), |acc, v| f(acc, v.as_int32()));
    CallResult::ok(acc)
}

fn bit_and(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(bit_fold(args, |a, b| a & b))
}

fn bit_or(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(bit_fold(args, |a, b| a | b))
}

fn bit_xor(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(bit_fold(args, |a, b| a ^ b))
}

fn bit_not(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(CallResult::ok(!args[0].as_int32()))
}

// ── Strings ───────────────────────────────────────────────────────────────────

fn string_len(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(CallResult::ok(args[0].as_str().chars().count() as i64))
}

fn string_upper(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(CallResult::ok(args[0].as_str().to_uppercase()))
}

fn string_lower(_: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(CallResult::ok(args[0].as_str().to_lowercase()))
}

fn string_left(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let s = chars_of(&args[0].as_str());
    let n = clamp_count(args[1].as_int64(), s.len());
    Ok(CallResult::ok(s[..n].iter().collect::<String>()))
}

fn string_right(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let s = chars_of(&args[0].as_str());
    let n = clamp_count(args[1].as_int64(), s.len());
    Ok(CallResult::ok(s[s.len() - n..].iter().collect::<String>()))
}

fn string_trim_left(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let s = chars_of(&args[0].as_str());
    let n = clamp_count(args[1].as_int64(), s.len());
    Ok(CallResult::ok(s[n..].iter().collect::<String>()))
}

fn string_trim_right(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let s = chars_of(&args[0].as_str());
    let n = clamp_count(args[1].as_int64(), s.len());
    Ok(CallResult::ok(s[..s.len() - n].iter().collect::<String>()))
}

/// `StringMid(s, start [, count])`; a negative count takes the rest.
fn string_mid(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let s = chars_of(&args[0].as_str());
    let start = clamp_count(args[1].as_int64().max(1) - 1, s.len());
    let count = int_arg(args, 2, -1);
    let end = if count < 0 { s.len() } else { start + clamp_count(count, s.len() - start) };
    Ok(CallResult::ok(s[start..end].iter().collect::<String>()))
}

/// `StringInStr(s, sub [, casesense [, occurrence]])`: 1-based position of
/// the match, 0 when there is none.  A negative occurrence counts from the
/// right.
fn string_in_str(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let hay = args[0].as_str();
    let needle = args[1].as_str();
    let occurrence = int_arg(args, 3, 1);
    if needle.is_empty() || occurrence == 0 {
        return Ok(CallResult::fail(1, 0));
    }
    let Some(ac) = finder(&needle, int_arg(args, 2, 0) != 0) else {
        return Ok(CallResult::fail(1, 0));
    };
    let starts: Vec<usize> = ac.find_iter(&hay).map(|m| m.start()).collect();
    let index = if occurrence > 0 {
        usize::try_from(occurrence - 1).ok()
    } else {
        usize::try_from(-occurrence).ok().and_then(|n| starts.len().checked_sub(n))
    };
    let pos = index.and_then(|i| starts.get(i)).map(|&at| char_pos(&hay, at)).unwrap_or(0);
    Ok(CallResult::ok(pos))
}

/// `StringReplace(s, search, replace [, occurrence [, casesense]])`.
/// Occurrence 0 replaces all; a negative one counts from the right.
/// `@extended` is the number of replacements.
fn string_replace(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let hay = args[0].as_str();
    let needle = args[1].as_str();
    let with = args[2].as_str();
    if needle.is_empty() {
        return Ok(CallResult::ok(hay));
    }
    let Some(ac) = finder(&needle, int_arg(args, 4, 0) != 0) else {
        return Ok(CallResult::fail(1, hay));
    };
    let found: Vec<(usize, usize)> = ac.find_iter(&hay).map(|m| (m.start(), m.end())).collect();
    let occurrence = int_arg(args, 3, 0);
    let take = usize::try_from(occurrence.unsigned_abs()).unwrap_or(usize::MAX).min(found.len());
    let chosen = match occurrence {
        0 => &found[..],
        n if n > 0 => &found[..take],
        _ => &found[found.len() - take..],
    };

    let mut out = String::with_capacity(hay.len());
    let mut last = 0;
    for &(start, end) in chosen {
        out.push_str(&hay[last..start]);
        out.push_str(&with);
        last = end;
    }
    out.push_str(&hay[last..]);
    Ok(CallResult::ok(out).with_extended(chosen.len() as i32))
}

/// `StringSplit(s, delimiters [, flag])`: element 0 holds the count.  Flag
/// 0 treats each delimiter character separately; flag 1 uses the whole
/// string.  An empty delimiter splits into characters.
fn string_split(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let s = args[0].as_str();
    let delims = args[1].as_str();
    let parts: Vec<String> = if delims.is_empty() {
        s.chars().map(String::from).collect()
    } else if int_arg(args, 2, 0) == 1 {
        s.split(delims.as_str()).map(str::to_owned).collect()
    } else {
        s.split(|c| delims.contains(c)).map(str::to_owned).collect()
    };
    let error = i32::from(parts.len() <= 1 && !delims.is_empty());
    let mut values = vec![Value::from(parts.len() as i64)];
    values.extend(parts.into_iter().map(Value::from));
    Ok(CallResult::fail(error, Array::from_values(values)))
}

/// `StringRegExp(s, pattern [, flag])`.
///
/// | flag | returns                                         |
/// |------|-------------------------------------------------|
/// | 0    | 1 on a match, else 0                            |
/// | 1    | capture groups of the first match               |
/// | 3    | capture groups of every match, in order         |
///
/// A pattern without groups returns the whole match instead.  `@error` is
/// 1 when nothing matched (flags 1 and 3) and 2 for a bad pattern or flag.
fn string_regexp(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let s = args[0].as_str();
    let re = match Regex::new(&args[1].as_str()) {
        Ok(re) => re,
        Err(e) => {
            debug!(error = %e, "bad pattern");
            return Ok(CallResult::fail(2, 0));
        }
    };
    let groups = |caps: regex::Captures<'_>| -> Vec<Value> {
        if caps.len() == 1 {
            return vec![Value::from(&caps[0])];
        }
        caps.iter().skip(1).map(|g| Value::from(g.map(|m| m.as_str()).unwrap_or(""))).collect()
    };
    let values: Vec<Value> = match int_arg(args, 2, 0) {
        0 => return Ok(flag(re.is_match(&s))),
        1 => re.captures(&s).map(groups).unwrap_or_default(),
        3 => re.captures_iter(&s).flat_map(groups).collect(),
        _ => return Ok(CallResult::fail(2, 0)),
    };
    if values.is_empty() {
        return Ok(CallResult::fail(1, 0));
    }
    Ok(CallResult::ok(Array::from_values(values)))
}

fn asc(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let code = args[0].as_str().chars().next().map(u32::from).unwrap_or(0);
    Ok(CallResult::ok(i64::from(code)))
}

fn chr(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let code = args[0].as_int64();
    match u32::try_from(code).ok().filter(|&c| c <= 255).and_then(char::from_u32) {
        Some(c) => Ok(CallResult::ok(c.to_string())),
        None => Ok(CallResult::fail(1, "")),
    }
}

/// `Hex(n [, length])`: two's-complement digits, 8 by default (16 for
/// 64-bit values).  `@error` 1 when `length` digits cannot hold it.
fn hex(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let wide = matches!(args[0].to_number(), Value::Int64(_));
    let width = match args.get(1) {
        Some(v) => v.as_int64(),
        None if wide => 16,
        None => 8,
    };
    if !(1..=16).contains(&width) {
        return Ok(CallResult::fail(1, ""));
    }
    let n = args[0].as_int64();
    let bits = if wide || width > 8 { n as u64 } else { u64::from(n as u32) };
    let digits = format!("{bits:0width$X}", width = width as usize);
    if digits.len() > width as usize {
        return Ok(CallResult::fail(1, ""));
    }
    Ok(CallResult::ok(digits))
}

fn dec(_: &mut Interpreter, args: &[Value]) -> Outcome {
    let s = args[0].as_str();
    match i64::from_str_radix(s.trim(), 16) {
        Ok(n) => Ok(CallResult::ok(Value::from_i64(n))),
        Err(_) => Ok(CallResult::fail(1, 0)),
    }
}

// ── Dynamic calls ─────────────────────────────────────────────────────────────

/// Value of the variable named by the argument (without `$`).
fn eval(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let name = str_arg(args, 0);
    let name = name.strip_prefix('$').unwrap_or(&name).to_ascii_uppercase();
    match it.vars.get(&name) {
        Some(v) => Ok(CallResult::ok(v.clone())),
        None => Ok(CallResult::fail(1, "")),
    }
}

/// `Call(name, args…)`: a user function or a built-in chosen at run time.
fn call(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let upper = args[0].as_str().to_ascii_uppercase();
    let rest = &args[1..];
    let unreachable = || CallResult::fail(CALL_FAILED, "").with_extended(CALL_FAILED_EXT);

    if let Some(func) = it.functions.get(&upper) {
        if rest.len() < func.min_args || rest.len() > func.max_args {
            return Ok(unreachable());
        }
        let argv = rest.iter().map(|v| Argument { value: v.clone(), var: None }).collect();
        it.error = 0;
        it.extended = 0;
        let value = it.call_function(CallKind::Function, &func, argv)?;
        return Ok(CallResult { value, error: it.error, extended: it.extended });
    }

    let table = it.builtin_table();
    let Some(def) = table.lookup(&upper).and_then(|id| table.get(id)).copied() else {
        debug!(function = %upper, "Call() target not found");
        return Ok(unreachable());
    };
    if rest.len() < def.min_args || rest.len() > def.max_args {
        return Ok(unreachable());
    }
    (def.func)(it, rest)
}

// ── Time and waits ────────────────────────────────────────────────────────────

fn sleep(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let duration = u32::try_from(args[0].as_int64()).unwrap_or(0);
    it.wait(WaitKind::Sleep { duration }, None)?;
    Ok(CallResult::ok(1))
}

fn timer_init(it: &mut Interpreter, _: &[Value]) -> Outcome {
    Ok(CallResult::ok(i64::from(it.host.tick_count())))
}

/// Milliseconds since a `TimerInit()` stamp.
fn timer_diff(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let since = args[0].as_int64() as u32;
    let ms = elapsed(it.host.tick_count(), since);
    Ok(CallResult::ok(Value::Float(f64::from(ms))))
}

fn win_exists(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let search = it.window_criteria(&str_arg(args, 0), &str_arg(args, 1));
    Ok(flag(it.host.window_exists(&search)))
}

fn win_active(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let search = it.window_criteria(&str_arg(args, 0), &str_arg(args, 1));
    Ok(flag(it.host.window_active(&search)))
}

fn window_wait(it: &mut Interpreter, args: &[Value], make: fn(crate::host::WindowSearch) -> WaitKind) -> Outcome {
    let search = it.window_criteria(&str_arg(args, 0), &str_arg(args, 1));
    it.window_search = search.clone();
    let outcome = it.wait(make(search), timeout_ms(args, 2))?;
    Ok(flag(outcome == WaitOutcome::Completed))
}

fn win_wait(it: &mut Interpreter, args: &[Value]) -> Outcome {
    window_wait(it, args, WaitKind::Window)
}

fn win_wait_close(it: &mut Interpreter, args: &[Value]) -> Outcome {
    window_wait(it, args, WaitKind::WindowClose)
}

fn win_wait_active(it: &mut Interpreter, args: &[Value]) -> Outcome {
    window_wait(it, args, WaitKind::WindowActive)
}

fn process_exists(it: &mut Interpreter, args: &[Value]) -> Outcome {
    Ok(flag(it.host.process_exists(&str_arg(args, 0))))
}

fn process_wait(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let outcome = it.wait(WaitKind::Process(str_arg(args, 0)), timeout_ms(args, 1))?;
    Ok(flag(outcome == WaitOutcome::Completed))
}

fn process_wait_close(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let outcome = it.wait(WaitKind::ProcessClose(str_arg(args, 0)), timeout_ms(args, 1))?;
    Ok(flag(outcome == WaitOutcome::Completed))
}

fn spawn(it: &mut Interpreter, args: &[Value]) -> Option<u32> {
    let command = str_arg(args, 0);
    let dir = str_arg(args, 1);
    let dir = (!dir.is_empty()).then(|| std::path::PathBuf::from(dir));
    match it.host.run(&command, dir.as_deref()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(%command, error = %e, "Run failed");
            None
        }
    }
}

fn run(it: &mut Interpreter, args: &[Value]) -> Outcome {
    match spawn(it, args) {
        Some(handle) => Ok(CallResult::ok(i64::from(handle))),
        None => Ok(CallResult::fail(1, 0)),
    }
}

/// Like `Run`, then block until the process exits; returns its exit code.
fn run_wait(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let Some(handle) = spawn(it, args) else {
        return Ok(CallResult::fail(1, 0));
    };
    match it.wait(WaitKind::ProcessHandle(handle), None)? {
        WaitOutcome::Exited(code) => Ok(CallResult::ok(code)),
        _ => Ok(CallResult::ok(0)),
    }
}

// ── Triggers ──────────────────────────────────────────────────────────────────

/// Uppercase name of a user function callable with no arguments.
fn callback_name(it: &Interpreter, name: &str) -> Option<String> {
    let upper = name.to_ascii_uppercase();
    match it.functions.get(&upper) {
        Some(f) if f.min_args == 0 => Some(upper),
        _ => None,
    }
}

fn adlib_enable(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let Some(func) = callback_name(it, &str_arg(args, 0)) else {
        return Ok(CallResult::fail(1, 0));
    };
    let interval = u32::try_from(int_arg(args, 1, i64::from(DEFAULT_ADLIB_MS))).unwrap_or(DEFAULT_ADLIB_MS);
    let now = it.host.tick_count();
    it.scheduler.set_adlib(func, interval, now);
    Ok(CallResult::ok(1))
}

fn adlib_disable(it: &mut Interpreter, _: &[Value]) -> Outcome {
    it.scheduler.clear_adlib();
    Ok(CallResult::ok(1))
}

/// `HotKeySet(key [, function])`: without a function the key is released.
fn hotkey_set(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let key = str_arg(args, 0);
    if args.len() < 2 {
        it.host.unregister_hotkey(&key);
        let had = it.hotkeys.remove(&key).is_some();
        return Ok(flag(had));
    }
    let Some(func) = callback_name(it, &str_arg(args, 1)) else {
        return Ok(CallResult::ok(0));
    };
    if !it.hotkeys.contains_key(&key) && !it.host.register_hotkey(&key) {
        debug!(%key, "host refused hotkey");
        return Ok(CallResult::ok(0));
    }
    it.hotkeys.insert(key, func);
    Ok(CallResult::ok(1))
}

/// `GUICtrlSetOnEvent(id, function)`: an empty name removes the handler.
fn gui_ctrl_set_on_event(it: &mut Interpreter, args: &[Value]) -> Outcome {
    let id = args[0].as_int64();
    let name = str_arg(args, 1);
    if name.is_empty() {
        it.gui_handlers.remove(&id);
        return Ok(CallResult::ok(1));
    }
    let Some(func) = callback_name(it, &name) else {
        return Ok(CallResult::ok(0));
    };
    it.gui_handlers.insert(id, func);
    Ok(CallResult::ok(1))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::host::{Change, HeadlessHost};
    use crate::script::interp::Interpreter;

    fn output(src: &str) -> String {
        let host = HeadlessHost::new();
        let mut interp = Interpreter::from_source(src, Box::new(host.clone())).unwrap();
        interp.run().unwrap();
        host.output()
    }

    fn show(expr: &str) -> String {
        output(&format!("ConsoleWrite({expr})"))
    }

    #[test]
    fn catalogue_names_are_unique() {
        let defs = super::catalogue();
        let mut names: Vec<String> = defs.iter().map(|d| d.name.to_ascii_uppercase()).collect();
        names.sort();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
        assert!(defs.iter().all(|d| d.min_args <= d.max_args));
    }

    #[test]
    fn substrings_count_characters() {
        assert_eq!(show("StringLeft(\"héllo\", 2)"), "hé");
        assert_eq!(show("StringRight(\"héllo\", 3)"), "llo");
        assert_eq!(show("StringMid(\"abcdef\", 2, 3)"), "bcd");
        assert_eq!(show("StringMid(\"abcdef\", 4)"), "def");
        assert_eq!(show("StringTrimLeft(\"abcdef\", 2) & StringTrimRight(\"abcdef\", 2)"), "cdefabcd");
        assert_eq!(show("StringLeft(\"abc\", 10) & StringLeft(\"abc\", -1)"), "abc");
    }

    #[test]
    fn in_str_occurrences() {
        assert_eq!(show("StringInStr(\"abcABCabc\", \"abc\")"), "1");
        assert_eq!(show("StringInStr(\"abcABCabc\", \"abc\", 0, 2)"), "4");
        assert_eq!(show("StringInStr(\"abcABCabc\", \"abc\", 1, 2)"), "7");
        assert_eq!(show("StringInStr(\"abcABCabc\", \"abc\", 0, -1)"), "7");
        assert_eq!(show("StringInStr(\"abc\", \"x\")"), "0");
        assert_eq!(output("StringInStr(\"abc\", \"\")\nConsoleWrite(@error)"), "1");
    }

    #[test]
    fn replace_counts_in_extended() {
        assert_eq!(output("$r = StringReplace(\"a-b-c\", \"-\", \"+\")\nConsoleWrite($r & @extended)"), "a+b+c2");
        assert_eq!(show("StringReplace(\"a-b-c\", \"-\", \"\", 1)"), "ab-c");
        assert_eq!(show("StringReplace(\"a-b-c\", \"-\", \"\", -1)"), "a-bc");
        assert_eq!(show("StringReplace(\"AbAb\", \"a\", \"x\", 0, 1)"), "AbAb");
    }

    #[test]
    fn split_puts_count_first() {
        let src = "$p = StringSplit(\"a,b;c\", \",;\")\nConsoleWrite($p[0] & $p[1] & $p[3])";
        assert_eq!(output(src), "3ac");
        let src = "$p = StringSplit(\"a<>b\", \"<>\", 1)\nConsoleWrite($p[0] & $p[2])";
        assert_eq!(output(src), "2b");
        let src = "$p = StringSplit(\"abc\", \",\")\nConsoleWrite(@error & $p[0] & $p[1])";
        assert_eq!(output(src), "11abc");
    }

    #[test]
    fn regexp_flags() {
        assert_eq!(show("StringRegExp(\"abc123\", \"[0-9]+\")"), "1");
        let src = "$m = StringRegExp(\"k1=v1 k2=v2\", \"(\\w+)=(\\w+)\", 3)\nConsoleWrite(UBound($m) & $m[3])";
        assert_eq!(output(src), "4v2");
        assert_eq!(output("StringRegExp(\"abc\", \"(\", 1)\nConsoleWrite(@error)"), "2");
        assert_eq!(output("StringRegExp(\"abc\", \"x\", 1)\nConsoleWrite(@error)"), "1");
    }

    #[test]
    fn conversions() {
        assert_eq!(show("Int(-3.9) & \"|\" & Number(\"12abc\") & \"|\" & String(7)"), "-3|12|7");
        assert_eq!(show("Hex(255) & \"|\" & Hex(255, 2) & \"|\" & Hex(-1)"), "000000FF|FF|FFFFFFFF");
        assert_eq!(show("Dec(\"ff\") & \"|\" & Asc(\"A\") & Chr(66)"), "255|65B");
        assert_eq!(output("Dec(\"zz\")\nConsoleWrite(@error)"), "1");
        assert_eq!(output("Hex(256, 1)\nConsoleWrite(@error)"), "1");
    }

    #[test]
    fn type_checks() {
        assert_eq!(show("IsInt(3) & IsInt(3.0) & IsInt(2.5) & IsFloat(2.5) & IsString(\"x\") & IsNumber(\"1\")"), "110110");
        let src = "Global $g\nF()\nFunc F()\n  Local $l\n  ConsoleWrite(IsDeclared(\"g\") & IsDeclared(\"l\") & IsDeclared(\"zz\"))\nEndFunc";
        assert_eq!(output(src), "1-10");
    }

    #[test]
    fn math() {
        assert_eq!(show("Abs(-4) & \"|\" & Mod(7, 3) & \"|\" & Round(2.456, 2) & \"|\" & Sqrt(16)"), "4|1|2.46|4");
        assert_eq!(show("BitAND(12, 10) & BitOR(12, 10) & BitXOR(12, 10) & BitNOT(0)"), "8146-1");
        assert_eq!(output("Sqrt(-1)\nConsoleWrite(@error)"), "1");
    }

    #[test]
    fn seeded_random_is_repeatable() {
        let src = "SRandom(7)\n$a = Random(1, 100, 1)\nSRandom(7)\n$b = Random(1, 100, 1)\n\
                   ConsoleWrite(($a = $b) & ($a >= 1 And $a <= 100))";
        assert_eq!(output(src), "11");
        assert_eq!(output("$x = Random(2, 3)\nConsoleWrite($x >= 2 And $x < 3)"), "1");
        assert_eq!(output("Random(5, 1)\nConsoleWrite(@error)"), "1");
    }

    #[test]
    fn ubound_errors() {
        assert_eq!(output("UBound(5)\nConsoleWrite(@error)"), "1");
        assert_eq!(output("Dim $a[3]\nUBound($a, 2)\nConsoleWrite(@error)"), "2");
    }

    #[test]
    fn opt_returns_previous_value() {
        let src = "ConsoleWrite(Opt(\"WinTitleMatchMode\", 2) & Opt(\"WinTitleMatchMode\"))";
        assert_eq!(output(src), "12");
        assert_eq!(output("Opt(\"NoSuchOption\", 1)\nConsoleWrite(@error)"), "1");
    }

    #[test]
    fn expand_var_strings_option() {
        let src = "$name = \"World\"\nOpt(\"ExpandVarStrings\", 1)\nConsoleWrite(\"Hello $name$!\")";
        assert_eq!(output(src), "Hello World!");
    }

    #[test]
    fn eval_and_call() {
        assert_eq!(output("$v = 5\nConsoleWrite(Eval(\"v\"))"), "5");
        assert_eq!(output("Eval(\"missing\")\nConsoleWrite(@error)"), "1");
        let src = "ConsoleWrite(Call(\"Twice\", 4) & Call(\"StringUpper\", \"x\"))\nFunc Twice($n)\n  Return $n * 2\nEndFunc";
        assert_eq!(output(src), "8X");
        let src = "Call(\"Nope\")\nConsoleWrite(@error = 0xDEAD And @extended = 0xBEEF)";
        assert_eq!(output(src), "1");
    }

    #[test]
    fn call_passes_soft_errors_through() {
        let src = "Call(\"F\")\nConsoleWrite(@error)\nFunc F()\n  SetError(9)\nEndFunc";
        assert_eq!(output(src), "9");
    }

    #[test]
    fn timers_use_the_host_clock() {
        let src = "$t = TimerInit()\nSleep(300)\nConsoleWrite(TimerDiff($t) >= 300)";
        assert_eq!(output(src), "1");
    }

    #[test]
    fn win_wait_with_timeout() {
        let host = HeadlessHost::new();
        host.at(
            200,
            Change::OpenWindow { title: "Untitled - Notepad".into(), text: String::new() },
        );
        let src = "ConsoleWrite(WinWait(\"Untitled\", \"\", 5))\nConsoleWrite(WinExists(\"[LAST]\"))\n\
                   ConsoleWrite(WinWait(\"Other\", \"\", 1))";
        let mut interp = Interpreter::from_source(src, Box::new(host.clone())).unwrap();
        interp.run().unwrap();
        assert_eq!(host.output(), "110");
    }

    #[test]
    fn run_wait_returns_exit_code() {
        let host = HeadlessHost::new();
        host.at(50, Change::EndProcess { name: "tool".into(), code: 7 });
        let src = "ConsoleWrite(RunWait(\"/usr/bin/tool --flag\"))";
        let mut interp = Interpreter::from_source(src, Box::new(host.clone())).unwrap();
        interp.run().unwrap();
        assert_eq!(host.output(), "7");
        assert_eq!(host.commands(), ["/usr/bin/tool --flag"]);
    }

    #[test]
    fn adlib_needs_a_parameterless_function() {
        let src = "ConsoleWrite(AdlibEnable(\"Takes\") & @error)\nFunc Takes($x)\nEndFunc";
        assert_eq!(output(src), "01");
    }
}
