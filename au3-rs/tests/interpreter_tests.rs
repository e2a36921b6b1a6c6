//! Whole-script tests on the headless host: virtual clock, scripted host
//! events and captured console output.

use au3::config::Config;
use au3::host::{Change, HeadlessHost};
use au3::script::{ErrorKind, Interpreter, RunState, Value};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn start(src: &str, host: &HeadlessHost) -> Interpreter {
    Interpreter::from_source(src, Box::new(host.clone()))
        .unwrap_or_else(|e| panic!("pre-scan failed:\n{}", e.report()))
}

/// Run `src` to completion and return its console output.
fn output(src: &str) -> String {
    let host = HeadlessHost::new();
    let mut interp = start(src, &host);
    if let Err(e) = interp.run() {
        panic!("script failed:\n{}", e.report());
    }
    host.output()
}

fn fatal(src: &str) -> ErrorKind {
    let host = HeadlessHost::new();
    match Interpreter::from_source(src, Box::new(host)) {
        Err(e) => e.kind,
        Ok(mut interp) => interp.run().expect_err("script should fail").kind,
    }
}

// ── Language ──────────────────────────────────────────────────────────────────

#[test]
fn short_circuit_skips_the_right_operand() {
    let src = "$a = T(\"a\") Or T(\"b\")\n\
               $b = F(\"c\") And T(\"d\")\n\
               $c = F(\"e\") Or T(\"f\")\n\
               Func T($tag)\n  ConsoleWrite($tag)\n  Return 1\nEndFunc\n\
               Func F($tag)\n  ConsoleWrite($tag)\n  Return 0\nEndFunc";
    assert_eq!(output(src), "acef");
}

#[test]
fn arity_is_checked_before_anything_runs() {
    let host = HeadlessHost::new();
    let src = "ConsoleWrite(\"ran\")\nF(1)\nFunc F($a, $b, $c = 3, $d = 4)\nEndFunc";
    let err = Interpreter::from_source(src, Box::new(host.clone())).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Arity { name: "F".into(), given: 1, min: 2, max: 4 });
    assert_eq!(err.line.map(|l| l.line), Some(2));
    assert_eq!(host.output(), "");
}

#[test]
fn unknown_function_is_a_prescan_error() {
    assert_eq!(fatal("If 0 Then Missing()"), ErrorKind::UnknownFunction("MISSING".into()));
}

#[test]
fn recursion_limit_at_default_depth() {
    let src = "Global $n = 0\nDown()\nFunc Down()\n  $n = $n + 1\n  Down()\nEndFunc";
    let host = HeadlessHost::new();
    let mut interp = start(src, &host);
    let limit = Config::default().max_recursion;
    assert_eq!(interp.run().unwrap_err().kind, ErrorKind::RecursionLimit(limit));
    assert_eq!(interp.global("n"), Some(&Value::from(limit as i64)));
    assert_eq!(interp.call_depth(), 0);
}

#[test]
fn bounded_recursion_returns_normally() {
    let src = "ConsoleWrite(Fact(10))\nFunc Fact($n)\n  If $n <= 1 Then Return 1\n  Return $n * Fact($n - 1)\nEndFunc";
    assert_eq!(output(src), "3628800");
}

#[test]
fn locals_vanish_and_blocks_unwind_on_return() {
    let src = "For $j = 1 To 5\n  F()\nNext\n\
               ConsoleWrite($j & IsDeclared(\"loc\"))\n\
               Func F()\n  Local $loc = 1\n  While 1\n    For $k = 1 To 3\n      Return\n    Next\n  WEnd\nEndFunc";
    let host = HeadlessHost::new();
    let mut interp = start(src, &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "60");
    assert_eq!(interp.block_depth(), 0);
}

#[test]
fn locals_shadow_globals() {
    let src = "Global $v = \"g\"\nF()\nConsoleWrite($v)\nFunc F()\n  Local $v = \"l\"\n  ConsoleWrite($v)\nEndFunc";
    assert_eq!(output(src), "lg");
}

#[test]
fn byref_writes_back() {
    let src = "$x = 1\nInc($x)\nInc($x)\nConsoleWrite($x)\nFunc Inc(ByRef $v)\n  $v = $v + 1\nEndFunc";
    assert_eq!(output(src), "3");
}

#[test]
fn byref_leaves_constants_alone() {
    let src = "Const $c = 1\nInc($c)\nConsoleWrite($c)\nFunc Inc(ByRef $v)\n  $v = $v + 1\nEndFunc";
    assert_eq!(output(src), "1");
}

#[test]
fn default_parameters_are_evaluated_per_call() {
    let src = "Global $base = 1\nConsoleWrite(F() & F(5))\n$base = 10\nConsoleWrite(F())\n\
               Func F($x = $base * 2)\n  Return $x\nEndFunc";
    assert_eq!(output(src), "2520");
}

#[test]
fn arrays_are_copied_by_value() {
    let src = "Dim $a[2] = [1, 2]\n$b = $a\n$b[0] = 9\nConsoleWrite($a[0] & $b[0])";
    assert_eq!(output(src), "19");
}

#[test]
fn cmdline_is_exposed() {
    let host = HeadlessHost::new();
    let mut interp = start("ConsoleWrite($CmdLine[0] & \":\" & $CmdLine[2] & \":\" & $CmdLineRaw)", &host);
    interp.set_cmdline(&["one".to_owned(), "two".to_owned()]);
    interp.run().unwrap();
    assert_eq!(host.output(), "2:two:one two");
}

#[test]
fn fatal_error_reports_location() {
    let src = "$ok = 1\n\nConsoleWrite($nope)";
    let host = HeadlessHost::new();
    let mut interp = start(src, &host);
    let err = interp.run().unwrap_err();
    let line = err.line.clone().unwrap();
    assert_eq!(line.line, 3);
    assert_eq!(line.text, "ConsoleWrite($nope)");
    assert!(err.report().contains("^ ERROR"));
    assert_eq!(interp.state(), RunState::Quit);
}

#[test]
fn line_continuation() {
    assert_eq!(output("ConsoleWrite(1 + _\n  2)"), "3");
}

#[test]
fn comment_blocks_are_skipped() {
    assert_eq!(output("#cs\nConsoleWrite(\"no\")\n#ce\nConsoleWrite(\"yes\") ; trailing comment"), "yes");
}

#[test]
fn lexer_cache_is_used_by_loops() {
    let host = HeadlessHost::new();
    let mut interp = start("For $i = 1 To 50\n  $x = $i\nNext", &host);
    interp.run().unwrap();
    let (hits, misses) = interp.lexer_stats();
    assert!(hits > misses, "hits {hits}, misses {misses}");
}

// ── Scheduler and host ────────────────────────────────────────────────────────

#[test]
fn hotkey_runs_while_sleeping() {
    let host = HeadlessHost::new();
    host.hotkey_at(100, "{F1}");
    let src = "HotKeySet(\"{F1}\", \"OnKey\")\nSleep(500)\nConsoleWrite(\"done\")\n\
               Func OnKey()\n  ConsoleWrite(@HotKeyPressed & \",\")\nEndFunc";
    let mut interp = start(src, &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "{F1},done");
    assert!(host.now() >= 500);
}

#[test]
fn hotkey_is_serviced_before_a_finished_wait() {
    let host = HeadlessHost::new();
    host.hotkey_at(200, "k");
    host.at(200, Change::OpenWindow { title: "Target".into(), text: String::new() });
    let src = "HotKeySet(\"k\", \"OnKey\")\nConsoleWrite(WinWait(\"Target\"))\n\
               Func OnKey()\n  ConsoleWrite(\"key,\")\nEndFunc";
    let mut interp = start(src, &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "key,1");
}

#[test]
fn released_hotkeys_are_ignored() {
    let host = HeadlessHost::new();
    host.hotkey_at(50, "x");
    let src = "HotKeySet(\"x\", \"H\")\nHotKeySet(\"x\")\nSleep(100)\nFunc H()\n  ConsoleWrite(\"h\")\nEndFunc";
    let mut interp = start(src, &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "");
    assert!(host.hotkeys().is_empty());
}

#[test]
fn callbacks_do_not_leak_soft_errors() {
    let host = HeadlessHost::new();
    host.hotkey_at(50, "a");
    let src = "HotKeySet(\"a\", \"H\")\nSetError(7)\n$i = 0\nWhile $i < 300\n  $i = $i + 1\nWEnd\n\
               ConsoleWrite(@error)\nFunc H()\n  ConsoleWrite(\"h,\")\n  SetError(99)\nEndFunc";
    let mut interp = start(src, &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "h,7");
}

#[test]
fn adlib_fires_periodically() {
    let src = "Global $n = 0\nAdlibEnable(\"Tick\", 100)\nSleep(1000)\nAdlibDisable()\nSleep(500)\n\
               ConsoleWrite($n >= 5 And $n <= 10)\nFunc Tick()\n  $n = $n + 1\nEndFunc";
    assert_eq!(output(src), "1");
}

#[test]
fn gui_events_need_on_event_mode() {
    let host = HeadlessHost::new();
    host.gui_event_at(50, 3, 0x10);
    host.gui_event_at(300, 3, 0x20);
    let src = "GUICtrlSetOnEvent(3, \"Clicked\")\nSleep(200)\nOpt(\"GUIOnEventMode\", 1)\nSleep(200)\n\
               Func Clicked()\n  ConsoleWrite(@GUI_CtrlId & \"@\" & @GUI_WinHandle)\nEndFunc";
    let mut interp = start(src, &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "3@0x00000020");
}

#[test]
fn win_wait_times_out() {
    let host = HeadlessHost::new();
    let mut interp = start("$r = WinWait(\"Nothing\", \"\", 2)\nConsoleWrite($r)", &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "0");
    assert!(host.now() >= 2000);
}

#[test]
fn win_wait_close_and_title_modes() {
    let host = HeadlessHost::new();
    host.open_window("My Editor", "");
    host.at(400, Change::CloseWindow("My Editor".into()));
    let src = "ConsoleWrite(WinExists(\"Editor\"))\nOpt(\"WinTitleMatchMode\", 2)\n\
               ConsoleWrite(WinExists(\"Editor\"))\nConsoleWrite(WinWaitClose(\"Editor\"))\n\
               ConsoleWrite(WinExists(\"Editor\"))";
    let mut interp = start(src, &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "0110");
}

#[test]
fn process_waits() {
    let host = HeadlessHost::new();
    host.at(100, Change::StartProcess("worker".into()));
    host.at(300, Change::EndProcess { name: "worker".into(), code: 0 });
    let src = "ConsoleWrite(ProcessExists(\"worker\"))\nConsoleWrite(ProcessWait(\"worker\"))\n\
               ConsoleWrite(ProcessExists(\"worker\"))\nConsoleWrite(ProcessWaitClose(\"worker\", 5))";
    let mut interp = start(src, &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "0111");
}

#[test]
fn external_quit_interrupts_an_endless_wait() {
    let host = HeadlessHost::new();
    host.at(500, Change::Quit);
    let mut interp = start("WinWait(\"never\")\nConsoleWrite(\"unreachable\")", &host);
    assert_eq!(interp.run().unwrap(), 0);
    assert_eq!(host.output(), "");
    assert_eq!(interp.call_depth(), 0);
}

#[test]
fn pause_stops_the_main_flow() {
    let host = HeadlessHost::new();
    host.at(10, Change::Pause(true));
    host.at(1000, Change::Pause(false));
    let src = "$i = 0\nWhile $i < 100\n  $i = $i + 1\nWEnd\n$t = TimerInit()";
    let mut interp = start(src, &host);
    interp.run().unwrap();
    let stamp = interp.global("t").map(Value::as_int64).unwrap();
    assert!(stamp >= 1000, "finished at {stamp}");
}

#[test]
fn run_records_the_command() {
    let host = HeadlessHost::new();
    let mut interp = start("$h = Run(\"notepad.exe file.txt\")\nConsoleWrite($h > 0)", &host);
    interp.run().unwrap();
    assert_eq!(host.output(), "1");
    assert_eq!(host.commands(), ["notepad.exe file.txt"]);
}

#[test]
fn exit_code_and_exit_hook() {
    let host = HeadlessHost::new();
    let src = "Exit 5\nFunc OnAutoItExit()\n  ConsoleWrite(\"bye \" & @ExitCode)\nEndFunc";
    let mut interp = start(src, &host);
    assert_eq!(interp.run().unwrap(), 5);
    assert_eq!(host.output(), "bye 5");
}

/// Run `src` on a fresh host and return `(exit code, output)`.
fn exit_and_output(src: &str) -> (i32, String) {
    let host = HeadlessHost::new();
    let mut interp = start(src, &host);
    let code = interp.run().unwrap_or_else(|e| panic!("script failed:\n{}", e.report()));
    assert_eq!(interp.call_depth(), 0);
    (code, host.output())
}

const EXIT_FOUR: &str = "Func F()\n  Exit 4\nEndFunc\n\
                         Func OnAutoItExit()\n  ConsoleWrite(\"code \" & @ExitCode)\nEndFunc";

#[test]
fn exit_in_a_function_argument() {
    let src = format!("ConsoleWrite(\"A\" & F())\nConsoleWrite(\"B\")\n{EXIT_FOUR}");
    assert_eq!(exit_and_output(&src), (4, "code 4".to_owned()));
}

#[test]
fn exit_in_a_binary_operand() {
    let src = format!("Global $x = 7\n$x = 1 + F()\nConsoleWrite($x)\n{EXIT_FOUR}");
    let host = HeadlessHost::new();
    let mut interp = start(&src, &host);
    assert_eq!(interp.run().unwrap(), 4);
    assert_eq!(host.output(), "code 4");
    assert_eq!(interp.global("X"), Some(&Value::from(7)));
}

#[test]
fn exit_through_call() {
    let src = format!("ConsoleWrite(Call(\"F\"))\nConsoleWrite(\"B\")\n{EXIT_FOUR}");
    assert_eq!(exit_and_output(&src), (4, "code 4".to_owned()));
}

#[test]
fn exit_in_an_adlib_callback_during_sleep() {
    let src = "AdlibEnable(\"Tick\", 100)\nConsoleWrite(\"x\" & Sleep(1000))\nConsoleWrite(\"after\")\n\
               Func Tick()\n  Exit 4\nEndFunc\n\
               Func OnAutoItExit()\n  ConsoleWrite(\"code \" & @ExitCode)\nEndFunc";
    assert_eq!(exit_and_output(src), (4, "code 4".to_owned()));
}

#[test]
fn callee_errors_keep_their_own_location() {
    let src = "Func F()\n  Return @Nope\nEndFunc\n$x = 1 + F()";
    let host = HeadlessHost::new();
    let mut interp = start(src, &host);
    let err = interp.run().unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownMacro("NOPE".into()));
    assert_eq!(err.line.map(|l| l.line), Some(2));
    assert_eq!(err.column, Some(10));
}

#[test]
fn configured_must_declare() {
    let config = Config { must_declare_vars: true, ..Config::default() };
    let host = HeadlessHost::new();
    let mut interp = Interpreter::with_config("$x = 1", config, Box::new(host)).unwrap();
    assert_eq!(interp.run().unwrap_err().kind, ErrorKind::UndeclaredVariable("X".into()));
}
