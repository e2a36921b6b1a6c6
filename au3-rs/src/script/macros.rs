//! `@macro` values.
//!
//! Macros are read-only and computed on every use; names arrive uppercase
//! from the lexer.

use std::path::{Path, PathBuf};

use chrono::{Datelike, Local, Timelike};

use super::error::{ErrorKind, ScriptError};
use super::interp::Interpreter;
use super::value::Value;

pub(crate) fn value(interp: &mut Interpreter, name: &str) -> Result<Value, ScriptError> {
    let v = match name {
        "ERROR" => Value::Int32(interp.error),
        "EXTENDED" => Value::Int32(interp.extended),
        "EXITCODE" => Value::Int32(interp.exit_code),
        "NUMPARAMS" => Value::from(interp.num_params as i64),

        "CR" => Value::from("\r"),
        "LF" => Value::from("\n"),
        "CRLF" => Value::from("\r\n"),
        "TAB" => Value::from("\t"),

        "SEC" | "MIN" | "HOUR" | "MDAY" | "MON" | "YEAR" | "WDAY" | "YDAY" => clock(name),

        "SCRIPTNAME" => Value::from(
            script_path(interp)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
        "SCRIPTDIR" => {
            let path = script_path(interp);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            Value::from(dir.to_string_lossy().into_owned())
        }
        "SCRIPTFULLPATH" => Value::from(script_path(interp).to_string_lossy().into_owned()),
        "WORKINGDIR" => Value::from(
            std::env::current_dir()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
        "TEMPDIR" => Value::from(std::env::temp_dir().to_string_lossy().into_owned()),

        "AUTOITVERSION" => Value::from(env!("CARGO_PKG_VERSION")),
        "AUTOITPID" => Value::from(i64::from(std::process::id())),

        "HOTKEYPRESSED" => Value::from(interp.hotkey_pressed.as_str()),
        "GUI_CTRLID" => Value::from(interp.gui_event.0),
        "GUI_WINHANDLE" => Value::Handle(interp.gui_event.1),

        _ => return Err(ErrorKind::UnknownMacro(name.to_owned()).into()),
    };
    Ok(v)
}

/// Absolute path of the main script file, or its bare name for in-memory
/// scripts.
fn script_path(interp: &Interpreter) -> PathBuf {
    match interp.script.main_path() {
        Some(path) => std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
        None => PathBuf::from("script.au3"),
    }
}

fn clock(name: &str) -> Value {
    let now = Local::now();
    match name {
        "SEC" => Value::from(format!("{:02}", now.second())),
        "MIN" => Value::from(format!("{:02}", now.minute())),
        "HOUR" => Value::from(format!("{:02}", now.hour())),
        "MDAY" => Value::from(format!("{:02}", now.day())),
        "MON" => Value::from(format!("{:02}", now.month())),
        "YEAR" => Value::from(now.year().to_string()),
        // 1 = Sunday.
        "WDAY" => Value::from(now.weekday().number_from_sunday() as i32),
        _ => Value::from(format!("{:03}", now.ordinal())),
    }
}

#[cfg(test)]
mod tests {
    use crate::host::HeadlessHost;
    use crate::script::error::ErrorKind;
    use crate::script::interp::Interpreter;

    fn output(src: &str) -> String {
        let host = HeadlessHost::new();
        let mut interp = Interpreter::from_source(src, Box::new(host.clone())).unwrap();
        interp.run().unwrap();
        host.output()
    }

    #[test]
    fn constants() {
        assert_eq!(output("ConsoleWrite(\"a\" & @TAB & \"b\" & @CRLF)"), "a\tb\r\n");
    }

    #[test]
    fn clock_fields_are_padded() {
        assert_eq!(output("ConsoleWrite(StringLen(@MON) & StringLen(@YDAY) & StringLen(@YEAR))"), "234");
        assert_eq!(output("ConsoleWrite(@WDAY >= 1 And @WDAY <= 7)"), "1");
    }

    #[test]
    fn error_macros_follow_seterror() {
        let src = "F()\nConsoleWrite(@error & \"/\" & @extended)\nFunc F()\n  SetError(3, 4)\nEndFunc";
        assert_eq!(output(src), "3/4");
    }

    #[test]
    fn numparams_counts_given_arguments() {
        let src = "F(1)\nFunc F($a, $b = 2)\n  ConsoleWrite(@NumParams)\nEndFunc";
        assert_eq!(output(src), "1");
    }

    #[test]
    fn script_name_of_in_memory_source() {
        assert_eq!(output("ConsoleWrite(@ScriptName)"), "script.au3");
    }

    #[test]
    fn unknown_macro_is_fatal() {
        let mut interp =
            Interpreter::from_source("ConsoleWrite(@NoSuchThing)", Box::new(HeadlessHost::new())).unwrap();
        assert_eq!(interp.run().unwrap_err().kind, ErrorKind::UnknownMacro("NOSUCHTHING".into()));
    }
}
