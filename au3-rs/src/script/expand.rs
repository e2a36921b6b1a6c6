//! Opt-in substitution inside string literals.
//!
//! | Sequence  | Meaning                              | Enabled by          |
//! |-----------|--------------------------------------|---------------------|
//! | `%NAME%`  | Environment variable `NAME`          | `ExpandEnvStrings`  |
//! | `$NAME$`  | Script variable `$NAME`              | `ExpandVarStrings`  |
//! | `@NAME@`  | Macro `@NAME`                        | `ExpandVarStrings`  |
//! | `%%` `$$` `@@` | The delimiter itself            | same as above       |
//!
//! An unterminated region is copied through unchanged and unknown names
//! expand to the empty string.

use super::expr::EvalContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpandFlags {
    pub env: bool,
    pub vars: bool,
}

impl ExpandFlags {
    pub fn any(self) -> bool {
        self.env || self.vars
    }
}

/// Expand all enabled substitution sequences in `src`.
pub fn expand(src: &str, flags: ExpandFlags, ctx: &mut dyn EvalContext) -> String {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut i = 0;

    while i < chars.len() {
        let delim = chars[i];
        let enabled = match delim {
            '%' => flags.env,
            '$' | '@' => flags.vars,
            _ => false,
        };
        if !enabled {
            out.push(delim);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&delim) {
            out.push(delim);
            i += 2;
            continue;
        }
        let Some(len) = chars[i + 1..].iter().position(|&c| c == delim) else {
            out.extend(&chars[i..]);
            break;
        };
        let name: String = chars[i + 1..i + 1 + len].iter().collect();
        out.push_str(&lookup(delim, &name, ctx));
        i += len + 2;
    }
    out
}

fn lookup(delim: char, name: &str, ctx: &mut dyn EvalContext) -> String {
    match delim {
        '%' => std::env::var(name).unwrap_or_default(),
        '$' => ctx
            .get_var(&name.to_ascii_uppercase())
            .map(|v| v.to_string())
            .unwrap_or_default(),
        _ => ctx
            .macro_value(&name.to_ascii_uppercase())
            .map(|v| v.to_string())
            .unwrap_or_default(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::error::{ErrorKind, ScriptError};
    use crate::script::expr::Argument;
    use crate::script::functions::BuiltinId;
    use crate::script::value::Value;
    use std::collections::HashMap;

    struct Ctx(HashMap<String, Value>);

    impl EvalContext for Ctx {
        fn get_var(&self, name: &str) -> Option<&Value> {
            self.0.get(name)
        }
        fn macro_value(&mut self, name: &str) -> Result<Value, ScriptError> {
            match name {
                "TAB" => Ok(Value::from("\t")),
                _ => Err(ScriptError::new(ErrorKind::UnknownMacro(name.into()))),
            }
        }
        fn builtin_arity(&self, _: BuiltinId) -> Option<(&'static str, usize, usize)> {
            None
        }
        fn call_builtin(&mut self, _: BuiltinId, _: Vec<Value>) -> Result<Value, ScriptError> {
            Ok(Value::default())
        }
        fn call_user(&mut self, _: &str, _: Vec<Argument>) -> Result<Value, ScriptError> {
            Ok(Value::default())
        }
    }

    fn ctx() -> Ctx {
        Ctx(HashMap::from([("NAME".to_string(), Value::from("World")), ("N".to_string(), Value::Int32(3))]))
    }

    const ALL: ExpandFlags = ExpandFlags { env: true, vars: true };

    #[test]
    fn variables_and_macros() {
        assert_eq!(expand("Hello $name$!", ALL, &mut ctx()), "Hello World!");
        assert_eq!(expand("a@tab@b", ALL, &mut ctx()), "a\tb");
        assert_eq!(expand("$n$ items", ALL, &mut ctx()), "3 items");
    }

    #[test]
    fn unknown_names_expand_to_empty() {
        assert_eq!(expand("[$missing$][@nosuch@]", ALL, &mut ctx()), "[][]");
    }

    #[test]
    fn doubled_delimiter_is_literal() {
        assert_eq!(expand("100%% of $$5 at @@home", ALL, &mut ctx()), "100% of $5 at @home");
    }

    #[test]
    fn unterminated_region_copied_through() {
        assert_eq!(expand("cost: $5", ALL, &mut ctx()), "cost: $5");
        assert_eq!(expand("50% off", ALL, &mut ctx()), "50% off");
    }

    #[test]
    fn environment_lookup() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand("%PATH%", ALL, &mut ctx()), path);
        assert_eq!(expand("%AU3_SURELY_UNSET_VAR%", ALL, &mut ctx()), "");
    }

    #[test]
    fn disabled_kinds_are_left_alone() {
        let env_only = ExpandFlags { env: true, vars: false };
        assert_eq!(expand("$name$ %%", env_only, &mut ctx()), "$name$ %");
        let vars_only = ExpandFlags { env: false, vars: true };
        assert_eq!(expand("%PATH% $name$", vars_only, &mut ctx()), "%PATH% World");
    }
}
