//! Function registries: the immutable built-in table and the user-function
//! table assembled by the pre-pass.

use std::rc::Rc;

use super::error::{ErrorKind, ScriptError};
use super::interp::Interpreter;
use super::lexer::{Keyword, Token, TokenKind};
use super::value::Value;

// ── Built-ins ─────────────────────────────────────────────────────────────────

/// What a built-in hands back: its value plus the soft error codes that
/// become `@error` and `@extended`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallResult {
    pub value: Value,
    pub error: i32,
    pub extended: i32,
}

impl CallResult {
    pub fn ok(value: impl Into<Value>) -> Self {
        CallResult { value: value.into(), error: 0, extended: 0 }
    }

    pub fn fail(error: i32, value: impl Into<Value>) -> Self {
        CallResult { value: value.into(), error, extended: 0 }
    }

    pub fn with_extended(mut self, extended: i32) -> Self {
        self.extended = extended;
        self
    }
}

/// Uniform built-in calling convention.  Arity is checked before the call.
pub type BuiltinFn = fn(&mut Interpreter, &[Value]) -> Result<CallResult, ScriptError>;

#[derive(Clone, Copy)]
pub struct BuiltinDef {
    pub name: &'static str,
    pub func: BuiltinFn,
    pub min_args: usize,
    pub max_args: usize,
}

impl std::fmt::Debug for BuiltinDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinDef")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish()
    }
}

/// Index of an entry in a [`FunctionTable`]; stored inside lexed tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuiltinId(pub u16);

/// Built-ins sorted by uppercase name.  Built once, never mutated.
#[derive(Debug, Default)]
pub struct FunctionTable {
    keys: Vec<String>,
    defs: Vec<BuiltinDef>,
}

impl FunctionTable {
    /// Later definitions of the same name replace earlier ones.
    pub fn new(defs: impl IntoIterator<Item = BuiltinDef>) -> Self {
        let mut entries: Vec<(String, BuiltinDef)> = defs
            .into_iter()
            .map(|d| (d.name.to_ascii_uppercase(), d))
            .collect();
        // Stable sort keeps registration order among equal names.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut keys: Vec<String> = Vec::with_capacity(entries.len());
        let mut out: Vec<BuiltinDef> = Vec::with_capacity(entries.len());
        for (key, def) in entries {
            if keys.last() == Some(&key) {
                if let Some(slot) = out.last_mut() {
                    *slot = def;
                }
                continue;
            }
            keys.push(key);
            out.push(def);
        }
        FunctionTable { keys, defs: out }
    }

    /// Binary search by uppercase name.
    pub fn lookup(&self, upper: &str) -> Option<BuiltinId> {
        self.keys
            .binary_search_by(|k| k.as_str().cmp(upper))
            .ok()
            .and_then(|i| u16::try_from(i).ok())
            .map(BuiltinId)
    }

    pub fn get(&self, id: BuiltinId) -> Option<&BuiltinDef> {
        self.defs.get(usize::from(id.0))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.defs.iter().map(|d| d.name)
    }
}

// ── User functions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Uppercase variable name without the `$`.
    pub name: String,
    pub by_ref: bool,
    /// Default-value expression, terminated by an end-of-line token.
    pub default: Option<Vec<Token>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserFunction {
    /// Uppercase lookup key.
    pub name: String,
    /// Global line index of the `Func` header.
    pub header_line: usize,
    pub body_start: usize,
    /// Global line index of the matching `EndFunc`.
    pub end_line: usize,
    pub params: Vec<Param>,
    pub min_args: usize,
    pub max_args: usize,
}

/// User functions sorted by name after the pre-pass.
#[derive(Debug, Default)]
pub struct UserFunctions {
    entries: Vec<Rc<UserFunction>>,
}

impl UserFunctions {
    pub fn new(mut entries: Vec<UserFunction>) -> Result<Self, (ErrorKind, usize)> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(w) = entries.windows(2).find(|w| w[0].name == w[1].name) {
            return Err((ErrorKind::DuplicateFunction(w[1].name.clone()), w[1].header_line.max(w[0].header_line)));
        }
        Ok(UserFunctions { entries: entries.into_iter().map(Rc::new).collect() })
    }

    pub fn get(&self, upper: &str) -> Option<Rc<UserFunction>> {
        self.entries
            .binary_search_by(|f| f.name.as_str().cmp(upper))
            .ok()
            .map(|i| Rc::clone(&self.entries[i]))
    }

    /// The function whose header sits on `line`, if any.
    pub fn by_header(&self, line: usize) -> Option<&UserFunction> {
        self.entries.iter().map(|f| f.as_ref()).find(|f| f.header_line == line)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a `Func Name($a, ByRef $b, $c = 1)` header.
///
/// Returns the uppercase name and the parameter list.  `ByRef` may not carry
/// a default, and once a parameter has a default every later one must too.
pub fn parse_header(tokens: &[Token]) -> Result<(String, Vec<Param>), ScriptError> {
    let err = |kind: ErrorKind, col: usize| ScriptError::new(kind).at_column(col);
    let bad = |what: &'static str, col: usize| err(ErrorKind::BadFunctionHeader(what), col);

    let mut pos = 1;
    let name = match tokens.get(pos).map(|t| &t.kind) {
        Some(TokenKind::UserFunc(name)) => name.clone(),
        Some(TokenKind::Builtin(_)) => {
            return Err(bad("name is a built-in function", tokens[pos].col));
        }
        _ => return Err(bad("missing function name", col_at(tokens, pos))),
    };
    pos += 1;
    if !matches!(kind_at(tokens, pos), TokenKind::LParen) {
        return Err(bad("expected \"(\" after the name", col_at(tokens, pos)));
    }
    pos += 1;

    let mut params: Vec<Param> = Vec::new();
    if matches!(kind_at(tokens, pos), TokenKind::RParen) {
        pos += 1;
    } else {
        loop {
            let by_ref = matches!(kind_at(tokens, pos), TokenKind::Keyword(Keyword::ByRef));
            if by_ref {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(bad("\"ByRef\" after an optional parameter", tokens[pos].col));
                }
                pos += 1;
            }
            let pname = match kind_at(tokens, pos) {
                TokenKind::Variable(v) => v.clone(),
                _ => return Err(bad("expected a parameter variable", col_at(tokens, pos))),
            };
            if params.iter().any(|p| p.name == pname) {
                return Err(bad("parameter declared twice", tokens[pos].col));
            }
            pos += 1;

            let default = if matches!(kind_at(tokens, pos), TokenKind::Eq) {
                if by_ref {
                    return Err(bad("\"ByRef\" parameter cannot have a default", tokens[pos].col));
                }
                pos += 1;
                let start = pos;
                let mut depth = 0usize;
                loop {
                    match kind_at(tokens, pos) {
                        TokenKind::LParen | TokenKind::LBracket => depth += 1,
                        TokenKind::RParen | TokenKind::RBracket if depth > 0 => depth -= 1,
                        TokenKind::RParen | TokenKind::Comma if depth == 0 => break,
                        TokenKind::End => break,
                        _ => {}
                    }
                    pos += 1;
                }
                if pos == start {
                    return Err(bad("missing default value", col_at(tokens, pos)));
                }
                let mut expr = tokens[start..pos].to_vec();
                expr.push(Token { kind: TokenKind::End, col: col_at(tokens, pos) });
                Some(expr)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(bad("required parameter after an optional one", col_at(tokens, pos)));
                }
                None
            };
            params.push(Param { name: pname, by_ref, default });

            match kind_at(tokens, pos) {
                TokenKind::Comma => pos += 1,
                TokenKind::RParen => {
                    pos += 1;
                    break;
                }
                _ => return Err(bad("expected \",\" or \")\"", col_at(tokens, pos))),
            }
        }
    }
    if !matches!(kind_at(tokens, pos), TokenKind::End) {
        return Err(err(ErrorKind::TrailingTokens, col_at(tokens, pos)));
    }
    Ok((name, params))
}

fn kind_at(tokens: &[Token], pos: usize) -> &TokenKind {
    tokens.get(pos).map(|t| &t.kind).unwrap_or(&TokenKind::End)
}

fn col_at(tokens: &[Token], pos: usize) -> usize {
    tokens
        .get(pos)
        .or_else(|| tokens.last())
        .map(|t| t.col)
        .unwrap_or(1)
}
