//! Two-pass resolution run before the first statement executes.
//!
//! Pass 1 lexes every line, checks that block keywords nest properly,
//! parses `Func` headers and records each function's line range and arity.
//! Pass 2 checks that every user-function reference names a real function
//! and is called with an acceptable number of arguments.
//!
//! Both passes are fatal: a script that fails here never runs line 1.

use tracing::debug;

use super::error::{ErrorKind, ScriptError};
use super::functions::{parse_header, FunctionTable, Param, UserFunction, UserFunctions};
use super::lexer::{lex_line, Keyword, Token, TokenKind};
use super::source::Script;

/// True when `tokens` open a multi-line `If` (nothing follows `Then`).
pub fn is_block_if(tokens: &[Token]) -> bool {
    let n = tokens.len();
    tokens.first().is_some_and(|t| t.is_keyword(Keyword::If))
        && n >= 2
        && tokens[n - 2].is_keyword(Keyword::Then)
}

/// The keyword that closes a block opened by `opener`.
pub fn closer_of(opener: Keyword) -> Option<Keyword> {
    match opener {
        Keyword::If => Some(Keyword::EndIf),
        Keyword::While => Some(Keyword::WEnd),
        Keyword::Do => Some(Keyword::Until),
        Keyword::For => Some(Keyword::Next),
        Keyword::Select => Some(Keyword::EndSelect),
        Keyword::Func => Some(Keyword::EndFunc),
        _ => None,
    }
}

fn is_loop(kw: Keyword) -> bool {
    matches!(kw, Keyword::While | Keyword::Do | Keyword::For)
}

struct Open {
    kw: Keyword,
    line: usize,
}

struct Pending {
    name: String,
    header_line: usize,
    params: Vec<Param>,
}

/// Validate `script` and build its user-function table.
pub fn prescan(script: &Script, builtins: &FunctionTable) -> Result<UserFunctions, ScriptError> {
    let fail = |kind: ErrorKind, line: usize, col: Option<usize>| {
        let err = ScriptError::new(kind);
        let err = match col {
            Some(c) => err.at_column(c),
            None => err,
        };
        script.locate(err, line)
    };

    // ── Pass 1 ────────────────────────────────────────────────────────────────
    let mut lines: Vec<Vec<Token>> = Vec::with_capacity(script.len());
    let mut blocks: Vec<Open> = Vec::new();
    let mut current: Option<Pending> = None;
    let mut found: Vec<UserFunction> = Vec::new();

    for i in 0..script.len() {
        let tokens = lex_line(i, script.text(i), builtins).map_err(|e| script.locate(e.into(), i))?;
        let Some(TokenKind::Keyword(kw)) = tokens.first().map(|t| &t.kind) else {
            lines.push(tokens);
            continue;
        };
        let kw = *kw;
        let col = tokens[0].col;

        match kw {
            Keyword::Func => {
                if current.is_some() || !blocks.is_empty() {
                    return Err(fail(ErrorKind::NestedFunc, i, Some(col)));
                }
                let (name, params) = parse_header(&tokens).map_err(|e| script.locate(e, i))?;
                current = Some(Pending { name, header_line: i, params });
            }
            Keyword::EndFunc => {
                let Some(open) = current.take() else {
                    return Err(fail(
                        ErrorKind::Unmatched { found: "EndFunc", opener: "Func" },
                        i,
                        Some(col),
                    ));
                };
                if let Some(top) = blocks.last() {
                    return Err(fail(unclosed(top.kw), top.line, None));
                }
                let min_args = open.params.iter().filter(|p| p.default.is_none()).count();
                debug!(name = %open.name, line = open.header_line, "found function");
                found.push(UserFunction {
                    max_args: open.params.len(),
                    min_args,
                    name: open.name,
                    header_line: open.header_line,
                    body_start: open.header_line + 1,
                    end_line: i,
                    params: open.params,
                });
            }
            Keyword::If if is_block_if(&tokens) => blocks.push(Open { kw, line: i }),
            Keyword::While | Keyword::Do | Keyword::For | Keyword::Select => {
                blocks.push(Open { kw, line: i })
            }
            Keyword::ElseIf | Keyword::Else => expect_top(&blocks, Keyword::If, kw)
                .map_err(|k| fail(k, i, Some(col)))?,
            Keyword::Case => expect_top(&blocks, Keyword::Select, kw).map_err(|k| fail(k, i, Some(col)))?,
            Keyword::EndIf | Keyword::WEnd | Keyword::Until | Keyword::Next | Keyword::EndSelect => {
                let opener = match kw {
                    Keyword::EndIf => Keyword::If,
                    Keyword::WEnd => Keyword::While,
                    Keyword::Until => Keyword::Do,
                    Keyword::Next => Keyword::For,
                    _ => Keyword::Select,
                };
                expect_top(&blocks, opener, kw).map_err(|k| fail(k, i, Some(col)))?;
                blocks.pop();
            }
            Keyword::Return if current.is_none() => {
                return Err(fail(ErrorKind::ReturnOutsideFunction, i, Some(col)));
            }
            Keyword::ExitLoop | Keyword::ContinueLoop if !blocks.iter().any(|b| is_loop(b.kw)) => {
                return Err(fail(ErrorKind::NotInLoop(kw.name()), i, Some(col)));
            }
            _ => {}
        }
        lines.push(tokens);
    }
    if let Some(top) = blocks.last() {
        return Err(fail(unclosed(top.kw), top.line, None));
    }
    if let Some(open) = current {
        return Err(fail(unclosed(Keyword::Func), open.header_line, None));
    }

    let functions = UserFunctions::new(found).map_err(|(kind, line)| fail(kind, line, None))?;

    // ── Pass 2 ────────────────────────────────────────────────────────────────
    for (i, tokens) in lines.iter().enumerate() {
        let header = tokens.first().is_some_and(|t| t.is_keyword(Keyword::Func));
        for (k, tok) in tokens.iter().enumerate() {
            let TokenKind::UserFunc(name) = &tok.kind else { continue };
            if header && k == 1 {
                continue;
            }
            let Some(func) = functions.get(name) else {
                return Err(fail(ErrorKind::UnknownFunction(name.clone()), i, Some(tok.col)));
            };
            let Some(given) = count_args(tokens, k + 1) else {
                return Err(fail(ErrorKind::Expected("\"(\" after function name"), i, Some(tok.col)));
            };
            if given < func.min_args || given > func.max_args {
                return Err(fail(
                    ErrorKind::Arity { name: name.clone(), given, min: func.min_args, max: func.max_args },
                    i,
                    Some(tok.col),
                ));
            }
        }
    }
    debug!(functions = functions.len(), lines = script.len(), "pre-scan complete");
    Ok(functions)
}

pub(crate) fn unclosed(kw: Keyword) -> ErrorKind {
    ErrorKind::Unclosed {
        opener: kw.name(),
        closer: closer_of(kw).map(Keyword::name).unwrap_or(""),
    }
}

fn expect_top(blocks: &[Open], opener: Keyword, found: Keyword) -> Result<(), ErrorKind> {
    match blocks.last() {
        Some(top) if top.kw == opener => Ok(()),
        Some(top) => Err(unclosed(top.kw)),
        None => Err(ErrorKind::Unmatched { found: found.name(), opener: opener.name() }),
    }
}

/// Number of arguments in the call whose `(` sits at `tokens[open]`, or
/// `None` when there is no `(`.
fn count_args(tokens: &[Token], open: usize) -> Option<usize> {
    if !matches!(tokens.get(open)?.kind, TokenKind::LParen) {
        return None;
    }
    let mut depth = 0usize;
    let mut commas = 0usize;
    let mut empty = true;
    for tok in &tokens[open + 1..] {
        match tok.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen if depth == 0 => break,
            TokenKind::RParen | TokenKind::RBracket => depth = depth.saturating_sub(1),
            TokenKind::Comma if depth == 0 => commas += 1,
            TokenKind::End => break,
            _ => {}
        }
        empty = false;
    }
    Some(if empty { 0 } else { commas + 1 })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
