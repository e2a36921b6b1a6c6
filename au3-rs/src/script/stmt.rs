//! Statement execution.
//!
//! Each logical line holds one statement.  Block statements never build a
//! tree: openers push a [`Block`] and closers pop it, and when a branch or
//! loop has to be skipped the driver scans forward for the matching keyword
//! (counting nested blocks of the same kind) and jumps past it.

use crate::var::DeclScope;

use super::error::{ErrorKind, ScriptError};
use super::expr::{evaluate, evaluate_condition, subscripts};
use super::interp::{Block, Flow, Interpreter};
use super::lexer::{Keyword, Token, TokenKind};
use super::prescan::{closer_of, is_block_if, unclosed};
use super::value::{Array, Value};

fn kind_at(tokens: &[Token], pos: usize) -> &TokenKind {
    tokens.get(pos).map(|t| &t.kind).unwrap_or(&TokenKind::End)
}

fn col_at(tokens: &[Token], pos: usize) -> usize {
    tokens.get(pos).or_else(|| tokens.last()).map(|t| t.col).unwrap_or(1)
}

fn error_at(kind: ErrorKind, tokens: &[Token], pos: usize) -> ScriptError {
    ScriptError::new(kind).at_column(col_at(tokens, pos))
}

/// Nothing may follow a complete statement.
fn finish(tokens: &[Token], pos: usize) -> Result<(), ScriptError> {
    match kind_at(tokens, pos) {
        TokenKind::End => Ok(()),
        _ => Err(error_at(ErrorKind::TrailingTokens, tokens, pos)),
    }
}

fn expect(tokens: &[Token], pos: usize, kw: Keyword, what: &'static str) -> Result<(), ScriptError> {
    if tokens.get(pos).is_some_and(|t| t.is_keyword(kw)) {
        Ok(())
    } else {
        Err(error_at(ErrorKind::Expected(what), tokens, pos))
    }
}

/// Keywords that may not follow `Then` on a single-line `If`.
fn is_structural(kw: Keyword) -> bool {
    matches!(
        kw,
        Keyword::While
            | Keyword::WEnd
            | Keyword::Do
            | Keyword::Until
            | Keyword::For
            | Keyword::Next
            | Keyword::Select
            | Keyword::Case
            | Keyword::EndSelect
            | Keyword::ElseIf
            | Keyword::Else
            | Keyword::EndIf
            | Keyword::Func
            | Keyword::EndFunc
    )
}

fn for_continues(value: &Value, limit: &Value, step: &Value) -> bool {
    if step.as_float() < 0.0 {
        value.as_float() >= limit.as_float()
    } else {
        value.as_float() <= limit.as_float()
    }
}

impl Interpreter {
    pub(crate) fn exec_statement(&mut self, tokens: &[Token], line: usize) -> Result<Flow, ScriptError> {
        match kind_at(tokens, 0) {
            TokenKind::End => Ok(Flow::Next),
            TokenKind::Keyword(Keyword::Not) => self.expression_statement(tokens),
            TokenKind::Keyword(kw) => self.keyword_statement(*kw, tokens, line),
            TokenKind::Variable(name) if matches!(kind_at(tokens, 1), TokenKind::Eq | TokenKind::LBracket) => {
                self.assignment(name, tokens)
            }
            _ => self.expression_statement(tokens),
        }
    }

    fn expression_statement(&mut self, tokens: &[Token]) -> Result<Flow, ScriptError> {
        let (_, pos) = evaluate(self, tokens, 0)?;
        finish(tokens, pos)?;
        Ok(Flow::Next)
    }

    fn keyword_statement(&mut self, kw: Keyword, tokens: &[Token], line: usize) -> Result<Flow, ScriptError> {
        match kw {
            Keyword::Dim | Keyword::Local | Keyword::Global | Keyword::Const => self.declaration(tokens),
            Keyword::ReDim => self.redim(tokens),

            Keyword::If => self.exec_if(tokens, line),
            Keyword::ElseIf | Keyword::Else => {
                // The taken branch ran into the next one: leave the If.
                self.pop_block(kw, Keyword::If, tokens)?;
                Ok(Flow::Jump(self.find_end(line, Keyword::If)? + 1))
            }
            Keyword::EndIf => {
                finish(tokens, 1)?;
                self.pop_block(kw, Keyword::If, tokens)?;
                Ok(Flow::Next)
            }

            Keyword::While => {
                let (cond, pos) = evaluate_condition(self, tokens, 1)?;
                finish(tokens, pos)?;
                if cond {
                    self.blocks.push(Block::While { line });
                    Ok(Flow::Next)
                } else {
                    Ok(Flow::Jump(self.find_end(line, Keyword::While)? + 1))
                }
            }
            Keyword::WEnd => {
                finish(tokens, 1)?;
                match self.pop_block(kw, Keyword::While, tokens)? {
                    Block::While { line: start } => Ok(Flow::Jump(start)),
                    _ => Ok(Flow::Next),
                }
            }

            Keyword::Do => {
                finish(tokens, 1)?;
                self.blocks.push(Block::Do { line });
                Ok(Flow::Next)
            }
            Keyword::Until => {
                let start = match self.top_block() {
                    Some(Block::Do { line }) => *line,
                    _ => return Err(error_at(ErrorKind::Unmatched { found: "Until", opener: "Do" }, tokens, 0)),
                };
                let (done, pos) = evaluate_condition(self, tokens, 1)?;
                finish(tokens, pos)?;
                if done {
                    self.blocks.pop();
                    Ok(Flow::Next)
                } else {
                    Ok(Flow::Jump(start + 1))
                }
            }

            Keyword::For => self.exec_for(tokens, line),
            Keyword::Next => self.exec_next(tokens),

            Keyword::Select => self.exec_select(tokens, line),
            Keyword::Case => {
                // The matched case ran into the next one: leave the Select.
                self.pop_block(kw, Keyword::Select, tokens)?;
                Ok(Flow::Jump(self.find_end(line, Keyword::Select)? + 1))
            }
            Keyword::EndSelect => {
                finish(tokens, 1)?;
                self.pop_block(kw, Keyword::Select, tokens)?;
                Ok(Flow::Next)
            }

            Keyword::ExitLoop | Keyword::ContinueLoop => self.loop_jump(kw, tokens),

            Keyword::Exit => {
                let code = match kind_at(tokens, 1) {
                    TokenKind::End => 0,
                    _ => {
                        let (v, pos) = evaluate(self, tokens, 1)?;
                        finish(tokens, pos)?;
                        v.as_int32()
                    }
                };
                tracing::debug!(code, "exit requested");
                self.exit_code = code;
                self.quitting = true;
                Ok(Flow::Next)
            }

            Keyword::Func => {
                let end = self
                    .functions
                    .by_header(line)
                    .map(|f| f.end_line)
                    .ok_or_else(|| error_at(ErrorKind::NestedFunc, tokens, 0))?;
                Ok(Flow::Jump(end + 1))
            }
            Keyword::EndFunc => Ok(Flow::Return),
            Keyword::Return => {
                if !self.vars.in_function() {
                    return Err(error_at(ErrorKind::ReturnOutsideFunction, tokens, 0));
                }
                let value = match kind_at(tokens, 1) {
                    TokenKind::End => Value::default(),
                    _ => {
                        let (v, pos) = evaluate(self, tokens, 1)?;
                        finish(tokens, pos)?;
                        v
                    }
                };
                self.return_value = value;
                Ok(Flow::Return)
            }

            other => Err(error_at(ErrorKind::UnexpectedKeyword(other.name()), tokens, 0)),
        }
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    /// Innermost block of the active call frame.
    fn top_block(&self) -> Option<&Block> {
        self.blocks.get(self.block_base..)?.last()
    }

    fn pop_block(&mut self, found: Keyword, opener: Keyword, tokens: &[Token]) -> Result<Block, ScriptError> {
        if self.top_block().is_some_and(|b| b.keyword() == opener) {
            if let Some(block) = self.blocks.pop() {
                return Ok(block);
            }
        }
        Err(error_at(ErrorKind::Unmatched { found: found.name(), opener: opener.name() }, tokens, 0))
    }

    /// First line after `from` that starts with one of `stops` at the same
    /// nesting level of `opener` blocks.
    pub(crate) fn scan(
        &mut self,
        from: usize,
        opener: Keyword,
        stops: &[Keyword],
    ) -> Result<(usize, Keyword), ScriptError> {
        let closer = closer_of(opener);
        let mut depth = 0usize;
        for at in from + 1..self.script.len() {
            let tokens = self.lex(at)?;
            let TokenKind::Keyword(kw) = kind_at(&tokens, 0) else { continue };
            let kw = *kw;
            if kw == opener && (kw != Keyword::If || is_block_if(&tokens)) {
                depth += 1;
            } else if depth == 0 && stops.contains(&kw) {
                return Ok((at, kw));
            } else if Some(kw) == closer {
                depth = depth.saturating_sub(1);
            } else if matches!(kw, Keyword::Func | Keyword::EndFunc) {
                break;
            }
        }
        Err(ScriptError::new(unclosed(opener)))
    }

    fn find_end(&mut self, from: usize, opener: Keyword) -> Result<usize, ScriptError> {
        let closer = closer_of(opener).ok_or_else(|| ScriptError::new(unclosed(opener)))?;
        self.scan(from, opener, &[closer]).map(|(line, _)| line)
    }

    // ── If ────────────────────────────────────────────────────────────────────

    fn exec_if(&mut self, tokens: &[Token], line: usize) -> Result<Flow, ScriptError> {
        let (cond, pos) = evaluate_condition(self, tokens, 1)?;
        expect(tokens, pos, Keyword::Then, "\"Then\"")?;
        if matches!(kind_at(tokens, pos + 1), TokenKind::End) {
            if cond {
                self.blocks.push(Block::If);
                return Ok(Flow::Next);
            }
            return self.seek_branch(line);
        }

        let rest = &tokens[pos + 1..];
        if let TokenKind::Keyword(kw) = kind_at(rest, 0) {
            if is_structural(*kw) || is_block_if(rest) {
                return Err(error_at(ErrorKind::UnexpectedKeyword(kw.name()), rest, 0));
            }
        }
        if !cond {
            return Ok(Flow::Next);
        }
        self.exec_statement(rest, line)
    }

    /// The `If` on `line` was false: find the branch to run.
    fn seek_branch(&mut self, line: usize) -> Result<Flow, ScriptError> {
        let mut from = line;
        loop {
            let (at, kw) = self.scan(from, Keyword::If, &[Keyword::ElseIf, Keyword::Else, Keyword::EndIf])?;
            match kw {
                Keyword::ElseIf => {
                    let tokens = self.lex(at)?;
                    let taken = self.else_if_condition(&tokens).map_err(|e| self.script.locate(e, at))?;
                    if taken {
                        self.blocks.push(Block::If);
                        return Ok(Flow::Jump(at + 1));
                    }
                    from = at;
                }
                Keyword::Else => {
                    self.blocks.push(Block::If);
                    return Ok(Flow::Jump(at + 1));
                }
                _ => return Ok(Flow::Jump(at + 1)),
            }
        }
    }

    fn else_if_condition(&mut self, tokens: &[Token]) -> Result<bool, ScriptError> {
        let (cond, pos) = evaluate_condition(self, tokens, 1)?;
        expect(tokens, pos, Keyword::Then, "\"Then\"")?;
        finish(tokens, pos + 1)?;
        Ok(cond)
    }

    // ── For ───────────────────────────────────────────────────────────────────

    fn exec_for(&mut self, tokens: &[Token], line: usize) -> Result<Flow, ScriptError> {
        let TokenKind::Variable(var) = kind_at(tokens, 1) else {
            return Err(error_at(ErrorKind::Expected("a loop variable"), tokens, 1));
        };
        if !matches!(kind_at(tokens, 2), TokenKind::Eq) {
            return Err(error_at(ErrorKind::Expected("\"=\""), tokens, 2));
        }
        let (start, pos) = evaluate(self, tokens, 3)?;
        expect(tokens, pos, Keyword::To, "\"To\"")?;
        let (limit, pos) = evaluate(self, tokens, pos + 1)?;
        let (step, pos) = if tokens.get(pos).is_some_and(|t| t.is_keyword(Keyword::Step)) {
            evaluate(self, tokens, pos + 1)?
        } else {
            (Value::Int32(1), pos)
        };
        finish(tokens, pos)?;

        let start = start.to_number();
        let (limit, step) = (limit.to_number(), step.to_number());
        let runs = for_continues(&start, &limit, &step);
        self.set_loop_var(var, start).map_err(|k| error_at(k, tokens, 1))?;
        if runs {
            self.blocks.push(Block::For { line, var: var.clone(), limit, step });
            Ok(Flow::Next)
        } else {
            Ok(Flow::Jump(self.find_end(line, Keyword::For)? + 1))
        }
    }

    fn exec_next(&mut self, tokens: &[Token]) -> Result<Flow, ScriptError> {
        finish(tokens, 1)?;
        let (start, var, limit, step) = match self.top_block() {
            Some(Block::For { line, var, limit, step }) => (*line, var.clone(), limit.clone(), step.clone()),
            _ => return Err(error_at(ErrorKind::Unmatched { found: "Next", opener: "For" }, tokens, 0)),
        };
        let current = self
            .vars
            .get(&var)
            .cloned()
            .ok_or_else(|| error_at(ErrorKind::UndeclaredVariable(var.clone()), tokens, 0))?;
        let next = current.arith_add(&step);
        let again = for_continues(&next, &limit, &step);
        self.vars.assign(&var, next).map_err(|k| error_at(k, tokens, 0))?;
        if again {
            Ok(Flow::Jump(start + 1))
        } else {
            self.blocks.pop();
            Ok(Flow::Next)
        }
    }

    fn set_loop_var(&mut self, name: &str, value: Value) -> Result<(), ErrorKind> {
        if self.vars.lookup(name).is_some() {
            self.vars.assign(name, value)?;
        } else {
            self.vars.declare(name, value, false, DeclScope::Dim)?;
        }
        Ok(())
    }

    // ── Select ────────────────────────────────────────────────────────────────

    fn exec_select(&mut self, tokens: &[Token], line: usize) -> Result<Flow, ScriptError> {
        finish(tokens, 1)?;
        self.blocks.push(Block::Select);
        let mut from = line;
        loop {
            let (at, kw) = self.scan(from, Keyword::Select, &[Keyword::Case, Keyword::EndSelect])?;
            if kw == Keyword::EndSelect {
                self.blocks.pop();
                return Ok(Flow::Jump(at + 1));
            }
            let case = self.lex(at)?;
            if self.case_matches(&case).map_err(|e| self.script.locate(e, at))? {
                return Ok(Flow::Jump(at + 1));
            }
            from = at;
        }
    }

    fn case_matches(&mut self, tokens: &[Token]) -> Result<bool, ScriptError> {
        if tokens.get(1).is_some_and(|t| t.is_keyword(Keyword::Else)) {
            finish(tokens, 2)?;
            return Ok(true);
        }
        let (cond, pos) = evaluate_condition(self, tokens, 1)?;
        finish(tokens, pos)?;
        Ok(cond)
    }

    // ── ExitLoop / ContinueLoop ───────────────────────────────────────────────

    fn loop_jump(&mut self, kw: Keyword, tokens: &[Token]) -> Result<Flow, ScriptError> {
        let level = match kind_at(tokens, 1) {
            TokenKind::End => 1,
            _ => {
                let (v, pos) = evaluate(self, tokens, 1)?;
                finish(tokens, pos)?;
                usize::try_from(v.as_int64()).ok().filter(|&n| n > 0).unwrap_or(1)
            }
        };
        let target = (self.block_base..self.blocks.len())
            .rev()
            .filter(|&i| self.blocks[i].loop_start().is_some())
            .nth(level - 1);
        let Some(index) = target else {
            return Err(error_at(ErrorKind::NotInLoop(kw.name()), tokens, 0));
        };
        let Some((opener, start)) = self.blocks[index].loop_start() else {
            return Err(error_at(ErrorKind::NotInLoop(kw.name()), tokens, 0));
        };
        let end = self.find_end(start, opener)?;
        if kw == Keyword::ExitLoop {
            self.blocks.truncate(index);
            Ok(Flow::Jump(end + 1))
        } else {
            // Run the loop's closing statement: it steps and re-tests.
            self.blocks.truncate(index + 1);
            Ok(Flow::Jump(end))
        }
    }

    // ── Declarations and assignment ───────────────────────────────────────────

    fn declaration(&mut self, tokens: &[Token]) -> Result<Flow, ScriptError> {
        let mut decl = DeclScope::Dim;
        let mut constant = false;
        let mut pos = 0;
        while let TokenKind::Keyword(kw) = kind_at(tokens, pos) {
            match kw {
                Keyword::Dim => decl = DeclScope::Dim,
                Keyword::Local => decl = DeclScope::Local,
                Keyword::Global => decl = DeclScope::Global,
                Keyword::Const => constant = true,
                _ => break,
            }
            pos += 1;
        }

        loop {
            let TokenKind::Variable(name) = kind_at(tokens, pos) else {
                return Err(error_at(ErrorKind::Expected("a variable name"), tokens, pos));
            };
            let name_pos = pos;
            pos += 1;
            let dims = if matches!(kind_at(tokens, pos), TokenKind::LBracket) {
                let (dims, next) = subscripts(self, tokens, pos)?;
                pos = next;
                Some(dims)
            } else {
                None
            };

            let value = if matches!(kind_at(tokens, pos), TokenKind::Eq) {
                pos += 1;
                match (&dims, kind_at(tokens, pos)) {
                    (Some(dims), TokenKind::LBracket) => {
                        let (array, next) = self.array_initializer(tokens, pos, dims)?;
                        pos = next;
                        Value::from(array)
                    }
                    (Some(_), _) => {
                        return Err(error_at(ErrorKind::Expected("\"[\" to start the initial values"), tokens, pos))
                    }
                    (None, _) => {
                        let (v, next) = evaluate(self, tokens, pos)?;
                        pos = next;
                        v
                    }
                }
            } else if constant {
                return Err(error_at(ErrorKind::Expected("\"=\" after a constant"), tokens, pos));
            } else if let Some(dims) = &dims {
                Value::from(Array::new(dims).map_err(|k| error_at(k, tokens, name_pos))?)
            } else {
                Value::default()
            };

            self.vars
                .declare(name, value, constant, decl)
                .map_err(|k| error_at(k, tokens, name_pos))?;

            match kind_at(tokens, pos) {
                TokenKind::Comma => pos += 1,
                TokenKind::End => return Ok(Flow::Next),
                _ => return Err(error_at(ErrorKind::TrailingTokens, tokens, pos)),
            }
        }
    }

    /// `[a, b, …]` filling an array of shape `dims` in row-major order.
    fn array_initializer(
        &mut self,
        tokens: &[Token],
        open: usize,
        dims: &[usize],
    ) -> Result<(Array, usize), ScriptError> {
        let mut array = Array::new(dims).map_err(|k| error_at(k, tokens, open))?;
        let mut items = Vec::new();
        let mut pos = open + 1;
        if matches!(kind_at(tokens, pos), TokenKind::RBracket) {
            return Ok((array, pos + 1));
        }
        loop {
            let (v, next) = evaluate(self, tokens, pos)?;
            items.push(v);
            pos = next;
            match kind_at(tokens, pos) {
                TokenKind::Comma => pos += 1,
                TokenKind::RBracket => {
                    pos += 1;
                    break;
                }
                _ => return Err(error_at(ErrorKind::Expected("\"]\""), tokens, pos)),
            }
        }
        array.fill(items).map_err(|k| error_at(k, tokens, open))?;
        Ok((array, pos))
    }

    fn redim(&mut self, tokens: &[Token]) -> Result<Flow, ScriptError> {
        let mut pos = 1;
        loop {
            let TokenKind::Variable(name) = kind_at(tokens, pos) else {
                return Err(error_at(ErrorKind::Expected("a variable name"), tokens, pos));
            };
            let name_pos = pos;
            if !matches!(kind_at(tokens, pos + 1), TokenKind::LBracket) {
                return Err(error_at(ErrorKind::Expected("array dimensions"), tokens, pos + 1));
            }
            let (dims, next) = subscripts(self, tokens, pos + 1)?;
            pos = next;
            if self.vars.lookup(name).is_none() {
                return Err(error_at(ErrorKind::UndeclaredVariable(name.clone()), tokens, name_pos));
            }
            let array = Array::new(&dims).map_err(|k| error_at(k, tokens, name_pos))?;
            self.vars
                .assign(name, Value::from(array))
                .map_err(|k| error_at(k, tokens, name_pos))?;
            match kind_at(tokens, pos) {
                TokenKind::Comma => pos += 1,
                TokenKind::End => return Ok(Flow::Next),
                _ => return Err(error_at(ErrorKind::TrailingTokens, tokens, pos)),
            }
        }
    }

    fn assignment(&mut self, name: &str, tokens: &[Token]) -> Result<Flow, ScriptError> {
        if matches!(kind_at(tokens, 1), TokenKind::LBracket) {
            let (subs, pos) = subscripts(self, tokens, 1)?;
            if !matches!(kind_at(tokens, pos), TokenKind::Eq) {
                return Err(error_at(ErrorKind::Expected("\"=\""), tokens, pos));
            }
            let (value, end) = evaluate(self, tokens, pos + 1)?;
            finish(tokens, end)?;
            self.vars.set_element(name, &subs, value).map_err(|k| error_at(k, tokens, 0))?;
            return Ok(Flow::Next);
        }

        let (value, end) = evaluate(self, tokens, 2)?;
        finish(tokens, end)?;
        let result = if self.vars.lookup(name).is_some() {
            self.vars.assign(name, value).map(|_| ())
        } else if self.options.must_declare {
            Err(ErrorKind::UndeclaredVariable(name.to_owned()))
        } else {
            self.vars.declare(name, value, false, DeclScope::Dim).map(|_| ())
        };
        result.map_err(|k| error_at(k, tokens, 0))?;
        Ok(Flow::Next)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
