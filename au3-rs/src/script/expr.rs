//! Operator-precedence expression evaluator.
//!
//! Expressions are evaluated straight off the token stream with two stacks:
//! operators (seeded with an end marker) and values.  Each step looks up the
//! relation between the operator on top of the stack and the incoming one in
//! [`ACTIONS`] and either shifts, reduces, matches a parenthesis, accepts, or
//! reports a syntax error.  Operands never touch the table; they are pushed
//! as soon as they are read, and function calls evaluate each argument with
//! a nested evaluator.
//!
//! Precedence (lowest → highest):
//!   `And Or`  →  `= == <> < > <= >=`  →  `&`  →  `+ -`  →  `* /`  →  `^`  →
//!   unary `- + Not`
//!
//! When an `And`/`Or` is about to be shifted and its left operand already
//! decides the result, the right operand is skipped without being evaluated
//! (or syntax-checked).

use super::error::{ErrorKind, ScriptError};
use super::functions::BuiltinId;
use super::lexer::{Keyword, Token, TokenKind};
use super::value::Value;

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Dependency-injection interface used by the evaluator.
///
/// The [`Interpreter`](super::interp::Interpreter) implements this trait to
/// give the evaluator access to variables, macros, and built-in or user
/// functions.
pub trait EvalContext {
    /// Look up a variable by uppercase name (local scope first, then global).
    fn get_var(&self, name: &str) -> Option<&Value>;

    /// Value of `@name`.  Unknown macros are fatal.
    fn macro_value(&mut self, name: &str) -> Result<Value, ScriptError>;

    /// `(name, min, max)` for a built-in.
    fn builtin_arity(&self, id: BuiltinId) -> Option<(&'static str, usize, usize)>;

    /// Invoke a built-in.  Arity has already been checked.
    fn call_builtin(&mut self, id: BuiltinId, args: Vec<Value>) -> Result<Value, ScriptError>;

    /// Invoke a user function.
    fn call_user(&mut self, name: &str, args: Vec<Argument>) -> Result<Value, ScriptError>;

    /// Turn a string literal into a value; the hook for opt-in expansion.
    fn string_literal(&mut self, text: &str) -> Result<Value, ScriptError> {
        Ok(Value::Str(text.to_owned()))
    }
}

/// One evaluated call argument.  `var` names the caller's variable when the
/// argument was a bare variable, so `ByRef` parameters can write back.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub value: Value,
    pub var: Option<String>,
}

// ── Operators and the relation table ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    End,
    And,
    Or,
    Eq,
    StrictEq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Pos,
    Not,
    LParen,
    RParen,
}

const END: usize = 0;
const LOGIC: usize = 1;
const CMP: usize = 2;
const CAT: usize = 3;
const ADD: usize = 4;
const MUL: usize = 5;
const POW: usize = 6;
const UN: usize = 7;
const LP: usize = 8;
const RP: usize = 9;

impl Op {
    fn class(self) -> usize {
        match self {
            Op::End => END,
            Op::And | Op::Or => LOGIC,
            Op::Eq | Op::StrictEq | Op::Ne | Op::Lt | Op::Gt | Op::Le | Op::Ge => CMP,
            Op::Concat => CAT,
            Op::Add | Op::Sub => ADD,
            Op::Mul | Op::Div => MUL,
            Op::Pow => POW,
            Op::Neg | Op::Pos | Op::Not => UN,
            Op::LParen => LP,
            Op::RParen => RP,
        }
    }

    fn is_binary(self) -> bool {
        matches!(self.class(), LOGIC | CMP | CAT | ADD | MUL | POW)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Shift,
    Reduce,
    MatchParen,
    Accept,
    MissingClose,
    MissingOperator,
    Unbalanced,
}

const S: Action = Action::Shift;
const R: Action = Action::Reduce;
const M: Action = Action::MatchParen;
const A: Action = Action::Accept;
const EC: Action = Action::MissingClose;
const EO: Action = Action::MissingOperator;
const EB: Action = Action::Unbalanced;

/// `ACTIONS[top][incoming]`.  Binary rows reduce on equal precedence
/// (left associativity); unary rows shift another unary.
const ACTIONS: [[Action; 10]; 10] = [
    //        END LOGIC CMP CAT ADD MUL POW UN  LP  RP
    /* END */ [A, S, S, S, S, S, S, S, S, EB],
    /* LOG */ [R, R, S, S, S, S, S, S, S, R],
    /* CMP */ [R, R, R, S, S, S, S, S, S, R],
    /* CAT */ [R, R, R, R, S, S, S, S, S, R],
    /* ADD */ [R, R, R, R, R, S, S, S, S, R],
    /* MUL */ [R, R, R, R, R, R, S, S, S, R],
    /* POW */ [R, R, R, R, R, R, R, S, S, R],
    /* UN  */ [R, R, R, R, R, R, R, S, S, R],
    /* LP  */ [EC, S, S, S, S, S, S, S, S, M],
    /* RP  */ [EO, EO, EO, EO, EO, EO, EO, EO, EO, EO],
];

// ── Evaluator ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// Statement level and subscripts: an unmatched `)` is an error.
    Statement,
    /// Inside an argument list: an unmatched `)` ends the argument.
    Argument,
}

enum Input {
    Operand,
    Op(Op),
    Stop,
}

struct Evaluator<'t> {
    tokens: &'t [Token],
    pos: usize,
    /// Column of the outermost expression's first token.
    origin: usize,
    stop: Stop,
}

fn kind_at(tokens: &[Token], pos: usize) -> &TokenKind {
    tokens.get(pos).map(|t| &t.kind).unwrap_or(&TokenKind::End)
}

impl<'t> Evaluator<'t> {
    fn kind(&self) -> &'t TokenKind {
        kind_at(self.tokens, self.pos)
    }

    fn error(&self, kind: ErrorKind) -> ScriptError {
        ScriptError::new(kind).at_column(self.origin)
    }

    fn classify(&self, prev_value: bool) -> Input {
        let op = match self.kind() {
            TokenKind::Int32(_)
            | TokenKind::Int64(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::Variable(_)
            | TokenKind::Macro(_)
            | TokenKind::Builtin(_)
            | TokenKind::UserFunc(_) => return Input::Operand,
            TokenKind::Plus if prev_value => Op::Add,
            TokenKind::Plus => Op::Pos,
            TokenKind::Minus if prev_value => Op::Sub,
            TokenKind::Minus => Op::Neg,
            TokenKind::Star => Op::Mul,
            TokenKind::Slash => Op::Div,
            TokenKind::Caret => Op::Pow,
            TokenKind::Amp => Op::Concat,
            TokenKind::Eq => Op::Eq,
            TokenKind::EqEq => Op::StrictEq,
            TokenKind::Ne => Op::Ne,
            TokenKind::Lt => Op::Lt,
            TokenKind::Gt => Op::Gt,
            TokenKind::Le => Op::Le,
            TokenKind::Ge => Op::Ge,
            TokenKind::LParen => Op::LParen,
            TokenKind::RParen => Op::RParen,
            TokenKind::Keyword(Keyword::And) => Op::And,
            TokenKind::Keyword(Keyword::Or) => Op::Or,
            TokenKind::Keyword(Keyword::Not) => Op::Not,
            TokenKind::End
            | TokenKind::Comma
            | TokenKind::LBracket
            | TokenKind::RBracket
            | TokenKind::Keyword(_) => return Input::Stop,
        };
        Input::Op(op)
    }

    fn run(&mut self, ctx: &mut dyn EvalContext) -> Result<Value, ScriptError> {
        let mut ops: Vec<Op> = vec![Op::End];
        let mut values: Vec<Value> = Vec::new();
        let mut prev_value = false;

        loop {
            let op = match self.classify(prev_value) {
                Input::Operand => {
                    if prev_value {
                        return Err(self.error(ErrorKind::MissingOperator));
                    }
                    let v = self.operand(ctx)?;
                    values.push(v);
                    prev_value = true;
                    continue;
                }
                Input::Op(op) => op,
                Input::Stop => Op::End,
            };
            if !prev_value && (op.is_binary() || matches!(op, Op::RParen | Op::End)) {
                return Err(self.error(ErrorKind::ExpectedExpression));
            }
            if prev_value && matches!(op, Op::LParen | Op::Not) {
                return Err(self.error(ErrorKind::MissingOperator));
            }

            let top = ops.last().copied().unwrap_or(Op::End);
            match ACTIONS[top.class()][op.class()] {
                Action::Shift => {
                    if matches!(op, Op::And | Op::Or) && self.short_circuit(op, &mut values) {
                        continue;
                    }
                    ops.push(op);
                    self.pos += 1;
                    prev_value = false;
                }
                Action::Reduce => {
                    ops.pop();
                    reduce(top, &mut values).map_err(|k| self.error(k))?;
                }
                Action::MatchParen => {
                    ops.pop();
                    self.pos += 1;
                }
                Action::Accept => {
                    return values.pop().ok_or_else(|| self.error(ErrorKind::ExpectedExpression));
                }
                Action::Unbalanced if self.stop == Stop::Argument => {
                    return values.pop().ok_or_else(|| self.error(ErrorKind::ExpectedExpression));
                }
                Action::Unbalanced => return Err(self.error(ErrorKind::UnbalancedCloseParen)),
                Action::MissingClose => return Err(self.error(ErrorKind::MissingCloseParen)),
                Action::MissingOperator => return Err(self.error(ErrorKind::MissingOperator)),
            }
        }
    }

    /// The left operand of `op` is fully reduced on top of `values`.  When it
    /// decides the result, collapse it to 0/1, skip the right operand and
    /// return true.
    fn short_circuit(&mut self, op: Op, values: &mut [Value]) -> bool {
        let Some(lhs) = values.last_mut() else { return false };
        let truthy = lhs.as_bool();
        let decided = match op {
            Op::Or => truthy,
            _ => !truthy,
        };
        if !decided {
            return false;
        }
        *lhs = Value::from(truthy);
        self.pos += 1;
        let mut depth = 0usize;
        loop {
            match self.kind() {
                TokenKind::End => return true,
                TokenKind::Comma if depth == 0 => return true,
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => {
                    if depth == 0 {
                        return true;
                    }
                    depth -= 1;
                }
                TokenKind::Keyword(Keyword::And | Keyword::Or) if depth == 0 => return true,
                TokenKind::Keyword(Keyword::Not | Keyword::And | Keyword::Or) => {}
                TokenKind::Keyword(_) => return true,
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn nested(&mut self, ctx: &mut dyn EvalContext, stop: Stop) -> Result<Value, ScriptError> {
        let mut inner = Evaluator { tokens: self.tokens, pos: self.pos, origin: self.origin, stop };
        let v = inner.run(ctx)?;
        self.pos = inner.pos;
        Ok(v)
    }

    fn operand(&mut self, ctx: &mut dyn EvalContext) -> Result<Value, ScriptError> {
        let kind = self.kind();
        self.pos += 1;
        match kind {
            TokenKind::Int32(n) => Ok(Value::Int32(*n)),
            TokenKind::Int64(n) => Ok(Value::Int64(*n)),
            TokenKind::Float(x) => Ok(Value::Float(*x)),
            TokenKind::Str(s) => ctx.string_literal(s),
            TokenKind::Macro(name) => ctx.macro_value(name).map_err(|e| e.at_column(self.origin)),
            TokenKind::Variable(name) => self.variable(ctx, name),
            TokenKind::Builtin(id) => {
                let args = self.arguments(ctx)?;
                let (name, min, max) = ctx
                    .builtin_arity(*id)
                    .ok_or_else(|| self.error(ErrorKind::UnknownFunction(format!("#{}", id.0))))?;
                if args.len() < min || args.len() > max {
                    return Err(self.error(ErrorKind::Arity {
                        name: name.to_owned(),
                        given: args.len(),
                        min,
                        max,
                    }));
                }
                ctx.call_builtin(*id, args.into_iter().map(|a| a.value).collect())
                    .map_err(|e| e.at_column(self.origin))
            }
            TokenKind::UserFunc(name) => {
                let args = self.arguments(ctx)?;
                ctx.call_user(name, args).map_err(|e| e.at_column(self.origin))
            }
            _ => Err(self.error(ErrorKind::ExpectedExpression)),
        }
    }

    fn variable(&mut self, ctx: &mut dyn EvalContext, name: &str) -> Result<Value, ScriptError> {
        let undeclared = || ErrorKind::UndeclaredVariable(name.to_owned());
        if !matches!(self.kind(), TokenKind::LBracket) {
            return ctx.get_var(name).cloned().ok_or_else(|| self.error(undeclared()));
        }
        match ctx.get_var(name) {
            None => return Err(self.error(undeclared())),
            Some(v) if !v.is_array() => return Err(self.error(ErrorKind::NotAnArray)),
            Some(_) => {}
        }
        let subs = self.subscripts(ctx)?;
        // Subscript expressions may have run code that changed the variable.
        let value = ctx.get_var(name).ok_or_else(|| self.error(undeclared()))?;
        let array = value.as_array().ok_or_else(|| self.error(ErrorKind::NotAnArray))?;
        array.get(&subs).cloned().map_err(|k| self.error(k))
    }

    fn subscripts(&mut self, ctx: &mut dyn EvalContext) -> Result<Vec<usize>, ScriptError> {
        let mut subs = Vec::new();
        while matches!(self.kind(), TokenKind::LBracket) {
            self.pos += 1;
            let v = self.nested(ctx, Stop::Statement)?;
            if !matches!(self.kind(), TokenKind::RBracket) {
                return Err(self.error(ErrorKind::Expected("\"]\"")));
            }
            self.pos += 1;
            let index = usize::try_from(v.as_int64()).map_err(|_| self.error(ErrorKind::BadSubscript))?;
            subs.push(index);
        }
        Ok(subs)
    }

    fn arguments(&mut self, ctx: &mut dyn EvalContext) -> Result<Vec<Argument>, ScriptError> {
        if !matches!(self.kind(), TokenKind::LParen) {
            return Err(self.error(ErrorKind::Expected("\"(\" after function name")));
        }
        self.pos += 1;
        let mut args = Vec::new();
        if matches!(self.kind(), TokenKind::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            let var = match (self.kind(), kind_at(self.tokens, self.pos + 1)) {
                (TokenKind::Variable(n), TokenKind::Comma | TokenKind::RParen) => Some(n.clone()),
                _ => None,
            };
            let value = self.nested(ctx, Stop::Argument)?;
            args.push(Argument { value, var });
            match self.kind() {
                TokenKind::Comma => self.pos += 1,
                TokenKind::RParen => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(self.error(ErrorKind::MissingCloseParen)),
            }
        }
    }
}

fn reduce(op: Op, values: &mut Vec<Value>) -> Result<(), ErrorKind> {
    let missing = || ErrorKind::ExpectedExpression;
    let result = match op {
        Op::Neg | Op::Pos | Op::Not => {
            let v = values.pop().ok_or_else(missing)?;
            match op {
                Op::Neg => v.arith_neg(),
                Op::Pos => v.to_number(),
                _ => Value::from(!v.as_bool()),
            }
        }
        _ => {
            let b = values.pop().ok_or_else(missing)?;
            let a = values.pop().ok_or_else(missing)?;
            match op {
                Op::And => Value::from(a.as_bool() && b.as_bool()),
                Op::Or => Value::from(a.as_bool() || b.as_bool()),
                Op::Eq => Value::from(a.loose_eq(&b)),
                Op::StrictEq => Value::from(a.strict_eq(&b)),
                Op::Ne => Value::from(!a.loose_eq(&b)),
                Op::Lt => Value::from(a.cmp_value(&b).is_some_and(|o| o.is_lt())),
                Op::Gt => Value::from(a.cmp_value(&b).is_some_and(|o| o.is_gt())),
                Op::Le => Value::from(a.cmp_value(&b).is_some_and(|o| o.is_le())),
                Op::Ge => Value::from(a.cmp_value(&b).is_some_and(|o| o.is_ge())),
                Op::Concat => a.concat(&b),
                Op::Add => a.arith_add(&b),
                Op::Sub => a.arith_sub(&b),
                Op::Mul => a.arith_mul(&b),
                Op::Div => a.arith_div(&b),
                Op::Pow => a.arith_pow(&b),
                _ => return Err(ErrorKind::ExpectedExpression),
            }
        }
    };
    values.push(result);
    Ok(())
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Evaluate the expression starting at `tokens[start]`.  Returns the value
/// and the index of the first token that is not part of the expression.
pub fn evaluate(
    ctx: &mut dyn EvalContext,
    tokens: &[Token],
    start: usize,
) -> Result<(Value, usize), ScriptError> {
    let origin = tokens.get(start).map(|t| t.col).unwrap_or(1);
    let mut ev = Evaluator { tokens, pos: start, origin, stop: Stop::Statement };
    let v = ev.run(ctx)?;
    Ok((v, ev.pos))
}

/// [`evaluate`] reduced to truthiness.
pub fn evaluate_condition(
    ctx: &mut dyn EvalContext,
    tokens: &[Token],
    start: usize,
) -> Result<(bool, usize), ScriptError> {
    let (v, next) = evaluate(ctx, tokens, start)?;
    Ok((v.as_bool(), next))
}

/// Evaluate a run of `[i][j]…` subscripts starting at `tokens[start]`.
/// Negative indices are rejected; range checks are left to the array.
pub fn subscripts(
    ctx: &mut dyn EvalContext,
    tokens: &[Token],
    start: usize,
) -> Result<(Vec<usize>, usize), ScriptError> {
    let origin = tokens.get(start).map(|t| t.col).unwrap_or(1);
    let mut ev = Evaluator { tokens, pos: start, origin, stop: Stop::Statement };
    let subs = ev.subscripts(ctx)?;
    Ok((subs, ev.pos))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::functions::{BuiltinDef, CallResult, FunctionTable};
    use crate::script::interp::Interpreter;
    use crate::script::lexer::tokenize;
    use crate::script::value::Array;
    use std::collections::HashMap;

    fn unused(_: &mut Interpreter, _: &[Value]) -> Result<CallResult, ScriptError> {
        Ok(CallResult::default())
    }

    // ── Minimal EvalContext for tests ─────────────────────────────────────────

    struct TestCtx {
        table: FunctionTable,
        vars: HashMap<String, Value>,
        /// Return value of each user function by name.
        funcs: HashMap<String, Value>,
        calls: Vec<String>,
        /// `var` of each argument of the last user call.
        last_vars: Vec<Option<String>>,
    }

    impl TestCtx {
        fn new() -> Self {
            TestCtx {
                table: FunctionTable::new([BuiltinDef {
                    name: "Max2",
                    func: unused,
                    min_args: 2,
                    max_args: 2,
                }]),
                vars: HashMap::new(),
                funcs: HashMap::new(),
                calls: Vec::new(),
                last_vars: Vec::new(),
            }
        }
        fn with(mut self, k: &str, v: Value) -> Self {
            self.vars.insert(k.into(), v);
            self
        }
        fn func(mut self, k: &str, v: Value) -> Self {
            self.funcs.insert(k.into(), v);
            self
        }
    }

    impl EvalContext for TestCtx {
        fn get_var(&self, name: &str) -> Option<&Value> {
            self.vars.get(name)
        }
        fn macro_value(&mut self, name: &str) -> Result<Value, ScriptError> {
            match name {
                "CRLF" => Ok(Value::from("\r\n")),
                _ => Err(ScriptError::new(ErrorKind::UnknownMacro(name.into()))),
            }
        }
        fn builtin_arity(&self, id: BuiltinId) -> Option<(&'static str, usize, usize)> {
            self.table.get(id).map(|d| (d.name, d.min_args, d.max_args))
        }
        fn call_builtin(&mut self, _id: BuiltinId, args: Vec<Value>) -> Result<Value, ScriptError> {
            self.calls.push("MAX2".into());
            Ok(if args[0].as_float() >= args[1].as_float() { args[0].clone() } else { args[1].clone() })
        }
        fn call_user(&mut self, name: &str, args: Vec<Argument>) -> Result<Value, ScriptError> {
            self.calls.push(name.into());
            self.last_vars = args.iter().map(|a| a.var.clone()).collect();
            if name == "ECHO" {
                return Ok(args.into_iter().next().map(|a| a.value).unwrap_or_default());
            }
            self.funcs
                .get(name)
                .cloned()
                .ok_or_else(|| ScriptError::new(ErrorKind::UnknownFunction(name.into())))
        }
    }

    fn eval_ctx(src: &str, ctx: &mut TestCtx) -> Result<Value, ScriptError> {
        let tokens = tokenize(src, &ctx.table).expect("lex failed");
        let (v, next) = evaluate(ctx, &tokens, 0)?;
        assert!(matches!(tokens[next].kind, TokenKind::End), "stopped early in {src:?}");
        Ok(v)
    }

    fn eval(src: &str) -> Value {
        eval_ctx(src, &mut TestCtx::new()).expect("eval failed")
    }

    fn eval_err(src: &str) -> ScriptError {
        eval_ctx(src, &mut TestCtx::new()).expect_err("expected an error")
    }

    #[test]
    fn precedence_ladder() {
        assert_eq!(eval("2 + 3 * 4 ^ 2"), Value::Int32(50));
        assert_eq!(eval("(2 + 3) * 4"), Value::Int32(20));
        assert_eq!(eval("\"a\" & 1 + 2"), Value::from("a3"));
        assert_eq!(eval("1 + 1 = 2 And \"x\" <> \"y\""), Value::Int32(1));
        assert_eq!(eval("1 & 2 = 12"), Value::Int32(1));
    }

    #[test]
    fn binary_operators_are_left_associative() {
        assert_eq!(eval("10 - 4 - 3"), Value::Int32(3));
        assert_eq!(eval("2 ^ 3 ^ 2"), Value::Int32(64));
        assert_eq!(eval("100 / 10 / 5"), Value::Int32(2));
    }

    #[test]
    fn unary_operators() {
        assert_eq!(eval("-2 ^ 2"), Value::Int32(4));
        assert_eq!(eval("2 - -3"), Value::Int32(5));
        assert_eq!(eval("-(3 + 2)"), Value::Int32(-5));
        assert_eq!(eval("+\"7x\""), Value::Int32(7));
        assert_eq!(eval("Not 0"), Value::Int32(1));
        assert_eq!(eval("Not 1 = 0"), Value::Int32(1));
        assert_eq!(eval("- - 4"), Value::Int32(4));
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(eval("\"abc\" = \"ABC\""), Value::Int32(1));
        assert_eq!(eval("\"abc\" == \"ABC\""), Value::Int32(0));
        assert_eq!(eval("\"10\" > 9"), Value::Int32(1));
        assert_eq!(eval("3 <= 3"), Value::Int32(1));
        assert_eq!(eval("\"b\" >= \"A\""), Value::Int32(1));
    }

    #[test]
    fn variables_and_subscripts() {
        let mut a = Array::new(&[2, 2]).unwrap();
        a.set(&[1, 0], Value::from("hit")).unwrap();
        let mut ctx = TestCtx::new().with("A", Value::from(a)).with("I", Value::Int32(1));
        assert_eq!(eval_ctx("$a[$i][0]", &mut ctx).unwrap(), Value::from("hit"));
        assert!(eval_ctx("$a", &mut ctx).unwrap().is_array());
        let err = eval_ctx("$a[2][0]", &mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadSubscript);
        let err = eval_ctx("$i[0]", &mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotAnArray);
        let err = eval_ctx("$a[-1][0]", &mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadSubscript);
    }

    #[test]
    fn undeclared_variable_is_fatal() {
        assert_eq!(eval_err("$nope + 1").kind, ErrorKind::UndeclaredVariable("NOPE".into()));
    }

    #[test]
    fn macros_resolve_through_context() {
        assert_eq!(eval("\"a\" & @CRLF"), Value::from("a\r\n"));
        assert_eq!(eval_err("@Bogus").kind, ErrorKind::UnknownMacro("BOGUS".into()));
    }

    #[test]
    fn builtin_call_and_arity() {
        let mut ctx = TestCtx::new();
        assert_eq!(eval_ctx("Max2(3, 1 + 5) * 2", &mut ctx).unwrap(), Value::Int32(12));
        let err = eval_ctx("Max2(1)", &mut ctx).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Arity { given: 1, min: 2, max: 2, .. }));
    }

    #[test]
    fn user_call_records_variable_arguments() {
        let mut ctx = TestCtx::new().with("X", Value::Int32(4));
        assert_eq!(eval_ctx("Echo($x, $x + 1, ($x))", &mut ctx).unwrap(), Value::Int32(4));
        assert_eq!(ctx.last_vars, [Some("X".to_string()), None, None]);
    }

    #[test]
    fn nested_calls_and_parenthesised_arguments() {
        let mut ctx = TestCtx::new().func("F", Value::Int32(2));
        assert_eq!(eval_ctx("Echo((1 + F()) * 3, 9)", &mut ctx).unwrap(), Value::Int32(9));
        assert_eq!(eval_ctx("Echo(Echo(Echo(5)))", &mut ctx).unwrap(), Value::Int32(5));
    }

    #[test]
    fn or_with_truthy_left_never_calls_right() {
        let mut ctx = TestCtx::new().func("F", Value::Int32(1)).func("G", Value::Int32(1));
        assert_eq!(eval_ctx("F() Or G()", &mut ctx).unwrap(), Value::Int32(1));
        assert_eq!(ctx.calls, ["F"]);
    }

    #[test]
    fn and_with_falsy_left_never_calls_right() {
        let mut ctx = TestCtx::new().func("F", Value::Int32(0)).func("G", Value::Int32(1));
        assert_eq!(eval_ctx("F() And G()", &mut ctx).unwrap(), Value::Int32(0));
        assert_eq!(ctx.calls, ["F"]);
    }

    #[test]
    fn undecided_left_evaluates_right() {
        let mut ctx = TestCtx::new().func("F", Value::Int32(1)).func("G", Value::Int32(0));
        assert_eq!(eval_ctx("F() And G()", &mut ctx).unwrap(), Value::Int32(0));
        assert_eq!(ctx.calls, ["F", "G"]);
    }

    #[test]
    fn short_circuit_skips_to_next_logic_operator() {
        let mut ctx = TestCtx::new()
            .func("F", Value::Int32(0))
            .func("G", Value::Int32(1))
            .func("H", Value::Int32(1));
        // (F() And G(...)) Or H()
        assert_eq!(eval_ctx("F() And G(1, (2)) Or H()", &mut ctx).unwrap(), Value::Int32(1));
        assert_eq!(ctx.calls, ["F", "H"]);
    }

    #[test]
    fn skipped_region_is_not_syntax_checked() {
        let mut ctx = TestCtx::new().func("F", Value::Int32(1));
        assert_eq!(eval_ctx("F() Or 1 2 3", &mut ctx).unwrap(), Value::Int32(1));
    }

    #[test]
    fn short_circuit_inside_parentheses_and_arguments() {
        let mut ctx = TestCtx::new().func("F", Value::Int32(1)).func("G", Value::Int32(1));
        assert_eq!(eval_ctx("(F() Or G()) + 1", &mut ctx).unwrap(), Value::Int32(2));
        assert_eq!(eval_ctx("Echo(F() Or G())", &mut ctx).unwrap(), Value::Int32(1));
        assert!(!ctx.calls.contains(&"G".to_string()));
    }

    #[test]
    fn syntax_errors_report_outermost_start() {
        let table = FunctionTable::default();
        let tokens = tokenize("$x = (1 + 2", &table).unwrap();
        let err = evaluate(&mut TestCtx::new(), &tokens, 2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingCloseParen);
        assert_eq!(err.column, Some(6));

        let tokens = tokenize("$x = Echo(1 2)", &table).unwrap();
        let err = evaluate(&mut TestCtx::new(), &tokens, 2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingOperator);
        assert_eq!(err.column, Some(6));
    }

    #[test]
    fn syntax_error_kinds() {
        assert_eq!(eval_err("1 2").kind, ErrorKind::MissingOperator);
        assert_eq!(eval_err("1 + 2)").kind, ErrorKind::UnbalancedCloseParen);
        assert_eq!(eval_err("(1 + 2").kind, ErrorKind::MissingCloseParen);
        assert_eq!(eval_err("1 +").kind, ErrorKind::ExpectedExpression);
        assert_eq!(eval_err("* 2").kind, ErrorKind::ExpectedExpression);
        assert_eq!(eval_err("()").kind, ErrorKind::ExpectedExpression);
        assert_eq!(eval_err("2 (3)").kind, ErrorKind::MissingOperator);
    }

    #[test]
    fn stops_at_terminators() {
        let table = FunctionTable::default();
        let mut ctx = TestCtx::new();
        let tokens = tokenize("1 + 2, 3", &table).unwrap();
        let (v, next) = evaluate(&mut ctx, &tokens, 0).unwrap();
        assert_eq!((v, next), (Value::Int32(3), 3));

        let tokens = tokenize("If 1 < 2 Then", &table).unwrap();
        let (ok, next) = evaluate_condition(&mut ctx, &tokens, 1).unwrap();
        assert!(ok);
        assert!(tokens[next].is_keyword(Keyword::Then));
    }
}
