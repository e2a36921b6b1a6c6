//! Per-line tokenizer and the line-indexed token cache.
//!
//! Each logical source line is lexed on its own.  Identifiers are folded to
//! uppercase and resolved in order: keyword table, built-in table, and
//! finally a user-function reference that the pre-pass validates.

use std::rc::Rc;

use tracing::trace;

use super::error::{ErrorKind, LexError};
use super::functions::{BuiltinId, FunctionTable};

// ── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    And,
    Or,
    Not,
    If,
    Then,
    Else,
    ElseIf,
    EndIf,
    While,
    WEnd,
    Do,
    Until,
    For,
    To,
    Step,
    Next,
    Exit,
    ExitLoop,
    ContinueLoop,
    Select,
    Case,
    EndSelect,
    Dim,
    ReDim,
    Local,
    Global,
    Const,
    Func,
    EndFunc,
    Return,
    ByRef,
}

/// Uppercase spelling → keyword.  Short enough for a linear scan.
const KEYWORDS: &[(&str, Keyword)] = &[
    ("AND", Keyword::And),
    ("OR", Keyword::Or),
    ("NOT", Keyword::Not),
    ("IF", Keyword::If),
    ("THEN", Keyword::Then),
    ("ELSE", Keyword::Else),
    ("ELSEIF", Keyword::ElseIf),
    ("ENDIF", Keyword::EndIf),
    ("WHILE", Keyword::While),
    ("WEND", Keyword::WEnd),
    ("DO", Keyword::Do),
    ("UNTIL", Keyword::Until),
    ("FOR", Keyword::For),
    ("TO", Keyword::To),
    ("STEP", Keyword::Step),
    ("NEXT", Keyword::Next),
    ("EXIT", Keyword::Exit),
    ("EXITLOOP", Keyword::ExitLoop),
    ("CONTINUELOOP", Keyword::ContinueLoop),
    ("SELECT", Keyword::Select),
    ("CASE", Keyword::Case),
    ("ENDSELECT", Keyword::EndSelect),
    ("DIM", Keyword::Dim),
    ("REDIM", Keyword::ReDim),
    ("LOCAL", Keyword::Local),
    ("GLOBAL", Keyword::Global),
    ("CONST", Keyword::Const),
    ("FUNC", Keyword::Func),
    ("ENDFUNC", Keyword::EndFunc),
    ("RETURN", Keyword::Return),
    ("BYREF", Keyword::ByRef),
];

impl Keyword {
    pub fn lookup(upper: &str) -> Option<Keyword> {
        KEYWORDS.iter().find(|(name, _)| *name == upper).map(|(_, kw)| *kw)
    }

    /// Canonical spelling, used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Keyword::And => "And",
            Keyword::Or => "Or",
            Keyword::Not => "Not",
            Keyword::If => "If",
            Keyword::Then => "Then",
            Keyword::Else => "Else",
            Keyword::ElseIf => "ElseIf",
            Keyword::EndIf => "EndIf",
            Keyword::While => "While",
            Keyword::WEnd => "WEnd",
            Keyword::Do => "Do",
            Keyword::Until => "Until",
            Keyword::For => "For",
            Keyword::To => "To",
            Keyword::Step => "Step",
            Keyword::Next => "Next",
            Keyword::Exit => "Exit",
            Keyword::ExitLoop => "ExitLoop",
            Keyword::ContinueLoop => "ContinueLoop",
            Keyword::Select => "Select",
            Keyword::Case => "Case",
            Keyword::EndSelect => "EndSelect",
            Keyword::Dim => "Dim",
            Keyword::ReDim => "ReDim",
            Keyword::Local => "Local",
            Keyword::Global => "Global",
            Keyword::Const => "Const",
            Keyword::Func => "Func",
            Keyword::EndFunc => "EndFunc",
            Keyword::Return => "Return",
            Keyword::ByRef => "ByRef",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    End,
    Keyword(Keyword),
    Builtin(BuiltinId),
    /// Uppercase name of a user function (resolved by the pre-pass).
    UserFunc(String),
    /// Uppercase variable name without the `$`.
    Variable(String),
    /// Uppercase macro name without the `@`.
    Macro(String),
    Str(String),
    Int32(i32),
    Int64(i64),
    Float(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Amp,
    Eq,
    EqEq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based column of the first character.
    pub col: usize,
}

impl Token {
    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }
}

/// A lexed line, shared between the cache and the driver.
pub type TokenLine = Rc<[Token]>;

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum NumState {
    Integer,
    Fraction,
    ExponentMark,
    ExponentSign,
    Exponent,
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    functions: &'a FunctionTable,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &str, functions: &'a FunctionTable) -> Self {
        Lexer { chars: text.chars().collect(), pos: 0, functions }
    }

    /// Lex the whole line.  The token list always ends with [`TokenKind::End`],
    /// even when lexing stopped early at an error.
    pub fn scan(mut self) -> (Vec<Token>, Option<(ErrorKind, usize)>) {
        let mut tokens = Vec::new();
        let error = loop {
            while matches!(self.peek(), Some(' ' | '\t' | '\r' | '\n')) {
                self.pos += 1;
            }
            let col = self.pos + 1;
            let Some(c) = self.peek() else { break None };
            if c == ';' {
                break None;
            }
            match self.next_token(c) {
                Ok(kind) => tokens.push(Token { kind, col }),
                Err(kind) => break Some((kind, col)),
            }
        };
        tokens.push(Token { kind: TokenKind::End, col: self.pos + 1 });
        (tokens, error)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn next_token(&mut self, c: char) -> Result<TokenKind, ErrorKind> {
        if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            return self.number();
        }
        match c {
            '"' | '\'' => self.string(c),
            '$' | '@' => {
                self.pos += 1;
                let name = self.ident();
                if name.is_empty() {
                    return Err(ErrorKind::MissingName(c));
                }
                let name = name.to_ascii_uppercase();
                Ok(if c == '$' { TokenKind::Variable(name) } else { TokenKind::Macro(name) })
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let upper = self.ident().to_ascii_uppercase();
                if let Some(kw) = Keyword::lookup(&upper) {
                    Ok(TokenKind::Keyword(kw))
                } else if let Some(id) = self.functions.lookup(&upper) {
                    Ok(TokenKind::Builtin(id))
                } else {
                    Ok(TokenKind::UserFunc(upper))
                }
            }
            _ => {
                self.pos += 1;
                let kind = match c {
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '^' => TokenKind::Caret,
                    '&' => TokenKind::Amp,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    ',' => TokenKind::Comma,
                    '=' => self.pair('=', TokenKind::EqEq, TokenKind::Eq),
                    '>' => self.pair('=', TokenKind::Ge, TokenKind::Gt),
                    '<' => match self.peek() {
                        Some('=') => {
                            self.pos += 1;
                            TokenKind::Le
                        }
                        Some('>') => {
                            self.pos += 1;
                            TokenKind::Ne
                        }
                        _ => TokenKind::Lt,
                    },
                    other => return Err(ErrorKind::IllegalCharacter(other)),
                };
                Ok(kind)
            }
        }
    }

    /// One-character lookahead for two-character operators.
    fn pair(&mut self, second: char, double: TokenKind, single: TokenKind) -> TokenKind {
        if self.peek() == Some(second) {
            self.pos += 1;
            double
        } else {
            single
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, ErrorKind> {
        self.pos += 1;
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err(ErrorKind::UnterminatedString),
                Some(c) if c == quote => {
                    if self.peek_at(1) == Some(quote) {
                        s.push(quote);
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        return Ok(TokenKind::Str(s));
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn number(&mut self) -> Result<TokenKind, ErrorKind> {
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.pos += 2;
            let start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[start..self.pos].iter().collect();
            let v = u64::from_str_radix(&digits, 16).map_err(|_| ErrorKind::InvalidNumber)?;
            return Ok(match u32::try_from(v) {
                Ok(small) => TokenKind::Int32(small as i32),
                Err(_) => TokenKind::Int64(v as i64),
            });
        }

        let start = self.pos;
        let mut state = NumState::Integer;
        let mut float = false;
        // Last position at which the text so far is a complete number.
        let mut accept = self.pos;
        while let Some(c) = self.peek() {
            state = match (state, c) {
                (NumState::Integer | NumState::Fraction, d) if d.is_ascii_digit() => state,
                (NumState::Integer, '.') => NumState::Fraction,
                (NumState::Integer | NumState::Fraction, 'e' | 'E') => NumState::ExponentMark,
                (NumState::ExponentMark, '+' | '-') => NumState::ExponentSign,
                (NumState::ExponentMark | NumState::ExponentSign | NumState::Exponent, d)
                    if d.is_ascii_digit() =>
                {
                    NumState::Exponent
                }
                _ => break,
            };
            self.pos += 1;
            match state {
                NumState::Integer => accept = self.pos,
                NumState::Fraction | NumState::Exponent => {
                    float = true;
                    accept = self.pos;
                }
                NumState::ExponentMark | NumState::ExponentSign => {}
            }
        }
        // A dangling `e` or `e+` is not part of the number.
        self.pos = accept;
        let text: String = self.chars[start..self.pos].iter().collect();
        if float {
            return text.parse().map(TokenKind::Float).map_err(|_| ErrorKind::InvalidNumber);
        }
        match text.parse::<i64>() {
            Ok(n) => Ok(i32::try_from(n).map(TokenKind::Int32).unwrap_or(TokenKind::Int64(n))),
            Err(_) => text.parse().map(TokenKind::Float).map_err(|_| ErrorKind::InvalidNumber),
        }
    }
}

/// Lex one line of text that has no line number attached (tests, defaults).
pub fn tokenize(text: &str, functions: &FunctionTable) -> Result<Vec<Token>, LexError> {
    lex_line(0, text, functions)
}

pub fn lex_line(line: usize, text: &str, functions: &FunctionTable) -> Result<Vec<Token>, LexError> {
    match Lexer::new(text, functions).scan() {
        (tokens, None) => Ok(tokens),
        (_, Some((kind, column))) => Err(LexError { kind, line, column }),
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

struct CachedLine {
    line: usize,
    tokens: TokenLine,
}

/// Fixed-size cache of lexed lines indexed by `line % size`.  A slot only
/// counts as a hit when it was filled for the same line; collisions evict.
pub struct LineCache {
    slots: Vec<Option<CachedLine>>,
    hits: u64,
    misses: u64,
}

impl LineCache {
    pub fn new(size: usize) -> Self {
        LineCache {
            slots: (0..size.max(1)).map(|_| None).collect(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn lex(
        &mut self,
        line: usize,
        text: &str,
        functions: &FunctionTable,
    ) -> Result<TokenLine, LexError> {
        let slot = line % self.slots.len();
        if let Some(cached) = &self.slots[slot] {
            if cached.line == line {
                self.hits += 1;
                trace!(line, "lexer cache hit");
                return Ok(Rc::clone(&cached.tokens));
            }
        }
        self.misses += 1;
        trace!(line, slot, "lexer cache miss");
        let tokens: TokenLine = lex_line(line, text, functions)?.into();
        self.slots[slot] = Some(CachedLine { line, tokens: Rc::clone(&tokens) });
        Ok(tokens)
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
