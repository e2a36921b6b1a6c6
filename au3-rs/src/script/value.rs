//! Runtime value type for the scripting language.
//!
//! Values are tagged: integers keep their width, doubles stay doubles, and
//! strings are only coerced to numbers when an operator asks for one.  All
//! coercions are total; a string with no numeric prefix is simply 0.

use std::cmp::Ordering;
use std::fmt;

use super::error::ErrorKind;

/// Most dimensions an array may have.
pub const MAX_ARRAY_DIMS: usize = 64;
/// Most elements an array may hold across all dimensions.
pub const MAX_ARRAY_ELEMENTS: usize = 16 * 1024 * 1024;

/// A script runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float(f64),
    Str(String),
    /// Opaque OS reference (window, process).  Arithmetic sees an integer.
    Handle(u64),
    Array(Box<Array>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Str(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(n) => write!(f, "{n}"),
            Value::Int64(n) => write!(f, "{n}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::Handle(h) => write!(f, "0x{h:08X}"),
            Value::Array(_) => Ok(()),
        }
    }
}

/// Doubles print like C's `%.15g`, except that integral values below 1e15
/// print with no fraction at all.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "-1.#IND".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "1.#INF".into() } else { "-1.#INF".into() };
    }
    if x == 0.0 {
        return "0".into();
    }
    if x.fract() == 0.0 && x.abs() < 1e15 {
        return format!("{x:.0}");
    }
    let exp = x.abs().log10().floor() as i32;
    if (-5..15).contains(&exp) {
        let decimals = (14 - exp).max(0) as usize;
        trim_fraction(format!("{x:.decimals$}"))
    } else {
        let sci = format!("{x:.14e}");
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa.to_owned()), exponent.abs())
    }
}

fn trim_fraction(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

// ── Numeric scanning ──────────────────────────────────────────────────────────

/// Intermediate numeric form used by arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(x) => x,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Number::Int(n) => Value::from_i64(n),
            Number::Float(x) => Value::Float(x),
        }
    }
}

/// Parse the leading numeric prefix of `s`: optional whitespace, sign,
/// digits, fraction and exponent.  Returns the number and the byte length
/// consumed, or `None` when no digits were found.
pub fn scan_number(s: &str) -> Option<(Number, usize)> {
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() && matches!(b[i], b' ' | b'\t' | b'\r' | b'\n') {
        i += 1;
    }
    let start = i;
    if i < b.len() && matches!(b[i], b'+' | b'-') {
        i += 1;
    }
    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    let mut float = false;
    if i < b.len() && b[i] == b'.' {
        let mut j = i + 1;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        if digits > 0 || j > i + 1 {
            digits += j - i - 1;
            float = true;
            i = j;
        }
    }
    if digits == 0 {
        return None;
    }
    if i < b.len() && matches!(b[i], b'e' | b'E') {
        let mut j = i + 1;
        if j < b.len() && matches!(b[j], b'+' | b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            float = true;
            i = j;
        }
    }
    let text = &s[start..i];
    let n = if float {
        Number::Float(text.parse().ok()?)
    } else {
        match text.parse::<i64>() {
            Ok(n) => Number::Int(n),
            Err(_) => Number::Float(text.parse().ok()?),
        }
    };
    Some((n, i))
}

/// True when the trimmed text is one complete number.
pub fn is_numeric_str(s: &str) -> bool {
    match scan_number(s) {
        Some((_, used)) => s[used..].trim().is_empty(),
        None => false,
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

impl Value {
    /// Narrow an integer result to `Int32` when it fits.
    pub fn from_i64(n: i64) -> Value {
        i32::try_from(n).map(Value::Int32).unwrap_or(Value::Int64(n))
    }

    pub fn number(&self) -> Number {
        match self {
            Value::Int32(n) => Number::Int(i64::from(*n)),
            Value::Int64(n) => Number::Int(*n),
            Value::Float(x) => Number::Float(*x),
            Value::Str(s) => scan_number(s).map(|(n, _)| n).unwrap_or(Number::Int(0)),
            Value::Handle(h) => Number::Int(*h as i64),
            Value::Array(_) => Number::Int(0),
        }
    }

    /// The numeric value of `self` with its natural tag.
    pub fn to_number(&self) -> Value {
        self.number().into_value()
    }

    /// Truthiness: nonzero number, non-empty string, non-empty array.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Int32(n) => *n != 0,
            Value::Int64(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Handle(h) => *h != 0,
            Value::Array(a) => !a.is_empty(),
        }
    }

    pub fn as_int32(&self) -> i32 {
        match self.number() {
            Number::Int(n) => n as i32,
            Number::Float(x) => x as i32,
        }
    }

    pub fn as_int64(&self) -> i64 {
        match self.number() {
            Number::Int(n) => n,
            Number::Float(x) => x as i64,
        }
    }

    pub fn as_float(&self) -> f64 {
        self.number().to_f64()
    }

    pub fn as_str(&self) -> String {
        self.to_string()
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Name of the tag, as reported in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::Float(_) => "Double",
            Value::Str(_) => "String",
            Value::Handle(_) => "Handle",
            Value::Array(_) => "Array",
        }
    }

    fn looks_numeric(&self) -> bool {
        match self {
            Value::Str(s) => is_numeric_str(s),
            Value::Array(_) => false,
            _ => true,
        }
    }

    // ── Arithmetic ────────────────────────────────────────────────────────────

    fn arith(
        &self,
        rhs: &Value,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Value {
        match (self.number(), rhs.number()) {
            (Number::Int(a), Number::Int(b)) => int_op(a, b)
                .map(Value::from_i64)
                .unwrap_or_else(|| Value::Float(float_op(a as f64, b as f64))),
            (a, b) => Value::Float(float_op(a.to_f64(), b.to_f64())),
        }
    }

    pub fn arith_add(&self, rhs: &Value) -> Value {
        self.arith(rhs, i64::checked_add, |a, b| a + b)
    }

    pub fn arith_sub(&self, rhs: &Value) -> Value {
        self.arith(rhs, i64::checked_sub, |a, b| a - b)
    }

    pub fn arith_mul(&self, rhs: &Value) -> Value {
        self.arith(rhs, i64::checked_mul, |a, b| a * b)
    }

    /// Integer result only for an exact integer quotient; division by zero
    /// yields an infinity (or NaN for `0/0`).
    pub fn arith_div(&self, rhs: &Value) -> Value {
        self.arith(
            rhs,
            |a, b| match a.checked_rem(b) {
                Some(0) => a.checked_div(b),
                _ => None,
            },
            |a, b| a / b,
        )
    }

    /// Remainder with the sign of the dividend; modulo by zero is NaN.
    pub fn arith_rem(&self, rhs: &Value) -> Value {
        self.arith(rhs, i64::checked_rem, |a, b| a % b)
    }

    pub fn arith_pow(&self, rhs: &Value) -> Value {
        let (base, exp) = (self.number(), rhs.number());
        let (b, e) = (base.to_f64(), exp.to_f64());
        if e == 0.0 {
            return Value::Int32(1);
        }
        if b == 0.0 && e < 0.0 {
            return Value::Int32(0);
        }
        if let (Number::Int(bi), Number::Int(ei)) = (base, exp) {
            if let Some(r) = u32::try_from(ei).ok().and_then(|e| bi.checked_pow(e)) {
                return Value::from_i64(r);
            }
        }
        if b < 0.0 {
            if e.fract() != 0.0 {
                // Legacy: a negative base with a fractional exponent collapses to 0.
                return Value::Int32(0);
            }
            let r = (-b).powf(e);
            return Value::Float(if e % 2.0 != 0.0 { -r } else { r });
        }
        Value::Float(b.powf(e))
    }

    pub fn arith_neg(&self) -> Value {
        match self.number() {
            Number::Int(n) => n
                .checked_neg()
                .map(Value::from_i64)
                .unwrap_or(Value::Float(-(n as f64))),
            Number::Float(x) => Value::Float(-x),
        }
    }

    pub fn concat(&self, rhs: &Value) -> Value {
        let mut s = self.to_string();
        s.push_str(&rhs.to_string());
        Value::Str(s)
    }

    // ── Comparison ────────────────────────────────────────────────────────────

    /// Numeric when both sides look numeric, case-insensitive text otherwise.
    /// `None` only for comparisons involving NaN.
    pub fn cmp_value(&self, rhs: &Value) -> Option<Ordering> {
        if self.looks_numeric() && rhs.looks_numeric() {
            match (self.number(), rhs.number()) {
                (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
                (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
            }
        } else {
            Some(
                self.to_string()
                    .to_lowercase()
                    .cmp(&rhs.to_string().to_lowercase()),
            )
        }
    }

    /// `=` and `<>`.
    pub fn loose_eq(&self, rhs: &Value) -> bool {
        self.cmp_value(rhs) == Some(Ordering::Equal)
    }

    /// `==`: case-sensitive comparison of the text forms.
    pub fn strict_eq(&self, rhs: &Value) -> bool {
        self.to_string() == rhs.to_string()
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int32(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::from_i64(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int32(i32::from(b))
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(Box::new(a))
    }
}

// ── Array ─────────────────────────────────────────────────────────────────────

/// Multi-dimensional array with a flat row-major backing store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Array {
    dims: Vec<usize>,
    data: Vec<Value>,
}

impl Array {
    pub fn new(dims: &[usize]) -> Result<Self, ErrorKind> {
        let mut a = Array::default();
        a.dimension(dims)?;
        Ok(a)
    }

    /// One-dimensional array holding `values` (arrays among them become "").
    pub fn from_values(values: Vec<Value>) -> Self {
        let data: Vec<Value> = values
            .into_iter()
            .map(|v| if v.is_array() { Value::default() } else { v })
            .collect();
        Array { dims: vec![data.len()], data }
    }

    /// (Re)size the array.  Previous contents are discarded.
    pub fn dimension(&mut self, dims: &[usize]) -> Result<(), ErrorKind> {
        if dims.is_empty() || dims.len() > MAX_ARRAY_DIMS {
            return Err(ErrorKind::BadDimensions("between 1 and 64 dimensions are allowed"));
        }
        let mut total: usize = 1;
        for &d in dims {
            if d == 0 {
                return Err(ErrorKind::BadDimensions("dimension sizes must be positive"));
            }
            total = total
                .checked_mul(d)
                .filter(|&t| t <= MAX_ARRAY_ELEMENTS)
                .ok_or(ErrorKind::BadDimensions("too many elements"))?;
        }
        self.dims = dims.to_vec();
        self.data = vec![Value::default(); total];
        Ok(())
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Size of dimension `dim` (0-based).
    pub fn bound(&self, dim: usize) -> Option<usize> {
        self.dims.get(dim).copied()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.data
    }

    fn offset(&self, subs: &[usize]) -> Result<usize, ErrorKind> {
        if subs.len() != self.dims.len() {
            return Err(ErrorKind::BadSubscript);
        }
        let mut off = 0;
        for (&s, &d) in subs.iter().zip(&self.dims) {
            if s >= d {
                return Err(ErrorKind::BadSubscript);
            }
            off = off * d + s;
        }
        Ok(off)
    }

    pub fn get(&self, subs: &[usize]) -> Result<&Value, ErrorKind> {
        let off = self.offset(subs)?;
        Ok(&self.data[off])
    }

    pub fn get_mut(&mut self, subs: &[usize]) -> Result<&mut Value, ErrorKind> {
        let off = self.offset(subs)?;
        Ok(&mut self.data[off])
    }

    /// Overwrite elements in row-major order, starting with the first.
    pub fn fill(&mut self, values: Vec<Value>) -> Result<(), ErrorKind> {
        if values.len() > self.data.len() {
            return Err(ErrorKind::BadDimensions("more initial values than elements"));
        }
        if values.iter().any(Value::is_array) {
            return Err(ErrorKind::NestedArray);
        }
        for (slot, v) in self.data.iter_mut().zip(values) {
            *slot = v;
        }
        Ok(())
    }

    pub fn set(&mut self, subs: &[usize], value: Value) -> Result<(), ErrorKind> {
        if value.is_array() {
            return Err(ErrorKind::NestedArray);
        }
        *self.get_mut(subs)? = value;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
