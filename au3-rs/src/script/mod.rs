//! The scripting language.
//!
//! Source is kept as text and lexed one line at a time on demand, through a
//! small cache.  A pre-pass validates block structure and builds the
//! user-function table before the first statement runs; after that the
//! [`Interpreter`] executes statements straight off the token stream.
//!
//! ```rust
//! use au3::host::HeadlessHost;
//! use au3::script::Interpreter;
//!
//! let host = HeadlessHost::new();
//! let mut interp = Interpreter::from_source("ConsoleWrite(6 * 7)", Box::new(host.clone())).unwrap();
//! assert_eq!(interp.run().unwrap(), 0);
//! assert_eq!(host.output(), "42");
//! ```

pub mod builtins;
pub mod error;
pub mod expand;
pub mod expr;
pub mod functions;
pub mod interp;
pub mod lexer;
mod macros;
pub mod prescan;
pub mod scheduler;
pub mod source;
mod stmt;
pub mod value;

pub use error::{ErrorKind, ScriptError};
pub use expr::EvalContext;
pub use interp::{Interpreter, RunState};
pub use source::Script;
pub use value::Value;
