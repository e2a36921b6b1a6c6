//! `au3`: an interpreter for a line-oriented desktop-automation scripting
//! language.
//!
//! The interpreter core lives in [`script`]; everything it needs from the
//! outside world goes through the [`host::Host`] trait, implemented by
//! [`console::ConsoleHost`] for the command-line tool and by
//! [`host::HeadlessHost`] for tests.

pub mod cli;
pub mod config;
pub mod console;
pub mod host;
pub mod script;
pub mod var;
