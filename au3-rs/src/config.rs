//! Interpreter configuration.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. defaults in [`Config::default`],
//! 2. a `key = value` file (`au3.conf` in the user config directory, or the
//!    file named with `-c`),
//! 3. `-D key=value` and `-I dir` on the command line.
//!
//! | Key                   | Type    | Default |
//! |-----------------------|---------|---------|
//! | `max_recursion`       | integer | 384     |
//! | `lexer_cache_size`    | integer | 64      |
//! | `hotkey_queue`        | integer | 64      |
//! | `win_wait_delay`      | ms      | 250     |
//! | `expand_env_strings`  | bool    | false   |
//! | `expand_var_strings`  | bool    | false   |
//! | `must_declare_vars`   | bool    | false   |
//! | `include_path`        | paths   | empty   |
//!
//! `;` and `#` start comment lines.  `include_path` is split like `$PATH`
//! and may be given more than once; entries accumulate.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal problem found while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Deepest allowed nesting of function calls, callbacks and waits.
    pub max_recursion: usize,
    /// Slots in the line-indexed token cache.
    pub lexer_cache_size: usize,
    /// Hotkey presses that may queue up before new ones are dropped.
    pub hotkey_queue: usize,
    /// Pause after a successful window or process wait, in milliseconds.
    pub win_wait_delay: u32,
    pub expand_env_strings: bool,
    pub expand_var_strings: bool,
    pub must_declare_vars: bool,
    /// Directories searched by `#include <file>`.
    pub include_path: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_recursion: 384,
            lexer_cache_size: 64,
            hotkey_queue: 64,
            win_wait_delay: 250,
            expand_env_strings: false,
            expand_var_strings: false,
            must_declare_vars: false,
            include_path: Vec::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration string on top of the defaults.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let errors = config.apply_str(s);
        (config, errors)
    }

    /// Read and parse a configuration file on top of the defaults.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Apply every `key = value` line of `s`; returns the lines that failed.
    pub fn apply_str(&mut self, s: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            let result = match line.split_once('=') {
                Some((key, value)) => self.set(key.trim(), value.trim()),
                None => Err(format!("expected key = value, got {line:?}")),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: i + 1, message });
            }
        }
        errors
    }

    /// Set one key.  The error names what was wrong with it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key.to_ascii_lowercase().as_str() {
            "max_recursion" => self.max_recursion = parse_count(key, value)?,
            "lexer_cache_size" => self.lexer_cache_size = parse_count(key, value)?,
            "hotkey_queue" => self.hotkey_queue = parse_count(key, value)?,
            "win_wait_delay" => {
                self.win_wait_delay = value
                    .parse()
                    .map_err(|_| format!("{key}: expected milliseconds, got {value:?}"))?;
            }
            "expand_env_strings" => self.expand_env_strings = parse_bool(key, value)?,
            "expand_var_strings" => self.expand_var_strings = parse_bool(key, value)?,
            "must_declare_vars" => self.must_declare_vars = parse_bool(key, value)?,
            "include_path" => self
                .include_path
                .extend(std::env::split_paths(value).filter(|p| !p.as_os_str().is_empty())),
            _ => return Err(format!("unknown key {key:?}")),
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/au3/au3.conf` (or the platform equivalent).
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "au3").map(|dirs| dirs.config_dir().join("au3.conf"))
}

fn parse_count(key: &str, value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{key}: expected a positive integer, got {value:?}")),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("{key}: expected a boolean, got {value:?}")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
