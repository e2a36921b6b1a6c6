//! Command-line argument parsing.
//!
//! Usage:
//!   au3 [-dqn] [-c <config>] [-I <dir>]… [-D <key=value>]… <script> [args…]
//!
//! Everything after the script path belongs to the script, flags included.

use std::path::PathBuf;

use crate::config::{self, Config, ConfigError};

pub const USAGE: &str =
    "Usage: au3 [-dqn] [-c <config>] [-I <dir>]... [-D <key=value>]... <script> [args...]";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// Debug logging (`-d`).
    pub debug: bool,
    /// Do not report configuration warnings (`-q`).
    pub quiet: bool,
    pub config: ConfigFile,
    /// Extra include directories (`-I`), searched before configured ones.
    pub include_dirs: Vec<PathBuf>,
    /// `-D key=value` overrides, applied last.
    pub defines: Vec<(String, String)>,
    pub script: PathBuf,
    pub script_args: Vec<String>,
}

/// Which configuration file to read.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConfigFile {
    /// The per-user file, when it exists.
    #[default]
    User,
    /// `-n`: defaults only.
    Skip,
    /// `-c <file>`.
    Explicit(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()`.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut script: Option<PathBuf> = None;
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            i += 1;
            if let Some(path) = argv.get(i) {
                script = Some(PathBuf::from(path));
                i += 1;
            }
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            script = Some(PathBuf::from(arg));
            i += 1;
            break;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'd' => args.debug = true,
                'q' => args.quiet = true,
                'n' => args.config = ConfigFile::Skip,
                c @ ('c' | 'I' | 'D') => {
                    // Value embedded (`-Idir`) or in the next argument.
                    let value = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(format!("-{c} requires an argument"));
                    };
                    match c {
                        'c' => args.config = ConfigFile::Explicit(PathBuf::from(value)),
                        'I' => args.include_dirs.push(PathBuf::from(value)),
                        _ => {
                            let Some((key, val)) = value.split_once('=') else {
                                return Err(format!("-D expects key=value, got {value:?}"));
                            };
                            args.defines.push((key.trim().to_owned(), val.trim().to_owned()));
                        }
                    }
                }
                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    args.script = script.ok_or_else(|| "no script given".to_owned())?;
    args.script_args = argv.get(i..).unwrap_or_default().to_vec();
    Ok(args)
}

// ── Configuration layering ────────────────────────────────────────────────────

/// Build the effective configuration: defaults, then the config file, then
/// `-I` and `-D`.  Problems that do not stop the run come back as warnings.
pub fn build_config(args: &CliArgs) -> Result<(Config, Vec<ConfigError>), String> {
    let (mut cfg, mut warnings) = match &args.config {
        ConfigFile::Skip => (Config::new(), Vec::new()),
        ConfigFile::Explicit(path) => Config::load_file(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?,
        ConfigFile::User => match config::user_config_path().filter(|p| p.is_file()) {
            Some(path) => Config::load_file(&path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?,
            None => (Config::new(), Vec::new()),
        },
    };

    let mut include_path = args.include_dirs.clone();
    include_path.append(&mut cfg.include_path);
    cfg.include_path = include_path;

    for (n, (key, value)) in args.defines.iter().enumerate() {
        if let Err(message) = cfg.set(key, value) {
            // Command-line entries are numbered from 1 in the order given.
            warnings.push(ConfigError { line: n + 1, message: format!("-D {message}") });
        }
    }
    Ok((cfg, warnings))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
