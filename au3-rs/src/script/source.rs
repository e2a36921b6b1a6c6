//! Script source loading.
//!
//! Turns a script file into a flat list of numbered logical lines:
//!
//! - `#include "file"` / `#include <file>` splices another unit in place,
//! - `#include-once` makes later includes of the same unit no-ops,
//! - `#cs` … `#ce` (or `#comments-start` … `#comments-end`) blocks are blanked,
//! - a line ending in ` _` continues on the next physical line.
//!
//! Every physical line keeps its own slot, so line numbers in diagnostics
//! always match the file; directives and continued lines become empty.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::error::{ErrorKind, LineInfo, ScriptError};

/// Callback used to read include files.  Receives a candidate path; returns
/// the file contents or an error message.
pub type FileLoader = Arc<dyn Fn(&Path) -> Result<String, String> + Send + Sync>;

/// A [`FileLoader`] that reads from the filesystem.
pub fn fs_loader() -> FileLoader {
    Arc::new(|path: &Path| std::fs::read_to_string(path).map_err(|e| e.to_string()))
}

const MAX_INCLUDE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine {
    pub text: String,
    /// Index into the unit list.
    pub unit: usize,
    /// 1-based line number within the unit.
    pub line: usize,
}

/// A loaded script: all units flattened into one line array.
#[derive(Debug, Default)]
pub struct Script {
    units: Vec<PathBuf>,
    lines: Vec<SourceLine>,
}

impl Script {
    /// Build a script from in-memory source.  Includes are resolved relative
    /// to the current directory and read from the filesystem.
    pub fn from_source(name: &str, src: &str) -> Result<Script, ScriptError> {
        Script::build(Path::new(name), src, &[], &fs_loader())
    }

    /// Read `path` and everything it includes.
    pub fn load(path: &Path, include_dirs: &[PathBuf]) -> Result<Script, ScriptError> {
        let loader = fs_loader();
        let src = loader(path).map_err(|reason| {
            ScriptError::new(ErrorKind::Include { path: path.display().to_string(), reason })
        })?;
        Script::build(path, &src, include_dirs, &loader)
    }

    pub fn build(
        name: &Path,
        src: &str,
        include_dirs: &[PathBuf],
        loader: &FileLoader,
    ) -> Result<Script, ScriptError> {
        let mut builder = Builder {
            script: Script::default(),
            include_dirs,
            loader,
            once: HashSet::new(),
            depth: 0,
        };
        builder.add_unit(name.to_path_buf(), src)?;
        Ok(builder.script)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[SourceLine] {
        &self.lines
    }

    pub fn text(&self, index: usize) -> &str {
        self.lines.get(index).map(|l| l.text.as_str()).unwrap_or("")
    }

    /// Path of the main unit.
    pub fn main_path(&self) -> Option<&Path> {
        self.units.first().map(PathBuf::as_path)
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Diagnostic location of global line `index`.
    pub fn line_info(&self, index: usize) -> LineInfo {
        match self.lines.get(index) {
            Some(l) => LineInfo {
                unit: self.units.get(l.unit).map(|p| p.display().to_string()).unwrap_or_default(),
                line: l.line,
                text: l.text.clone(),
            },
            None => LineInfo {
                unit: self.main_path().map(|p| p.display().to_string()).unwrap_or_default(),
                line: index + 1,
                text: String::new(),
            },
        }
    }

    /// Attach the location of global line `index` to `err` if it has none.
    pub fn locate(&self, err: ScriptError, index: usize) -> ScriptError {
        err.with_line(|| self.line_info(index))
    }
}

struct Builder<'a> {
    script: Script,
    include_dirs: &'a [PathBuf],
    loader: &'a FileLoader,
    once: HashSet<PathBuf>,
    depth: usize,
}

impl Builder<'_> {
    fn push(&mut self, unit: usize, line: usize, text: String) -> usize {
        self.script.lines.push(SourceLine { text, unit, line });
        self.script.lines.len() - 1
    }

    fn add_unit(&mut self, path: PathBuf, src: &str) -> Result<(), ScriptError> {
        let unit = self.script.units.len();
        self.script.units.push(path.clone());
        let mut in_comment = false;
        // Slot and accumulated text of a line that continues with ` _`.
        let mut pending: Option<(usize, String)> = None;

        for (idx, raw) in src.lines().enumerate() {
            let lineno = idx + 1;
            let trimmed = raw.trim();
            let lower = trimmed.to_ascii_lowercase();

            if in_comment {
                if lower.starts_with("#ce") || lower.starts_with("#comments-end") {
                    in_comment = false;
                }
                self.push(unit, lineno, String::new());
                continue;
            }

            if pending.is_none() && trimmed.starts_with('#') {
                self.push(unit, lineno, String::new());
                if lower.starts_with("#cs") || lower.starts_with("#comments-start") {
                    in_comment = true;
                } else if lower.starts_with("#include-once") {
                    self.once.insert(path.clone());
                } else if lower.starts_with("#include") {
                    self.include(&path, &trimmed["#include".len()..])
                        .map_err(|e| e.with_line(|| LineInfo {
                            unit: path.display().to_string(),
                            line: lineno,
                            text: raw.to_owned(),
                        }))?;
                } else {
                    debug!(directive = trimmed, "ignoring directive");
                }
                continue;
            }

            let body = raw.trim_end();
            let (body, continues) = match body.strip_suffix('_') {
                Some(rest) if rest.is_empty() || rest.ends_with([' ', '\t']) => (rest, true),
                _ => (body, false),
            };
            let (slot, mut text) = match pending.take() {
                Some((slot, text)) => {
                    self.push(unit, lineno, String::new());
                    (slot, text)
                }
                None => (self.push(unit, lineno, String::new()), String::new()),
            };
            text.push_str(body);
            if continues {
                pending = Some((slot, text));
            } else {
                self.script.lines[slot].text = text;
            }
        }
        if let Some((slot, text)) = pending {
            self.script.lines[slot].text = text;
        }
        Ok(())
    }

    fn include(&mut self, from: &Path, spec: &str) -> Result<(), ScriptError> {
        let spec = spec.trim();
        let fail = |reason: &str| {
            ScriptError::new(ErrorKind::Include { path: spec.to_owned(), reason: reason.to_owned() })
        };
        let (name, system) = match spec.chars().next() {
            Some('"') => (spec[1..].split('"').next().unwrap_or(""), false),
            Some('<') => (spec[1..].split('>').next().unwrap_or(""), true),
            _ => return Err(fail("expected \"file\" or <file>")),
        };
        if name.is_empty() {
            return Err(fail("empty file name"));
        }
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(fail("includes nested too deeply"));
        }

        let local_dir = from.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut candidates: Vec<PathBuf> = Vec::new();
        if !system {
            candidates.push(local_dir.join(name));
        }
        candidates.extend(self.include_dirs.iter().map(|d| d.join(name)));
        if system {
            candidates.push(local_dir.join(name));
        }

        let mut last_error = String::from("not found");
        for candidate in candidates {
            let key = std::fs::canonicalize(&candidate).unwrap_or_else(|_| candidate.clone());
            if self.once.contains(&key) {
                debug!(path = %candidate.display(), "skipping #include-once unit");
                return Ok(());
            }
            match (self.loader)(&candidate) {
                Ok(src) => {
                    debug!(path = %candidate.display(), "including");
                    self.depth += 1;
                    let r = self.add_unit(key, &src);
                    self.depth -= 1;
                    return r;
                }
                Err(e) => last_error = e,
            }
        }
        Err(fail(&last_error))
    }
}
