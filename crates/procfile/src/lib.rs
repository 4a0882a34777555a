//! Keel procfile: parse `name: command` process files and pick the routable process.
//!
//! One process per line, `#` comments and blank lines ignored. Lines that do not look
//! like `name: command` are skipped rather than rejected; only a file with no usable
//! line at all is an error.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use keel_core::{CompileError, CompileResult, ROUTABLE_PROCESS_NAME};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

static PROCESS_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9_-]+)\s*:\s*(.+)$").unwrap());
static PROCESS_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Whether `name` is usable as a process name: non-empty, `[A-Za-z0-9_-]` only.
pub fn is_valid_name(name: &str) -> bool {
    PROCESS_NAME.is_match(name)
}

/// Parsed process set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Procfile {
    /// Process name -> command tokens. Ordered by name.
    pub processes: BTreeMap<String, Vec<String>>,
    /// The single process receiving external traffic.
    pub routable_process: String,
}

impl Procfile {
    /// Parse process file text.
    pub fn parse(text: &str) -> CompileResult<Self> {
        let mut processes = BTreeMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match PROCESS_LINE.captures(line) {
                Some(caps) => {
                    let name = caps[1].to_string();
                    let cmd = caps[2].trim().to_string();
                    processes.insert(name, vec![cmd]);
                }
                None => debug!(line = lineno + 1, "skipping malformed process line"),
            }
        }
        Self::from_map(processes)
    }

    /// Build from an explicit `(name, command)` list, applying the same routability rule.
    pub fn from_processes<I, S>(entries: I) -> CompileResult<Self>
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let processes = entries.into_iter().map(|(name, cmd)| (name.into(), cmd)).collect();
        Self::from_map(processes)
    }

    fn from_map(processes: BTreeMap<String, Vec<String>>) -> CompileResult<Self> {
        let routable_process = select_routable(processes.keys().map(String::as_str)).ok_or(CompileError::EmptyDefinition)?;
        Ok(Self { processes, routable_process })
    }

    pub fn is_routable(&self, name: &str) -> bool {
        self.routable_process == name
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.processes.keys().map(String::as_str)
    }
}

/// `web` if present, else the lexicographically smallest name.
pub fn select_routable<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut min: Option<&str> = None;
    for name in names {
        if name == ROUTABLE_PROCESS_NAME {
            return Some(name.to_string());
        }
        if min.map_or(true, |m| name < m) {
            min = Some(name);
        }
    }
    min.map(str::to_string)
}
