//! Append-only `.env` file store.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::errors::ToolError;

static KEY_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

/// Appends `KEY=value` lines to a dotenv file.
#[derive(Clone, Debug)]
pub struct EnvStore {
    path: PathBuf,
}

impl EnvStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `key` is a legal variable name.
    pub fn is_valid_key(key: &str) -> bool {
        KEY_PATTERN.as_ref().is_some_and(|re| re.is_match(key))
    }

    /// Append `entries`, creating the file (and its directory) if absent.
    ///
    /// All keys are validated before anything is written. Returns the number
    /// of lines appended.
    pub fn append<K, V>(&self, entries: &[(K, V)]) -> Result<usize, ToolError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if let Some((key, _)) = entries.iter().find(|(k, _)| !Self::is_valid_key(k.as_ref())) {
            return Err(ToolError::validation(format!(
                "invalid environment variable name: {:?}",
                key.as_ref()
            )));
        }
        if entries.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let needs_newline = match fs::read(&self.path) {
            Ok(existing) => existing.last().is_some_and(|b| *b != b'\n'),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let mut buf = String::new();
        if needs_newline {
            buf.push('\n');
        }
        for (key, value) in entries {
            buf.push_str(key.as_ref());
            buf.push('=');
            buf.push_str(&format_value(value.as_ref()));
            buf.push('\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        debug!(path = %self.path.display(), count = entries.len(), "appended env entries");
        Ok(entries.len())
    }
}

/// Render a value for the right-hand side of `KEY=value`.
///
/// Values containing whitespace or `#` are double-quoted with `\` and `"`
/// escaped; everything else is written verbatim.
pub fn format_value(value: &str) -> String {
    if !value.chars().any(|c| c.is_whitespace() || c == '#') {
        return value.to_owned();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
