//! Settings type definitions.
//!
//! All types use camelCase field names and `#[serde(default)]`, so partial
//! JSON files deserialize with production defaults filling the gaps.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// Subagent registry and sweeper.
    pub subagents: SubagentSettings,
    /// Announce queue defaults.
    pub announce: AnnounceSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

/// Subagent registry settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubagentSettings {
    /// Directory holding `registry.json`. Empty means `~/.courier/subagents`.
    pub dir: String,
    /// Minutes after creation before a run becomes sweepable (0 = never).
    pub archive_after_minutes: u64,
    /// Sweeper tick interval.
    pub sweep_interval_ms: u64,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            dir: String::new(),
            archive_after_minutes: 60,
            sweep_interval_ms: 60_000,
        }
    }
}

impl SubagentSettings {
    /// Resolved registry directory.
    pub fn resolved_dir(&self) -> PathBuf {
        if self.dir.trim().is_empty() {
            courier_home().join("subagents")
        } else {
            PathBuf::from(self.dir.trim())
        }
    }

    /// Archive delay in milliseconds, if archiving is enabled.
    pub fn archive_after_ms(&self) -> Option<i64> {
        (self.archive_after_minutes > 0)
            .then(|| i64::try_from(self.archive_after_minutes.saturating_mul(60_000)).unwrap_or(i64::MAX))
    }
}

/// How queued announce items are grouped for delivery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnounceMode {
    /// One delivery per item.
    #[default]
    Followup,
    /// Items routed to the same origin are combined into one delivery.
    Collect,
}

/// What to do when a queue would exceed its cap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// No bound; the cap is advisory.
    Keep,
    /// Reject the incoming item.
    New,
    /// Evict the oldest pending item.
    Drop,
    /// Evict the oldest and deliver a digest of what was evicted.
    #[default]
    Summarize,
}

impl DropPolicy {
    /// Parse a policy name (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "keep" => Some(Self::Keep),
            "new" => Some(Self::New),
            "drop" | "old" => Some(Self::Drop),
            "summarize" | "summary" => Some(Self::Summarize),
            _ => None,
        }
    }
}

/// Bounded retry for failed announce deliveries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Total attempts per delivery (1 = no retry).
    pub max_attempts: u32,
    /// Delay before attempt `n` is `n * backoff_ms`.
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 500,
        }
    }
}

/// Per-key announce queue tunables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnounceSettings {
    /// Grouping mode.
    pub mode: AnnounceMode,
    /// Quiet period after the last enqueue before delivering.
    pub debounce_ms: u64,
    /// Pending item cap.
    pub cap: usize,
    /// Overflow policy.
    pub drop_policy: DropPolicy,
    /// Delivery retry.
    pub retry: RetrySettings,
}

impl Default for AnnounceSettings {
    fn default() -> Self {
        Self {
            mode: AnnounceMode::Followup,
            debounce_ms: 1000,
            cap: 20,
            drop_policy: DropPolicy::Summarize,
            retry: RetrySettings::default(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// `~/.courier`, falling back to `/tmp/.courier` without `HOME`.
pub fn courier_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".courier")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = CourierSettings::default();
        assert_eq!(s.announce.debounce_ms, 1000);
        assert_eq!(s.announce.cap, 20);
        assert_eq!(s.announce.drop_policy, DropPolicy::Summarize);
        assert_eq!(s.announce.mode, AnnounceMode::Followup);
        assert_eq!(s.announce.retry.max_attempts, 1);
        assert_eq!(s.subagents.sweep_interval_ms, 60_000);
        assert_eq!(s.logging.level, "warn");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: CourierSettings =
            serde_json::from_str(r#"{"announce": {"cap": 3, "dropPolicy": "new"}}"#).unwrap();
        assert_eq!(s.announce.cap, 3);
        assert_eq!(s.announce.drop_policy, DropPolicy::New);
        assert_eq!(s.announce.debounce_ms, 1000);
    }

    #[test]
    fn resolved_dir_prefers_explicit() {
        let mut s = SubagentSettings::default();
        assert!(s.resolved_dir().ends_with(".courier/subagents"));
        s.dir = " /var/lib/courier ".into();
        assert_eq!(s.resolved_dir(), PathBuf::from("/var/lib/courier"));
    }

    #[test]
    fn archive_disabled_at_zero() {
        let mut s = SubagentSettings::default();
        assert_eq!(s.archive_after_ms(), Some(3_600_000));
        s.archive_after_minutes = 0;
        assert_eq!(s.archive_after_ms(), None);
    }

    #[test]
    fn drop_policy_parse() {
        assert_eq!(DropPolicy::parse("KEEP"), Some(DropPolicy::Keep));
        assert_eq!(DropPolicy::parse("old"), Some(DropPolicy::Drop));
        assert_eq!(DropPolicy::parse(" summarize "), Some(DropPolicy::Summarize));
        assert_eq!(DropPolicy::parse("bogus"), None);
    }
}
