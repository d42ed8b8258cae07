//! Subagent run records.
//!
//! A [`SubagentRunRecord`] describes one delegated execution from spawn to
//! eviction. Records are mutated in place with a [`RunPatch`]: only the fields
//! a patch carries overwrite the stored values.

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryContext;
use crate::ids::RunId;

/// What happens to the child session once the run has been announced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// Delete the run (and its transcript) right after announcing.
    Delete,
    /// Keep it until the sweeper archives it.
    #[default]
    Keep,
}

/// Terminal status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Finished normally.
    Ok,
    /// Failed with an error.
    Error,
    /// Exceeded its time budget.
    Timeout,
    /// Ended without a known status.
    Unknown,
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Terminal status.
    pub status: RunStatus,
    /// Error description, for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    /// Successful outcome.
    pub fn ok() -> Self {
        Self {
            status: RunStatus::Ok,
            error: None,
        }
    }

    /// Failed outcome with a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            error: Some(message.into()),
        }
    }

    /// Timed-out outcome.
    pub fn timeout() -> Self {
        Self {
            status: RunStatus::Timeout,
            error: None,
        }
    }
}

/// One delegated subagent execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentRunRecord {
    /// Unique run ID.
    pub run_id: RunId,
    /// Session the child agent runs in.
    pub child_session_key: String,
    /// Session that delegated the work.
    pub requester_session_key: String,
    /// Where the requester can be reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_origin: Option<DeliveryContext>,
    /// Requester label for display.
    #[serde(default)]
    pub requester_display_key: String,
    /// Task label.
    pub task: String,
    /// Cleanup policy after announce.
    #[serde(default)]
    pub cleanup: CleanupPolicy,
    /// Optional human label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Creation time (epoch ms).
    pub created_at: i64,
    /// Start time (epoch ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// End time (epoch ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    /// How the run ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    /// When the sweeper may evict the record (epoch ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_at_ms: Option<i64>,
    /// When post-announce cleanup finished (epoch ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_completed_at: Option<i64>,
    /// Set once announce/cleanup has been claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_handled: Option<bool>,
}

impl SubagentRunRecord {
    /// Minimal record; every optional field empty.
    pub fn new(
        run_id: impl Into<RunId>,
        child_session_key: impl Into<String>,
        requester_session_key: impl Into<String>,
        task: impl Into<String>,
        created_at: i64,
    ) -> Self {
        let requester_session_key = requester_session_key.into();
        Self {
            run_id: run_id.into(),
            child_session_key: child_session_key.into(),
            requester_display_key: requester_session_key.clone(),
            requester_session_key,
            requester_origin: None,
            task: task.into(),
            cleanup: CleanupPolicy::Keep,
            label: None,
            created_at,
            started_at: None,
            ended_at: None,
            outcome: None,
            archive_at_ms: None,
            cleanup_completed_at: None,
            cleanup_handled: None,
        }
    }

    /// Whether the run has not ended yet.
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether the sweeper may evict the record at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.archive_at_ms.is_some_and(|at| at <= now_ms)
    }

    /// Label shown to users: the explicit label, else the task.
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.task)
    }

    /// Wall-clock runtime in ms, once ended.
    pub fn runtime_ms(&self) -> Option<i64> {
        self.ended_at.map(|end| self.elapsed_until(end))
    }

    /// Runtime in ms up to `endedAt`, or up to `now` while still running.
    /// Never negative, and saturates on out-of-range timestamps.
    pub fn elapsed_ms(&self, now: i64) -> i64 {
        self.elapsed_until(self.ended_at.unwrap_or(now))
    }

    fn elapsed_until(&self, end: i64) -> i64 {
        let start = self.started_at.unwrap_or(self.created_at);
        end.saturating_sub(start).max(0)
    }
}

/// Partial update for a [`SubagentRunRecord`]. `None` fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPatch {
    /// New child session key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_session_key: Option<String>,
    /// New requester origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_origin: Option<DeliveryContext>,
    /// New display key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_display_key: Option<String>,
    /// New task label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// New cleanup policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupPolicy>,
    /// New label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// End time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    /// Outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    /// Archive deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_at_ms: Option<i64>,
    /// Cleanup completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_completed_at: Option<i64>,
    /// Cleanup claim flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_handled: Option<bool>,
}

impl RunPatch {
    /// Patch marking the run as ended.
    pub fn ended(ended_at: i64, outcome: RunOutcome) -> Self {
        Self {
            ended_at: Some(ended_at),
            outcome: Some(outcome),
            ..Self::default()
        }
    }

    /// Overwrite the fields this patch carries.
    pub fn apply(self, record: &mut SubagentRunRecord) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if self.$field.is_some() { record.$field = self.$field; })*
            };
        }
        if let Some(v) = self.child_session_key {
            record.child_session_key = v;
        }
        if let Some(v) = self.requester_display_key {
            record.requester_display_key = v;
        }
        if let Some(v) = self.task {
            record.task = v;
        }
        if let Some(v) = self.cleanup {
            record.cleanup = v;
        }
        merge!(
            requester_origin,
            label,
            started_at,
            ended_at,
            outcome,
            archive_at_ms,
            cleanup_completed_at,
            cleanup_handled,
        );
    }
}
