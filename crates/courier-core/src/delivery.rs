//! Delivery addressing for asynchronous notifications.
//!
//! A [`DeliveryContext`] says where a late notification (such as a subagent
//! completion announce) should be routed: which channel, which destination on
//! that channel, which account, and optionally which thread.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Thread identifier. Some channels use numeric thread IDs, others strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThreadId {
    /// Numeric thread ID.
    Number(i64),
    /// Opaque string thread ID.
    Text(String),
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Normalized destination descriptor for outbound notifications.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryContext {
    /// Channel name (lowercased), e.g. `slack`, `web`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Destination on the channel (user, room, conversation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Account the message is sent from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Thread within the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
}

fn clean(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

fn clean_thread(thread: Option<&ThreadId>) -> Option<ThreadId> {
    match thread? {
        ThreadId::Number(n) => Some(ThreadId::Number(*n)),
        ThreadId::Text(s) => clean(Some(s)).map(ThreadId::Text),
    }
}

impl DeliveryContext {
    /// Convenience constructor for a channel + destination pair.
    pub fn new(channel: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            to: Some(to.into()),
            account_id: None,
            thread_id: None,
        }
    }

    /// Builder: set the account.
    #[must_use]
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Builder: set the thread.
    #[must_use]
    pub fn with_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Whether every field is absent.
    pub fn is_empty(&self) -> bool {
        self.channel.is_none()
            && self.to.is_none()
            && self.account_id.is_none()
            && self.thread_id.is_none()
    }

    /// Trim every field, lowercase the channel, and drop blank values.
    ///
    /// Returns `None` when nothing addressable is left.
    pub fn normalize(&self) -> Option<Self> {
        let normalized = Self {
            channel: clean(self.channel.as_deref()).map(|c| c.to_lowercase()),
            to: clean(self.to.as_deref()),
            account_id: clean(self.account_id.as_deref()),
            thread_id: clean_thread(self.thread_id.as_ref()),
        };
        (!normalized.is_empty()).then_some(normalized)
    }

    /// Field-wise merge: values from `primary` win, gaps are filled from
    /// `fallback`. Both sides are normalized first.
    pub fn merge(primary: Option<&Self>, fallback: Option<&Self>) -> Option<Self> {
        let primary = primary.and_then(Self::normalize);
        let fallback = fallback.and_then(Self::normalize);
        match (primary, fallback) {
            (None, None) => None,
            (Some(p), None) => Some(p),
            (None, Some(f)) => Some(f),
            (Some(p), Some(f)) => Some(Self {
                channel: p.channel.or(f.channel),
                to: p.to.or(f.to),
                account_id: p.account_id.or(f.account_id),
                thread_id: p.thread_id.or(f.thread_id),
            }),
        }
    }

    /// Stable routing key `channel|to|account|thread`.
    ///
    /// `None` unless both channel and destination are present after
    /// normalization. Absent account/thread produce empty segments.
    pub fn key(&self) -> Option<String> {
        let ctx = self.normalize()?;
        let channel = ctx.channel?;
        let to = ctx.to?;
        let account = ctx.account_id.unwrap_or_default();
        let thread = ctx.thread_id.map(|t| t.to_string()).unwrap_or_default();
        Some(format!("{channel}|{to}|{account}|{thread}"))
    }
}
