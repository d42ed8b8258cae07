//! From finished run to queued announcement.

use std::sync::Arc;

use async_trait::async_trait;
use courier_bus::MessageBus;
use courier_core::format::format_duration_short;
use courier_core::messages::SubagentAnnounce;
use courier_core::{Message, RunId, RunOutcome, RunPatch, RunStatus, SubagentRunRecord, now_ms};
use courier_settings::{AnnounceSettings, CourierSettings};
use tracing::{debug, info};

use crate::announce::queue::{AnnounceQueue, AnnounceQueueItem, AnnounceSender};
use crate::errors::DeliveryError;
use crate::subagents::registry::SubagentRegistry;

/// Human phrase for how a run ended.
pub fn status_label(outcome: Option<&RunOutcome>) -> String {
    match outcome.map(|o| (o.status, o.error.as_deref())) {
        Some((RunStatus::Ok, _)) => "completed successfully".into(),
        Some((RunStatus::Timeout, _)) => "timed out".into(),
        Some((RunStatus::Error, error)) => {
            format!("failed: {}", error.map(str::trim).filter(|e| !e.is_empty()).unwrap_or("unknown error"))
        }
        Some((RunStatus::Unknown, _)) | None => "finished with unknown status".into(),
    }
}

/// `Stats: runtime 1m5s | session <child>`; an unfinished run counts up to
/// `now`.
pub fn build_stats_line(record: &SubagentRunRecord, now: i64) -> String {
    format!(
        "Stats: runtime {} | session {}",
        format_duration_short(record.elapsed_ms(now)),
        record.child_session_key
    )
}

/// Prompt injected into the requester session when a run finishes.
pub fn build_announce_prompt(record: &SubagentRunRecord, findings: &str) -> String {
    let findings = match findings.trim() {
        "" => "(no output)",
        f => f,
    };
    let stats = build_stats_line(record, record.ended_at.unwrap_or_else(now_ms));
    format!(
        "A background task \"{label}\" just {status}.\n\n\
         Findings:\n{findings}\n\n\
         {stats}\n\n\
         Summarize this for the user in one or two sentences, as part of the conversation. \
         Leave out the stats and do not mention that the work ran in the background.",
        label = record.display_label(),
        status = status_label(record.outcome.as_ref()),
    )
}

fn summary_line(record: &SubagentRunRecord) -> String {
    format!("{}: {}", record.display_label(), status_label(record.outcome.as_ref()))
}

/// Records run lifecycle and announces completions to the requester.
pub struct SubagentAnnouncer {
    registry: SubagentRegistry,
    queue: AnnounceQueue,
    sender: Arc<dyn AnnounceSender>,
    announce: AnnounceSettings,
    archive_after_ms: Option<i64>,
}

impl SubagentAnnouncer {
    /// Announcer over explicit components.
    pub fn new(
        registry: SubagentRegistry,
        queue: AnnounceQueue,
        sender: Arc<dyn AnnounceSender>,
        settings: &CourierSettings,
    ) -> Self {
        Self {
            registry,
            queue,
            sender,
            announce: settings.announce.clone(),
            archive_after_ms: settings.subagents.archive_after_ms(),
        }
    }

    /// The run registry.
    pub fn registry(&self) -> &SubagentRegistry {
        &self.registry
    }

    /// The announce queue.
    pub fn queue(&self) -> &AnnounceQueue {
        &self.queue
    }

    /// Register a freshly spawned run, filling in `startedAt` and the archive
    /// deadline when absent.
    pub fn record_spawn(&self, mut record: SubagentRunRecord) -> SubagentRunRecord {
        if record.started_at.is_none() {
            record.started_at = Some(record.created_at);
        }
        if record.archive_at_ms.is_none() {
            record.archive_at_ms = self
                .archive_after_ms
                .map(|ms| record.created_at.saturating_add(ms));
        }
        info!(run_id = %record.run_id, requester = %record.requester_session_key, "subagent run spawned");
        self.registry.register_run(record.clone());
        record
    }

    /// Mark a run as ended. Returns `false` for an unknown run.
    pub fn record_completion(&self, run_id: &RunId, outcome: RunOutcome, ended_at: i64) -> bool {
        debug!(%run_id, status = ?outcome.status, "subagent run ended");
        self.registry.update_run(run_id, RunPatch::ended(ended_at, outcome))
    }

    /// Queue the completion announcement for `run_id` and apply its cleanup
    /// policy.
    ///
    /// Only the first call for a run does anything; later calls (and calls
    /// for unknown runs) return `false`.
    pub async fn announce_completion(&self, run_id: &RunId, findings: &str) -> bool {
        if !self.registry.begin_cleanup(run_id) {
            debug!(%run_id, "announce skipped, cleanup already claimed or run unknown");
            return false;
        }
        let Some(record) = self.registry.get_run(run_id) else {
            return false;
        };

        let now = now_ms();
        let item = AnnounceQueueItem::new(
            &record.requester_session_key,
            build_announce_prompt(&record, findings),
            now,
        )
        .with_summary(summary_line(&record))
        .with_origin(record.requester_origin.clone());

        let queued = self.queue.enqueue(
            &record.requester_session_key,
            item,
            &self.announce,
            Arc::clone(&self.sender),
        );
        let _ = self.registry.finalize_cleanup(run_id, now).await;
        info!(%run_id, requester = %record.requester_session_key, queued, "subagent completion announced");
        queued
    }
}

/// [`AnnounceSender`] publishing `subagent-announce` on the bus.
pub struct BusAnnounceSender {
    bus: Arc<MessageBus>,
}

impl BusAnnounceSender {
    /// Sender publishing on `bus`.
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl AnnounceSender for BusAnnounceSender {
    async fn send(&self, item: &AnnounceQueueItem) -> Result<(), DeliveryError> {
        let outcome = self.bus.publish(Message::SubagentAnnounce(SubagentAnnounce {
            session_key: item.session_key.clone(),
            origin: item.origin.clone(),
            prompt: item.prompt.clone(),
        }));
        if outcome.delivered == 0 {
            return Err(DeliveryError::NoRoute {
                session_key: item.session_key.clone(),
            });
        }
        Ok(())
    }
}
