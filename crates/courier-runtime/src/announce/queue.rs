//! Per-session announce queue.
//!
//! Items are queued under a key (the requester session) and delivered by one
//! drain task per key, strictly one at a time and in order. Delivery waits for
//! a quiet period of `debounceMs` after the latest enqueue, so bursts of
//! completions are grouped instead of interrupting the requester repeatedly.
//!
//! The per-key state is created on first enqueue and removed by the drain
//! task, under the same lock, once nothing is left to send.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::DeliveryContext;
use courier_settings::{AnnounceMode, AnnounceSettings, DropPolicy, RetrySettings};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, warn};

use crate::errors::DeliveryError;

const MIN_WAIT: Duration = Duration::from_millis(1);
const SUMMARY_MAX_CHARS: usize = 160;

/// One queued announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnounceQueueItem {
    /// Prompt to inject into the requester session.
    pub prompt: String,
    /// One-line summary, used in overflow digests.
    pub summary_line: Option<String>,
    /// Wall-clock enqueue time (epoch ms).
    pub enqueued_at: i64,
    /// Requester session the prompt is for.
    pub session_key: String,
    /// Where the requester is reachable.
    pub origin: Option<DeliveryContext>,
    /// Routing key of `origin`, filled in on enqueue.
    pub origin_key: Option<String>,
}

impl AnnounceQueueItem {
    /// Item with no summary and no origin.
    pub fn new(session_key: impl Into<String>, prompt: impl Into<String>, enqueued_at: i64) -> Self {
        Self {
            prompt: prompt.into(),
            summary_line: None,
            enqueued_at,
            session_key: session_key.into(),
            origin: None,
            origin_key: None,
        }
    }

    /// Builder: set the summary line.
    #[must_use]
    pub fn with_summary(mut self, line: impl Into<String>) -> Self {
        self.summary_line = Some(line.into());
        self
    }

    /// Builder: set the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: Option<DeliveryContext>) -> Self {
        self.origin = origin;
        self
    }

    /// Summary line, falling back to the first line of the prompt.
    pub fn summary(&self) -> String {
        let line = self
            .summary_line
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .or_else(|| self.prompt.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("(empty announcement)");
        if line.chars().count() <= SUMMARY_MAX_CHARS {
            return line.to_owned();
        }
        let mut short: String = line.chars().take(SUMMARY_MAX_CHARS - 1).collect();
        short.push('…');
        short
    }
}

/// Delivers one announcement.
#[async_trait]
pub trait AnnounceSender: Send + Sync {
    /// Deliver `item`. Errors are logged by the queue, which then moves on.
    async fn send(&self, item: &AnnounceQueueItem) -> Result<(), DeliveryError>;
}

/// Read-only view of one key's queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Items waiting to be delivered, oldest first.
    pub pending: Vec<AnnounceQueueItem>,
    /// Whether a drain task owns the key.
    pub draining: bool,
    /// Items rejected or evicted because of the cap.
    pub dropped_count: usize,
    /// Summary lines of evicted items not yet reported.
    pub summary_lines: Vec<String>,
    /// Grouping mode.
    pub mode: AnnounceMode,
    /// Quiet period in ms.
    pub debounce_ms: u64,
    /// Pending item cap.
    pub cap: usize,
    /// Overflow policy.
    pub drop_policy: DropPolicy,
}

struct KeyState {
    items: VecDeque<AnnounceQueueItem>,
    draining: bool,
    last_enqueued: Instant,
    mode: AnnounceMode,
    debounce: Duration,
    cap: usize,
    drop_policy: DropPolicy,
    retry: RetrySettings,
    dropped_count: usize,
    summary_lines: Vec<String>,
    last_origin: Option<DeliveryContext>,
    sender: Arc<dyn AnnounceSender>,
}

enum Step {
    Idle,
    Wait(Duration),
    Deliver {
        item: AnnounceQueueItem,
        sender: Arc<dyn AnnounceSender>,
        retry: RetrySettings,
    },
}

impl KeyState {
    fn new(settings: &AnnounceSettings, sender: Arc<dyn AnnounceSender>) -> Self {
        let mut state = Self {
            items: VecDeque::new(),
            draining: false,
            last_enqueued: Instant::now(),
            mode: AnnounceMode::default(),
            debounce: Duration::ZERO,
            cap: 1,
            drop_policy: DropPolicy::default(),
            retry: RetrySettings::default(),
            dropped_count: 0,
            summary_lines: Vec::new(),
            last_origin: None,
            sender: Arc::clone(&sender),
        };
        state.configure(settings, sender);
        state
    }

    fn configure(&mut self, settings: &AnnounceSettings, sender: Arc<dyn AnnounceSender>) {
        self.mode = settings.mode;
        self.debounce = Duration::from_millis(settings.debounce_ms);
        self.cap = settings.cap.max(1);
        self.drop_policy = settings.drop_policy;
        self.retry = settings.retry.clone();
        self.sender = sender;
    }

    /// Apply the drop policy and append. Returns `false` if `item` was
    /// rejected.
    fn admit(&mut self, key: &str, item: AnnounceQueueItem) -> bool {
        match self.drop_policy {
            DropPolicy::Keep => {}
            DropPolicy::New if self.items.len() >= self.cap => {
                self.dropped_count += 1;
                debug!(key, dropped = self.dropped_count, "announce queue full, rejecting new item");
                return false;
            }
            DropPolicy::New => {}
            DropPolicy::Drop | DropPolicy::Summarize => {
                while self.items.len() >= self.cap {
                    let Some(evicted) = self.items.pop_front() else {
                        break;
                    };
                    self.dropped_count += 1;
                    if self.drop_policy == DropPolicy::Summarize {
                        self.summary_lines.push(evicted.summary());
                    }
                    debug!(key, dropped = self.dropped_count, "announce queue full, evicted oldest item");
                }
            }
        }
        if item.origin.is_some() {
            self.last_origin.clone_from(&item.origin);
        }
        self.items.push_back(item);
        true
    }

    fn has_work(&self) -> bool {
        !self.items.is_empty() || !self.summary_lines.is_empty()
    }

    fn next_step(&mut self, key: &str) -> Step {
        if !self.has_work() {
            return Step::Idle;
        }
        if self.last_enqueued.elapsed() < self.debounce {
            return Step::Wait((self.debounce / 2).max(MIN_WAIT));
        }
        match self.next_unit(key) {
            Some(item) => Step::Deliver {
                item,
                sender: Arc::clone(&self.sender),
                retry: self.retry.clone(),
            },
            None => Step::Idle,
        }
    }

    fn next_unit(&mut self, key: &str) -> Option<AnnounceQueueItem> {
        if !self.summary_lines.is_empty() {
            return Some(self.take_digest(key));
        }
        let first = self.items.pop_front()?;
        if self.mode == AnnounceMode::Followup {
            return Some(first);
        }

        let mut group = vec![first];
        let mut rest = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if item.origin_key == group[0].origin_key {
                group.push(item);
            } else {
                rest.push_back(item);
            }
        }
        self.items = rest;
        Some(combine(key, group))
    }

    fn take_digest(&mut self, key: &str) -> AnnounceQueueItem {
        let lines = std::mem::take(&mut self.summary_lines);
        self.dropped_count = 0;
        let n = lines.len();
        let mut prompt = format!(
            "[Queue overflow] Dropped {n} announcement{} due to cap.\nSummary:",
            if n == 1 { "" } else { "s" }
        );
        for line in &lines {
            let _ = write!(prompt, "\n- {line}");
        }
        let mut digest = AnnounceQueueItem::new(key, prompt, courier_core::now_ms())
            .with_summary(format!("{n} dropped announcements"))
            .with_origin(self.last_origin.clone());
        digest.origin_key = digest.origin.as_ref().and_then(DeliveryContext::key);
        digest
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.items.iter().cloned().collect(),
            draining: self.draining,
            dropped_count: self.dropped_count,
            summary_lines: self.summary_lines.clone(),
            mode: self.mode,
            debounce_ms: u64::try_from(self.debounce.as_millis()).unwrap_or(u64::MAX),
            cap: self.cap,
            drop_policy: self.drop_policy,
        }
    }
}

fn combine(key: &str, mut group: Vec<AnnounceQueueItem>) -> AnnounceQueueItem {
    if group.len() == 1 {
        if let Some(only) = group.pop() {
            return only;
        }
    }
    let mut prompt = String::from("[Queued announce messages while agent was busy]");
    for (i, item) in group.iter().enumerate() {
        let _ = write!(prompt, "\n\n---\nQueued #{}\n{}", i + 1, item.prompt.trim());
    }
    let n = group.len();
    let last = group.pop();
    AnnounceQueueItem {
        prompt,
        summary_line: Some(format!("{n} queued announcements")),
        enqueued_at: last.as_ref().map_or_else(courier_core::now_ms, |l| l.enqueued_at),
        session_key: key.to_owned(),
        origin: last.as_ref().and_then(|l| l.origin.clone()),
        origin_key: last.and_then(|l| l.origin_key),
    }
}

/// Keyed announce queues with one drain task per key.
#[derive(Clone, Default)]
pub struct AnnounceQueue {
    states: Arc<Mutex<HashMap<String, KeyState>>>,
}

impl AnnounceQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `item` under `key` and make sure a drain task is running.
    ///
    /// `settings` and `sender` are applied to the key's state on every call,
    /// so the latest values win. Returns `false` if the drop policy rejected
    /// the item.
    pub fn enqueue(
        &self,
        key: &str,
        mut item: AnnounceQueueItem,
        settings: &AnnounceSettings,
        sender: Arc<dyn AnnounceSender>,
    ) -> bool {
        item.origin = item.origin.as_ref().and_then(DeliveryContext::normalize);
        item.origin_key = item.origin.as_ref().and_then(DeliveryContext::key);

        let mut states = self.states.lock();
        let state = match states.entry(key.to_owned()) {
            Entry::Occupied(entry) => {
                let state = entry.into_mut();
                state.configure(settings, sender);
                state
            }
            Entry::Vacant(entry) => entry.insert(KeyState::new(settings, sender)),
        };
        state.last_enqueued = Instant::now();
        let accepted = state.admit(key, item);

        if !state.draining && state.has_work() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    state.draining = true;
                    let span = info_span!("announce_drain", key);
                    let _ = handle.spawn(drain(Arc::clone(&self.states), key.to_owned()).instrument(span));
                }
                Err(_) => warn!(key, "no tokio runtime, announce drain not scheduled"),
            }
        }
        accepted
    }

    /// Current state of one key, if it has any.
    pub fn snapshot(&self, key: &str) -> Option<QueueSnapshot> {
        self.states.lock().get(key).map(KeyState::snapshot)
    }

    /// Number of keys with queued state.
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    /// Whether no key has queued state.
    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}

async fn drain(states: Arc<Mutex<HashMap<String, KeyState>>>, key: String) {
    loop {
        let step = {
            let mut map = states.lock();
            let step = match map.get_mut(&key) {
                Some(state) => state.next_step(&key),
                None => return,
            };
            if matches!(step, Step::Idle) {
                let _ = map.remove(&key);
            }
            step
        };

        match step {
            Step::Idle => {
                debug!(%key, "announce queue drained");
                return;
            }
            Step::Wait(delay) => tokio::time::sleep(delay).await,
            Step::Deliver {
                item,
                sender,
                retry,
            } => deliver(&key, &item, sender.as_ref(), &retry).await,
        }
    }
}

async fn deliver(key: &str, item: &AnnounceQueueItem, sender: &dyn AnnounceSender, retry: &RetrySettings) {
    let attempts = retry.max_attempts.max(1);
    for attempt in 1..=attempts {
        match sender.send(item).await {
            Ok(()) => {
                debug!(key, attempt, "announce delivered");
                return;
            }
            Err(error) if attempt < attempts => {
                warn!(key, attempt, %error, "announce delivery failed, retrying");
                let backoff = retry.backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Err(error) => {
                warn!(key, attempts, %error, "announce delivery failed, dropping item");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<AnnounceQueueItem>>,
        fail_on: Option<String>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingSender {
        fn prompts(&self) -> Vec<String> {
            self.sent.lock().iter().map(|i| i.prompt.clone()).collect()
        }
    }

    #[async_trait]
    impl AnnounceSender for RecordingSender {
        async fn send(&self, item: &AnnounceQueueItem) -> Result<(), DeliveryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(item.prompt.as_str()) {
                return Err(DeliveryError::Failed("boom".into()));
            }
            self.sent.lock().push(item.clone());
            Ok(())
        }
    }

    fn settings(debounce_ms: u64, cap: usize, drop_policy: DropPolicy) -> AnnounceSettings {
        AnnounceSettings {
            debounce_ms,
            cap,
            drop_policy,
            ..AnnounceSettings::default()
        }
    }

    fn item(prompt: &str) -> AnnounceQueueItem {
        AnnounceQueueItem::new("main", prompt, 0).with_summary(prompt.to_lowercase())
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_fifo_once_each() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender::default());
        let s = settings(100, 20, DropPolicy::Summarize);
        for p in ["A", "B", "C"] {
            assert!(queue.enqueue("main", item(p), &s, sender.clone()));
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sender.prompts(), ["A", "B", "C"]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_flight_per_key() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender {
            delay: Duration::from_millis(50),
            ..RecordingSender::default()
        });
        let s = settings(0, 20, DropPolicy::Keep);
        for p in ["A", "B", "C", "D"] {
            let _ = queue.enqueue("main", item(p), &s, sender.clone());
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sender.prompts(), ["A", "B", "C", "D"]);
        assert_eq!(sender.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_policy_rejects_incoming_at_cap() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender::default());
        let s = settings(10_000, 1, DropPolicy::New);

        assert!(queue.enqueue("main", item("A"), &s, sender.clone()));
        assert!(!queue.enqueue("main", item("B"), &s, sender.clone()));

        let snap = queue.snapshot("main").unwrap();
        assert_eq!(snap.pending.len(), 1);
        assert_eq!(snap.pending[0].prompt, "A");
        assert_eq!(snap.dropped_count, 1);
        assert!(snap.draining);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(sender.prompts(), ["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn drained_key_forgets_dropped_count() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender::default());
        for policy in [DropPolicy::New, DropPolicy::Drop] {
            let key = format!("{policy:?}");
            let s = settings(100, 1, policy);
            assert!(queue.enqueue(&key, item("A"), &s, sender.clone()));
            let accepted = queue.enqueue(&key, item("B"), &s, sender.clone());
            assert_eq!(accepted, policy == DropPolicy::Drop);
            assert_eq!(queue.snapshot(&key).unwrap().dropped_count, 1);
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(queue.snapshot("New").is_none());
        assert!(queue.snapshot("Drop").is_none());
        assert!(queue.is_empty());
        let mut prompts = sender.prompts();
        prompts.sort();
        assert_eq!(prompts, ["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_policy_evicts_oldest() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender::default());
        let s = settings(10_000, 2, DropPolicy::Drop);
        for p in ["A", "B", "C"] {
            assert!(queue.enqueue("main", item(p), &s, sender.clone()));
        }

        let snap = queue.snapshot("main").unwrap();
        let pending: Vec<&str> = snap.pending.iter().map(|i| i.prompt.as_str()).collect();
        assert_eq!(pending, ["B", "C"]);
        assert_eq!(snap.dropped_count, 1);
        assert!(snap.summary_lines.is_empty());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(sender.prompts(), ["B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn summarize_emits_digest_before_survivors() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender::default());
        let s = settings(100, 2, DropPolicy::Summarize);
        for p in ["A", "B", "C", "D"] {
            let _ = queue.enqueue("main", item(p), &s, sender.clone());
        }
        assert_eq!(queue.snapshot("main").unwrap().summary_lines, ["a", "b"]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let prompts = sender.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].starts_with("[Queue overflow] Dropped 2 announcements"));
        assert!(prompts[0].contains("\n- a\n- b"));
        assert_eq!(&prompts[1..], ["C", "D"]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_waits_for_quiet_period() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender::default());
        let s = settings(1000, 20, DropPolicy::Summarize);

        let _ = queue.enqueue("main", item("A"), &s, sender.clone());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(sender.prompts().is_empty());

        let _ = queue.enqueue("main", item("B"), &s, sender.clone());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(sender.prompts().is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(sender.prompts(), ["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_is_skipped() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender {
            fail_on: Some("A".into()),
            ..RecordingSender::default()
        });
        let s = settings(0, 20, DropPolicy::Summarize);
        for p in ["A", "B"] {
            let _ = queue.enqueue("main", item(p), &s, sender.clone());
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sender.prompts(), ["B"]);
        assert!(queue.is_empty());
    }

    struct FlakySender {
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl AnnounceSender for FlakySender {
        async fn send(&self, _item: &AnnounceQueueItem) -> Result<(), DeliveryError> {
            let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(DeliveryError::NoRoute {
                    session_key: "main".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retry_with_backoff() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(FlakySender {
            failures_left: AtomicU32::new(2),
            attempts: AtomicU32::new(0),
        });
        let mut s = settings(0, 20, DropPolicy::Summarize);
        s.retry = RetrySettings {
            max_attempts: 3,
            backoff_ms: 100,
        };
        let _ = queue.enqueue("main", item("A"), &s, sender.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn default_retry_is_single_attempt() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(FlakySender {
            failures_left: AtomicU32::new(5),
            attempts: AtomicU32::new(0),
        });
        let _ = queue.enqueue("main", item("A"), &settings(0, 20, DropPolicy::Summarize), sender.clone());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_mode_combines_same_origin() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender::default());
        let s = AnnounceSettings {
            mode: AnnounceMode::Collect,
            ..settings(100, 20, DropPolicy::Summarize)
        };
        let slack = Some(DeliveryContext::new("Slack", "C1"));
        let discord = Some(DeliveryContext::new("discord", "general"));
        let _ = queue.enqueue("main", item("A").with_origin(slack.clone()), &s, sender.clone());
        let _ = queue.enqueue("main", item("X").with_origin(discord), &s, sender.clone());
        let _ = queue.enqueue("main", item("B").with_origin(slack), &s, sender.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].prompt.starts_with("[Queued announce messages while agent was busy]"));
        assert!(sent[0].prompt.contains("Queued #1\nA"));
        assert!(sent[0].prompt.contains("Queued #2\nB"));
        assert_eq!(sent[0].origin_key.as_deref(), Some("slack|C1||"));
        assert_eq!(sent[1].prompt, "X");
    }

    struct ReentrantSender {
        queue: AnnounceQueue,
        inner: Arc<RecordingSender>,
        settings: AnnounceSettings,
        fired: AtomicUsize,
    }

    #[async_trait]
    impl AnnounceSender for ReentrantSender {
        async fn send(&self, item: &AnnounceQueueItem) -> Result<(), DeliveryError> {
            if self.fired.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = self
                    .queue
                    .enqueue("main", super::tests::item("follow"), &self.settings, self.inner.clone());
            }
            self.inner.send(item).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reentrant_enqueue_does_not_double_drain() {
        let queue = AnnounceQueue::new();
        let inner = Arc::new(RecordingSender {
            delay: Duration::from_millis(10),
            ..RecordingSender::default()
        });
        let s = settings(50, 20, DropPolicy::Summarize);
        let outer = Arc::new(ReentrantSender {
            queue: queue.clone(),
            inner: Arc::clone(&inner),
            settings: s.clone(),
            fired: AtomicUsize::new(0),
        });

        let _ = queue.enqueue("main", item("A"), &s, outer);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(inner.prompts(), ["A", "follow"]);
        assert_eq!(inner.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let queue = AnnounceQueue::new();
        let sender = Arc::new(RecordingSender::default());
        let s = settings(10_000, 20, DropPolicy::Summarize);
        let _ = queue.enqueue("a", item("1"), &s, sender.clone());
        let _ = queue.enqueue("b", item("2"), &s, sender.clone());
        assert_eq!(queue.len(), 2);
        assert!(queue.snapshot("c").is_none());
    }

    #[test]
    fn summary_falls_back_to_first_prompt_line() {
        let it = AnnounceQueueItem::new("main", "\n  first line \nsecond", 0);
        assert_eq!(it.summary(), "first line");
        let long = AnnounceQueueItem::new("main", "x".repeat(500), 0);
        assert_eq!(long.summary().chars().count(), SUMMARY_MAX_CHARS);
    }
}
