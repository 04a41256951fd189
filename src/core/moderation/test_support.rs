// In-memory implementations of the moderation ports for unit tests.

use super::bouncer::{Bouncer, BouncerDeps, TargetHandler};
use super::moderation_models::{
    AntiSpamProvider, AuthorNotice, BackendError, EscalationHandle, EscalationScore,
    FeedbackStatus, Job, NewEscalation, OriginMetadata, RequestArgs, RequestFields, ScoreReason,
    SpamSettings, SpamState, TargetKind, TargetRef, Verdict,
};
use super::moderation_ports::{
    AntiSpamBackend, AntiSpamClient, BouncerError, ClientError, ContentModerator, EscalationSink,
    JobQueue, RequestBuilder, TargetFieldStore,
};
use super::rate_limiter::KeyedRateLimiter;
use super::review_actions::ActionSet;
use super::target_locks::TargetLocks;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

// ============================================================================
// FIELD STORE
// ============================================================================

#[derive(Default)]
pub(crate) struct MemoryFieldStore {
    states: DashMap<TargetRef, SpamState>,
    origins: DashMap<TargetRef, (OriginMetadata, DateTime<Utc>)>,
    task_ids: DashMap<TargetRef, String>,
    authors: DashMap<TargetRef, u64>,
    fail_writes: AtomicBool,
}

impl MemoryFieldStore {
    pub fn state(&self, target: TargetRef) -> Option<SpamState> {
        self.states.get(&target).map(|s| *s)
    }

    pub fn record_author(&self, target: TargetRef, author_id: u64) {
        self.authors.insert(target, author_id);
    }

    /// Make every subsequent write fail with a storage error.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), BouncerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BouncerError::Storage("disk full".to_string()));
        }
        Ok(())
    }

    pub fn backdate_origin(&self, target: TargetRef, at: DateTime<Utc>) {
        if let Some(mut entry) = self.origins.get_mut(&target) {
            entry.1 = at;
        }
    }
}

#[async_trait]
impl TargetFieldStore for MemoryFieldStore {
    async fn spam_state(&self, target: TargetRef) -> Result<Option<SpamState>, BouncerError> {
        Ok(self.state(target))
    }

    async fn set_spam_state(
        &self,
        target: TargetRef,
        state: SpamState,
    ) -> Result<(), BouncerError> {
        self.check_writable()?;
        self.states.insert(target, state);
        Ok(())
    }

    async fn origin(&self, target: TargetRef) -> Result<OriginMetadata, BouncerError> {
        Ok(self
            .origins
            .get(&target)
            .map(|entry| entry.0.clone())
            .unwrap_or_default())
    }

    async fn store_origin(
        &self,
        target: TargetRef,
        origin: &OriginMetadata,
    ) -> Result<(), BouncerError> {
        self.check_writable()?;
        let mut entry = self
            .origins
            .entry(target)
            .or_insert_with(|| (OriginMetadata::default(), Utc::now()));
        entry.0 = origin.clone().or(entry.0.clone());
        entry.1 = Utc::now();
        Ok(())
    }

    async fn task_id(&self, target: TargetRef) -> Result<Option<String>, BouncerError> {
        Ok(self.task_ids.get(&target).map(|t| t.clone()))
    }

    async fn set_task_id(&self, target: TargetRef, task_id: &str) -> Result<(), BouncerError> {
        self.check_writable()?;
        self.task_ids.insert(target, task_id.to_string());
        Ok(())
    }

    async fn targets_in_state(
        &self,
        kind: TargetKind,
        state: SpamState,
    ) -> Result<Vec<u64>, BouncerError> {
        Ok(self
            .states
            .iter()
            .filter(|e| e.key().kind == kind && *e.value() == state)
            .map(|e| e.key().id)
            .collect())
    }

    async fn state_counts(
        &self,
        kind: TargetKind,
    ) -> Result<HashMap<SpamState, u64>, BouncerError> {
        let mut counts = HashMap::new();
        for entry in self.states.iter().filter(|e| e.key().kind == kind) {
            *counts.entry(*entry.value()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn delete_side_channel_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, BouncerError> {
        let before = self.origins.len();
        self.origins.retain(|_, (_, stored_at)| *stored_at >= cutoff);
        Ok((before - self.origins.len()) as u64)
    }

    async fn anonymize_ip(&self, author_id: u64, new_ip: &str) -> Result<u64, BouncerError> {
        let mut updated = 0;
        for mut entry in self.origins.iter_mut() {
            let owned = self
                .authors
                .get(entry.key())
                .is_some_and(|a| *a == author_id);
            if owned && entry.0.ip_address.is_some() {
                entry.0.ip_address = Some(new_ip.to_string());
                updated += 1;
            }
        }
        Ok(updated)
    }
}

// ============================================================================
// ESCALATIONS
// ============================================================================

#[derive(Default)]
pub(crate) struct MemoryEscalations {
    next_id: AtomicU64,
    open: DashMap<u64, NewEscalation>,
    scores: DashMap<u64, ScoreReason>,
}

impl MemoryEscalations {
    pub fn count(&self) -> usize {
        self.open.len()
    }

    /// Escalations in creation order.
    pub fn all(&self) -> Vec<NewEscalation> {
        let mut all: Vec<(u64, NewEscalation)> = self
            .open
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all.into_iter().map(|(_, e)| e).collect()
    }

    pub fn score_reasons(&self) -> Vec<ScoreReason> {
        let mut scores: Vec<(u64, ScoreReason)> =
            self.scores.iter().map(|e| (*e.key(), *e.value())).collect();
        scores.sort_by_key(|(id, _)| *id);
        scores.into_iter().map(|(_, r)| r).collect()
    }

    /// Pretend someone escalated `target` by hand.
    pub fn open_for(&self, target: TargetRef) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.insert(
            id,
            NewEscalation {
                target,
                topic_id: None,
                reason: super::moderation_models::EscalationReason::SpamDetected,
                payload: serde_json::json!({}),
                reviewable_by_moderator: true,
                actions: ActionSet::default(),
            },
        );
    }
}

#[async_trait]
impl EscalationSink for MemoryEscalations {
    async fn has_open_escalation(&self, target: TargetRef) -> Result<bool, BouncerError> {
        Ok(self.open.iter().any(|e| e.value().target == target))
    }

    async fn create_escalation(
        &self,
        escalation: NewEscalation,
    ) -> Result<EscalationHandle, BouncerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let target = escalation.target;
        self.open.insert(id, escalation);
        Ok(EscalationHandle { id, target })
    }

    async fn attach_score(
        &self,
        handle: &EscalationHandle,
        score: EscalationScore,
    ) -> Result<(), BouncerError> {
        self.scores.insert(handle.id, score.reason);
        Ok(())
    }
}

// ============================================================================
// QUEUE AND HOST ACTIONS
// ============================================================================

#[derive(Default)]
pub(crate) struct RecordingQueue {
    jobs: Mutex<Vec<Job>>,
}

impl RecordingQueue {
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: Job) -> Result<(), BouncerError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingModerator {
    events: Mutex<Vec<String>>,
}

impl RecordingModerator {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ContentModerator for RecordingModerator {
    async fn remove(&self, target: TargetRef) -> Result<(), BouncerError> {
        self.record(format!("remove {}", target));
        Ok(())
    }

    async fn restore(&self, target: TargetRef) -> Result<(), BouncerError> {
        self.record(format!("restore {}", target));
        Ok(())
    }

    async fn notify_author(&self, notice: AuthorNotice) -> Result<(), BouncerError> {
        self.record(format!("notify {} {:?}", notice.user_id, notice.kind));
        Ok(())
    }

    async fn publish_topic_removed(&self, topic_id: u64) -> Result<(), BouncerError> {
        self.record(format!("topic removed {}", topic_id));
        Ok(())
    }
}

// ============================================================================
// PROVIDER STUBS
// ============================================================================

/// Replays scripted verdicts; answers ham once the script runs out.
#[derive(Default)]
pub(crate) struct StubClient {
    script: Mutex<VecDeque<Verdict>>,
    fail: bool,
    calls: AtomicUsize,
    checked: Mutex<Vec<RequestArgs>>,
    feedback: Mutex<Vec<(FeedbackStatus, RequestArgs)>>,
}

impl StubClient {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn checked(&self) -> Vec<RequestArgs> {
        self.checked.lock().unwrap().clone()
    }

    pub fn feedback(&self) -> Vec<(FeedbackStatus, RequestArgs)> {
        self.feedback.lock().unwrap().clone()
    }
}

#[async_trait]
impl AntiSpamClient for StubClient {
    fn provider(&self) -> AntiSpamProvider {
        AntiSpamProvider::Akismet
    }

    async fn check(&self, args: &RequestArgs) -> Result<Verdict, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.checked.lock().unwrap().push(args.clone());
        if self.fail {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Verdict::Ham))
    }

    async fn submit_feedback(
        &self,
        status: FeedbackStatus,
        args: &RequestArgs,
    ) -> Result<bool, ClientError> {
        if self.fail {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        self.feedback.lock().unwrap().push((status, args.clone()));
        Ok(args.contains_key("content"))
    }
}

/// Flat, provider-neutral payload.
pub(crate) struct FieldsBuilder;

impl RequestBuilder for FieldsBuilder {
    fn for_check(&self, fields: &RequestFields) -> RequestArgs {
        let mut args = RequestArgs::new();
        args.insert("data_id", fields.target.data_id());
        args.insert("content_type", fields.content_type);
        args.insert("permalink", fields.permalink.clone());
        args.insert_opt("author", fields.author_handle.clone());
        args.insert_opt("content", fields.content.clone());
        args.insert_opt("user_ip", fields.origin.ip_address.clone());
        args.insert_opt("user_agent", fields.origin.user_agent.clone());
        args.insert_opt("referrer", fields.origin.referrer.clone());
        args.insert_opt("task_id", fields.task_id.clone());
        args
    }

    fn for_feedback(&self, fields: &RequestFields) -> RequestArgs {
        self.for_check(fields)
    }
}

pub(crate) struct StubBackend {
    configured: bool,
    client: Mutex<Option<Arc<StubClient>>>,
}

impl StubBackend {
    fn install(&self, client: Arc<StubClient>) {
        *self.client.lock().unwrap() = Some(client);
    }
}

#[async_trait]
impl AntiSpamBackend for StubBackend {
    async fn client(&self) -> Option<Arc<dyn AntiSpamClient>> {
        if !self.configured {
            return None;
        }
        let client = self.client.lock().unwrap().clone()?;
        Some(client as Arc<dyn AntiSpamClient>)
    }

    async fn request_builder_for(&self, _kind: TargetKind) -> Arc<dyn RequestBuilder> {
        Arc::new(FieldsBuilder)
    }

    async fn is_configured(&self) -> bool {
        self.configured
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// One set of fakes shared by every bouncer built from it.
pub(crate) struct Harness {
    pub settings: Arc<RwLock<SpamSettings>>,
    pub backend: Arc<StubBackend>,
    pub fields: Arc<MemoryFieldStore>,
    pub escalations: Arc<MemoryEscalations>,
    pub jobs: Arc<RecordingQueue>,
    pub content: Arc<RecordingModerator>,
    pub limiter: Arc<KeyedRateLimiter>,
    pub locks: Arc<TargetLocks>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_configured(true)
    }

    pub fn unconfigured() -> Self {
        Self::with_configured(false)
    }

    fn with_configured(configured: bool) -> Self {
        Self {
            settings: Arc::new(RwLock::new(SpamSettings::default())),
            backend: Arc::new(StubBackend {
                configured,
                client: Mutex::new(None),
            }),
            fields: Arc::new(MemoryFieldStore::default()),
            escalations: Arc::new(MemoryEscalations::default()),
            jobs: Arc::new(RecordingQueue::default()),
            content: Arc::new(RecordingModerator::default()),
            limiter: Arc::new(KeyedRateLimiter::for_backend_errors()),
            locks: Arc::new(TargetLocks::new()),
        }
    }

    pub fn deps(&self) -> BouncerDeps {
        BouncerDeps {
            settings: Arc::clone(&self.settings),
            anti_spam: self.backend.clone(),
            fields: self.fields.clone(),
            escalations: self.escalations.clone(),
            jobs: self.jobs.clone(),
            content: self.content.clone(),
            error_limiter: Arc::clone(&self.limiter),
            locks: Arc::clone(&self.locks),
        }
    }

    pub fn bouncer<H: TargetHandler>(&self, handler: H) -> Bouncer<H> {
        Bouncer::new(handler, self.deps())
    }

    pub async fn update_settings(&self, update: impl FnOnce(&mut SpamSettings)) {
        update(&mut *self.settings.write().await);
    }

    /// A client that answers with `verdicts` in order. Also becomes the
    /// backend's active client.
    pub fn client_returning(&self, verdicts: Vec<Verdict>) -> Arc<StubClient> {
        let client = Arc::new(StubClient {
            script: Mutex::new(verdicts.into()),
            ..StubClient::default()
        });
        self.backend.install(Arc::clone(&client));
        client
    }

    pub fn failing_client(&self) -> Arc<StubClient> {
        let client = Arc::new(StubClient {
            fail: true,
            ..StubClient::default()
        });
        self.backend.install(Arc::clone(&client));
        client
    }

    pub fn backend_error(code: &str) -> Verdict {
        let mut detail = BTreeMap::new();
        detail.insert("code".to_string(), code.to_string());
        Verdict::Error(BackendError {
            code: code.to_string(),
            message: Some("backend unavailable".to_string()),
            detail,
        })
    }
}
