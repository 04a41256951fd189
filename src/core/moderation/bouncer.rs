// The bouncer - decides whether a target goes to the anti-spam backend and
// drives its spam-state through the pipeline.
//
// One generic engine (`Bouncer<H>`) owns eligibility, state transitions, check
// orchestration and error escalation. A `TargetHandler` per kind (posts,
// users, comments) supplies the heuristics and what happens to the content.
//
// State machine:
//   pending --not suspect--> skipped
//   pending --Spam--> confirmed_spam
//   pending --Ham--> confirmed_ham
//   pending --Error, limiter ok--> needs_review
//   pending --Error, limited--> pending
//   skipped --re-check, suspect--> pending
//   needs_review --human--> confirmed_spam | confirmed_ham | dismissed

use super::moderation_models::{
    BackendError, EscalationHandle, EscalationReason, EscalationScore, FeedbackStatus, Job,
    NewEscalation, OriginMetadata, RequestArgs, ScoreReason, SpamSettings, SpamState, TargetKind,
    TargetRef, TrustLevel, Verdict,
};
use super::moderation_ports::{
    AntiSpamBackend, AntiSpamClient, BouncerError, ContentModerator, EscalationSink, JobQueue,
    TargetFieldStore,
};
use super::rate_limiter::KeyedRateLimiter;
use super::review_actions::{ActionSet, ReviewAction, ReviewerCapabilities};
use super::target_locks::TargetLocks;
use super::targets::{is_bare_uri, SpamTarget};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// TARGET HANDLER
// ============================================================================

/// Kind-specific behavior plugged into the generic bouncer.
#[async_trait]
pub trait TargetHandler: Send + Sync {
    type Target: SpamTarget;

    fn kind(&self) -> TargetKind;

    /// Should this target be sent to the backend at all?
    fn suspect(&self, target: &Self::Target, settings: &SpamSettings) -> bool;

    /// Last-instant precondition right before the backend call.
    fn before_check(&self, target: &Self::Target) -> bool;

    fn spam_score_reason(&self) -> ScoreReason;

    /// Snapshot stored with an escalation.
    fn snapshot(&self, target: &Self::Target) -> serde_json::Value;

    fn topic_id(&self, target: &Self::Target) -> Option<u64>;

    fn review_actions(&self, caps: &ReviewerCapabilities) -> ActionSet;

    /// Consequences of the backend calling the target spam.
    async fn on_spam_detected(
        &self,
        _target: &Self::Target,
        _content: &dyn ContentModerator,
        _settings: &SpamSettings,
    ) -> Result<(), BouncerError> {
        Ok(())
    }

    /// A reviewer agreed it is spam.
    async fn on_spam_confirmed(
        &self,
        _target: &Self::Target,
        _content: &dyn ContentModerator,
    ) -> Result<(), BouncerError> {
        Ok(())
    }

    /// A reviewer decided it is not spam.
    async fn on_ham_confirmed(
        &self,
        _target: &Self::Target,
        _content: &dyn ContentModerator,
        _settings: &SpamSettings,
    ) -> Result<(), BouncerError> {
        Ok(())
    }
}

/// Eligibility rules shared by post-like content.
///
/// `first_content_override` lets a tier-1 author's very first piece of content
/// through regardless of group, ceiling and link rules.
pub(crate) fn content_suspect(
    raw: &str,
    author: &super::moderation_models::Author,
    settings: &SpamSettings,
    first_content_override: bool,
) -> bool {
    let stripped = raw.trim();

    if stripped.chars().count() < settings.min_content_length {
        return false;
    }

    if first_content_override && author.trust_level == TrustLevel::BASIC && author.post_count == 0
    {
        return true;
    }

    if author.in_any_group(&settings.skip_groups) {
        return false;
    }

    // Long-tenured accounts are not re-checked forever
    if author.post_count > settings.skip_content_count {
        return false;
    }

    !is_bare_uri(stripped)
}

// ============================================================================
// BOUNCER
// ============================================================================

/// Everything a bouncer talks to. Cheap to clone and shared by all kinds.
#[derive(Clone)]
pub struct BouncerDeps {
    pub settings: Arc<RwLock<SpamSettings>>,
    pub anti_spam: Arc<dyn AntiSpamBackend>,
    pub fields: Arc<dyn TargetFieldStore>,
    pub escalations: Arc<dyn EscalationSink>,
    pub jobs: Arc<dyn JobQueue>,
    pub content: Arc<dyn ContentModerator>,
    pub error_limiter: Arc<KeyedRateLimiter>,
    pub locks: Arc<TargetLocks>,
}

/// What `check` decided to do with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckDecision {
    /// Already decided; left alone
    AlreadyDecided,
    /// Not a candidate
    Skipped,
    /// Fast path: a single-target job was queued
    Enqueued,
    /// Left `pending` for the next sweep
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestAction {
    Check,
    Feedback,
}

pub struct Bouncer<H: TargetHandler> {
    handler: H,
    deps: BouncerDeps,
}

impl<H: TargetHandler> Bouncer<H> {
    pub fn new(handler: H, deps: BouncerDeps) -> Self {
        Self { handler, deps }
    }

    pub fn kind(&self) -> TargetKind {
        self.handler.kind()
    }

    async fn settings(&self) -> SpamSettings {
        self.deps.settings.read().await.clone()
    }

    /// Heuristic eligibility. False whenever the pipeline is disabled.
    pub async fn suspect(&self, target: &H::Target) -> bool {
        let settings = self.settings().await;
        settings.enabled && self.handler.suspect(target, &settings)
    }

    /// Suspect and not already in front of a human.
    pub async fn should_check(&self, target: &H::Target) -> Result<bool, BouncerError> {
        if !self.suspect(target).await {
            return Ok(false);
        }
        let escalated = self
            .deps
            .escalations
            .has_open_escalation(target.target_ref())
            .await?;
        Ok(!escalated)
    }

    /// Persist `state`. No-op (returns false) when the provider is not configured.
    pub async fn move_to_state(
        &self,
        target: TargetRef,
        state: SpamState,
    ) -> Result<bool, BouncerError> {
        if !self.deps.anti_spam.is_configured().await {
            return Ok(false);
        }

        self.deps.fields.set_spam_state(target, state).await?;
        tracing::debug!(kind = %target.kind, target_id = target.id, state = %state, "Spam state changed");
        Ok(true)
    }

    /// Same as [`Bouncer::move_to_state`] for callers holding a raw state name.
    /// Unknown names are ignored.
    pub async fn move_to_named_state(
        &self,
        target: TargetRef,
        state: &str,
    ) -> Result<bool, BouncerError> {
        match state.parse::<SpamState>() {
            Ok(state) => self.move_to_state(target, state).await,
            Err(e) => {
                tracing::warn!(kind = %target.kind, target_id = target.id, "{}", e);
                Ok(false)
            }
        }
    }

    /// Persist captured IP/user-agent/referrer for a later check.
    pub async fn store_additional_information(
        &self,
        target: TargetRef,
        origin: &OriginMetadata,
    ) -> Result<(), BouncerError> {
        if !self.deps.anti_spam.is_configured().await {
            return Ok(());
        }

        let origin = origin.clone().present();
        if origin.is_empty() {
            return Ok(());
        }
        self.deps.fields.store_origin(target, &origin).await
    }

    /// Entry point for content lifecycle events.
    ///
    /// Lowest-tier authors get an immediate single-target job, everyone else
    /// waits for the next sweep.
    pub async fn check(
        &self,
        target: &H::Target,
        origin: Option<&OriginMetadata>,
    ) -> Result<CheckDecision, BouncerError> {
        let target_ref = target.target_ref();

        let current = self.deps.fields.spam_state(target_ref).await?;
        if current.is_some_and(|s| s.is_decided()) {
            return Ok(CheckDecision::AlreadyDecided);
        }

        if !self.should_check(target).await? {
            self.move_to_state(target_ref, SpamState::Skipped).await?;
            return Ok(CheckDecision::Skipped);
        }

        if let Some(origin) = origin {
            self.store_additional_information(target_ref, origin)
                .await?;
        }

        self.move_to_state(target_ref, SpamState::Pending).await?;

        if target.author().trust_level == TrustLevel::LOWEST {
            self.deps.jobs.enqueue(Job::CheckTarget(target_ref)).await?;
            tracing::debug!(kind = %target_ref.kind, target_id = target_ref.id, "Queued immediate spam check");
            Ok(CheckDecision::Enqueued)
        } else {
            Ok(CheckDecision::Deferred)
        }
    }

    /// Check with whatever backend is active right now.
    ///
    /// Returns `Ok(None)` when the pipeline is disabled or unconfigured.
    pub async fn check_now(&self, target: &H::Target) -> Result<Option<Verdict>, BouncerError> {
        match self.deps.anti_spam.client().await {
            Some(client) => self.perform_check(client.as_ref(), target).await,
            None => Ok(None),
        }
    }

    /// Synchronous check of one target against `client`.
    ///
    /// Runs under the target's lock and only while the target is still
    /// `pending` with no open escalation. Returns `Ok(None)` when the backend
    /// was not called. Client failures propagate and leave the state as is.
    pub async fn perform_check(
        &self,
        client: &dyn AntiSpamClient,
        target: &H::Target,
    ) -> Result<Option<Verdict>, BouncerError> {
        let target_ref = target.target_ref();
        let _guard = self.deps.locks.acquire(target_ref).await;

        // Someone else may have resolved it while we waited
        if self.deps.fields.spam_state(target_ref).await? != Some(SpamState::Pending) {
            return Ok(None);
        }
        if self.deps.escalations.has_open_escalation(target_ref).await? {
            return Ok(None);
        }

        if !self.handler.before_check(target) {
            self.move_to_state(target_ref, SpamState::Skipped).await?;
            return Ok(None);
        }

        let args = self.args_for(target, RequestAction::Check).await?;
        let verdict = client.check(&args).await?;

        match &verdict {
            Verdict::Spam => self.mark_as_spam(target).await?,
            Verdict::Ham => {
                self.move_to_state(target_ref, SpamState::ConfirmedHam)
                    .await?;
            }
            Verdict::Error(error) => {
                self.mark_as_errored(target, error, || {
                    self.new_escalation(target, EscalationReason::BackendError, Some(error))
                })
                .await?;
            }
        }

        Ok(Some(verdict))
    }

    /// Queue a feedback submission. `status` must be `spam` or `ham`.
    pub async fn submit_feedback(
        &self,
        target: &H::Target,
        status: &str,
    ) -> Result<(), BouncerError> {
        let status = status
            .parse::<FeedbackStatus>()
            .map_err(BouncerError::InvalidArgument)?;
        self.queue_feedback(target, status).await
    }

    async fn queue_feedback(
        &self,
        target: &H::Target,
        status: FeedbackStatus,
    ) -> Result<(), BouncerError> {
        let args = self.args_for(target, RequestAction::Feedback).await?;
        self.deps
            .jobs
            .enqueue(Job::SubmitFeedback {
                target: target.target_ref(),
                status,
                args,
            })
            .await
    }

    /// Ids of this kind waiting for the batch sweep.
    pub async fn to_check(&self) -> Result<Vec<u64>, BouncerError> {
        let pending = self
            .deps
            .fields
            .targets_in_state(self.kind(), SpamState::Pending)
            .await?;

        let mut ids = Vec::with_capacity(pending.len());
        for id in pending {
            let target = TargetRef::new(self.kind(), id);
            if !self.deps.escalations.has_open_escalation(target).await? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Apply a reviewer's decision and write it back to the spam-state.
    pub async fn resolve(
        &self,
        target: &H::Target,
        action: ReviewAction,
    ) -> Result<SpamState, BouncerError> {
        let target_ref = target.target_ref();
        let _guard = self.deps.locks.acquire(target_ref).await;

        let state = if action.confirms_spam() {
            self.queue_feedback(target, FeedbackStatus::Spam).await?;
            self.handler
                .on_spam_confirmed(target, self.deps.content.as_ref())
                .await?;
            SpamState::ConfirmedSpam
        } else if action == ReviewAction::NotSpam {
            self.queue_feedback(target, FeedbackStatus::Ham).await?;
            let settings = self.settings().await;
            self.handler
                .on_ham_confirmed(target, self.deps.content.as_ref(), &settings)
                .await?;
            SpamState::ConfirmedHam
        } else {
            SpamState::Dismissed
        };

        self.move_to_state(target_ref, state).await?;
        tracing::info!(kind = %target_ref.kind, target_id = target_ref.id, action = %action, "Review decision applied");
        Ok(state)
    }

    /// Number of targets of this kind in each state.
    pub async fn stats(&self) -> Result<HashMap<SpamState, u64>, BouncerError> {
        let mut counts = self.deps.fields.state_counts(self.kind()).await?;
        for state in SpamState::ALL {
            counts.entry(state).or_insert(0);
        }
        Ok(counts)
    }

    pub fn review_actions(&self, caps: &ReviewerCapabilities) -> ActionSet {
        self.handler.review_actions(caps)
    }

    async fn args_for(
        &self,
        target: &H::Target,
        action: RequestAction,
    ) -> Result<RequestArgs, BouncerError> {
        let settings = self.settings().await;
        let target_ref = target.target_ref();

        let mut fields = target.request_fields(&settings.site_base_url);
        let stored = self.deps.fields.origin(target_ref).await?;
        fields.origin = fields.origin.or(stored).present();
        fields.task_id = self.deps.fields.task_id(target_ref).await?;

        let builder = self.deps.anti_spam.request_builder_for(self.kind()).await;
        Ok(match action {
            RequestAction::Check => builder.for_check(&fields),
            RequestAction::Feedback => builder.for_feedback(&fields),
        })
    }

    async fn mark_as_spam(&self, target: &H::Target) -> Result<(), BouncerError> {
        let target_ref = target.target_ref();
        let settings = self.settings().await;

        self.handler
            .on_spam_detected(target, self.deps.content.as_ref(), &settings)
            .await?;

        let escalation = self.new_escalation(target, EscalationReason::SpamDetected, None);
        self.escalate(
            escalation,
            EscalationScore::spam(self.handler.spam_score_reason()),
        )
        .await?;

        self.move_to_state(target_ref, SpamState::ConfirmedSpam)
            .await?;
        tracing::info!(kind = %target_ref.kind, target_id = target_ref.id, "Spam detected");
        Ok(())
    }

    /// Escalate a backend error, at most once per error code per window.
    ///
    /// `build` constructs the escalation only when the limiter allows it.
    /// Returns false (and changes nothing) when limited.
    pub(crate) async fn mark_as_errored<F>(
        &self,
        target: &H::Target,
        error: &BackendError,
        build: F,
    ) -> Result<bool, BouncerError>
    where
        F: FnOnce() -> NewEscalation + Send,
    {
        let target_ref = target.target_ref();

        if !self.deps.error_limiter.try_perform(&error.limiter_key()) {
            tracing::warn!(
                kind = %target_ref.kind,
                target_id = target_ref.id,
                code = %error.code,
                "Backend error rate limited, target stays pending"
            );
            return Ok(false);
        }

        self.escalate(
            build(),
            EscalationScore::spam(ScoreReason::BackendServerError),
        )
        .await?;
        self.move_to_state(target_ref, SpamState::NeedsReview)
            .await?;
        tracing::warn!(kind = %target_ref.kind, target_id = target_ref.id, code = %error.code, "Backend error escalated for review");
        Ok(true)
    }

    fn new_escalation(
        &self,
        target: &H::Target,
        reason: EscalationReason,
        error: Option<&BackendError>,
    ) -> NewEscalation {
        let mut payload = self.handler.snapshot(target);
        if let (Some(error), Some(map)) = (error, payload.as_object_mut()) {
            map.insert(
                "external_error".to_string(),
                json!({
                    "code": error.code,
                    "msg": error.message,
                    "detail": error.detail,
                }),
            );
        }

        NewEscalation {
            target: target.target_ref(),
            topic_id: self.handler.topic_id(target),
            reason,
            payload,
            reviewable_by_moderator: true,
            actions: self.handler.review_actions(&ReviewerCapabilities::FULL),
        }
    }

    /// Create the escalation unless one is already open for the target.
    async fn escalate(
        &self,
        escalation: NewEscalation,
        score: EscalationScore,
    ) -> Result<Option<EscalationHandle>, BouncerError> {
        if self
            .deps
            .escalations
            .has_open_escalation(escalation.target)
            .await?
        {
            return Ok(None);
        }

        let handle = self.deps.escalations.create_escalation(escalation).await?;
        self.deps.escalations.attach_score(&handle, score).await?;
        tracing::debug!(escalation_id = handle.id, target = %handle.target, "Escalation scored");
        Ok(Some(handle))
    }
}
