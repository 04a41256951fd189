// Ports between the spam-check core and the outside world.
//
// The core owns these traits; `infra/` implements them against HTTP providers,
// SQLite and the in-process job queue. Tests implement them in memory.

use super::moderation_models::{
    AntiSpamProvider, AuthorNotice, EscalationHandle, EscalationScore, FeedbackStatus, Job,
    NewEscalation, OriginMetadata, RequestArgs, RequestFields, SpamState, TargetKind, TargetRef,
    Verdict,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Local failure talking to a provider. Never folded into a verdict.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status: {0}")]
    Http(String),

    #[error("Unexpected response: {0}")]
    Protocol(String),

    #[error("Provider rejected the request: {0}")]
    Api(String),

    #[error("Client configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum BouncerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

// ============================================================================
// PROVIDER PORTS
// ============================================================================

/// One anti-spam backend.
#[async_trait]
pub trait AntiSpamClient: Send + Sync {
    fn provider(&self) -> AntiSpamProvider;

    /// One blocking check. Backend-reported errors come back as
    /// `Verdict::Error`; anything else unexpected is a `ClientError`.
    async fn check(&self, args: &RequestArgs) -> Result<Verdict, ClientError>;

    /// Returns `Ok(false)` without a network call when `args` lack the content
    /// the provider needs.
    async fn submit_feedback(
        &self,
        status: FeedbackStatus,
        args: &RequestArgs,
    ) -> Result<bool, ClientError>;
}

/// Rewrites an outbound payload right before it is used.
pub trait RequestMunger: Send + Sync {
    fn munge(&self, args: &mut RequestArgs);
}

impl<F> RequestMunger for F
where
    F: Fn(&mut RequestArgs) + Send + Sync,
{
    fn munge(&self, args: &mut RequestArgs) {
        self(args)
    }
}

/// Identity munger.
pub struct NoopMunger;

impl RequestMunger for NoopMunger {
    fn munge(&self, _args: &mut RequestArgs) {}
}

/// Builds provider payloads from a target's request fields.
pub trait RequestBuilder: Send + Sync {
    fn for_check(&self, fields: &RequestFields) -> RequestArgs;

    fn for_feedback(&self, fields: &RequestFields) -> RequestArgs;
}

/// Picks the active backend and its request builder.
///
/// Settings can change between sweeps, so callers resolve these per check and
/// never hold on to them.
#[async_trait]
pub trait AntiSpamBackend: Send + Sync {
    /// `None` when the pipeline is disabled or the provider lacks credentials.
    async fn client(&self) -> Option<Arc<dyn AntiSpamClient>>;

    async fn request_builder_for(&self, kind: TargetKind) -> Arc<dyn RequestBuilder>;

    /// True when the active provider has its credentials.
    async fn is_configured(&self) -> bool;
}

// ============================================================================
// HOST PORTS
// ============================================================================

/// Fields the pipeline persists on the host's targets.
#[async_trait]
pub trait TargetFieldStore: Send + Sync {
    async fn spam_state(&self, target: TargetRef) -> Result<Option<SpamState>, BouncerError>;

    async fn set_spam_state(&self, target: TargetRef, state: SpamState)
        -> Result<(), BouncerError>;

    async fn origin(&self, target: TargetRef) -> Result<OriginMetadata, BouncerError>;

    /// Upsert the present values of `origin`; absent values are left alone.
    async fn store_origin(
        &self,
        target: TargetRef,
        origin: &OriginMetadata,
    ) -> Result<(), BouncerError>;

    async fn task_id(&self, target: TargetRef) -> Result<Option<String>, BouncerError>;

    async fn set_task_id(&self, target: TargetRef, task_id: &str) -> Result<(), BouncerError>;

    async fn targets_in_state(
        &self,
        kind: TargetKind,
        state: SpamState,
    ) -> Result<Vec<u64>, BouncerError>;

    async fn state_counts(&self, kind: TargetKind)
        -> Result<HashMap<SpamState, u64>, BouncerError>;

    /// Delete side-channel fields (never the spam-state) older than `cutoff`.
    async fn delete_side_channel_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, BouncerError>;

    /// Overwrite the captured IP on all content written by `author_id`.
    async fn anonymize_ip(&self, author_id: u64, new_ip: &str) -> Result<u64, BouncerError>;
}

/// The human review queue.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn has_open_escalation(&self, target: TargetRef) -> Result<bool, BouncerError>;

    async fn create_escalation(
        &self,
        escalation: NewEscalation,
    ) -> Result<EscalationHandle, BouncerError>;

    async fn attach_score(
        &self,
        handle: &EscalationHandle,
        score: EscalationScore,
    ) -> Result<(), BouncerError>;
}

/// Fire-and-forget asynchronous dispatch.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<(), BouncerError>;
}

/// Actions the host performs on content when spam is confirmed or overturned.
#[async_trait]
pub trait ContentModerator: Send + Sync {
    /// Soft-delete the target's content.
    async fn remove(&self, target: TargetRef) -> Result<(), BouncerError>;

    /// Undo a soft-delete.
    async fn restore(&self, target: TargetRef) -> Result<(), BouncerError>;

    async fn notify_author(&self, notice: AuthorNotice) -> Result<(), BouncerError>;

    /// Tell listeners of a topic that its first post was removed.
    async fn publish_topic_removed(&self, topic_id: u64) -> Result<(), BouncerError>;
}

/// Loads target snapshots by id.
#[async_trait]
pub trait TargetSource<T>: Send + Sync {
    async fn find(&self, id: u64) -> Result<Option<T>, BouncerError>;
}
