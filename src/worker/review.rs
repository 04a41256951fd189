// Applies a reviewer's decision to an escalation from the review queue.

use super::pipeline::Pipeline;
use crate::core::moderation::{
    Bouncer, BouncerError, ReviewAction, ReviewerCapabilities, SpamState, TargetHandler,
    TargetKind, TargetSource,
};
use crate::infra::moderation::{SqliteHostStore, ESCALATION_PENDING};
use chrono::Utc;

/// Apply `action` to a pending escalation on behalf of `reviewer`.
///
/// The action must be one the reviewer is offered for that kind of target.
pub async fn resolve_escalation(
    pipeline: &Pipeline,
    store: &SqliteHostStore,
    escalation_id: u64,
    action: ReviewAction,
    reviewer: &ReviewerCapabilities,
) -> Result<SpamState, BouncerError> {
    let escalation = store.escalation(escalation_id).await?.ok_or_else(|| {
        BouncerError::InvalidArgument(format!("no escalation with id {}", escalation_id))
    })?;
    if escalation.status != ESCALATION_PENDING {
        return Err(BouncerError::InvalidArgument(format!(
            "escalation {} is already {}",
            escalation_id, escalation.status
        )));
    }

    let id = escalation.target.id;
    let state = match escalation.target.kind {
        TargetKind::Post => {
            let source = pipeline.post_source.as_ref();
            resolve_one(&pipeline.posts, source, id, action, reviewer).await?
        }
        TargetKind::User => {
            let source = pipeline.user_source.as_ref();
            resolve_one(&pipeline.users, source, id, action, reviewer).await?
        }
        TargetKind::Comment => {
            let source = pipeline.comment_source.as_ref();
            resolve_one(&pipeline.comments, source, id, action, reviewer).await?
        }
    };

    store.close_escalation(escalation_id, state.as_str()).await?;
    tracing::info!(
        escalation_id,
        target = %escalation.target,
        topic_id = ?escalation.topic_id,
        reason = %escalation.reason,
        waited_secs = (Utc::now() - escalation.created_at).num_seconds(),
        outcome = %state,
        "Escalation closed"
    );
    tracing::debug!(escalation_id, snapshot = %escalation.payload, "Closed escalation snapshot");
    Ok(state)
}

async fn resolve_one<H: TargetHandler>(
    bouncer: &Bouncer<H>,
    source: &dyn TargetSource<H::Target>,
    id: u64,
    action: ReviewAction,
    reviewer: &ReviewerCapabilities,
) -> Result<SpamState, BouncerError> {
    if !bouncer.review_actions(reviewer).has(action) {
        return Err(BouncerError::InvalidArgument(format!(
            "{} is not available for {} #{}",
            action,
            bouncer.kind(),
            id
        )));
    }

    let target = source.find(id).await?.ok_or_else(|| {
        BouncerError::InvalidArgument(format!("{} #{} no longer exists", bouncer.kind(), id))
    })?;
    bouncer.resolve(&target, action).await
}
