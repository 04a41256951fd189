// Host event intake.
//
// The host appends JSON events to the `host_events` table. The worker drains
// them in id order: content snapshots are mirrored into the store, then handed
// to the lifecycle hooks, the feedback path or the review queue.

use super::lifecycle::LifecycleHooks;
use super::pipeline::Pipeline;
use super::review;
use crate::core::moderation::{
    Author, Bouncer, BouncerError, CommentTarget, OriginMetadata, PostTarget, ReviewAction,
    ReviewerCapabilities, TargetHandler, TargetKind, TargetRef, TargetSource, UserTarget,
};
use crate::infra::moderation::SqliteHostStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const BATCH_SIZE: u32 = 100;

/// Something that happened on the host, as stored in `host_events.payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    PostCreated {
        post: PostTarget,
        #[serde(default)]
        origin: OriginMetadata,
    },
    PostEdited {
        post: PostTarget,
        editor: Author,
        reviewable_change: bool,
    },
    PostRecovered {
        post: PostTarget,
    },
    CommentCreated {
        comment: CommentTarget,
        #[serde(default)]
        origin: OriginMetadata,
    },
    CommentEdited {
        comment: CommentTarget,
        editor: Author,
        reviewable_change: bool,
    },
    ProfileChanged {
        user: UserTarget,
        bio_changed: bool,
        website_changed: bool,
    },
    UserAnonymized {
        user_id: u64,
        new_ip: String,
    },
    /// A moderator reported a target to the provider outside the review queue
    FeedbackRequested {
        target: TargetRef,
        status: String,
    },
    /// A moderator forced a spam-state by name
    StateOverridden {
        target: TargetRef,
        state: String,
    },
    ReviewDecided {
        escalation_id: u64,
        action: ReviewAction,
        #[serde(default)]
        reviewer: ReviewerCapabilities,
    },
}

impl HostEvent {
    fn name(&self) -> &'static str {
        match self {
            HostEvent::PostCreated { .. } => "post_created",
            HostEvent::PostEdited { .. } => "post_edited",
            HostEvent::PostRecovered { .. } => "post_recovered",
            HostEvent::CommentCreated { .. } => "comment_created",
            HostEvent::CommentEdited { .. } => "comment_edited",
            HostEvent::ProfileChanged { .. } => "profile_changed",
            HostEvent::UserAnonymized { .. } => "user_anonymized",
            HostEvent::FeedbackRequested { .. } => "feedback_requested",
            HostEvent::StateOverridden { .. } => "state_overridden",
            HostEvent::ReviewDecided { .. } => "review_decided",
        }
    }
}

pub struct HostEventIntake {
    pipeline: Arc<Pipeline>,
    store: Arc<SqliteHostStore>,
    hooks: LifecycleHooks,
}

impl HostEventIntake {
    pub fn new(pipeline: Arc<Pipeline>, store: Arc<SqliteHostStore>) -> Self {
        Self {
            hooks: LifecycleHooks::new(Arc::clone(&pipeline)),
            pipeline,
            store,
        }
    }

    /// Handle every waiting event and return how many were taken off the table.
    ///
    /// A malformed or failing event is marked processed with its error and
    /// never blocks the ones behind it.
    pub async fn drain(&self) -> Result<usize, BouncerError> {
        let mut handled = 0;

        loop {
            let batch = self.store.unprocessed_host_events(BATCH_SIZE).await?;
            if batch.is_empty() {
                return Ok(handled);
            }

            for stored in batch {
                let error = match self.handle(&stored.payload).await {
                    Ok(()) => None,
                    Err(err) => {
                        tracing::error!(event_id = stored.id, error = %err, "Host event failed");
                        Some(err.to_string())
                    }
                };
                self.store
                    .finish_host_event(stored.id, error.as_deref())
                    .await?;
                handled += 1;
            }
        }
    }

    async fn handle(&self, payload: &str) -> Result<(), BouncerError> {
        let event: HostEvent = serde_json::from_str(payload).map_err(|e| {
            BouncerError::InvalidArgument(format!("malformed host event: {}", e))
        })?;
        let name = event.name();
        self.apply(event).await?;
        tracing::debug!(event = name, "Host event handled");
        Ok(())
    }

    async fn apply(&self, event: HostEvent) -> Result<(), BouncerError> {
        match event {
            HostEvent::PostCreated { post, origin } => {
                self.mirror_post(&post).await?;
                self.hooks.post_created(&post, &origin).await?;
            }
            HostEvent::PostEdited {
                post,
                editor,
                reviewable_change,
            } => {
                self.mirror_post(&post).await?;
                self.hooks
                    .post_edited(&post, &editor, reviewable_change)
                    .await?;
            }
            HostEvent::PostRecovered { post } => {
                self.mirror_post(&post).await?;
                self.hooks.post_recovered(&post).await?;
            }
            HostEvent::CommentCreated { comment, origin } => {
                self.mirror_comment(&comment).await?;
                self.hooks.comment_created(&comment, &origin).await?;
            }
            HostEvent::CommentEdited {
                comment,
                editor,
                reviewable_change,
            } => {
                self.mirror_comment(&comment).await?;
                self.hooks
                    .comment_edited(&comment, &editor, reviewable_change)
                    .await?;
            }
            HostEvent::ProfileChanged {
                user,
                bio_changed,
                website_changed,
            } => {
                self.store.save_user(&user).await?;
                self.hooks
                    .profile_changed(&user, bio_changed, website_changed)
                    .await?;
            }
            HostEvent::UserAnonymized { user_id, new_ip } => {
                self.hooks.user_anonymized(user_id, &new_ip).await?;
            }
            HostEvent::FeedbackRequested { target, status } => {
                self.submit_feedback(target, &status).await?;
            }
            HostEvent::StateOverridden { target, state } => {
                self.override_state(target, &state).await?;
            }
            HostEvent::ReviewDecided {
                escalation_id,
                action,
                reviewer,
            } => {
                review::resolve_escalation(
                    &self.pipeline,
                    &self.store,
                    escalation_id,
                    action,
                    &reviewer,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn mirror_post(&self, post: &PostTarget) -> Result<(), BouncerError> {
        self.store.save_author(&post.author).await?;
        if let Some(topic) = &post.topic {
            self.store.save_topic(topic).await?;
        }
        self.store.save_post(post).await
    }

    async fn mirror_comment(&self, comment: &CommentTarget) -> Result<(), BouncerError> {
        self.store.save_author(&comment.author).await?;
        if let Some(topic) = comment.topic() {
            self.store.save_topic(topic).await?;
        }
        self.store.save_comment(comment).await
    }

    async fn submit_feedback(&self, target: TargetRef, status: &str) -> Result<(), BouncerError> {
        let p = &self.pipeline;
        match target.kind {
            TargetKind::Post => {
                feedback_for(&p.posts, p.post_source.as_ref(), target.id, status).await
            }
            TargetKind::User => {
                feedback_for(&p.users, p.user_source.as_ref(), target.id, status).await
            }
            TargetKind::Comment => {
                feedback_for(&p.comments, p.comment_source.as_ref(), target.id, status).await
            }
        }
    }

    async fn override_state(&self, target: TargetRef, state: &str) -> Result<(), BouncerError> {
        let p = &self.pipeline;
        let moved = match target.kind {
            TargetKind::Post => p.posts.move_to_named_state(target, state).await?,
            TargetKind::User => p.users.move_to_named_state(target, state).await?,
            TargetKind::Comment => p.comments.move_to_named_state(target, state).await?,
        };
        if !moved {
            tracing::warn!(kind = %target.kind, target_id = target.id, state, "Spam state left unchanged");
        }
        Ok(())
    }
}

async fn feedback_for<H: TargetHandler>(
    bouncer: &Bouncer<H>,
    source: &dyn TargetSource<H::Target>,
    id: u64,
    status: &str,
) -> Result<(), BouncerError> {
    let target = source.find(id).await?.ok_or_else(|| {
        BouncerError::InvalidArgument(format!("{} #{} is not on file", bouncer.kind(), id))
    })?;
    bouncer.submit_feedback(&target, status).await
}

/// Poll the event table forever.
pub async fn run(intake: HostEventIntake, interval: Duration) {
    tracing::info!("Host event intake started");

    loop {
        match intake.drain().await {
            Ok(0) => {}
            Ok(handled) => tracing::debug!(handled, "Host events drained"),
            Err(err) => tracing::error!(error = %err, "Host event intake failed"),
        }
        sleep(interval).await;
    }
}
