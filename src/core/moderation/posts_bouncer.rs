// Spam checks for forum posts.

use super::bouncer::{content_suspect, Bouncer, BouncerDeps, TargetHandler};
use super::moderation_models::{
    AuthorNotice, NoticeKind, ScoreReason, SpamSettings, TargetKind,
};
use super::moderation_ports::{BouncerError, ContentModerator};
use super::review_actions::{content_actions, ActionSet, ReviewerCapabilities};
use super::targets::{PostTarget, SpamTarget};
use async_trait::async_trait;
use serde_json::json;

pub struct PostsHandler;

pub type PostsBouncer = Bouncer<PostsHandler>;

impl Bouncer<PostsHandler> {
    pub fn for_posts(deps: BouncerDeps) -> Self {
        Bouncer::new(PostsHandler, deps)
    }
}

fn notice(post: &PostTarget, kind: NoticeKind, settings: &SpamSettings) -> Option<AuthorNotice> {
    let topic = post.topic.as_ref()?;
    Some(AuthorNotice {
        user_id: post.author.id,
        kind,
        topic_title: topic.title.clone(),
        link: format!("{}{}", settings.site_base_url, post.url()),
    })
}

#[async_trait]
impl TargetHandler for PostsHandler {
    type Target = PostTarget;

    fn kind(&self) -> TargetKind {
        TargetKind::Post
    }

    fn suspect(&self, post: &PostTarget, settings: &SpamSettings) -> bool {
        let Some(topic) = &post.topic else {
            return false;
        };
        if topic.private_message {
            return false;
        }

        content_suspect(
            &post.raw,
            &post.author,
            settings,
            settings.review_tier1_first_post,
        )
    }

    fn before_check(&self, post: &PostTarget) -> bool {
        !post.user_deleted && post.topic.is_some()
    }

    fn spam_score_reason(&self) -> ScoreReason {
        ScoreReason::SpamPost
    }

    fn snapshot(&self, post: &PostTarget) -> serde_json::Value {
        json!({ "post_cooked": post.cooked })
    }

    fn topic_id(&self, post: &PostTarget) -> Option<u64> {
        post.topic.as_ref().map(|t| t.id)
    }

    fn review_actions(&self, caps: &ReviewerCapabilities) -> ActionSet {
        content_actions(caps)
    }

    async fn on_spam_detected(
        &self,
        post: &PostTarget,
        content: &dyn ContentModerator,
        settings: &SpamSettings,
    ) -> Result<(), BouncerError> {
        content.remove(post.target_ref()).await?;

        if settings.notify_user {
            if let Some(notice) = notice(post, NoticeKind::RemovedAsSpam, settings) {
                content.notify_author(notice).await?;
            }
        }

        // Removing the first post takes the whole topic with it
        if post.is_first_post() {
            if let Some(topic) = &post.topic {
                content.publish_topic_removed(topic.id).await?;
            }
        }
        Ok(())
    }

    async fn on_spam_confirmed(
        &self,
        post: &PostTarget,
        content: &dyn ContentModerator,
    ) -> Result<(), BouncerError> {
        if post.deleted_at.is_none() {
            content.remove(post.target_ref()).await?;
        }
        Ok(())
    }

    async fn on_ham_confirmed(
        &self,
        post: &PostTarget,
        content: &dyn ContentModerator,
        settings: &SpamSettings,
    ) -> Result<(), BouncerError> {
        if post.deleted_at.is_some() {
            content.restore(post.target_ref()).await?;
        }

        if settings.notify_user {
            if let Some(notice) = notice(post, NoticeKind::RestoredNotSpam, settings) {
                content.notify_author(notice).await?;
            }
        }
        Ok(())
    }
}
