// Spam checks for comments attached to posts.

use super::bouncer::{content_suspect, Bouncer, BouncerDeps, TargetHandler};
use super::moderation_models::{ScoreReason, SpamSettings, TargetKind};
use super::moderation_ports::{BouncerError, ContentModerator};
use super::review_actions::{content_actions, ActionSet, ReviewerCapabilities};
use super::targets::{CommentTarget, SpamTarget};
use async_trait::async_trait;
use serde_json::json;

pub struct CommentsHandler;

pub type CommentsBouncer = Bouncer<CommentsHandler>;

impl Bouncer<CommentsHandler> {
    pub fn for_comments(deps: BouncerDeps) -> Self {
        Bouncer::new(CommentsHandler, deps)
    }
}

#[async_trait]
impl TargetHandler for CommentsHandler {
    type Target = CommentTarget;

    fn kind(&self) -> TargetKind {
        TargetKind::Comment
    }

    fn suspect(&self, comment: &CommentTarget, settings: &SpamSettings) -> bool {
        match comment.topic() {
            Some(topic) if !topic.private_message => content_suspect(
                &comment.raw,
                &comment.author,
                settings,
                settings.review_tier1_first_comment,
            ),
            _ => false,
        }
    }

    fn before_check(&self, comment: &CommentTarget) -> bool {
        comment.parent.is_some()
    }

    fn spam_score_reason(&self) -> ScoreReason {
        ScoreReason::SpamComment
    }

    fn snapshot(&self, comment: &CommentTarget) -> serde_json::Value {
        json!({ "comment_cooked": comment.cooked })
    }

    fn topic_id(&self, comment: &CommentTarget) -> Option<u64> {
        comment.topic().map(|t| t.id)
    }

    fn review_actions(&self, caps: &ReviewerCapabilities) -> ActionSet {
        content_actions(caps)
    }

    async fn on_spam_detected(
        &self,
        comment: &CommentTarget,
        content: &dyn ContentModerator,
        _settings: &SpamSettings,
    ) -> Result<(), BouncerError> {
        content.remove(comment.target_ref()).await
    }

    async fn on_spam_confirmed(
        &self,
        comment: &CommentTarget,
        content: &dyn ContentModerator,
    ) -> Result<(), BouncerError> {
        if comment.deleted_at.is_none() {
            content.remove(comment.target_ref()).await?;
        }
        Ok(())
    }

    async fn on_ham_confirmed(
        &self,
        comment: &CommentTarget,
        content: &dyn ContentModerator,
        _settings: &SpamSettings,
    ) -> Result<(), BouncerError> {
        if comment.deleted_at.is_some() {
            content.restore(comment.target_ref()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::bouncer::CheckDecision;
    use crate::core::moderation::moderation_models::{
        EscalationReason, ScoreReason, SpamState, TargetRef, Verdict,
    };
    use crate::core::moderation::moderation_ports::TargetFieldStore;
    use crate::core::moderation::review_actions::ReviewAction;
    use crate::core::moderation::targets::fixtures::*;
    use crate::core::moderation::test_support::Harness;

    const SPAMMY: &str = "Great article, visit my pharmacy for deals";

    #[test]
    fn test_suspect_rules() {
        let settings = SpamSettings::default();

        assert!(CommentsHandler.suspect(&comment(1, author(1, 0, 0), SPAMMY), &settings));
        assert!(!CommentsHandler.suspect(&comment(1, author(1, 0, 0), "nice"), &settings));
        assert!(!CommentsHandler.suspect(&comment(1, author(1, 2, 10), SPAMMY), &settings));

        let mut orphan = comment(1, author(1, 0, 0), SPAMMY);
        orphan.parent = None;
        assert!(!CommentsHandler.suspect(&orphan, &settings));
    }

    #[test]
    fn test_first_comment_override_for_tier1() {
        let mut member = author(1, 1, 0);
        member.groups = vec!["regulars".to_string()];
        let first = comment(1, member, SPAMMY);

        let mut settings = SpamSettings::default();
        settings.skip_groups = vec!["regulars".to_string()];
        assert!(CommentsHandler.suspect(&first, &settings));

        settings.review_tier1_first_comment = false;
        assert!(!CommentsHandler.suspect(&first, &settings));
    }

    #[tokio::test]
    async fn test_spam_comment_is_trashed_without_notice() {
        let harness = Harness::new();
        let bouncer = CommentsBouncer::for_comments(harness.deps());
        let target = comment(3, author(1, 0, 0), SPAMMY);

        assert_eq!(
            bouncer.check(&target, None).await.unwrap(),
            CheckDecision::Enqueued
        );
        harness.client_returning(vec![Verdict::Spam]);
        bouncer.check_now(&target).await.unwrap();

        assert_eq!(
            harness.fields.state(TargetRef::comment(3)),
            Some(SpamState::ConfirmedSpam)
        );
        assert_eq!(harness.content.events(), vec!["remove comment #3".to_string()]);
        let escalations = harness.escalations.all();
        assert_eq!(escalations[0].reason, EscalationReason::SpamDetected);
        assert_eq!(escalations[0].payload["comment_cooked"], target.cooked.as_str());
        assert_eq!(harness.escalations.score_reasons(), vec![ScoreReason::SpamComment]);
    }

    #[tokio::test]
    async fn test_missing_parent_is_skipped_at_check_time() {
        let harness = Harness::new();
        let bouncer = CommentsBouncer::for_comments(harness.deps());
        let mut target = comment(3, author(1, 0, 0), SPAMMY);
        target.parent = None;
        harness
            .fields
            .set_spam_state(TargetRef::comment(3), SpamState::Pending)
            .await
            .unwrap();
        let client = harness.client_returning(vec![Verdict::Spam]);

        assert_eq!(bouncer.check_now(&target).await.unwrap(), None);
        assert_eq!(client.calls(), 0);
        assert_eq!(
            harness.fields.state(TargetRef::comment(3)),
            Some(SpamState::Skipped)
        );
    }

    #[tokio::test]
    async fn test_not_spam_review_restores_comment() {
        let harness = Harness::new();
        let bouncer = CommentsBouncer::for_comments(harness.deps());
        let mut target = comment(3, author(1, 0, 0), SPAMMY);
        target.deleted_at = Some(chrono::Utc::now());

        let state = bouncer.resolve(&target, ReviewAction::NotSpam).await.unwrap();

        assert_eq!(state, SpamState::ConfirmedHam);
        assert_eq!(harness.content.events(), vec!["restore comment #3".to_string()]);
    }
}
