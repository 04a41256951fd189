// Content lifecycle hooks - the host calls these when content changes.

use super::pipeline::Pipeline;
use crate::core::moderation::{
    Author, BouncerError, CheckDecision, CommentTarget, OriginMetadata, PostTarget, SpamState,
    SpamTarget, UserTarget,
};
use std::sync::Arc;

pub struct LifecycleHooks {
    pipeline: Arc<Pipeline>,
}

impl LifecycleHooks {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn post_created(
        &self,
        post: &PostTarget,
        origin: &OriginMetadata,
    ) -> Result<CheckDecision, BouncerError> {
        self.pipeline.posts.check(post, Some(origin)).await
    }

    /// Re-check only when the revision touched reviewable content and was made
    /// by a regular account. Staff and system edits are trusted.
    pub async fn post_edited(
        &self,
        post: &PostTarget,
        editor: &Author,
        reviewable_change: bool,
    ) -> Result<Option<CheckDecision>, BouncerError> {
        if !reviewable_change || !editor.is_regular() {
            return Ok(None);
        }
        self.pipeline.posts.check(post, None).await.map(Some)
    }

    /// A recovered post only re-enters the pipeline if it was never a candidate.
    pub async fn post_recovered(
        &self,
        post: &PostTarget,
    ) -> Result<Option<CheckDecision>, BouncerError> {
        let state = self.pipeline.deps.fields.spam_state(post.target_ref()).await?;
        if state != Some(SpamState::Skipped) {
            return Ok(None);
        }
        self.pipeline.posts.check(post, None).await.map(Some)
    }

    pub async fn comment_created(
        &self,
        comment: &CommentTarget,
        origin: &OriginMetadata,
    ) -> Result<CheckDecision, BouncerError> {
        self.pipeline.comments.check(comment, Some(origin)).await
    }

    pub async fn comment_edited(
        &self,
        comment: &CommentTarget,
        editor: &Author,
        reviewable_change: bool,
    ) -> Result<Option<CheckDecision>, BouncerError> {
        if !reviewable_change || !editor.is_regular() {
            return Ok(None);
        }
        self.pipeline.comments.check(comment, None).await.map(Some)
    }

    pub async fn profile_changed(
        &self,
        user: &UserTarget,
        bio_changed: bool,
        website_changed: bool,
    ) -> Result<Option<CheckDecision>, BouncerError> {
        fn filled(value: Option<&str>) -> bool {
            value.is_some_and(|v| !v.trim().is_empty())
        }

        let relevant = (bio_changed && filled(user.bio_raw.as_deref()))
            || (website_changed && filled(user.user.website.as_deref()));
        if !relevant {
            return Ok(None);
        }
        self.pipeline.users.check(user, None).await.map(Some)
    }

    /// Rewrite the IP captured on everything the user wrote.
    pub async fn user_anonymized(&self, user_id: u64, new_ip: &str) -> Result<u64, BouncerError> {
        let updated = self.pipeline.deps.fields.anonymize_ip(user_id, new_ip).await?;
        tracing::info!(user_id, updated, "Anonymized captured IP addresses");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::targets::fixtures::*;
    use crate::core::moderation::{Job, TargetFieldStore, TargetRef};
    use crate::worker::pipeline::testing::sqlite_pipeline;

    const SPAMMY: &str = "Buy cheap watches at my store today";

    #[tokio::test]
    async fn test_post_created_captures_origin() {
        let (pipeline, store, harness, _dir) = sqlite_pipeline().await;
        let hooks = LifecycleHooks::new(Arc::new(pipeline));
        let origin = OriginMetadata {
            ip_address: Some("1.2.3.4".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            referrer: Some("https://search.example".to_string()),
        };

        let decision = hooks
            .post_created(&post(1, author(1, 0, 0), SPAMMY), &origin)
            .await
            .unwrap();

        assert_eq!(decision, CheckDecision::Enqueued);
        assert_eq!(store.origin(TargetRef::post(1)).await.unwrap(), origin);
        assert_eq!(harness.jobs.jobs(), vec![Job::CheckTarget(TargetRef::post(1))]);
    }

    #[tokio::test]
    async fn test_edits_by_system_are_ignored() {
        let (pipeline, store, _harness, _dir) = sqlite_pipeline().await;
        let hooks = LifecycleHooks::new(Arc::new(pipeline));
        let post = post(1, author(1, 1, 0), SPAMMY);
        let mut system = author(99, 4, 100);
        system.is_system = true;

        assert_eq!(hooks.post_edited(&post, &system, true).await.unwrap(), None);
        assert_eq!(
            hooks.post_edited(&post, &post.author, false).await.unwrap(),
            None
        );
        assert_eq!(store.spam_state(TargetRef::post(1)).await.unwrap(), None);

        let decision = hooks.post_edited(&post, &post.author, true).await.unwrap();
        assert_eq!(decision, Some(CheckDecision::Deferred));
    }

    #[tokio::test]
    async fn test_edits_by_staff_are_ignored() {
        let (pipeline, store, harness, _dir) = sqlite_pipeline().await;
        let hooks = LifecycleHooks::new(Arc::new(pipeline));
        let post = post(1, author(1, 1, 0), SPAMMY);
        let comment = comment(2, author(1, 1, 0), SPAMMY);
        let mut moderator = author(7, 4, 300);
        moderator.is_staff = true;

        assert_eq!(hooks.post_edited(&post, &moderator, true).await.unwrap(), None);
        assert_eq!(
            hooks.comment_edited(&comment, &moderator, true).await.unwrap(),
            None
        );
        assert_eq!(store.spam_state(TargetRef::post(1)).await.unwrap(), None);
        assert_eq!(store.spam_state(TargetRef::comment(2)).await.unwrap(), None);
        assert!(harness.jobs.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_edit_does_not_reopen_decided_post() {
        let (pipeline, store, _harness, _dir) = sqlite_pipeline().await;
        let hooks = LifecycleHooks::new(Arc::new(pipeline));
        let post = post(1, author(1, 0, 0), SPAMMY);
        store
            .set_spam_state(TargetRef::post(1), SpamState::ConfirmedHam)
            .await
            .unwrap();

        let decision = hooks.post_edited(&post, &post.author, true).await.unwrap();

        assert_eq!(decision, Some(CheckDecision::AlreadyDecided));
    }

    #[tokio::test]
    async fn test_recovery_only_rechecks_skipped_posts() {
        let (pipeline, store, _harness, _dir) = sqlite_pipeline().await;
        let hooks = LifecycleHooks::new(Arc::new(pipeline));
        let post = post(1, author(1, 1, 0), SPAMMY);

        assert_eq!(hooks.post_recovered(&post).await.unwrap(), None);

        store
            .set_spam_state(TargetRef::post(1), SpamState::Skipped)
            .await
            .unwrap();
        assert_eq!(
            hooks.post_recovered(&post).await.unwrap(),
            Some(CheckDecision::Deferred)
        );
        assert_eq!(
            store.spam_state(TargetRef::post(1)).await.unwrap(),
            Some(SpamState::Pending)
        );
    }

    #[tokio::test]
    async fn test_profile_changes() {
        let (pipeline, _store, harness, _dir) = sqlite_pipeline().await;
        let hooks = LifecycleHooks::new(Arc::new(pipeline));
        let user = user(5, 0, Some("I sell the best replica handbags online"));

        assert_eq!(hooks.profile_changed(&user, false, true).await.unwrap(), None);
        assert_eq!(
            hooks.profile_changed(&user, true, false).await.unwrap(),
            Some(CheckDecision::Enqueued)
        );
        assert_eq!(harness.jobs.jobs(), vec![Job::CheckTarget(TargetRef::user(5))]);
    }

    #[tokio::test]
    async fn test_comment_created() {
        let (pipeline, _store, _harness, _dir) = sqlite_pipeline().await;
        let hooks = LifecycleHooks::new(Arc::new(pipeline));

        let decision = hooks
            .comment_created(
                &comment(2, author(1, 2, 9), SPAMMY),
                &OriginMetadata::default(),
            )
            .await
            .unwrap();

        assert_eq!(decision, CheckDecision::Skipped);
    }
}
