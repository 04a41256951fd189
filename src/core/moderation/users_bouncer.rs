// Spam checks for user profiles. The biography is the checked content.

use super::bouncer::{Bouncer, BouncerDeps, TargetHandler};
use super::moderation_models::{ScoreReason, SpamSettings, TargetKind, TrustLevel};
use super::review_actions::{ActionSet, ActionSpec, ReviewAction, ReviewerCapabilities};
use super::targets::{is_bare_uri, UserTarget};
use async_trait::async_trait;
use serde_json::json;

pub struct UsersHandler;

pub type UsersBouncer = Bouncer<UsersHandler>;

impl Bouncer<UsersHandler> {
    pub fn for_users(deps: BouncerDeps) -> Self {
        Bouncer::new(UsersHandler, deps)
    }
}

#[async_trait]
impl TargetHandler for UsersHandler {
    type Target = UserTarget;

    fn kind(&self) -> TargetKind {
        TargetKind::User
    }

    fn suspect(&self, user: &UserTarget, settings: &SpamSettings) -> bool {
        if !settings.review_users || user.user.trust_level != TrustLevel::LOWEST {
            return false;
        }

        let Some(bio) = user.bio() else {
            return false;
        };
        let bio = bio.trim();

        bio.chars().count() >= settings.min_content_length && !is_bare_uri(bio)
    }

    fn before_check(&self, user: &UserTarget) -> bool {
        !user.deleted
    }

    fn spam_score_reason(&self) -> ScoreReason {
        ScoreReason::SpamUser
    }

    fn snapshot(&self, user: &UserTarget) -> serde_json::Value {
        json!({
            "username": user.user.username,
            "name": user.user.name,
            "email": user.user.email,
            "bio": user.bio_raw,
        })
    }

    fn topic_id(&self, _user: &UserTarget) -> Option<u64> {
        None
    }

    fn review_actions(&self, caps: &ReviewerCapabilities) -> ActionSet {
        let mut set = ActionSet::new();
        set.single(ActionSpec::new(ReviewAction::NotSpam, "thumbs-up"));

        if caps.is_staff {
            set.single(ActionSpec::new(ReviewAction::DeleteUser, "user-xmark").confirm());
            set.single(ActionSpec::new(ReviewAction::DeleteUserBlock, "trash-can").confirm());
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::bouncer::CheckDecision;
    use crate::core::moderation::moderation_models::{
        EscalationReason, Job, SpamState, TargetRef,
    };
    use crate::core::moderation::targets::fixtures::*;
    use crate::core::moderation::test_support::Harness;

    const BIO: &str = "I sell the best replica handbags online";

    #[test]
    fn test_suspect_rules() {
        let settings = SpamSettings::default();

        assert!(UsersHandler.suspect(&user(1, 0, Some(BIO)), &settings));
        // Only brand new accounts
        assert!(!UsersHandler.suspect(&user(1, 1, Some(BIO)), &settings));
        assert!(!UsersHandler.suspect(&user(1, 0, None), &settings));
        assert!(!UsersHandler.suspect(&user(1, 0, Some("   ")), &settings));
        assert!(!UsersHandler.suspect(&user(1, 0, Some("hi")), &settings));
        assert!(!UsersHandler.suspect(
            &user(1, 0, Some("https://replicas.example.com/shop")),
            &settings
        ));

        let mut off = SpamSettings::default();
        off.review_users = false;
        assert!(!UsersHandler.suspect(&user(1, 0, Some(BIO)), &off));
    }

    #[test]
    fn test_review_actions_depend_on_staff() {
        let set = UsersHandler.review_actions(&ReviewerCapabilities::default());
        assert!(set.has(ReviewAction::NotSpam));
        assert!(!set.has(ReviewAction::DeleteUser));

        let staff = ReviewerCapabilities {
            is_staff: true,
            ..ReviewerCapabilities::default()
        };
        let set = UsersHandler.review_actions(&staff);
        assert!(set.has(ReviewAction::DeleteUserBlock));
        assert!(set.actions().all(|a| a.action == ReviewAction::NotSpam || a.confirm));
    }

    #[tokio::test]
    async fn test_backend_error_escalates_user() {
        let harness = Harness::new();
        let bouncer = UsersBouncer::for_users(harness.deps());
        let target = user(7, 0, Some(BIO));

        assert_eq!(
            bouncer.check(&target, None).await.unwrap(),
            CheckDecision::Enqueued
        );
        assert_eq!(harness.jobs.jobs(), vec![Job::CheckTarget(TargetRef::user(7))]);

        let client = harness.client_returning(vec![Harness::backend_error("500")]);
        bouncer.check_now(&target).await.unwrap();

        let checked = client.checked();
        assert_eq!(checked[0].get("content"), Some(BIO));
        assert_eq!(checked[0].get("user_ip"), Some("10.0.0.1"));

        assert_eq!(
            harness.fields.state(TargetRef::user(7)),
            Some(SpamState::NeedsReview)
        );
        let escalations = harness.escalations.all();
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].reason, EscalationReason::BackendError);
        assert_eq!(escalations[0].topic_id, None);
        assert_eq!(escalations[0].payload["username"], "User7");
        assert_eq!(escalations[0].payload["bio"], BIO);
        assert_eq!(
            escalations[0].payload["external_error"]["msg"],
            "backend unavailable"
        );
    }

    #[tokio::test]
    async fn test_spam_user_has_no_content_side_effects() {
        let harness = Harness::new();
        let bouncer = UsersBouncer::for_users(harness.deps());
        let target = user(7, 0, Some(BIO));
        bouncer.check(&target, None).await.unwrap();
        harness.client_returning(vec![crate::core::moderation::moderation_models::Verdict::Spam]);

        bouncer.check_now(&target).await.unwrap();

        assert!(harness.content.events().is_empty());
        assert_eq!(
            harness.fields.state(TargetRef::user(7)),
            Some(SpamState::ConfirmedSpam)
        );
    }

    #[tokio::test]
    async fn test_deleted_user_is_skipped() {
        let harness = Harness::new();
        let bouncer = UsersBouncer::for_users(harness.deps());
        let mut target = user(7, 0, Some(BIO));
        bouncer.check(&target, None).await.unwrap();
        target.deleted = true;
        let client = harness.client_returning(vec![]);

        assert_eq!(bouncer.check_now(&target).await.unwrap(), None);
        assert_eq!(client.calls(), 0);
        assert_eq!(
            harness.fields.state(TargetRef::user(7)),
            Some(SpamState::Skipped)
        );
    }
}
