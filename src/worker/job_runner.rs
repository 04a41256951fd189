// Drains the job queue: fast-path checks and feedback submissions.

use super::pipeline::Pipeline;
use crate::core::moderation::{
    Bouncer, BouncerError, FeedbackStatus, Job, RequestArgs, TargetHandler, TargetKind, TargetRef,
    TargetSource,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Process jobs until every sender is dropped.
///
/// A failed job is logged and dropped. Targets left `pending` are picked up by
/// the next sweep.
pub async fn run(pipeline: Arc<Pipeline>, mut receiver: mpsc::Receiver<Job>) {
    tracing::info!("Job runner started");

    while let Some(job) = receiver.recv().await {
        if let Err(err) = handle(&pipeline, job.clone()).await {
            tracing::error!(job = ?job, error = %err, "Job failed");
        }
    }

    tracing::info!("Job runner stopped");
}

pub async fn handle(pipeline: &Pipeline, job: Job) -> Result<(), BouncerError> {
    match job {
        Job::CheckTarget(target) => check_target(pipeline, target).await,
        Job::SubmitFeedback {
            target,
            status,
            args,
        } => submit_feedback(pipeline, target, status, &args).await,
    }
}

async fn check_target(pipeline: &Pipeline, target: TargetRef) -> Result<(), BouncerError> {
    match target.kind {
        TargetKind::Post => {
            check_one(&pipeline.posts, pipeline.post_source.as_ref(), target.id).await
        }
        TargetKind::User => {
            check_one(&pipeline.users, pipeline.user_source.as_ref(), target.id).await
        }
        TargetKind::Comment => {
            check_one(
                &pipeline.comments,
                pipeline.comment_source.as_ref(),
                target.id,
            )
            .await
        }
    }
}

async fn check_one<H: TargetHandler>(
    bouncer: &Bouncer<H>,
    source: &dyn TargetSource<H::Target>,
    id: u64,
) -> Result<(), BouncerError> {
    let Some(target) = source.find(id).await? else {
        tracing::warn!(kind = %bouncer.kind(), target_id = id, "Target vanished before its check");
        return Ok(());
    };

    match bouncer.check_now(&target).await? {
        Some(verdict) => {
            tracing::info!(kind = %bouncer.kind(), target_id = id, verdict = ?verdict, "Checked target");
        }
        None => {
            tracing::debug!(kind = %bouncer.kind(), target_id = id, "Check skipped");
        }
    }
    Ok(())
}

async fn submit_feedback(
    pipeline: &Pipeline,
    target: TargetRef,
    status: FeedbackStatus,
    args: &RequestArgs,
) -> Result<(), BouncerError> {
    let Some(client) = pipeline.deps.anti_spam.client().await else {
        tracing::debug!(kind = %target.kind, target_id = target.id, "Anti-spam disabled, feedback dropped");
        return Ok(());
    };

    if client.submit_feedback(status, args).await? {
        tracing::info!(kind = %target.kind, target_id = target.id, status = %status.as_str(), "Feedback submitted");
    } else {
        tracing::info!(kind = %target.kind, target_id = target.id, "Nothing to send as feedback");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::targets::fixtures::*;
    use crate::core::moderation::{SpamState, TargetFieldStore, Verdict};
    use crate::worker::pipeline::testing::{seed_post, sqlite_pipeline};

    const SPAMMY: &str = "Buy cheap watches at my store today";

    #[tokio::test]
    async fn test_check_job_marks_spam() {
        let (pipeline, store, harness, _dir) = sqlite_pipeline().await;
        let post = post(1, author(1, 0, 0), SPAMMY);
        seed_post(&store, &post).await;
        store
            .set_spam_state(TargetRef::post(1), SpamState::Pending)
            .await
            .unwrap();
        let client = harness.client_returning(vec![Verdict::Spam]);

        handle(&pipeline, Job::CheckTarget(TargetRef::post(1)))
            .await
            .unwrap();

        assert_eq!(client.calls(), 1);
        assert_eq!(
            store.spam_state(TargetRef::post(1)).await.unwrap(),
            Some(SpamState::ConfirmedSpam)
        );
        let removed = TargetSource::<crate::core::moderation::PostTarget>::find(store.as_ref(), 1)
            .await
            .unwrap()
            .unwrap();
        assert!(removed.deleted_at.is_some());
        assert_eq!(store.notices_for(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_target_is_not_an_error() {
        let (pipeline, _store, harness, _dir) = sqlite_pipeline().await;
        let client = harness.client_returning(vec![Verdict::Spam]);

        handle(&pipeline, Job::CheckTarget(TargetRef::comment(42)))
            .await
            .unwrap();

        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_client_failure_leaves_target_pending() {
        let (pipeline, store, harness, _dir) = sqlite_pipeline().await;
        seed_post(&store, &post(1, author(1, 0, 0), SPAMMY)).await;
        store
            .set_spam_state(TargetRef::post(1), SpamState::Pending)
            .await
            .unwrap();
        harness.failing_client();

        let result = handle(&pipeline, Job::CheckTarget(TargetRef::post(1))).await;

        assert!(matches!(result, Err(BouncerError::Client(_))));
        assert_eq!(
            store.spam_state(TargetRef::post(1)).await.unwrap(),
            Some(SpamState::Pending)
        );
    }

    #[tokio::test]
    async fn test_feedback_job_reaches_client() {
        let (pipeline, _store, harness, _dir) = sqlite_pipeline().await;
        let client = harness.client_returning(Vec::new());
        let mut args = RequestArgs::new();
        args.insert("comment_content", "hello");

        handle(
            &pipeline,
            Job::SubmitFeedback {
                target: TargetRef::post(1),
                status: FeedbackStatus::Ham,
                args: args.clone(),
            },
        )
        .await
        .unwrap();

        assert_eq!(client.feedback(), vec![(FeedbackStatus::Ham, args)]);
    }

    #[tokio::test]
    async fn test_feedback_dropped_without_client() {
        let (pipeline, _store, _harness, _dir) = sqlite_pipeline().await;

        let result = handle(
            &pipeline,
            Job::SubmitFeedback {
                target: TargetRef::post(1),
                status: FeedbackStatus::Spam,
                args: RequestArgs::new(),
            },
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_runner_drains_until_closed() {
        let (pipeline, store, harness, _dir) = sqlite_pipeline().await;
        seed_post(&store, &post(1, author(1, 0, 0), SPAMMY)).await;
        store
            .set_spam_state(TargetRef::post(1), SpamState::Pending)
            .await
            .unwrap();
        harness.client_returning(vec![Verdict::Ham]);
        let (sender, receiver) = mpsc::channel(4);

        sender
            .send(Job::CheckTarget(TargetRef::post(1)))
            .await
            .unwrap();
        drop(sender);
        run(Arc::new(pipeline), receiver).await;

        assert_eq!(
            store.spam_state(TargetRef::post(1)).await.unwrap(),
            Some(SpamState::ConfirmedHam)
        );
    }
}
