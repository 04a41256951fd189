// Periodic batch work: checking pending targets, pruning side-channel fields,
// reporting state counts.

use super::pipeline::Pipeline;
use crate::core::moderation::{
    AntiSpamClient, Bouncer, BouncerError, SpamState, TargetFieldStore, TargetHandler,
    TargetSource, Verdict,
};
use chrono::{Duration, Utc};
use std::collections::HashMap;

/// Outcome of one sweep across every target kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub spam: usize,
    pub failed: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.checked += other.checked;
        self.spam += other.spam;
        self.failed += other.failed;
    }
}

/// Check every pending target of every kind against the active provider.
pub async fn sweep(pipeline: &Pipeline) -> Result<SweepReport, BouncerError> {
    let Some(client) = pipeline.deps.anti_spam.client().await else {
        tracing::debug!("Anti-spam disabled, sweep skipped");
        return Ok(SweepReport::default());
    };

    let mut report = SweepReport::default();
    report.merge(
        sweep_kind(
            &pipeline.posts,
            pipeline.post_source.as_ref(),
            client.as_ref(),
        )
        .await?,
    );
    report.merge(
        sweep_kind(
            &pipeline.users,
            pipeline.user_source.as_ref(),
            client.as_ref(),
        )
        .await?,
    );
    report.merge(
        sweep_kind(
            &pipeline.comments,
            pipeline.comment_source.as_ref(),
            client.as_ref(),
        )
        .await?,
    );

    tracing::info!(
        checked = report.checked,
        spam_count = report.spam,
        failed = report.failed,
        "Spam sweep finished"
    );
    Ok(report)
}

/// One target failing does not stop the rest of the batch.
pub async fn sweep_kind<H: TargetHandler>(
    bouncer: &Bouncer<H>,
    source: &dyn TargetSource<H::Target>,
    client: &dyn AntiSpamClient,
) -> Result<SweepReport, BouncerError> {
    let mut report = SweepReport::default();

    for id in bouncer.to_check().await? {
        let Some(target) = source.find(id).await? else {
            tracing::warn!(kind = %bouncer.kind(), target_id = id, "Pending target no longer exists");
            continue;
        };

        match bouncer.perform_check(client, &target).await {
            Ok(Some(verdict)) => {
                report.checked += 1;
                if verdict == Verdict::Spam {
                    report.spam += 1;
                }
            }
            Ok(None) => {}
            Err(err) => {
                report.failed += 1;
                tracing::error!(kind = %bouncer.kind(), target_id = id, error = %err, "Spam check failed");
            }
        }
    }

    Ok(report)
}

/// Drop captured IP/user-agent/referrer values past the retention window.
pub async fn clean_old_fields(
    fields: &dyn TargetFieldStore,
    retention_days: i64,
) -> Result<u64, BouncerError> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let deleted = fields.delete_side_channel_older_than(cutoff).await?;
    if deleted > 0 {
        tracing::info!(deleted, retention_days, "Cleaned old spam fields");
    }
    Ok(deleted)
}

/// Log the per-state counts of every kind.
pub async fn log_stats(pipeline: &Pipeline) -> Result<(), BouncerError> {
    let stats: [(&str, HashMap<SpamState, u64>); 3] = [
        ("post", pipeline.posts.stats().await?),
        ("user", pipeline.users.stats().await?),
        ("comment", pipeline.comments.stats().await?),
    ];

    for (kind, counts) in stats {
        tracing::info!(
            kind,
            pending = counts[&SpamState::Pending],
            skipped = counts[&SpamState::Skipped],
            confirmed_spam = counts[&SpamState::ConfirmedSpam],
            confirmed_ham = counts[&SpamState::ConfirmedHam],
            needs_review = counts[&SpamState::NeedsReview],
            dismissed = counts[&SpamState::Dismissed],
            "Spam state counts"
        );
    }
    Ok(())
}
