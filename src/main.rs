// This is the entry point of the content bouncer.
//
// **Architecture Overview:**
// - `core/` = Spam pipeline logic (provider- and storage-agnostic)
// - `infra/` = Implementations of core traits (provider clients, SQLite, job queue)
// - `worker/` = Adapters that drive the pipeline (host events, jobs, sweeps)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Start the host event intake, the job runner and the periodic sweeps
// 4. Shut down cleanly on Ctrl-C

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "worker/worker_layer.rs"]
mod worker;

use crate::core::moderation::{
    AntiSpamProvider, BouncerDeps, KeyedRateLimiter, NoopMunger, SpamSettings, TargetLocks,
};
use crate::infra::antispam::AntiSpamService;
use crate::infra::jobs::ChannelJobQueue;
use crate::infra::moderation::SqliteHostStore;
use crate::worker::{intake, job_runner, sweeps, HostEventIntake, Pipeline};
use chrono::{Duration, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::time::sleep;

const JOB_QUEUE_CAPACITY: usize = 1024;
const CLEANUP_INTERVAL_SECS: u64 = 24 * 60 * 60;
const INTAKE_POLL_MILLIS: u64 = 1000;

/// Build settings from `SPAM_*` variables. Missing or unparseable values fall
/// back to the defaults.
fn settings_from<F>(lookup: F) -> SpamSettings
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
        lookup(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    let defaults = SpamSettings::default();
    let text = |key: &str, default: String| lookup(key).unwrap_or(default);

    SpamSettings {
        enabled: parsed(&lookup, "SPAM_ENABLED", defaults.enabled),
        provider: parsed::<AntiSpamProvider>(&lookup, "SPAM_PROVIDER", defaults.provider),
        akismet_api_key: text("SPAM_AKISMET_API_KEY", defaults.akismet_api_key),
        netease_secret_id: text("SPAM_NETEASE_SECRET_ID", defaults.netease_secret_id),
        netease_secret_key: text("SPAM_NETEASE_SECRET_KEY", defaults.netease_secret_key),
        netease_business_id: text("SPAM_NETEASE_BUSINESS_ID", defaults.netease_business_id),
        site_base_url: text("SPAM_SITE_BASE_URL", defaults.site_base_url),
        app_name: text("SPAM_APP_NAME", defaults.app_name),
        app_version: text("SPAM_APP_VERSION", defaults.app_version),
        min_content_length: parsed(&lookup, "SPAM_MIN_CONTENT_LENGTH", defaults.min_content_length),
        skip_groups: lookup("SPAM_SKIP_GROUPS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.skip_groups),
        skip_content_count: parsed(&lookup, "SPAM_SKIP_CONTENT_COUNT", defaults.skip_content_count),
        transmit_email: parsed(&lookup, "SPAM_TRANSMIT_EMAIL", defaults.transmit_email),
        notify_user: parsed(&lookup, "SPAM_NOTIFY_USER", defaults.notify_user),
        review_users: parsed(&lookup, "SPAM_REVIEW_USERS", defaults.review_users),
        review_tier1_first_post: parsed(
            &lookup,
            "SPAM_REVIEW_TIER1_FIRST_POST",
            defaults.review_tier1_first_post,
        ),
        review_tier1_first_comment: parsed(
            &lookup,
            "SPAM_REVIEW_TIER1_FIRST_COMMENT",
            defaults.review_tier1_first_comment,
        ),
        http_timeout_secs: parsed(&lookup, "SPAM_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
        sweep_interval_secs: parsed(
            &lookup,
            "SPAM_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval_secs,
        ),
        field_retention_days: parsed(
            &lookup,
            "SPAM_FIELD_RETENTION_DAYS",
            defaults.field_retention_days,
        ),
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let settings = settings_from(|key| std::env::var(key).ok());
    if settings.api_secret_blank() {
        tracing::warn!(
            provider = %settings.provider,
            "No credentials for the active provider, checks are disabled"
        );
    }

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let data_dir = "data";
    std::fs::create_dir_all(data_dir).expect("Failed to create data directory for SQLite files");
    let db_path = std::env::var("BOUNCER_DATABASE_PATH")
        .unwrap_or_else(|_| format!("{}/bouncer.db", data_dir));

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let http_timeout = StdDuration::from_secs(settings.http_timeout_secs);
    let sweep_interval = StdDuration::from_secs(settings.sweep_interval_secs.max(1));
    let settings = Arc::new(RwLock::new(settings));

    let store = Arc::new(
        SqliteHostStore::new(&db_path)
            .await
            .expect("Failed to initialize SQLite host store"),
    );

    let anti_spam = Arc::new(
        AntiSpamService::new(
            Arc::clone(&settings),
            store.clone(),
            Arc::new(NoopMunger),
            http_timeout,
        )
        .expect("Failed to create anti-spam HTTP client"),
    );

    let (job_queue, job_receiver) = ChannelJobQueue::new(JOB_QUEUE_CAPACITY);
    let error_limiter = Arc::new(KeyedRateLimiter::for_backend_errors());

    let deps = BouncerDeps {
        settings: Arc::clone(&settings),
        anti_spam,
        fields: store.clone(),
        escalations: store.clone(),
        jobs: Arc::new(job_queue),
        content: store.clone(),
        error_limiter: Arc::clone(&error_limiter),
        locks: Arc::new(TargetLocks::new()),
    };
    let pipeline = Arc::new(Pipeline::new(
        deps,
        store.clone(),
        store.clone(),
        store.clone(),
    ));

    // ========================================================================
    // BACKGROUND TASKS
    // ========================================================================

    tokio::spawn(job_runner::run(Arc::clone(&pipeline), job_receiver));

    // Content and review events written by the host
    tokio::spawn(intake::run(
        HostEventIntake::new(Arc::clone(&pipeline), store.clone()),
        StdDuration::from_millis(INTAKE_POLL_MILLIS),
    ));

    // Topics hidden because their first post was removed as spam
    let mut topic_events = store.subscribe_topic_events();
    tokio::spawn(async move {
        loop {
            match topic_events.recv().await {
                Ok(topic_id) => tracing::info!(topic_id, "Topic hidden as spam"),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Topic event listener fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Batch check of everything left pending
    let sweep_pipeline = Arc::clone(&pipeline);
    let sweep_limiter = Arc::clone(&error_limiter);
    tokio::spawn(async move {
        loop {
            sleep(sweep_interval).await;

            tracing::debug!("Starting spam sweep...");
            if let Err(err) = sweeps::sweep(&sweep_pipeline).await {
                tracing::warn!("Spam sweep failed: {}", err);
            }
            sweep_limiter.prune();
        }
    });

    // Daily cleanup of captured IPs/user agents and handled events, plus a stats line
    let cleanup_pipeline = Arc::clone(&pipeline);
    let cleanup_settings = Arc::clone(&settings);
    let cleanup_store = store.clone();
    tokio::spawn(async move {
        loop {
            let retention_days = cleanup_settings.read().await.field_retention_days;
            if let Err(err) =
                sweeps::clean_old_fields(cleanup_pipeline.deps.fields.as_ref(), retention_days)
                    .await
            {
                tracing::warn!("Spam field cleanup failed: {}", err);
            }
            let cutoff = Utc::now() - Duration::days(retention_days);
            if let Err(err) = cleanup_store.delete_processed_host_events(cutoff).await {
                tracing::warn!("Host event cleanup failed: {}", err);
            }
            if let Err(err) = sweeps::log_stats(&cleanup_pipeline).await {
                tracing::warn!("Spam stats failed: {}", err);
            }

            sleep(StdDuration::from_secs(CLEANUP_INTERVAL_SECS)).await;
        }
    });

    tracing::info!(database = %db_path, "Content bouncer running");

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", err);
    }
    tracing::info!("Shutting down");
}
