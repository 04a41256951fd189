// Moderation domain models - data structures for the spam-check pipeline.
//
// These are pure domain types with no HTTP or database dependencies.
// The infra layer converts them to provider payloads and table rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SPAM STATE
// ============================================================================

/// Where a target sits in the spam-check pipeline.
///
/// Persisted as a single field on the target. The vocabulary is fixed; adding
/// a state needs a data migration for the stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamState {
    /// Waiting for a backend check (fast path job or batch sweep)
    Pending,
    /// Not a candidate for checking
    Skipped,
    /// Backend (or a moderator) says spam
    ConfirmedSpam,
    /// Backend (or a moderator) says not spam
    ConfirmedHam,
    /// Escalated to the review queue
    NeedsReview,
    /// A moderator looked at it and chose to ignore it
    Dismissed,
}

impl SpamState {
    pub const ALL: [SpamState; 6] = [
        SpamState::Pending,
        SpamState::Skipped,
        SpamState::ConfirmedSpam,
        SpamState::ConfirmedHam,
        SpamState::NeedsReview,
        SpamState::Dismissed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpamState::Pending => "pending",
            SpamState::Skipped => "skipped",
            SpamState::ConfirmedSpam => "confirmed_spam",
            SpamState::ConfirmedHam => "confirmed_ham",
            SpamState::NeedsReview => "needs_review",
            SpamState::Dismissed => "dismissed",
        }
    }

    /// Decided targets never re-enter the automatic pipeline on their own.
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            SpamState::ConfirmedSpam
                | SpamState::ConfirmedHam
                | SpamState::NeedsReview
                | SpamState::Dismissed
        )
    }
}

impl fmt::Display for SpamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpamState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpamState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown spam state: {}", s))
    }
}

// ============================================================================
// TARGETS
// ============================================================================

/// The three kinds of content the pipeline knows how to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Post,
    User,
    Comment,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Post => "post",
            TargetKind::User => "user",
            TargetKind::Comment => "comment",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(TargetKind::Post),
            "user" => Ok(TargetKind::User),
            "comment" => Ok(TargetKind::Comment),
            other => Err(format!("unknown target kind: {}", other)),
        }
    }
}

/// Identifies one target: its kind plus the host's id for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub id: u64,
}

impl TargetRef {
    pub fn new(kind: TargetKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn post(id: u64) -> Self {
        Self::new(TargetKind::Post, id)
    }

    pub fn user(id: u64) -> Self {
        Self::new(TargetKind::User, id)
    }

    pub fn comment(id: u64) -> Self {
        Self::new(TargetKind::Comment, id)
    }

    /// Correlation id sent to providers that echo it back, e.g. `post-42`.
    pub fn data_id(&self) -> String {
        format!("{}-{}", self.kind, self.id)
    }

    /// Inverse of [`TargetRef::data_id`].
    pub fn from_data_id(data_id: &str) -> Option<Self> {
        let (kind, id) = data_id.split_once('-')?;
        Some(Self::new(kind.parse().ok()?, id.parse().ok()?))
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind, self.id)
    }
}

/// Ordinal trust classification of an account. Tier 0 is brand new/anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrustLevel(pub u8);

impl TrustLevel {
    pub const LOWEST: TrustLevel = TrustLevel(0);
    pub const BASIC: TrustLevel = TrustLevel(1);
}

/// The account that authored a target (or, for user targets, the account itself).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: u64,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub trust_level: TrustLevel,
    pub created_at: DateTime<Utc>,
    /// How much content the account has already published
    pub post_count: u32,
    pub groups: Vec<String>,
    pub is_system: bool,
    /// Moderators and admins
    #[serde(default)]
    pub is_staff: bool,
}

impl Author {
    /// A human account without staff powers.
    pub fn is_regular(&self) -> bool {
        !self.is_system && !self.is_staff
    }

    pub fn in_any_group(&self, groups: &[String]) -> bool {
        self.groups.iter().any(|g| groups.contains(g))
    }
}

/// Request metadata captured when the content was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

impl OriginMetadata {
    /// Fill missing values from `other`.
    pub fn or(self, other: OriginMetadata) -> OriginMetadata {
        OriginMetadata {
            ip_address: self.ip_address.or(other.ip_address),
            user_agent: self.user_agent.or(other.user_agent),
            referrer: self.referrer.or(other.referrer),
        }
    }

    /// Drop blank values so they are never persisted or sent.
    pub fn present(self) -> OriginMetadata {
        fn keep(v: Option<String>) -> Option<String> {
            v.filter(|s| !s.trim().is_empty())
        }
        OriginMetadata {
            ip_address: keep(self.ip_address),
            user_agent: keep(self.user_agent),
            referrer: keep(self.referrer),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ip_address.is_none() && self.user_agent.is_none() && self.referrer.is_none()
    }
}

/// Provider-neutral view of a target, built by the target itself and turned into
/// a provider payload by a request builder.
#[derive(Debug, Clone)]
pub struct RequestFields {
    pub target: TargetRef,
    pub site_base_url: String,
    /// `forum-post`, `reply`, `comment` or `signup`
    pub content_type: &'static str,
    pub permalink: String,
    pub author_handle: Option<String>,
    pub author_email: Option<String>,
    pub author_url: Option<String>,
    pub content: Option<String>,
    pub origin: OriginMetadata,
    /// Provider-assigned id from an earlier check, needed for feedback
    pub task_id: Option<String>,
}

/// Outbound field set for one provider call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestArgs(BTreeMap<String, String>);

impl RequestArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert only when a value exists; absent values are omitted, never sent blank.
    pub fn insert_opt(&mut self, key: &str, value: Option<impl Into<String>>) {
        if let Some(value) = value {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    #[cfg(test)]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn extend(&mut self, other: RequestArgs) {
        self.0.extend(other.0);
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Strip surrounding whitespace and keep at most `max_chars` characters.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    content.trim().chars().take(max_chars).collect()
}

// ============================================================================
// VERDICTS
// ============================================================================

/// Error reported by the backend itself (not a transport failure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendError {
    pub code: String,
    pub message: Option<String>,
    /// Raw error fields as the provider sent them, kept for operators
    pub detail: BTreeMap<String, String>,
}

impl BackendError {
    /// Rate-limiter key. Non-numeric codes collapse to 0.
    pub fn limiter_key(&self) -> String {
        format!("backend_error_{}", self.code.trim().parse::<i64>().unwrap_or(0))
    }
}

/// Normalized outcome of one backend check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Spam,
    Ham,
    Error(BackendError),
}

/// Feedback a moderator can send back to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Spam,
    Ham,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::Spam => "spam",
            FeedbackStatus::Ham => "ham",
        }
    }
}

impl FromStr for FeedbackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spam" => Ok(FeedbackStatus::Spam),
            "ham" => Ok(FeedbackStatus::Ham),
            other => Err(format!("invalid feedback status: {}", other)),
        }
    }
}

// ============================================================================
// ESCALATIONS
// ============================================================================

/// Why a target was put in front of a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    SpamDetected,
    BackendError,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::SpamDetected => "spam_detected",
            EscalationReason::BackendError => "backend_error",
        }
    }
}

/// Reason tag attached to an escalation score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreReason {
    SpamPost,
    SpamComment,
    SpamUser,
    BackendServerError,
}

impl ScoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreReason::SpamPost => "spam_post",
            ScoreReason::SpamComment => "spam_comment",
            ScoreReason::SpamUser => "spam_user",
            ScoreReason::BackendServerError => "backend_server_error",
        }
    }
}

/// Score attached to an escalation. Scores always force review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationScore {
    pub weight: f32,
    pub reason: ScoreReason,
    pub force_review: bool,
}

impl EscalationScore {
    pub fn spam(reason: ScoreReason) -> Self {
        Self {
            weight: 1.0,
            reason,
            force_review: true,
        }
    }
}

/// Everything the review queue needs to create one item.
#[derive(Debug, Clone, Serialize)]
pub struct NewEscalation {
    pub target: TargetRef,
    pub topic_id: Option<u64>,
    pub reason: EscalationReason,
    pub payload: serde_json::Value,
    pub reviewable_by_moderator: bool,
    pub actions: super::review_actions::ActionSet,
}

/// Handle returned by the review queue for a created escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationHandle {
    pub id: u64,
    pub target: TargetRef,
}

/// Notice sent to an author about their content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    RemovedAsSpam,
    RestoredNotSpam,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorNotice {
    pub user_id: u64,
    pub kind: NoticeKind,
    pub topic_title: String,
    pub link: String,
}

// ============================================================================
// JOBS
// ============================================================================

/// Work handed to the asynchronous job queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Check one target right away (fast path)
    CheckTarget(TargetRef),
    /// Report a moderator decision back to the provider
    SubmitFeedback {
        target: TargetRef,
        status: FeedbackStatus,
        args: RequestArgs,
    },
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Which anti-spam backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiSpamProvider {
    /// Content-hash style REST API (api key in the subdomain)
    Akismet,
    /// Signed REST API (secret id/key + business id)
    Netease,
}

impl FromStr for AntiSpamProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "akismet" => Ok(AntiSpamProvider::Akismet),
            "netease" => Ok(AntiSpamProvider::Netease),
            other => Err(format!("unknown anti-spam provider: {}", other)),
        }
    }
}

impl fmt::Display for AntiSpamProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AntiSpamProvider::Akismet => write!(f, "akismet"),
            AntiSpamProvider::Netease => write!(f, "netease"),
        }
    }
}

/// Runtime configuration for the spam-check pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamSettings {
    /// Global switch for the whole pipeline
    pub enabled: bool,
    pub provider: AntiSpamProvider,
    pub akismet_api_key: String,
    pub netease_secret_id: String,
    pub netease_secret_key: String,
    pub netease_business_id: String,
    /// Public URL of the site, used for permalinks and the `blog` field
    pub site_base_url: String,
    /// Host application name for the provider User-Agent
    pub app_name: String,
    pub app_version: String,
    /// Content shorter than this (after trimming) is never checked
    pub min_content_length: usize,
    /// Authors in any of these groups are never checked
    pub skip_groups: Vec<String>,
    /// Authors with more content than this are never checked
    pub skip_content_count: u32,
    /// Whether the author's email is sent to the provider
    pub transmit_email: bool,
    /// Whether authors are told when their content is removed or restored
    pub notify_user: bool,
    /// Whether user profiles are checked at all
    pub review_users: bool,
    /// Always check the first post of a tier-1 author
    pub review_tier1_first_post: bool,
    /// Always check the first comment of a tier-1 author
    pub review_tier1_first_comment: bool,
    pub http_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// How long captured IP/user-agent/referrer values are kept
    pub field_retention_days: i64,
}

impl Default for SpamSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: AntiSpamProvider::Akismet,
            akismet_api_key: String::new(),
            netease_secret_id: String::new(),
            netease_secret_key: String::new(),
            netease_business_id: String::new(),
            site_base_url: "http://localhost".to_string(),
            app_name: "Forum".to_string(),
            app_version: "1.0".to_string(),
            min_content_length: 20,
            skip_groups: Vec::new(),
            skip_content_count: 3,
            transmit_email: true,
            notify_user: true,
            review_users: true,
            review_tier1_first_post: true,
            review_tier1_first_comment: true,
            http_timeout_secs: 15,
            sweep_interval_secs: 600,
            field_retention_days: 60,
        }
    }
}

impl SpamSettings {
    /// True when the active provider is missing credentials.
    pub fn api_secret_blank(&self) -> bool {
        match self.provider {
            AntiSpamProvider::Akismet => self.akismet_api_key.trim().is_empty(),
            AntiSpamProvider::Netease => {
                self.netease_secret_id.trim().is_empty()
                    || self.netease_secret_key.trim().is_empty()
                    || self.netease_business_id.trim().is_empty()
            }
        }
    }
}
