// Target snapshots handed to the bouncers by the host.
//
// The host owns these records; the pipeline only reads them and asks the host
// (through `ContentModerator`) to act on them.

use super::moderation_models::{Author, OriginMetadata, RequestFields, TargetRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Anything the pipeline can check.
pub trait SpamTarget: Send + Sync {
    fn target_ref(&self) -> TargetRef;

    fn author(&self) -> &Author;

    /// Provider-neutral request view. Persisted side-channel fields and the
    /// task id are merged in by the bouncer.
    fn request_fields(&self, site_base_url: &str) -> RequestFields;
}

/// The conversation a post or comment lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicInfo {
    pub id: u64,
    pub title: String,
    /// Private conversations are never sent to a provider
    pub private_message: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostTarget {
    pub id: u64,
    /// Missing when the topic has been hard deleted
    pub topic: Option<TopicInfo>,
    pub author: Author,
    pub post_number: u32,
    pub raw: String,
    pub cooked: String,
    pub user_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PostTarget {
    pub fn is_first_post(&self) -> bool {
        self.post_number == 1
    }

    /// Relative URL of the post.
    pub fn url(&self) -> String {
        match &self.topic {
            Some(topic) => format!("/t/{}/{}", topic.id, self.post_number),
            None => format!("/p/{}", self.id),
        }
    }

    /// Content as sent to providers. A topic's first post carries the title.
    pub fn rendered_content(&self) -> String {
        if !self.is_first_post() {
            return self.raw.clone();
        }
        let title = self.topic.as_ref().map(|t| t.title.as_str()).unwrap_or("");
        format!("{}\n\n{}", title, self.raw)
    }
}

impl SpamTarget for PostTarget {
    fn target_ref(&self) -> TargetRef {
        TargetRef::post(self.id)
    }

    fn author(&self) -> &Author {
        &self.author
    }

    fn request_fields(&self, site_base_url: &str) -> RequestFields {
        RequestFields {
            target: self.target_ref(),
            site_base_url: site_base_url.to_string(),
            content_type: if self.is_first_post() {
                "forum-post"
            } else {
                "reply"
            },
            permalink: format!("{}{}", site_base_url, self.url()),
            author_handle: Some(self.author.username.clone()),
            author_email: self.author.email.clone(),
            author_url: self.author.website.clone(),
            content: Some(self.rendered_content()),
            origin: OriginMetadata::default(),
            task_id: None,
        }
    }
}

/// A user profile, checked on its biography.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTarget {
    pub user: Author,
    pub bio_raw: Option<String>,
    /// Taken from the most recent session of the account
    pub last_ip: Option<String>,
    pub last_user_agent: Option<String>,
    pub deleted: bool,
}

impl UserTarget {
    pub fn bio(&self) -> Option<&str> {
        self.bio_raw.as_deref().filter(|b| !b.trim().is_empty())
    }
}

impl SpamTarget for UserTarget {
    fn target_ref(&self) -> TargetRef {
        TargetRef::user(self.user.id)
    }

    fn author(&self) -> &Author {
        &self.user
    }

    fn request_fields(&self, site_base_url: &str) -> RequestFields {
        RequestFields {
            target: self.target_ref(),
            site_base_url: site_base_url.to_string(),
            content_type: "signup",
            permalink: format!(
                "{}/u/{}",
                site_base_url,
                self.user.username.to_lowercase()
            ),
            author_handle: Some(self.user.username.clone()),
            author_email: self.user.email.clone(),
            author_url: self.user.website.clone(),
            content: self.bio_raw.clone(),
            origin: OriginMetadata {
                ip_address: self.last_ip.clone(),
                user_agent: self.last_user_agent.clone(),
                referrer: None,
            },
            task_id: None,
        }
    }
}

/// The post a comment hangs off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentParent {
    pub post_id: u64,
    pub post_number: u32,
    pub topic: Option<TopicInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentTarget {
    pub id: u64,
    /// Missing when the parent post has been hard deleted
    pub parent: Option<CommentParent>,
    pub author: Author,
    pub raw: String,
    pub cooked: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CommentTarget {
    pub fn topic(&self) -> Option<&TopicInfo> {
        self.parent.as_ref().and_then(|p| p.topic.as_ref())
    }

    pub fn url(&self) -> String {
        match &self.parent {
            Some(CommentParent {
                post_number,
                topic: Some(topic),
                ..
            }) => format!("/t/{}/{}#comment-{}", topic.id, post_number, self.id),
            Some(parent) => format!("/p/{}#comment-{}", parent.post_id, self.id),
            None => format!("/comments/{}", self.id),
        }
    }
}

impl SpamTarget for CommentTarget {
    fn target_ref(&self) -> TargetRef {
        TargetRef::comment(self.id)
    }

    fn author(&self) -> &Author {
        &self.author
    }

    fn request_fields(&self, site_base_url: &str) -> RequestFields {
        RequestFields {
            target: self.target_ref(),
            site_base_url: site_base_url.to_string(),
            content_type: "comment",
            permalink: format!("{}{}", site_base_url, self.url()),
            author_handle: Some(self.author.username.clone()),
            author_email: self.author.email.clone(),
            author_url: self.author.website.clone(),
            content: Some(self.raw.clone()),
            origin: OriginMetadata::default(),
            task_id: None,
        }
    }
}

/// True when the whole (trimmed) text is one URI reference, absolute
/// (`https://a.example/x`) or scheme-less (`www.a.example/x`).
///
/// Link-only content already passed the host's link limits for the author,
/// so it is not worth a provider call.
pub fn is_bare_uri(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(is_uri_char) {
        return false;
    }

    match url::Url::parse(text) {
        Ok(_) => true,
        Err(url::ParseError::RelativeUrlWithoutBase) => url::Url::parse("http://host.invalid/")
            .and_then(|base| base.join(text))
            .is_ok(),
        Err(_) => false,
    }
}

/// Unreserved, reserved and `%`; anything else (spaces, quotes, brackets,
/// non-ASCII) is not part of a literal URI.
fn is_uri_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-._~:/?#[]@!$&'()*+,;=%".contains(c)
}
