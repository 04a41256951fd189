use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::moderation::{
    truncate_content, AntiSpamClient, AntiSpamProvider, BackendError, ClientError,
    FeedbackStatus, RequestArgs, RequestBuilder, RequestFields, RequestMunger, Verdict,
};

const COMMENT_CHECK_PATH: &str = "comment-check";
const SUBMIT_FEEDBACK_SUCCESS: &str = "Thanks for making the web a better place.";
const MAX_CONTENT_CHARS: usize = 32_000;

const ERROR_HEADER: &str = "x-akismet-error";
const ALERT_CODE_HEADER: &str = "x-akismet-alert-code";
const ALERT_MSG_HEADER: &str = "x-akismet-alert-msg";
const DEBUG_HEADER: &str = "x-akismet-debug-help";

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const UNKNOWN_ERROR: &str = "Unknown error";

/// Client for the content-hash style provider. The API key lives in the host name.
pub struct AkismetClient {
    http: Client,
    api_url: String,
    blog: String,
    user_agent: String,
}

/// The parts of a provider reply the classifiers look at.
#[derive(Debug, Clone, Default)]
pub struct AkismetResponse {
    /// Header names lower-cased
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl AkismetResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

impl AkismetClient {
    pub fn new(http: Client, api_key: &str, blog: &str, user_agent: &str) -> Self {
        Self {
            http,
            api_url: format!("https://{}.rest.akismet.com/1.1", api_key.trim()),
            blog: blog.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Body actually sent: bounded content plus the site's `blog` field.
    fn prepare(&self, args: &RequestArgs) -> RequestArgs {
        let mut body = args.clone();
        if let Some(content) = body.remove("comment_content") {
            body.insert("comment_content", truncate_content(&content, MAX_CONTENT_CHARS));
        }
        body.insert("blog", self.blog.clone());
        body
    }

    async fn post(&self, path: &str, args: &RequestArgs) -> Result<AkismetResponse, ClientError> {
        let resp = self
            .http
            .post(format!("{}/{}", self.api_url, path))
            .header(USER_AGENT, &self.user_agent)
            .form(&self.prepare(args))
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(ClientError::Http(resp.status().to_string()));
        }

        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp.text().await?;

        Ok(AkismetResponse { headers, body })
    }
}

/// Map a `comment-check` reply onto a verdict.
///
/// An error header wins over the body. Anything but `true`/`false` after that
/// is a local failure.
pub fn classify_comment_check(resp: &AkismetResponse) -> Result<Verdict, ClientError> {
    if let Some(error) = resp.header(ERROR_HEADER) {
        let code = resp.header(ALERT_CODE_HEADER);
        let msg = resp.header(ALERT_MSG_HEADER);

        let mut detail = BTreeMap::new();
        detail.insert("error".to_string(), error.to_string());
        if let Some(code) = code {
            detail.insert("code".to_string(), code.to_string());
        }
        if let Some(msg) = msg {
            detail.insert("msg".to_string(), msg.to_string());
        }

        return Ok(Verdict::Error(BackendError {
            code: code.unwrap_or_default().to_string(),
            message: msg.map(str::to_string),
            detail,
        }));
    }

    match resp.body.as_str() {
        "true" => Ok(Verdict::Spam),
        "false" => Ok(Verdict::Ham),
        "invalid" => Err(ClientError::Protocol(INVALID_CREDENTIALS.to_string())),
        _ => Err(ClientError::Protocol(
            resp.header(DEBUG_HEADER).unwrap_or(UNKNOWN_ERROR).to_string(),
        )),
    }
}

pub fn classify_feedback(resp: &AkismetResponse) -> Result<bool, ClientError> {
    if resp.body == SUBMIT_FEEDBACK_SUCCESS {
        Ok(true)
    } else {
        Err(ClientError::Protocol(UNKNOWN_ERROR.to_string()))
    }
}

#[async_trait]
impl AntiSpamClient for AkismetClient {
    fn provider(&self) -> AntiSpamProvider {
        AntiSpamProvider::Akismet
    }

    async fn check(&self, args: &RequestArgs) -> Result<Verdict, ClientError> {
        let resp = self.post(COMMENT_CHECK_PATH, args).await?;
        classify_comment_check(&resp)
    }

    async fn submit_feedback(
        &self,
        status: FeedbackStatus,
        args: &RequestArgs,
    ) -> Result<bool, ClientError> {
        let has_content = args
            .get("comment_content")
            .is_some_and(|c| !c.trim().is_empty());
        if !has_content {
            return Ok(false);
        }

        let path = format!("submit-{}", status.as_str());
        let resp = self.post(&path, args).await?;
        classify_feedback(&resp)
    }
}

// ============================================================================
// REQUEST BUILDER
// ============================================================================

/// Builds the form payload. Check and feedback share the same fields.
pub struct AkismetRequestBuilder {
    transmit_email: bool,
    munger: Arc<dyn RequestMunger>,
}

impl AkismetRequestBuilder {
    pub fn new(transmit_email: bool, munger: Arc<dyn RequestMunger>) -> Self {
        Self {
            transmit_email,
            munger,
        }
    }

    fn build(&self, fields: &RequestFields) -> RequestArgs {
        let mut args = RequestArgs::new();
        args.insert("blog", fields.site_base_url.clone());
        args.insert("content_type", fields.content_type);
        args.insert("permalink", fields.permalink.clone());
        args.insert_opt("comment_author", fields.author_handle.clone());
        args.insert_opt("comment_content", fields.content.clone());
        args.insert_opt("comment_author_url", fields.author_url.clone());
        args.insert_opt("user_ip", fields.origin.ip_address.clone());
        args.insert_opt("user_agent", fields.origin.user_agent.clone());
        args.insert_opt("referrer", fields.origin.referrer.clone());

        // Optional by site setting
        if self.transmit_email {
            args.insert_opt("comment_author_email", fields.author_email.clone());
        }

        self.munger.munge(&mut args);
        args
    }
}

impl RequestBuilder for AkismetRequestBuilder {
    fn for_check(&self, fields: &RequestFields) -> RequestArgs {
        self.build(fields)
    }

    fn for_feedback(&self, fields: &RequestFields) -> RequestArgs {
        self.build(fields)
    }
}
