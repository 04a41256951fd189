use async_trait::async_trait;
use rand::Rng;
use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::moderation::{
    truncate_content, AntiSpamClient, AntiSpamProvider, BackendError, BouncerError, ClientError,
    FeedbackStatus, RequestArgs, RequestBuilder, RequestFields, RequestMunger, TargetFieldStore,
    TargetRef, Verdict,
};

const API_BASE_URL: &str = "http://as.dun.163.com";
const CHECK_PATH: &str = "v5/text/check";
const FEEDBACK_PATH: &str = "v2/text/feedback";
const CHECK_VERSION: &str = "v5.2";
const FEEDBACK_VERSION: &str = "v2";
const SIGNATURE_METHOD: &str = "MD5";
const NONCE_UPPER_BOUND: u64 = 100_000_000_000;
const MAX_CONTENT_CHARS: usize = 10_000;

/// Id/secret pair plus the business id the account checks text under.
#[derive(Debug, Clone)]
pub struct NeteaseCredentials {
    pub secret_id: String,
    pub secret_key: String,
    pub business_id: String,
}

/// Client for the signed provider.
///
/// The check response carries a task id needed later for feedback; the client
/// stores it on the target itself, so it needs the field store.
pub struct NeteaseClient {
    http: Client,
    base_url: String,
    credentials: NeteaseCredentials,
    user_agent: String,
    fields: Arc<dyn TargetFieldStore>,
}

/// A parsed check reply.
#[derive(Debug, Clone, PartialEq)]
pub struct NeteaseCheck {
    pub verdict: Verdict,
    pub task_id: Option<String>,
}

impl NeteaseClient {
    pub fn new(
        http: Client,
        credentials: NeteaseCredentials,
        user_agent: &str,
        fields: Arc<dyn TargetFieldStore>,
    ) -> Self {
        Self {
            http,
            base_url: API_BASE_URL.to_string(),
            credentials,
            user_agent: user_agent.to_string(),
            fields,
        }
    }

    fn base_payload(&self, version: &str) -> RequestArgs {
        let nonce = rand::thread_rng().gen_range(0..NONCE_UPPER_BOUND);

        let mut payload = RequestArgs::new();
        payload.insert("secretId", self.credentials.secret_id.clone());
        payload.insert("businessId", self.credentials.business_id.clone());
        payload.insert("timestamp", chrono::Utc::now().timestamp_millis().to_string());
        payload.insert("nonce", nonce.to_string());
        payload.insert("signatureMethod", SIGNATURE_METHOD);
        payload.insert("version", version);
        payload
    }

    fn signed(&self, mut payload: RequestArgs) -> RequestArgs {
        let signature = sign(&payload, &self.credentials.secret_key);
        payload.insert("signature", signature);
        payload
    }

    async fn post(&self, path: &str, payload: &RequestArgs) -> Result<String, ClientError> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .header(USER_AGENT, &self.user_agent)
            .form(payload)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(ClientError::Http(status.to_string()));
        }

        Ok(resp.text().await?)
    }

    /// Store the task id on the target named by `data_id`. Unknown ids are
    /// ignored.
    async fn remember_task_id(
        &self,
        data_id: Option<&str>,
        task_id: &str,
    ) -> Result<(), BouncerError> {
        match data_id.and_then(TargetRef::from_data_id) {
            Some(target) => self.fields.set_task_id(target, task_id).await,
            None => Ok(()),
        }
    }
}

/// `md5(k1 v1 k2 v2 ... secret)` over the fields in ascending key order,
/// as lowercase hex.
pub fn sign(payload: &RequestArgs, secret_key: &str) -> String {
    let mut plain = String::new();
    for (key, value) in payload.iter() {
        plain.push_str(key);
        plain.push_str(value);
    }
    plain.push_str(secret_key);

    format!("{:x}", md5::compute(plain.as_bytes()))
}

fn parse_body(body: &str) -> Result<Value, ClientError> {
    serde_json::from_str(body)
        .map_err(|e| ClientError::Protocol(format!("Malformed response body: {}", e)))
}

fn response_code(body: &Value) -> Option<i64> {
    body.get("code").and_then(Value::as_i64)
}

/// Map a check reply onto a verdict.
pub fn parse_check_response(body: &str) -> Result<NeteaseCheck, ClientError> {
    let body = parse_body(body)?;

    if response_code(&body) != Some(200) {
        let code = match body.get("code") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let msg = body.get("msg").and_then(Value::as_str).map(str::to_string);

        let mut detail = BTreeMap::new();
        detail.insert("code".to_string(), code.clone());
        if let Some(msg) = &msg {
            detail.insert("msg".to_string(), msg.clone());
            detail.insert("error".to_string(), msg.clone());
        }

        return Ok(NeteaseCheck {
            verdict: Verdict::Error(BackendError {
                code,
                message: msg,
                detail,
            }),
            task_id: None,
        });
    }

    let antispam = &body["result"]["antispam"];
    let suggestion = antispam
        .get("suggestion")
        .and_then(Value::as_i64)
        .ok_or_else(|| ClientError::Protocol("Missing suggestion in response".to_string()))?;

    Ok(NeteaseCheck {
        verdict: if suggestion != 0 {
            Verdict::Spam
        } else {
            Verdict::Ham
        },
        task_id: antispam
            .get("taskId")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

pub fn parse_feedback_response(body: &str) -> Result<bool, ClientError> {
    let body = parse_body(body)?;
    if response_code(&body) != Some(200) {
        let msg = body
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return Err(ClientError::Api(msg.to_string()));
    }
    Ok(true)
}

#[async_trait]
impl AntiSpamClient for NeteaseClient {
    fn provider(&self) -> AntiSpamProvider {
        AntiSpamProvider::Netease
    }

    async fn check(&self, args: &RequestArgs) -> Result<Verdict, ClientError> {
        let mut payload = args.clone();
        payload.extend(self.base_payload(CHECK_VERSION));
        let payload = self.signed(payload);

        let body = self.post(CHECK_PATH, &payload).await?;
        let check = parse_check_response(&body)?;

        // The verdict stands even if the id is lost; feedback for this target
        // will then have nothing to send.
        if let Some(task_id) = &check.task_id {
            if let Err(e) = self.remember_task_id(args.get("dataId"), task_id).await {
                tracing::error!(data_id = ?args.get("dataId"), task_id = %task_id, error = %e, "Failed to store task id");
            }
        }

        Ok(check.verdict)
    }

    async fn submit_feedback(
        &self,
        status: FeedbackStatus,
        args: &RequestArgs,
    ) -> Result<bool, ClientError> {
        let task_id = match args.get("taskId") {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Ok(false),
        };

        let level = match status {
            FeedbackStatus::Ham => 0,
            FeedbackStatus::Spam => 2,
        };

        let mut payload = self.base_payload(FEEDBACK_VERSION);
        payload.insert(
            "feedbacks",
            json!([{ "taskId": task_id, "level": level }]).to_string(),
        );
        let payload = self.signed(payload);

        let body = self.post(FEEDBACK_PATH, &payload).await?;
        parse_feedback_response(&body)
    }
}

// ============================================================================
// REQUEST BUILDER
// ============================================================================

pub struct NeteaseRequestBuilder {
    munger: Arc<dyn RequestMunger>,
}

impl NeteaseRequestBuilder {
    pub fn new(munger: Arc<dyn RequestMunger>) -> Self {
        Self { munger }
    }
}

impl RequestBuilder for NeteaseRequestBuilder {
    fn for_check(&self, fields: &RequestFields) -> RequestArgs {
        let mut args = RequestArgs::new();
        args.insert("dataId", fields.target.data_id());
        args.insert_opt(
            "content",
            fields
                .content
                .as_deref()
                .map(|c| truncate_content(c, MAX_CONTENT_CHARS)),
        );

        self.munger.munge(&mut args);
        args
    }

    /// Feedback only needs the task id from the earlier check.
    fn for_feedback(&self, fields: &RequestFields) -> RequestArgs {
        let mut args = RequestArgs::new();
        args.insert_opt("taskId", fields.task_id.clone());
        args
    }
}
