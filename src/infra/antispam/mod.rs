// HTTP clients for the anti-spam providers and the service that picks one.

pub mod akismet_client;
pub mod anti_spam_service;
pub mod netease_client;

pub use akismet_client::{AkismetClient, AkismetRequestBuilder};
pub use anti_spam_service::AntiSpamService;
pub use netease_client::{NeteaseClient, NeteaseCredentials, NeteaseRequestBuilder};

use crate::core::moderation::{ClientError, SpamSettings};

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

/// `Application/Version | Plugin/Version`, the format providers ask for.
pub fn user_agent(settings: &SpamSettings) -> String {
    format!(
        "{}/{} | {}/{}",
        settings.app_name,
        settings.app_version,
        env!("CARGO_PKG_NAME").replace('_', "-"),
        env!("CARGO_PKG_VERSION")
    )
}
