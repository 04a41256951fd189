// Resolves the active provider from the current settings.
//
// Nothing here is cached: settings can change between sweeps, so every call
// builds the client or request builder for whatever is configured right now.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::akismet_client::{AkismetClient, AkismetRequestBuilder};
use super::netease_client::{NeteaseClient, NeteaseCredentials, NeteaseRequestBuilder};
use crate::core::moderation::{
    AntiSpamBackend, AntiSpamClient, AntiSpamProvider, ClientError, RequestBuilder, RequestMunger,
    SpamSettings, TargetFieldStore, TargetKind,
};

pub struct AntiSpamService {
    settings: Arc<RwLock<SpamSettings>>,
    http: Client,
    fields: Arc<dyn TargetFieldStore>,
    munger: Arc<dyn RequestMunger>,
}

impl AntiSpamService {
    /// `munger` rewrites every outbound payload of this instance (e.g. to
    /// force a test verdict). Pass `NoopMunger` to send payloads as built.
    pub fn new(
        settings: Arc<RwLock<SpamSettings>>,
        fields: Arc<dyn TargetFieldStore>,
        munger: Arc<dyn RequestMunger>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            settings,
            http,
            fields,
            munger,
        })
    }

    fn build_client(&self, settings: &SpamSettings) -> Arc<dyn AntiSpamClient> {
        let user_agent = super::user_agent(settings);

        match settings.provider {
            AntiSpamProvider::Akismet => Arc::new(AkismetClient::new(
                self.http.clone(),
                &settings.akismet_api_key,
                &settings.site_base_url,
                &user_agent,
            )),
            AntiSpamProvider::Netease => Arc::new(NeteaseClient::new(
                self.http.clone(),
                NeteaseCredentials {
                    secret_id: settings.netease_secret_id.clone(),
                    secret_key: settings.netease_secret_key.clone(),
                    business_id: settings.netease_business_id.clone(),
                },
                &user_agent,
                Arc::clone(&self.fields),
            )),
        }
    }
}

#[async_trait]
impl AntiSpamBackend for AntiSpamService {
    async fn client(&self) -> Option<Arc<dyn AntiSpamClient>> {
        let settings = self.settings.read().await;
        if !settings.enabled || settings.api_secret_blank() {
            return None;
        }
        Some(self.build_client(&settings))
    }

    async fn request_builder_for(&self, _kind: TargetKind) -> Arc<dyn RequestBuilder> {
        let settings = self.settings.read().await;
        match settings.provider {
            AntiSpamProvider::Akismet => Arc::new(AkismetRequestBuilder::new(
                settings.transmit_email,
                Arc::clone(&self.munger),
            )),
            AntiSpamProvider::Netease => {
                Arc::new(NeteaseRequestBuilder::new(Arc::clone(&self.munger)))
            }
        }
    }

    async fn is_configured(&self) -> bool {
        !self.settings.read().await.api_secret_blank()
    }
}
