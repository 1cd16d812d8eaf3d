use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::command::AirconCommand;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    aircon_settings_path, appliances_path, devices_path, AirconSettings, ApplianceRecord,
    DeviceRecord, DEFAULT_BASE_URL,
};
use crate::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends one aircon settings command and returns the settings the cloud
/// confirmed. One round-trip per call, no retries.
pub trait CommandTransport: Send + Sync + 'static {
    fn send_aircon_settings(
        &self,
        appliance_id: &str,
        command: &AirconCommand,
    ) -> impl Future<Output = Result<AirconSettings>> + Send;
}

impl<T: CommandTransport> CommandTransport for Arc<T> {
    fn send_aircon_settings(
        &self,
        appliance_id: &str,
        command: &AirconCommand,
    ) -> impl Future<Output = Result<AirconSettings>> + Send {
        (**self).send_aircon_settings(appliance_id, command)
    }
}

pub struct RemoClientBuilder {
    token: String,
    base_url: String,
    timeout: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl RemoClientBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<RemoClient> {
        if self.token.trim().is_empty() {
            return Err(Error::InvalidConfig("access token is empty".to_string()));
        }

        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        Ok(RemoClient {
            http,
            base_url: self.base_url,
            token: self.token,
            logger,
        })
    }
}

/// Client for the Nature Remo cloud API.
pub struct RemoClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    logger: Option<Mutex<MessageLogger>>,
}

impl RemoClient {
    pub fn builder(token: impl Into<String>) -> RemoClientBuilder {
        RemoClientBuilder::new(token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn appliances(&self) -> Result<Vec<ApplianceRecord>> {
        self.get_list(appliances_path()).await
    }

    pub async fn devices(&self) -> Result<Vec<DeviceRecord>> {
        self.get_list(devices_path()).await
    }

    pub async fn update_aircon_settings(
        &self,
        appliance_id: &str,
        command: &AirconCommand,
    ) -> Result<AirconSettings> {
        let path = aircon_settings_path(appliance_id);
        let url = format!("{}{}", self.base_url, path);
        let fields = command.form_fields();
        debug!(appliance = %appliance_id, ?fields, "posting aircon settings");

        let log_id = self.with_logger(|l| l.log_command(appliance_id, &command.to_json()));

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .form(&fields)
            .send()
            .await?
            .error_for_status()?;
        let status = resp.status().as_u16();
        let body: Value = resp.json().await?;

        if let Some(id) = log_id {
            self.with_logger(|l| l.log_confirmation(id, status, &body));
        }

        Ok(serde_json::from_value(body)?)
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);
        trace!(url = %url, "fetching");
        self.with_logger(|l| l.log_request("GET", path));

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        let status = resp.status().as_u16();
        let body: Value = resp.json().await?;

        self.with_logger(|l| l.log_poll(path, status, &body));

        Ok(serde_json::from_value(body)?)
    }

    fn with_logger<R>(&self, f: impl FnOnce(&mut MessageLogger) -> R) -> Option<R> {
        self.logger
            .as_ref()
            .map(|logger| f(&mut logger.lock().unwrap_or_else(PoisonError::into_inner)))
    }
}

impl CommandTransport for RemoClient {
    async fn send_aircon_settings(
        &self,
        appliance_id: &str,
        command: &AirconCommand,
    ) -> Result<AirconSettings> {
        self.update_aircon_settings(appliance_id, command).await
    }
}
