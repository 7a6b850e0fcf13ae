//! Backend transport over HTTP.
//!
//! Every report is a JSON `POST` to `{apiHost}/api/{path}`. Only the status
//! matters: any 2xx is success, everything else is a rejection.

use std::time::Duration;

use async_trait::async_trait;
use homebound_core::remote::{RemoteConfig, RemoteConfigKey};
use homebound_core::transport::{
    AreaExitReport, ContactBatch, LocationBatch, ReportTransport, TransportError, TransportResult,
    AREA_EXIT_PATH, CONTACTS_PATH, LOCATIONS_PATH,
};
use serde::Serialize;
use tracing::{debug, instrument};

/// `reqwest`-backed [`ReportTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_host: Option<String>,
    remote: RemoteConfig,
}

impl HttpTransport {
    /// Creates a transport. `api_host` overrides the remote `apiHost` flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_host: Option<String>,
        timeout: Duration,
        remote: RemoteConfig,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("homebound-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_host,
            remote,
        })
    }

    /// Full URL of `path`.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let host = self
            .api_host
            .clone()
            .unwrap_or_else(|| self.remote.string(RemoteConfigKey::ApiHost));
        format!("{}/api/{path}", host.trim_end_matches('/'))
    }

    #[instrument(skip(self, body), fields(url))]
    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> TransportResult<()> {
        let url = self.endpoint(path);
        tracing::Span::current().record("url", url.as_str());

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "backend accepted request");
            Ok(())
        } else {
            Err(TransportError::Rejected {
                endpoint: path.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl ReportTransport for HttpTransport {
    async fn send_area_exit(&self, report: &AreaExitReport) -> TransportResult<()> {
        self.post(AREA_EXIT_PATH, report).await
    }

    async fn upload_locations(&self, batch: &LocationBatch) -> TransportResult<()> {
        self.post(LOCATIONS_PATH, batch).await
    }

    async fn upload_contacts(&self, batch: &ContactBatch) -> TransportResult<()> {
        self.post(CONTACTS_PATH, batch).await
    }
}
