//! HTTP transport using reqwest.
//!
//! Requests are posted as JSON to the endpoints served by `orda serve`. The
//! HTTP transport does not carry notifications, so realtime clients over HTTP
//! fall back to manual sync.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use url::Url;

use super::{ClientError, Transport};
use crate::{
    Result,
    constants::{CLIENT_PATH, PUSHPULL_PATH},
    pushpull::{ClientRequest, ClientResponse, PushPullRequest, PushPullResponse},
};

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    /// Create a transport for the server at `base`, e.g. `http://127.0.0.1:19861`.
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).map_err(|e| ClientError::Connect {
            reason: format!("invalid server url '{base}': {e}"),
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| {
            ClientError::Connect {
                reason: format!("invalid endpoint {path}: {e}"),
            }
            .into()
        })
    }

    async fn post<Req, Resp>(&self, path: &str, request: &Req) -> std::result::Result<Resp, String>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path).map_err(|e| e.to_string())?;
        let response = self
            .client
            .post(url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("server returned {} for {url}", response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| format!("failed to parse response from {url}: {e}"))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn transport_type(&self) -> &'static str {
        "http"
    }

    async fn process_client(&self, request: ClientRequest) -> Result<ClientResponse> {
        self.post(CLIENT_PATH, &request)
            .await
            .map_err(|reason| ClientError::Connect { reason }.into())
    }

    async fn process_push_pull(&self, request: PushPullRequest) -> Result<PushPullResponse> {
        self.post(PUSHPULL_PATH, &request)
            .await
            .map_err(|reason| ClientError::Sync { reason }.into())
    }
}
