/// HTTP seam between the client and the remote services
///
/// Every call is a single POST. The bearer token is attached per request from
/// the token slot at send time, so the transport itself holds no auth state.
use crate::config::ClientConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value as Json;

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Json),
    /// URL-encoded form (token exchange)
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub body: RequestBody,
    pub bearer: Option<String>,
}

impl HttpRequest {
    pub fn json(url: impl Into<String>, body: Json) -> Self {
        Self {
            url: url.into(),
            body: RequestBody::Json(body),
            bearer: None,
        }
    }

    pub fn form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            body: RequestBody::Form(fields),
            bearer: None,
        }
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }

    /// JSON body, if this is a JSON request
    pub fn json_body(&self) -> Option<&Json> {
        match &self.body {
            RequestBody::Json(body) => Some(body),
            RequestBody::Form(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when the body was empty
    pub body: Json,
}

impl HttpResponse {
    pub fn new(status: u16, body: Json) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Json) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Sends requests to the entity service and the token endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Pooled HTTP transport backed by reqwest
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.http.post(&request.url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(fields) => builder.form(fields),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        // Error pages are not always JSON; keep them readable for diagnostics
        let body = if bytes.is_empty() {
            Json::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Json::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok(HttpResponse { status, body })
    }
}
