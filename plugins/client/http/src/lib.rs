//! HTTP implementation of [`ImportClient`] for the v3 REST API.
//!
//! | call            | request                                                    |
//! |-----------------|------------------------------------------------------------|
//! | import          | `PUT  /v3/table/import_with_id/{db}/{table}/{id}/{format}` |
//! | probe           | `PUT  /v3/table/import/{db}/{table}/{format}`              |
//! | create database | `POST /v3/database/create/{db}`                            |
//! | create table    | `POST /v3/table/create/{db}/{table}/log`                   |

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use tdship_api::{ClientConfig, ClientError, ClientFuture, ImportBody, ImportClient, ImportRequest};

pub struct HttpImportClient {
    http: reqwest::Client,
    api_url: String,
    import_url: String,
    authorization: String,
}

impl HttpImportClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let apikey = config
            .apikey
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ClientError::Unauthorized("apikey is not set".into()))?;

        let mut builder = reqwest::Client::builder().user_agent(&config.user_agent);
        if let Some(secs) = config.connect_timeout {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.read_timeout {
            builder = builder.read_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.send_timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(proxy) = &config.http_proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ClientError::Network(format!("invalid http_proxy {proxy:?}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Network(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: base_url(&config.endpoint, config.use_ssl),
            import_url: base_url(&config.import_endpoint, config.use_ssl),
            authorization: format!("TD1 {apikey}"),
        })
    }

    async fn post(&self, path: String) -> Result<(), ClientError> {
        let url = format!("{}{path}", self.api_url);
        tracing::debug!(%url, "POST");
        let resp = self
            .http
            .post(url)
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(network)?;
        check(resp).await
    }
}

impl ImportClient for HttpImportClient {
    fn import<'a>(&'a self, request: ImportRequest<'a>) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let path = match request.unique_id {
                Some(id) => format!(
                    "/v3/table/import_with_id/{}/{}/{id}/{}",
                    request.database, request.table, request.format
                ),
                None => format!(
                    "/v3/table/import/{}/{}/{}",
                    request.database, request.table, request.format
                ),
            };
            let url = format!("{}{path}", self.import_url);

            let size = request.body.size();
            let body = match request.body {
                ImportBody::Bytes(bytes) => reqwest::Body::from(bytes),
                ImportBody::File { file, .. } => reqwest::Body::from(tokio::fs::File::from_std(file)),
            };

            tracing::debug!(%url, size, "PUT");
            let resp = self
                .http
                .put(url)
                .header(AUTHORIZATION, &self.authorization)
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(CONTENT_LENGTH, size)
                .body(body)
                .send()
                .await
                .map_err(network)?;
            check(resp).await
        })
    }

    fn create_database<'a>(&'a self, database: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(self.post(format!("/v3/database/create/{database}")))
    }

    fn create_table<'a>(&'a self, database: &'a str, table: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(self.post(format!("/v3/table/create/{database}/{table}/log")))
    }
}

/// `host` as an URL prefix. A host that already carries a scheme is used
/// as is.
pub fn base_url(host: &str, use_ssl: bool) -> String {
    if host.contains("://") {
        return host.trim_end_matches('/').to_string();
    }
    let scheme = if use_ssl { "https" } else { "http" };
    format!("{scheme}://{}", host.trim_end_matches('/'))
}

/// Map a non-success status to the error the uploader acts on.
pub fn classify(status: u16, message: String) -> ClientError {
    match status {
        404 => ClientError::NotFound(message),
        409 => ClientError::AlreadyExists(message),
        429 => ClientError::RateLimited(message),
        401 | 403 => ClientError::Unauthorized(message),
        _ => ClientError::Server { status, message },
    }
}

async fn check(resp: reqwest::Response) -> Result<(), ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status.as_u16(), error_message(&body)))
}

/// `message` (or `error`) of a JSON error body, otherwise the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn network(e: reqwest::Error) -> ClientError {
    ClientError::Network(e.to_string())
}
