//! HTTP client for the trading API.
//!
//! Every request carries the `x-api-key` header. List endpoints return bare
//! JSON arrays; entries that cannot be decoded are skipped individually.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use mdash_core::{AccountId, StatusFilter};
use mdash_feed::{RawOfferRecord, RawPositionRecord};

use crate::error::{ApiError, ApiResult};
use crate::ports::{OfferSource, PositionSource};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const API_KEY_HEADER: &str = "x-api-key";

/// Client settings.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL without trailing slash, e.g. `https://host/api/sdk/v1.0`.
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Client for the trading API.
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<reqwest::Response> {
        let response = request.header(API_KEY_HEADER, &self.api_key).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ApiResult<Vec<T>> {
        let started = Instant::now();
        let response = self.send(self.client.get(self.url(path)).query(query)).await?;
        let body: serde_json::Value = response.json().await?;

        let records = decode_list(path, body)?;
        debug!(
            path,
            count = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched list"
        );
        Ok(records)
    }
}

/// Decode a JSON array, skipping null and undecodable entries.
fn decode_list<T: DeserializeOwned>(path: &str, body: serde_json::Value) -> ApiResult<Vec<T>> {
    let serde_json::Value::Array(entries) = body else {
        return Err(ApiError::Decode(format!("{path}: response is not an array")));
    };

    let mut out = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.into_iter().enumerate() {
        if entry.is_null() {
            continue;
        }
        match serde_json::from_value(entry) {
            Ok(record) => out.push(record),
            Err(e) => warn!(path, idx, error = %e, "Skipping undecodable entry"),
        }
    }
    Ok(out)
}

#[async_trait]
impl PositionSource for ApiClient {
    async fn fetch_raw_positions(
        &self,
        account: &AccountId,
        status: StatusFilter,
    ) -> ApiResult<Vec<RawPositionRecord>> {
        self.get_list(
            "/positions/evm",
            &[("userAddress", account.as_str()), ("status", status.as_str())],
        )
        .await
    }
}

#[async_trait]
impl OfferSource for ApiClient {
    async fn fetch_raw_offers(&self) -> ApiResult<Vec<RawOfferRecord>> {
        self.get_list("/offers/bsc", &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve exactly one HTTP response and hand back the raw request text.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });

        (format!("http://{addr}"), rx)
    }

    fn client(base_url: String) -> ApiClient {
        ApiClient::new(ApiClientConfig::new(base_url, "secret-key")).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_positions_query_and_header() {
        let (base, request) = serve_once(
            "200 OK",
            r#"[{"address": "0xpos", "status": "active"}, null, {"loanId": "not-a-number"}]"#,
        )
        .await;
        let account = AccountId::parse("0x1111111111111111111111111111111111111111").unwrap();

        let records = client(base)
            .fetch_raw_positions(&account, StatusFilter::Open)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address.as_deref(), Some("0xpos"));

        let request = request.await.unwrap();
        assert!(request.starts_with(
            "GET /positions/evm?userAddress=0x1111111111111111111111111111111111111111&status=open "
        ));
        assert!(request.to_ascii_lowercase().contains("x-api-key: secret-key"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_http_error() {
        let (base, _request) = serve_once("503 Service Unavailable", r#"{"error":"down"}"#).await;

        let err = client(base).fetch_raw_offers().await.unwrap_err();
        match err {
            ApiError::Http { status, body } => {
                assert_eq!(status, 503);
                assert!(body.contains("down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{addr}"))
            .fetch_raw_offers()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn test_decode_list_rejects_object() {
        let err = decode_list::<RawOfferRecord>("/offers/bsc", serde_json::json!({"data": []}))
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let c = client("http://localhost:1/api/".to_string());
        assert_eq!(c.url("/offers/bsc"), "http://localhost:1/api/offers/bsc");
    }
}
