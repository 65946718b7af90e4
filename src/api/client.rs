//! Authenticated HTTP client for the FinderNate REST API
//!
//! Wraps reqwest::Client with bearer auth, base URL resolution and the
//! `{ success, data, message }` response envelope.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::auth::Identity;
use crate::config::Config;

/// Response envelope used by every FinderNate endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: Option<bool>,
    data: Option<T>,
    message: Option<String>,
}

/// Client bound to one user's bearer token.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl ApiClient {
    pub fn new(config: &Config, identity: &Identity) -> Result<Self> {
        let base = Url::parse(&config.api_base_url)
            .with_context(|| format!("Invalid api_base_url {:?}", config.api_base_url))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: identity.bearer().to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid API path {}", path))
    }

    /// GET `path` and decode the envelope's `data`.
    pub async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.url(path)?;
        tracing::debug!("API GET {}", url);

        let resp = self
            .http
            .get(url.clone())
            .bearer_auth(&self.token)
            .header("x-request-id", uuid::Uuid::new_v4().to_string())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let resp = check_response(resp, url.as_str()).await?;
        decode_envelope(resp, url.as_str()).await
    }

    /// POST a JSON body to `path` and decode the envelope's `data`.
    pub async fn post_data<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Option<T>> {
        let url = self.url(path)?;
        tracing::debug!("API POST {}", url);

        let resp = self
            .http
            .post(url.clone())
            .bearer_auth(&self.token)
            .header("x-request-id", uuid::Uuid::new_v4().to_string())
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let resp = check_response(resp, url.as_str()).await?;
        decode_envelope(resp, url.as_str()).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run 'findernate-calls login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

async fn decode_envelope<T: DeserializeOwned>(
    resp: reqwest::Response,
    url: &str,
) -> Result<Option<T>> {
    let body = resp
        .text()
        .await
        .with_context(|| format!("Failed to read response body from {}", url))?;
    parse_envelope(&body).with_context(|| format!("Bad response from {}", url))
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<Option<T>> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let envelope: Envelope<T> = serde_json::from_str(body).context("Response is not valid JSON")?;
    if envelope.success == Some(false) {
        bail!(
            "Request rejected: {}",
            envelope.message.as_deref().unwrap_or("no message")
        );
    }
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Thing {
        id: String,
    }

    #[test]
    fn test_parse_envelope_data() {
        let thing: Option<Thing> =
            parse_envelope(r#"{"success":true,"data":{"id":"x"}}"#).unwrap();
        assert_eq!(thing.unwrap().id, "x");
    }

    #[test]
    fn test_parse_envelope_null_and_empty() {
        let none: Option<Thing> = parse_envelope(r#"{"success":true,"data":null}"#).unwrap();
        assert!(none.is_none());
        let none: Option<Thing> = parse_envelope("").unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        use crate::auth::StoredToken;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            // Promise more bytes than we send, then hang up.
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"success\":true")
                .await
                .unwrap();
        });

        let config = Config {
            api_base_url: format!("http://{}", addr),
            ..Default::default()
        };
        let identity = Identity {
            user_id: "u1".into(),
            token: StoredToken::new("tok".into(), None),
        };
        let client = ApiClient::new(&config, &identity).unwrap();
        let err = client
            .get_data::<serde_json::Value>("/api/v1/calls/active")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read response body"));
    }

    #[test]
    fn test_parse_envelope_rejected() {
        let err = parse_envelope::<Thing>(r#"{"success":false,"message":"Call not found"}"#)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Call not found"));
    }
}
