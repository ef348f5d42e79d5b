//! HTTP transport for requests sent to the SIRI server

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use super::exchange_log::{ExchangeLog, Message};
use super::types::{ClientError, ClientResult, CONTENT_TYPE_XML};

/// Upper bound for one complete outbound exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw answer of the SIRI server
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// POSTs XML bodies with a fixed per-call timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    log: ExchangeLog,
}

impl HttpTransport {
    pub fn new(timeout: Duration, log: ExchangeLog) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Transport)?;

        Ok(Self { client, log })
    }

    /// POST `body` to `url` as `application/xml`
    pub async fn post_xml(&self, url: &str, body: String) -> ClientResult<HttpResponse> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, CONTENT_TYPE_XML)
            .body(body.clone())
            .send()
            .await
            .map_err(ClientError::send)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(ClientError::send)?;

        self.log.record(
            Message {
                heading: "Outgoing Request:",
                lines: vec![format!("POST {url}")],
                content_type: Some(CONTENT_TYPE_XML),
                body: &body,
            },
            Message {
                heading: "Incoming Response:",
                lines: vec![status.to_string()],
                content_type: content_type.as_deref(),
                body: &text,
            },
        );

        Ok(HttpResponse {
            status,
            content_type,
            body: text,
        })
    }
}
