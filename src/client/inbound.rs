//! Inbound endpoint receiving notifications pushed by the SIRI server.
//!
//! Every POST, whatever its path, becomes an [`InboundNotification`] in the
//! mailbox and is answered with the rendered auto-response. Other methods get
//! `405 Method Not Allowed`.

use std::net::SocketAddr;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::template::render;

use super::exchange_log::Message;
use super::siri_client::SiriClient;
use super::types::{language_from_content_type, InboundNotification, CONTENT_TYPE_XML, PLAINTEXT};

const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

pub(crate) fn router(client: SiriClient) -> Router {
    Router::new()
        .fallback(handle_notification)
        .layer(TraceLayer::new_for_http())
        .with_state(client)
}

#[tracing::instrument(
    name = "inbound.notification",
    skip_all,
    fields(method = %request.method(), uri = %request.uri())
)]
async fn handle_notification(State(client): State<SiriClient>, request: Request<Body>) -> Response {
    if request.method() != Method::POST {
        tracing::debug!("Rejected non-POST request");
        return (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "POST")]).into_response();
    }

    let remote_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let content_type = content_type(request.headers());

    let body = match to_bytes(request.into_body(), client.max_body_bytes()).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            let error = e.to_string();
            tracing::warn!(remote = %remote_address, error = %error, "Failed to read notification body");

            client
                .mailbox()
                .deliver(InboundNotification {
                    remote_address: remote_address.clone(),
                    uri: uri.clone(),
                    body: error.clone(),
                    language: PLAINTEXT.to_string(),
                })
                .await;

            return reply(
                &client,
                Exchange {
                    remote_address: &remote_address,
                    uri: &uri,
                    content_type: content_type.as_deref(),
                    body: "",
                },
                StatusCode::INTERNAL_SERVER_ERROR,
                CONTENT_TYPE_TEXT,
                error,
            );
        }
    };

    let notification = InboundNotification {
        remote_address: remote_address.clone(),
        uri: uri.clone(),
        body: body.clone(),
        language: language_from_content_type(content_type.as_deref()),
    };

    // Waits while the mailbox is full; no lock is held here
    let delivered = client.mailbox().deliver(notification).await;

    let exchange = Exchange {
        remote_address: &remote_address,
        uri: &uri,
        content_type: content_type.as_deref(),
        body: &body,
    };

    if !delivered {
        return reply(
            &client,
            exchange,
            StatusCode::SERVICE_UNAVAILABLE,
            CONTENT_TYPE_TEXT,
            "notification consumer unavailable".to_string(),
        );
    }

    tracing::info!(remote = %remote_address, uri = %uri, bytes = body.len(), "Notification received");

    // Snapshot taken after the enqueue so a reply always reflects the
    // configuration current at that point
    let auto_response = client.auto_response();
    match render(&auto_response.body, &client.render_context()) {
        Ok(xml) => reply(&client, exchange, auto_response.status, CONTENT_TYPE_XML, xml),
        Err(e) => {
            tracing::error!(error = %e, "Could not render auto-response");
            reply(
                &client,
                exchange,
                StatusCode::INTERNAL_SERVER_ERROR,
                CONTENT_TYPE_TEXT,
                e.to_string(),
            )
        }
    }
}

/// The inbound request as it goes into the exchange log
struct Exchange<'a> {
    remote_address: &'a str,
    uri: &'a str,
    content_type: Option<&'a str>,
    body: &'a str,
}

fn reply(
    client: &SiriClient,
    exchange: Exchange<'_>,
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response {
    client.exchange_log().record(
        Message {
            heading: "Incoming Request:",
            lines: vec![
                format!("Server {}", exchange.remote_address),
                format!("POST {}", exchange.uri),
            ],
            content_type: exchange.content_type,
            body: exchange.body,
        },
        Message {
            heading: "Outgoing Response:",
            lines: vec![status.as_u16().to_string()],
            content_type: Some(content_type),
            body: &body,
        },
    );

    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
