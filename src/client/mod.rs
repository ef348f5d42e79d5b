//! Bidirectional SIRI protocol client.
//!
//! This module provides:
//! - `send`: render a request template and POST it to the SIRI server
//! - An inbound HTTP endpoint turning every POST into a notification,
//!   answered with a configurable templated auto-response
//! - A bounded mailbox handing notifications to one external consumer
//!
//! # Example
//!
//! ```ignore
//! let (client, mut mailbox) =
//!     SiriClient::builder("client", "http://localhost:8080", "0.0.0.0:8000").build()?;
//!
//! client.set_auto_response(ack_template, 200)?;
//! tokio::spawn({
//!     let client = client.clone();
//!     async move { client.listen_and_serve().await }
//! });
//!
//! let request = OutboundRequest::new(client.target_for(&template), template);
//! let result = client.send(&request).await?;
//!
//! while let Some(notification) = mailbox.recv().await {
//!     // ...
//! }
//! ```

mod clock;
mod exchange_log;
mod inbound;
mod mailbox;
mod outbound;
mod siri_client;
mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use exchange_log::ExchangeLog;
pub use mailbox::{Mailbox, DEFAULT_MAILBOX_CAPACITY};
pub use outbound::DEFAULT_REQUEST_TIMEOUT;
pub use siri_client::{SiriClient, SiriClientBuilder, DEFAULT_MAX_BODY_BYTES};
pub use types::{
    language_from_content_type, AutoResponse, ClientError, ClientResult, EndpointState,
    InboundNotification, OutboundRequest, OutboundResult, SendErrorKind, CONTENT_TYPE_XML,
    PLAINTEXT,
};
