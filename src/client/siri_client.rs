use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::template::{extract_routing_hint, join_url, render, RenderContext};

use super::clock::{Clock, SystemClock};
use super::exchange_log::ExchangeLog;
use super::inbound::router;
use super::mailbox::{mailbox, Mailbox, MailboxSender, DEFAULT_MAILBOX_CAPACITY};
use super::outbound::{HttpTransport, DEFAULT_REQUEST_TIMEOUT};
use super::types::{
    language_from_content_type, AutoResponse, ClientError, ClientResult, EndpointState,
    OutboundRequest, OutboundResult,
};

/// Default limit for inbound request bodies (10 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Bidirectional SIRI client.
///
/// Cheap to clone; all clones share the same endpoint, mailbox and
/// auto-response.
#[derive(Clone)]
pub struct SiriClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    client_ref: String,
    server_url: String,
    listen_addr: String,
    max_body_bytes: usize,
    transport: HttpTransport,
    clock: Arc<dyn Clock>,
    exchange_log: ExchangeLog,
    mailbox: MailboxSender,
    // Replaced wholesale, never mutated in place
    auto_response: RwLock<Arc<AutoResponse>>,
    state: watch::Sender<EndpointState>,
    shutdown: watch::Sender<bool>,
}

/// Builder for [`SiriClient`]
pub struct SiriClientBuilder {
    client_ref: String,
    server_url: String,
    listen_addr: String,
    mailbox_capacity: usize,
    request_timeout: Duration,
    max_body_bytes: usize,
    clock: Arc<dyn Clock>,
    exchange_log: ExchangeLog,
    auto_response: AutoResponse,
}

impl SiriClientBuilder {
    pub fn new(
        client_ref: impl Into<String>,
        server_url: impl Into<String>,
        listen_addr: impl Into<String>,
    ) -> Self {
        Self {
            client_ref: client_ref.into(),
            server_url: server_url.into(),
            listen_addr: listen_addr.into(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            clock: Arc::new(SystemClock),
            exchange_log: ExchangeLog::discard(),
            auto_response: AutoResponse::default(),
        }
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn exchange_log(mut self, log: ExchangeLog) -> Self {
        self.exchange_log = log;
        self
    }

    pub fn auto_response(mut self, response: AutoResponse) -> Self {
        self.auto_response = response;
        self
    }

    /// Build the client and the consuming half of its mailbox
    pub fn build(self) -> ClientResult<(SiriClient, Mailbox)> {
        let transport = HttpTransport::new(self.request_timeout, self.exchange_log.clone())?;
        let (sender, receiver) = mailbox(self.mailbox_capacity);
        let (state, _) = watch::channel(EndpointState::Unstarted);
        let (shutdown, _) = watch::channel(false);

        let client = SiriClient {
            inner: Arc::new(ClientInner {
                client_ref: self.client_ref,
                server_url: self.server_url,
                listen_addr: self.listen_addr,
                max_body_bytes: self.max_body_bytes,
                transport,
                clock: self.clock,
                exchange_log: self.exchange_log,
                mailbox: sender,
                auto_response: RwLock::new(Arc::new(self.auto_response)),
                state,
                shutdown,
            }),
        };

        Ok((client, receiver))
    }
}

impl SiriClient {
    pub fn builder(
        client_ref: impl Into<String>,
        server_url: impl Into<String>,
        listen_addr: impl Into<String>,
    ) -> SiriClientBuilder {
        SiriClientBuilder::new(client_ref, server_url, listen_addr)
    }

    pub fn client_ref(&self) -> &str {
        &self.inner.client_ref
    }

    pub fn server_url(&self) -> &str {
        &self.inner.server_url
    }

    pub fn listen_addr(&self) -> &str {
        &self.inner.listen_addr
    }

    /// Target URL for a request template: the server URL, extended by the
    /// template's routing hint when it has one
    pub fn target_for(&self, template_text: &str) -> String {
        match extract_routing_hint(template_text) {
            Some(path) => join_url(&self.inner.server_url, &path),
            None => self.inner.server_url.clone(),
        }
    }

    /// Fresh rendering context for this client at the current time
    pub fn render_context(&self) -> RenderContext {
        RenderContext::new(self.inner.clock.now(), self.inner.client_ref.clone())
    }

    /// Render and POST a request, classifying the server's answer
    #[tracing::instrument(name = "siri.send", skip(self, request), fields(url = %request.url))]
    pub async fn send(&self, request: &OutboundRequest) -> ClientResult<OutboundResult> {
        let body = render(&request.body, &self.render_context())?;

        let started = Instant::now();
        let response = self
            .inner
            .transport
            .post_xml(&request.url, body)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "SIRI request failed"))?;

        let language = language_from_content_type(response.content_type.as_deref());

        tracing::info!(
            status = response.status,
            language = %language,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "SIRI request completed"
        );

        Ok(OutboundResult {
            body: response.body,
            status: response.status,
            language,
        })
    }

    /// Snapshot of the auto-response currently in effect
    pub fn auto_response(&self) -> Arc<AutoResponse> {
        let current = self
            .inner
            .auto_response
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Replace the auto-response for every handler that starts afterwards
    pub fn set_auto_response(&self, body: impl Into<String>, status: u16) -> ClientResult<()> {
        let response = Arc::new(AutoResponse::new(body, status)?);
        let status = response.status;

        *self
            .inner
            .auto_response
            .write()
            .unwrap_or_else(PoisonError::into_inner) = response;

        tracing::info!(status = %status, "Auto-response updated");
        Ok(())
    }

    /// Current lifecycle state of the inbound endpoint
    pub fn state(&self) -> EndpointState {
        *self.inner.state.borrow()
    }

    /// Bind the configured address and serve until [`SiriClient::stop`]
    pub async fn listen_and_serve(&self) -> ClientResult<()> {
        let listener = TcpListener::bind(&self.inner.listen_addr)
            .await
            .map_err(|source| ClientError::Bind {
                addr: self.inner.listen_addr.clone(),
                source,
            })?;

        self.serve(listener).await
    }

    /// Serve the inbound endpoint on an already bound listener until
    /// [`SiriClient::stop`] completes
    pub async fn serve(&self, listener: TcpListener) -> ClientResult<()> {
        let local_addr = listener.local_addr().map_err(ClientError::Serve)?;

        let mut claimed = false;
        self.inner.state.send_if_modified(|state| {
            claimed = *state == EndpointState::Unstarted;
            if claimed {
                *state = EndpointState::Running;
            }
            claimed
        });
        if !claimed {
            return Err(ClientError::InvalidState(self.state()));
        }

        tracing::info!(addr = %local_addr, "Inbound endpoint listening");

        let mut shutdown = self.inner.shutdown.subscribe();
        let app = router(self.clone()).into_make_service_with_connect_info::<SocketAddr>();

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await;

        self.inner.state.send_replace(EndpointState::Stopped);
        tracing::info!(addr = %local_addr, "Inbound endpoint stopped");

        result.map_err(ClientError::Serve)
    }

    /// Stop accepting connections and wait up to `deadline` for in-flight
    /// handlers to finish.
    ///
    /// Calling this on an endpoint that is already stopped, or was never
    /// started, is a no-op.
    pub async fn stop(&self, deadline: Duration) -> ClientResult<()> {
        let mut previous = EndpointState::Unstarted;
        self.inner.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                EndpointState::Unstarted => *state = EndpointState::Stopped,
                EndpointState::Running => *state = EndpointState::ShuttingDown,
                EndpointState::ShuttingDown | EndpointState::Stopped => return false,
            }
            true
        });

        match previous {
            EndpointState::Stopped => {
                tracing::debug!("Inbound endpoint already stopped");
                return Ok(());
            }
            EndpointState::Unstarted => return Ok(()),
            EndpointState::Running | EndpointState::ShuttingDown => {}
        }

        tracing::info!(deadline_ms = deadline.as_millis() as u64, "Stopping inbound endpoint");
        self.inner.shutdown.send_replace(true);

        let mut state = self.inner.state.subscribe();
        let stopped = tokio::time::timeout(deadline, async move {
            let _ = state.wait_for(|s| *s == EndpointState::Stopped).await;
        })
        .await;

        stopped.map_err(|_| {
            tracing::warn!("Inbound endpoint did not stop before the deadline");
            ClientError::ShutdownTimeout(deadline)
        })
    }

    pub(crate) fn max_body_bytes(&self) -> usize {
        self.inner.max_body_bytes
    }

    pub(crate) fn mailbox(&self) -> &MailboxSender {
        &self.inner.mailbox
    }

    pub(crate) fn exchange_log(&self) -> &ExchangeLog {
        &self.inner.exchange_log
    }
}

impl std::fmt::Debug for SiriClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiriClient")
            .field("client_ref", &self.inner.client_ref)
            .field("server_url", &self.inner.server_url)
            .field("listen_addr", &self.inner.listen_addr)
            .field("state", &self.state())
            .finish()
    }
}
