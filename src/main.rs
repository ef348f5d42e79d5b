use std::fs::OpenOptions;

use anyhow::{Context, Result};
use tokio::signal;

use siri_client::client::{ExchangeLog, Mailbox, OutboundRequest, SiriClient};
use siri_client::config::Settings;
use siri_client::error::AppError;
use siri_client::telemetry::init_telemetry;
use siri_client::template::{open_optional, TemplateStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_telemetry(&settings.log)?;
    tracing::info!("Configuration loaded");

    let exchange_log = open_exchange_log(settings.log.exchange_file.as_deref())
        .context("cannot open exchange log")?;

    // Request templates are required, auto-response templates are not
    let requests = TemplateStore::open(&settings.templates.request_dir)
        .with_context(|| format!("request templates at {}", settings.templates.request_dir))?;
    let names = requests.names()?;
    tracing::info!(
        root = %requests.root().display(),
        count = names.len(),
        "Request templates loaded"
    );
    for name in &names {
        tracing::debug!(template = %name, "Request template available");
    }
    let autoresponses = open_optional(&settings.templates.autoresponse_dir);

    let (client, mailbox) = SiriClient::builder(
        settings.client.client_ref.clone(),
        settings.client.server_url.clone(),
        settings.listen_addr(),
    )
    .mailbox_capacity(settings.client.mailbox_capacity)
    .request_timeout(settings.client.request_timeout())
    .max_body_bytes(settings.client.max_body_bytes)
    .exchange_log(exchange_log)
    .build()?;
    tracing::info!(client = ?client, "SIRI client initialized");

    if let Some(name) = &settings.templates.autoresponse {
        let store = autoresponses
            .as_ref()
            .with_context(|| format!("auto-response template '{}' configured without a template root", name))?;
        let template = store.get(name)?;
        client.set_auto_response(template.content, settings.autoresponse.status)?;
    }

    // Start the inbound endpoint in background
    let server = {
        let client = client.clone();
        tokio::spawn(async move { client.listen_and_serve().await })
    };

    // Start the notification consumer in background
    let consumer = tokio::spawn(consume_notifications(mailbox));

    if let Some(name) = &settings.templates.startup_request {
        send_startup_request(&client, &requests, name).await;
    }

    tokio::select! {
        _ = shutdown_signal_handler() => {}
        result = server => {
            // The endpoint only returns on its own when it failed to start
            result.context("inbound endpoint task panicked")??;
        }
    }

    client.stop(settings.client.shutdown_timeout()).await?;

    consumer.abort();
    tracing::info!("Client shutdown complete");
    Ok(())
}

fn open_exchange_log(path: Option<&str>) -> Result<ExchangeLog, AppError> {
    let Some(path) = path else {
        return Ok(ExchangeLog::discard());
    };

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    tracing::info!(path = %path, "Logging exchanges");
    Ok(ExchangeLog::new(file))
}

async fn send_startup_request(client: &SiriClient, store: &TemplateStore, name: &str) {
    let template = match store.get(name) {
        Ok(template) => template,
        Err(e) => {
            tracing::error!(template = %name, error = %e, "Startup request not sent");
            return;
        }
    };

    let request = OutboundRequest::new(client.target_for(&template.content), template.content);
    match client.send(&request).await {
        Ok(result) => tracing::info!(
            template = %name,
            status = result.status,
            language = %result.language,
            body = %result.body,
            "Startup request answered"
        ),
        Err(e) => tracing::error!(template = %name, error = %e, "Startup request failed"),
    }
}

async fn consume_notifications(mut mailbox: Mailbox) {
    while let Some(notification) = mailbox.recv().await {
        tracing::info!(
            remote = %notification.remote_address,
            uri = %notification.uri,
            language = %notification.language,
            bytes = notification.body.len(),
            "Notification"
        );
        tracing::debug!(body = %notification.body, "Notification body");
    }
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
