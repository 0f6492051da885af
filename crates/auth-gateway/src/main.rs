//! Auth Gateway
//!
//! gRPC server that authenticates every inbound call against the identity
//! provider realm before it reaches a handler.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Build the shared identity provider client
//! 3. Build the token verifier and auth layer
//! 4. Build the credential cache and category client
//! 5. Start the gRPC server
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]

use auth_gateway::config::{Config, LogFormat};
use auth_gateway::grpc::{AuthLayer, AuthRpcService, ExclusionSet};
use auth_gateway::services::CategoryClient;
use common::credential_cache::{ClientIdentity, CredentialCache};
use common::identity_provider::IdentityProviderClient;
use common::verifier::TokenVerifier;
use proto_gen::auth::auth_service_server::AuthServiceServer;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first so the log format is known
    let config = Config::from_env();
    let log_format = config
        .as_ref()
        .map_or(LogFormat::default(), |c| c.log_format);

    let (text_layer, json_layer) = match log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_gateway=debug,common=info".into()),
        )
        .with(text_layer)
        .with(json_layer)
        .init();

    info!("Starting Auth Gateway");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        grpc_bind_address = %config.grpc_bind_address,
        realm = %config.identity_provider.realm,
        client_id = %config.identity_provider.client_id,
        category_service_url = %config.category_service_url,
        "Configuration loaded successfully"
    );

    // One provider client shared by the verifier, auth service and credential cache
    let identity_provider = Arc::new(
        IdentityProviderClient::new(config.identity_provider.clone()).map_err(|e| {
            error!(error = %e, "Failed to create identity provider client");
            e
        })?,
    );

    let verifier = Arc::new(TokenVerifier::new(
        &config.identity_provider,
        identity_provider.clone(),
    ));
    let auth_layer = AuthLayer::new(verifier, ExclusionSet::default());

    let credentials = Arc::new(CredentialCache::new(identity_provider.clone()));
    let service_identity = ClientIdentity::new(
        config.identity_provider.client_id.clone(),
        config.identity_provider.client_secret.clone(),
    );
    let category_client = CategoryClient::new(
        config.category_service_url.clone(),
        Arc::clone(&credentials),
        service_identity,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to create category client");
        e
    })?;

    let shutdown_token = CancellationToken::new();

    // Warm the credential cache and log what the category service offers
    let warmup_token = shutdown_token.child_token();
    tokio::spawn(async move {
        tokio::select! {
            categories = category_client.categories_or_default() => {
                info!(count = categories.len(), "Category list loaded");
            }
            () = warmup_token.cancelled() => {}
        }
    });

    let grpc_addr = config.grpc_bind_address;
    let grpc_shutdown_token = shutdown_token.child_token();
    let grpc_server = tonic::transport::Server::builder()
        .layer(auth_layer)
        .add_service(AuthServiceServer::new(AuthRpcService::new(identity_provider)))
        .serve_with_shutdown(grpc_addr, async move {
            grpc_shutdown_token.cancelled().await;
            info!("gRPC server shutting down");
        });

    let grpc_task = tokio::spawn(async move {
        info!(addr = %grpc_addr, "gRPC server starting");
        if let Err(e) = grpc_server.await {
            error!(error = %e, "gRPC server failed");
        }
    });

    info!("Auth Gateway running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    shutdown_token.cancel();

    if let Err(e) = grpc_task.await {
        error!(error = %e, "gRPC server task panicked");
    }

    info!("Auth Gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
