use std::sync::Arc;

mod config;
mod encode;
mod error;
mod evaluate;
mod llm;
mod models;
mod ocr;
mod pipeline;
mod server;

use config::{AzureOpenAiConfig, ServerConfig};
use pipeline::Pipeline;
use server::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            tracing::warn!("failed to load .env file: {}", e);
        }
    }

    let server_config = ServerConfig::from_env()?;
    let state = AppState {
        pipeline: build_pipeline(&server_config),
    };
    let app = server::router(state, &server_config);

    let listener = tokio::net::TcpListener::bind(server_config.bind_target()).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Upload requests fail with a configuration error when this returns `None`;
/// the rest of the server still comes up.
fn build_pipeline(server_config: &ServerConfig) -> Option<Arc<Pipeline>> {
    let config = match AzureOpenAiConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("service initialization error: {}", e);
            return None;
        }
    };

    tracing::info!(
        endpoint = %config.endpoint,
        deployment = %config.deployment,
        api_version = %config.api_version,
        "services configured"
    );

    match Pipeline::new(&config, server_config.staging_dir.clone()) {
        Ok(pipeline) => Some(Arc::new(pipeline)),
        Err(e) => {
            tracing::error!("service initialization error: {}", e);
            None
        }
    }
}
