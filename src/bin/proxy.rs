use anyhow::Context;
use image_analyser::config::ProxyConfig;
use image_analyser::{logging, proxy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    logging::init();

    let config = ProxyConfig::from_env().context("Invalid proxy configuration")?;
    let app = proxy::router(&config);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("Caption proxy running on http://localhost:{}", config.port);
    if let Some(dir) = &config.static_dir {
        tracing::info!(static_dir = %dir.display(), "Serving static files");
    }

    axum::serve(listener, app).await?;
    Ok(())
}
