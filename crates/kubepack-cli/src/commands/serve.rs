//! Serve command - run the HTTP API until interrupted

use console::style;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::Result;
use crate::server::{self, AppState};

pub async fn run(
    settings: &Settings,
    bind: SocketAddr,
    license_key: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let state = AppState {
        registry: settings.registry()?,
        publisher: settings.require_publisher()?,
        products: Arc::new(settings.products.clone()),
        license_key,
    };

    let listener = tokio::net::TcpListener::bind(bind).await?;
    println!(
        "{} Listening on {}",
        style("→").blue().bold(),
        style(listener.local_addr()?).cyan()
    );
    server::serve(listener, state, cancel).await?;
    println!("{} Server stopped", style("✓").green().bold());
    Ok(())
}
