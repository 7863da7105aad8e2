//! Club portal: approval workflows, club read models, and the portal's
//! fact consumers (directory, cascades, approval notifications).

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use clubhub_api::app::build_portal;
use clubhub_api::app::services::PortalServices;
use clubhub_api::config::PortalConfig;
use clubhub_infra::external::LogMailer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    clubhub_observability::init();

    let config = PortalConfig::from_env()?;
    let (publisher, consumer) = config.broker.connect("portal")?;

    let services = Arc::new(PortalServices::in_memory(publisher, &config.object_base_url));
    let consumers = services.spawn_consumers(consumer, Arc::new(LogMailer));
    info!(consumers = consumers.len(), "consumers started");

    let app = build_portal(services);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "portal listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    consumers.shutdown().await;
    Ok(())
}
