//! Edge gateway: identity endpoints, token checks, proxy to the portal,
//! and the role-assignment consumer that keeps accounts in step.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use clubhub_api::config::GatewayConfig;
use clubhub_api::consumers::ConsumerSet;
use clubhub_api::gateway::{GatewayState, Upstream, build_gateway};
use clubhub_auth::{InMemoryRefreshStore, TokenService, UserAccount};
use clubhub_infra::IdentityService;
use clubhub_infra::handlers::RoleAssignmentHandler;
use clubhub_infra::store::InMemoryRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    clubhub_observability::init();

    let config = GatewayConfig::from_env()?;
    let tokens = TokenService::from_secret_value(
        &config.jwt_secret,
        config.tokens,
        Arc::new(InMemoryRefreshStore::new()),
    )?;
    let (publisher, consumer) = config.broker.connect("identity")?;

    let users = Arc::new(InMemoryRepository::<UserAccount>::new());
    let identity = Arc::new(IdentityService::new(
        users.clone(),
        Arc::new(tokens),
        publisher,
        config.bcrypt_cost,
    ));
    if let Some(admin) = &config.admin {
        identity
            .ensure_admin(&admin.email, "Administrator", &admin.password)
            .context("bootstrapping the admin account")?;
    }

    let mut consumers = ConsumerSet::new();
    consumers.spawn(consumer, RoleAssignmentHandler::new(users));

    let upstream = Upstream::new(&config.upstream_url, config.upstream_timeout)?;
    let app = build_gateway(GatewayState { identity, upstream });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, upstream = %config.upstream_url, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    consumers.shutdown().await;
    Ok(())
}
