//! Demo gateway: wires the tenancy core from env, mounts the tenant extractor
//! in front of a trivial handler, and drains all pools on ctrl-c.

use axum::{routing::get, Json, Router};
use clubdeck_tenancy::{Tenancy, TenancyConfig, Tenant};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("clubdeck_tenancy=info".parse()?),
        )
        .init();

    let config = TenancyConfig::from_env()?;
    let tenancy = Tenancy::init(&config).await?;

    let app = Router::new()
        .route("/whoami", get(whoami))
        .with_state(tenancy.state());

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    let failures = tenancy.shutdown().await;
    for (tenant_id, error) in failures {
        tracing::warn!(%tenant_id, %error, "pool did not close cleanly");
    }
    Ok(())
}

async fn whoami(Tenant(context): Tenant) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "tenantId": context.tenant_id(),
        "subdomain": context.subdomain(),
        "database": context.params().database,
    }))
}
