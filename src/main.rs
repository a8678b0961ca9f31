//! HerbVerse storefront service

use std::sync::Arc;

use anyhow::Result;
use herbverse::api::{self, AppState};
use herbverse::store::{DocumentStore, InMemoryDocumentStore, PgDocumentStore};
use herbverse::{telemetry, AuthService, Config, Storefront};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    telemetry::init();

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => Arc::new(PgDocumentStore::connect(url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(InMemoryDocumentStore::new())
        }
    };

    let auth = Arc::new(AuthService::new());
    let storefront = Arc::new(Storefront::new(store, auth.clone(), config.clone()));
    match storefront.catalog.refresh().await {
        Ok(count) => tracing::info!(count, "catalog loaded"),
        Err(e) => tracing::warn!(error = %e, "catalog unavailable at startup"),
    }

    let app = api::router(AppState { storefront, auth });
    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "HerbVerse storefront listening");
    axum::serve(listener, app).await?;
    Ok(())
}
