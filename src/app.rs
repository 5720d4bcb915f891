/*
 * Responsibility
 * - コールドスタート: Config → secret blob → 鍵セット → サービス資格情報 → キャッシュ
 * - Router 組み立て + HTTP middleware の適用
 * - axum::serve() で起動
 */
use std::{panic, process, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::config::{Config, ServiceConfig};
use crate::middleware;
use crate::services::Authorizer;
use crate::services::auth::{JwksStore, TokenValidator};
use crate::services::cache::{MemoryCacheClient, ValkeyClient};
use crate::services::idp::{CredentialProvider, IdpClient};
use crate::services::permissions::{
    EphemeralCache, PermissionResolver, PermissionStore, ValkeyPermissionStore,
};
use crate::state::AppState;

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,api_authorizer=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        tracing::error!(?info, "panic");

        // In development, fail fast so we notice immediately.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;
    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        "starting authorizer in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let service = config
        .load_service_config()
        .context("unable to load authorizer configuration")?;

    let authorizer = build_authorizer(&config, &service).await?;
    let app = build_router(AppState::new(Arc::new(authorizer)));

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Everything here happens once per process; any failure aborts startup.
async fn build_authorizer(config: &Config, service: &ServiceConfig) -> Result<Authorizer> {
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("unable to build http client")?;

    let keys = JwksStore::remote(
        http.clone(),
        &service.jwks_uri,
        config.jwks_min_refresh_interval,
    )?;
    // Not fatal: the refresher and refresh-on-unknown-kid retry later
    if let Err(err) = keys.refresh().await {
        tracing::warn!(error = %err, "initial key set fetch failed");
    }
    keys.spawn_refresher(config.jwks_refresh_interval);

    let idp = Arc::new(IdpClient::new(http, service)?);
    let credentials = Arc::new(CredentialProvider::new(
        idp.clone(),
        config.credential_refresh_skew,
    ));
    credentials
        .initialize()
        .await
        .context("unable to obtain service credential")?;

    let durable = build_durable_store(config).await?;

    let resolver = Arc::new(PermissionResolver::new(
        EphemeralCache::new(),
        durable,
        idp,
        credentials,
        config.permissions_ttl,
    ));

    let validator = TokenValidator::new(
        service.issuer.clone(),
        service.token_audience.clone(),
        config.token_leeway_seconds,
        config.user_subject_marker.clone(),
    );

    Ok(Authorizer::new(keys, validator, resolver))
}

async fn build_durable_store(config: &Config) -> Result<Arc<dyn PermissionStore>> {
    let store: Arc<dyn PermissionStore> = match config.valkey_url.as_deref() {
        Some(url) => {
            let client = ValkeyClient::new(url)
                .await
                .context("unable to connect to permission cache")?;
            let store = ValkeyPermissionStore::new(
                client,
                config.cache_table_name.clone(),
                config.cache_retention,
            );
            tracing::info!(backend = store.backend_name(), table = %config.cache_table_name, "durable permission tier");
            Arc::new(store)
        }
        None => {
            tracing::warn!("VALKEY_URL not set, durable permission tier is in-process only");
            Arc::new(ValkeyPermissionStore::new(
                MemoryCacheClient::new(),
                config.cache_table_name.clone(),
                config.cache_retention,
            ))
        }
    };
    Ok(store)
}

fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .nest("/api/v1", api::v1::routes())
        .with_state(state);

    middleware::http::apply(router)
}
