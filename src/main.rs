use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use fagsol_api as api;
use api::services::{
    notifications::LoggingNotifier, payments::mercadopago::MercadoPagoGateway,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::handlers::health::init_start_time();

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    if cfg.gateway.access_token.is_empty() {
        warn!("gateway.access_token is empty; charges will be refused by the gateway");
    }
    if !cfg.gateway.has_webhook_secret() {
        warn!("gateway.webhook_secret is not set; webhooks will be rejected");
    }

    let gateway = MercadoPagoGateway::new(&cfg.gateway)
        .context("failed to build payment gateway client")?;

    let app_state = api::AppState::new(
        Arc::new(db_pool),
        cfg.clone(),
        Arc::new(gateway),
        Arc::new(LoggingNotifier),
    );

    let mut app = api::app_router(app_state);
    if cfg.is_development() {
        info!("Using permissive CORS in development");
        app = app.layer(CorsLayer::permissive());
    }

    let ip = cfg
        .host
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("invalid host address: {}", cfg.host))?;
    let addr = SocketAddr::new(ip, cfg.port);
    info!(environment = %cfg.environment, "fagsol-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("fagsol-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
