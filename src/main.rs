use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use patisserie_api as api;

use api::services::notifications::{
    email::{EmailSender, HttpEmailSender, NoopEmailSender},
    print::{HttpReceiptPrinter, NoopReceiptPrinter, ReceiptPrinter},
    sms::{HttpSmsSender, NoopSmsSender, SmsSender},
};
use api::services::payment_gateway::{PaymentGateway, StripeGateway};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Auth: tokens come from the external auth service; we only validate.
    let auth_service = Arc::new(api::auth::AuthService::new(api::auth::AuthConfig::new(
        cfg.jwt_secret.clone(),
        Duration::from_secs(3600),
    )));

    // External integrations. Unconfigured channels degrade to no-ops that
    // log instead of sending.
    let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(
        cfg.gateway_secret_key.clone(),
        cfg.gateway_api_base.clone(),
        cfg.checkout_success_url.clone(),
        cfg.checkout_cancel_url.clone(),
    ));

    let mailer: Arc<dyn EmailSender> = match (&cfg.email_api_url, &cfg.email_api_key) {
        (Some(url), Some(key)) => Arc::new(HttpEmailSender::new(
            url.clone(),
            key.clone(),
            cfg.email_from.clone(),
        )),
        _ => {
            info!("Email provider not configured; email channel disabled");
            Arc::new(NoopEmailSender)
        }
    };

    let sms: Arc<dyn SmsSender> = match (&cfg.sms_api_base, &cfg.sms_account_sid, &cfg.sms_auth_token, &cfg.sms_from)
    {
        (Some(base), Some(sid), Some(token), Some(from)) => Arc::new(HttpSmsSender::new(
            base.clone(),
            sid.clone(),
            token.clone(),
            from.clone(),
        )),
        _ => {
            info!("SMS provider not configured; SMS channel disabled");
            Arc::new(NoopSmsSender)
        }
    };

    let printer: Arc<dyn ReceiptPrinter> =
        match (&cfg.printer_api_url, &cfg.printer_api_key, &cfg.printer_id) {
            (Some(url), Some(key), Some(id)) => Arc::new(HttpReceiptPrinter::new(
                url.clone(),
                key.clone(),
                id.clone(),
            )),
            _ => {
                info!("POS printer not configured; print channel disabled");
                Arc::new(NoopReceiptPrinter)
            }
        };

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        Arc::new(event_sender.clone()),
        &cfg,
        gateway,
        mailer,
        sms,
        printer,
    );

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
        auth: auth_service,
    };

    // Build CORS layer from config
    let cors_layer = match cfg.cors_allowed_origins.as_ref() {
        Some(raw) => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None if cfg.is_development() => {
            info!("Using permissive CORS (development environment)");
            CorsLayer::permissive()
        }
        None => {
            error!("Missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS");
            return Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS".into());
        }
    };

    let app = api::app_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    // Bind and serve
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("patisserie-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
