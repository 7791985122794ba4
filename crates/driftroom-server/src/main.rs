//! `driftroom-server` binary entrypoint.
//!
//! ```bash
//! driftroom-server --bind 0.0.0.0:8080
//! ```

use std::sync::Arc;

use clap::Parser;
use driftroom_blob::OpendalBlobStore;
use driftroom_db::PgStore;
use driftroom_server::config::Config;
use driftroom_server::registry::Registry;
use driftroom_server::{AppState, app, auth};
use opendal::Operator;
use opendal::services::{Fs, S3};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Ephemeral two-party chat service
#[derive(Parser, Debug)]
#[command(name = "driftroom-server")]
#[command(about = "Ephemeral two-party chat service")]
#[command(version)]
struct Args {
    /// Address to bind to; overrides the config file/env value if set.
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn build_blob_operator(endpoint: &str, access_key: Option<&str>, secret_key: Option<&str>, bucket: &str, region: Option<&str>) -> Result<Operator, Box<dyn std::error::Error>> {
    if let Some(path) = endpoint.strip_prefix("file://") {
        let builder = Fs::default().root(&format!("{path}/{bucket}"));
        return Ok(Operator::new(builder)?.finish());
    }
    let mut builder = S3::default()
        .endpoint(endpoint)
        .bucket(bucket)
        .region(region.unwrap_or("us-east-1"));
    if let Some(key) = access_key {
        builder = builder.access_key_id(key);
    }
    if let Some(secret) = secret_key {
        builder = builder.secret_access_key(secret);
    }
    Ok(Operator::new(builder)?.finish())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = Config::load()?;
    let bind_addr = args.bind.unwrap_or_else(|| config.bind.clone());

    tracing::info!("driftroom-server starting");

    let master_key = config.master_key()?;
    let cookie_key = auth::cookie_key_from_master(config.master_key_b64.as_bytes());
    let jwt_secret = config.jwt_secret_bytes();

    let store = PgStore::connect(&config.database_url).await?;
    store.migrate().await?;

    let attachment_op = build_blob_operator(
        &config.blob.endpoint,
        config.blob.access_key.as_deref(),
        config.blob.secret_key.as_deref(),
        &config.blob.attachment_bucket,
        config.blob.region.as_deref(),
    )?;
    let archive_op = build_blob_operator(
        &config.blob.endpoint,
        config.blob.access_key.as_deref(),
        config.blob.secret_key.as_deref(),
        &config.blob.archive_bucket,
        config.blob.region.as_deref(),
    )?;
    let blob = OpendalBlobStore::new(attachment_op, archive_op);
    blob.ensure_ready().await?;

    let state = AppState {
        store: Arc::new(store),
        blob: Arc::new(blob),
        master_key: Arc::new(master_key),
        registry: Arc::new(Registry::new()),
        broadcaster: Arc::new(driftroom_server::broadcast::Broadcaster::new()),
        jwt_secret: Arc::new(jwt_secret),
        cookie_key,
        session_cookie_days: config.session_cookie_days,
    };

    let cancel = CancellationToken::new();
    let archival_state = Arc::new(state.clone());
    let archival_cancel = cancel.clone();
    let archival_period = config.archival_period();
    let archival_handle = tokio::spawn(async move {
        driftroom_server::archival::run(archival_state, archival_period, archival_cancel).await;
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "listening");

    let app = app(state);
    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_cancel.cancel();
        })
        .await?;

    cancel.cancel();
    let _ = archival_handle.await;
    Ok(())
}
