use serde::Deserialize;
use server::{
    ServerState, SessionLifetime,
    mail::{MailConfig, MailError, Mailer},
    media::MediaStore,
};
use snapgram_common::{
    media::{ImageNormalizer, NormalizerConfig},
    snowflake::{ProcessId, WorkerId},
    util::PositiveDuration,
};
use snapgram_db::client::{DbClient, DbError};
use sqlx::postgres::PgPoolOptions;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

const MIB: usize = 1024 * 1024;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Error connecting to the database: {0}")]
    DbConnect(sqlx::Error),
    #[error("Error preparing the database: {0}")]
    Db(#[from] DbError),
    #[error("Error setting up mail delivery: {0}")]
    Mail(#[from] MailError),
    #[error("Error creating the media root: {0}")]
    MediaRoot(std::io::Error),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_max_file_size_mb() -> usize {
    5
}

fn default_max_request_size_mb() -> usize {
    25
}

fn default_image_edge() -> u32 {
    1080
}

fn default_image_jpeg_quality() -> u8 {
    85
}

fn default_session_lifetime() -> PositiveDuration {
    PositiveDuration::new_unchecked(time::Duration::weeks(2))
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_from() -> String {
    "Snapgram <noreply@snapgram.local>".to_owned()
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: String,
    worker_id: WorkerId,
    process_id: ProcessId,
    #[serde(default = "default_media_root")]
    media_root: PathBuf,
    #[serde(default = "default_max_file_size_mb")]
    max_file_size_mb: usize,
    #[serde(default = "default_max_request_size_mb")]
    max_request_size_mb: usize,
    #[serde(default = "default_image_edge")]
    image_thumbnail_width: u32,
    #[serde(default = "default_image_edge")]
    image_thumbnail_height: u32,
    #[serde(default = "default_image_jpeg_quality")]
    image_jpeg_quality: u8,
    #[serde(default = "default_session_lifetime")]
    session_lifetime_seconds: PositiveDuration,
    #[serde(default)]
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    #[serde(default = "default_smtp_from")]
    smtp_from: String,
    #[serde(default = "default_true")]
    smtp_starttls: bool,
}

impl Env {
    fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            max_bytes: self.max_file_size_mb.saturating_mul(MIB),
            max_width: self.image_thumbnail_width,
            max_height: self.image_thumbnail_height,
            quality: self.image_jpeg_quality.clamp(1, 100),
        }
    }

    fn mail_config(&self) -> MailConfig {
        MailConfig {
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.smtp_port,
            smtp_username: self.smtp_username.clone(),
            smtp_password: self.smtp_password.clone(),
            smtp_from: self.smtp_from.clone(),
            smtp_starttls: self.smtp_starttls,
        }
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "snapgram_api=debug,snapgram_common=debug,snapgram_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

/// Cancels the returned token on Ctrl-C.
fn shutdown_signal() -> CancellationToken {
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "Listening for Ctrl-C failed");
        } else {
            info!("Shutting down");
        }
        trigger.cancel();
    });

    shutdown
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let pool = PgPoolOptions::new()
        .connect(&env.database_url)
        .await
        .map_err(InitError::DbConnect)?;
    let db_client = DbClient::new(pool, env.worker_id, env.process_id);
    db_client.migrate().await?;

    tokio::fs::create_dir_all(&env.media_root)
        .await
        .map_err(InitError::MediaRoot)?;

    let state = ServerState {
        db_client: Arc::new(db_client),
        mailer: Arc::new(Mailer::new(&env.mail_config())?),
        media_store: Arc::new(MediaStore::new(
            env.media_root.clone(),
            ImageNormalizer::new(env.normalizer_config()),
        )),
        session_lifetime: SessionLifetime(env.session_lifetime_seconds),
    };
    let app = server::app(state, env.max_request_size_mb.saturating_mul(MIB));

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal().cancelled_owned())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
