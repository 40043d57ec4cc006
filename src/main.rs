use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use session_auth::clock::SystemClock;
use session_auth::configuration::get_configuration;
use session_auth::housekeeping::spawn_purge_task;
use session_auth::session::SessionManager;
use session_auth::startup::run;
use session_auth::store::{PgCredentialStore, PgRevocationStore};
use session_auth::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, msg: &str) -> std::io::Error {
    std::io::Error::new(kind, msg.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry("info");

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read configuration");
            return Err(startup_error(std::io::ErrorKind::InvalidInput, "Configuration error"));
        }
    };

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create connection pool");
            startup_error(std::io::ErrorKind::ConnectionRefused, "Database connection error")
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to run database migrations");
        startup_error(std::io::ErrorKind::Other, "Migration error")
    })?;
    tracing::info!("Database ready");

    let session = SessionManager::new(
        &configuration.jwt,
        &configuration.password,
        Arc::new(PgCredentialStore::new(pool.clone())),
        Arc::new(PgRevocationStore::new(pool)),
        Arc::new(SystemClock),
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to build session manager");
        startup_error(std::io::ErrorKind::Other, "Session manager error")
    })?;
    let session = Arc::new(session);

    let _purge = spawn_purge_task(
        session.clone(),
        configuration.housekeeping.purge_interval_seconds,
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!(address = %address, "Server listening");

    run(listener, session)?.await
}
