use std::env;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kube_portal::auth::{PasswordVerifier, Sha256Verifier};
use kube_portal::config::AppConfig;
use kube_portal::kube::executor::KubectlRunner;
use kube_portal::store::Database;
use kube_portal::{build_router, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    let db = Database::open(config.database_path())?;

    let verifier: Arc<dyn PasswordVerifier> = Arc::new(Sha256Verifier);
    let state = AppState::new(
        config.clone(),
        db,
        Arc::new(KubectlRunner::discover()),
        verifier.clone(),
    );

    // Optional first-run bootstrap so a fresh deployment has an admin login.
    if let (Ok(username), Ok(password)) = (
        env::var("PORTAL_ADMIN_USER"),
        env::var("PORTAL_ADMIN_PASSWORD"),
    ) {
        let email = env::var("PORTAL_ADMIN_EMAIL")
            .unwrap_or_else(|_| format!("{username}@portal.local"));
        let admin = state
            .users
            .ensure_admin(&username, &email, &verifier.hash(&password))?;
        info!(username = %admin.username, "admin account ready");
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "portal listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
