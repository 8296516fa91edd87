//! vault-raft-backup binary entry point

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vault_raft_backup::config::AppConfig;
use vault_raft_backup::error::AppError;

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from environment
/// 3. Run the snapshot pipeline once
/// 4. Print the upload location, or report the failing stage
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("VAULT_RAFT_BACKUP_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vault_raft_backup=info".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    match run().await {
        Ok(location) => {
            println!("Vault Raft snapshot uploaded to, {location}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let stage = error.stage();
            tracing::error!(%stage, %error, "Vault raft backup failed");
            eprintln!("{stage} failed: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<vault_raft_backup::storage::UploadLocation, AppError> {
    // 2. Load configuration
    let config = AppConfig::load()?;
    tracing::info!(
        address = %config.cluster.address,
        snapshot_path = %config.cluster.snapshot_path.display(),
        bucket = %config.transfer.bucket,
        prefix = %config.transfer.prefix,
        "Configuration loaded"
    );

    // 3. Snapshot and upload
    vault_raft_backup::execute(&config.cluster, &config.transfer).await
}
