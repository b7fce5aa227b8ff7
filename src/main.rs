use std::sync::Arc;

use semptify_storage::config::{load_config, print_schema, StorageEnv};
use semptify_storage::enforcer::StorageEnforcer;
use semptify_storage::startup::run;
use semptify_storage::utils::logger::init_logging;
use tracing::error;

#[tokio::main]
async fn main() {
    if std::env::args().any(|arg| arg == "--schema") {
        print_schema();
        return;
    }

    let config = load_config();
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialise logging: {}", e);
        std::process::exit(1);
    }

    let env = StorageEnv::from_env();
    if let Err(e) = StorageEnforcer::new(&env).enforce_storage_requirement(None) {
        error!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(Arc::new(config), env).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
