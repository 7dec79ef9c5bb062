use dotenv::dotenv;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use circuit_gate::directory::{User, UserDirectory};
use circuit_gate::mailer::{EmailRequest, Mailer};
use circuit_gate::simulation::FlakyBackend;
use circuit_gate::{init_logging, BreakerConfig, BreakerRegistry, RegistryConfig, TracingSink};

/// Registry configuration from the JSON file named by CIRCUIT_GATE_CONFIG,
/// or defaults from CIRCUIT_GATE_* variables
fn load_config() -> circuit_gate::Result<RegistryConfig> {
    match std::env::var("CIRCUIT_GATE_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading breaker configuration file");
            RegistryConfig::from_file(path)
        }
        Err(_) => Ok(RegistryConfig {
            defaults: BreakerConfig::from_env("CIRCUIT_GATE")?,
            ..RegistryConfig::default()
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();
    info!("Circuit gate starting up");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid breaker configuration");
            return Err(e.into());
        }
    };
    debug!(?config, "Configuration loaded");

    let registry = BreakerRegistry::new(config)?.with_sink(Arc::new(TracingSink));
    let directory = UserDirectory::new(
        registry.breaker("database")?,
        Arc::new(FlakyBackend::default()),
    );

    let users = directory.find_all().await?;
    info!(count = users.len(), "Loaded users");

    match directory
        .save(User::new("Olga Smirnova", "olga.smirnova@example.com"))
        .await
    {
        Ok(saved) => info!(id = saved.id, "Saved user"),
        Err(e) if e.is_open() => warn!(error = %e, "Save rejected, retry later"),
        Err(e) => warn!(error = %e, "Save failed"),
    }

    let healthy = directory.is_healthy().await;
    let stats = directory.stats().await?;
    info!(
        healthy,
        status = %stats.status,
        users = ?stats.total_users,
        "Database status"
    );

    let mailer = Mailer::new(
        registry.breaker("email")?,
        Arc::new(FlakyBackend::default()),
    );
    let welcome = EmailRequest::new(
        "olga.smirnova@example.com",
        "noreply@example.com",
        "Welcome",
        "Your account is ready.",
    );
    match mailer.send(welcome).await {
        Ok(outcome) => info!(?outcome, queued = mailer.queued(), "Welcome email handled"),
        Err(e) => warn!(error = %e, "Welcome email dropped"),
    }

    for (name, metrics) in registry.metrics() {
        println!("{}: {}", name, serde_json::to_string(&metrics)?);
    }

    Ok(())
}
