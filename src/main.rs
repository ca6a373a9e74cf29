use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snowgate::cli::{Cli, Commands, CustomerCommands, IntegratorCommands};
use snowgate::config::{self, Config};
use snowgate::gateway::ExecutionGateway;
use snowgate::metering::UsageMeter;
use snowgate::middleware::rate_limit::RateLimiter;
use snowgate::models::tenant::TenantStatus;
use snowgate::store::postgres::PgStore;
use snowgate::tenant::{self, TenantRegistry};
use snowgate::tools::builtin::builtin_registry;
use snowgate::vault::crypto::parse_master_key;
use snowgate::vault::oauth::HttpTokenClient;
use snowgate::vault::CredentialVault;
use snowgate::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "snowgate=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => run_server(cfg, port).await,
        Some(Commands::Customer { command }) => {
            let store = PgStore::connect(&cfg.database_url, &cfg.master_key).await?;
            handle_customer_command(&store, command).await
        }
        Some(Commands::Integrator { command }) => {
            let store = PgStore::connect(&cfg.database_url, &cfg.master_key).await?;
            handle_integrator_command(&store, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let store = Arc::new(PgStore::connect(&cfg.database_url, &cfg.master_key).await?);

    tracing::info!("Running migrations...");
    store.migrate().await?;

    let registry = Arc::new(builtin_registry().context("building tool registry")?);
    tracing::info!(tool_count = registry.len(), "Tool registry built");

    let tenants = Arc::new(TenantRegistry::new(
        store.clone(),
        Duration::from_secs(cfg.tenant_cache_ttl_secs),
    ));

    let vault = Arc::new(CredentialVault::new(
        store.clone(),
        Arc::new(HttpTokenClient::new()),
        cfg.oauth_apps.clone(),
        parse_master_key(&cfg.master_key)?,
        (cfg.token_skew_secs as i64) * 1000,
    ));

    let gateway = ExecutionGateway::new(
        tenants,
        vault,
        registry,
        RateLimiter::new(cfg.rate_limit, Duration::from_secs(cfg.rate_limit_window)),
        UsageMeter::new(store.clone()),
        Duration::from_secs(cfg.execution_timeout_secs),
    );

    let state = Arc::new(AppState { gateway, config: cfg });

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .merge(snowgate::api::api_router())
        .with_state(state)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        // License keys ride in the Authorization header, no cookies, so a
        // permissive CORS policy is safe for this surface.
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("snowgate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_customer_command(store: &PgStore, cmd: CustomerCommands) -> anyhow::Result<()> {
    match cmd {
        CustomerCommands::Create { name, integrator } => {
            let integrator_id = integrator
                .map(|s| s.parse().context("Invalid integrator id"))
                .transpose()?;
            let license_key = tenant::generate_license_key(false);
            let id = store
                .create_customer(&name, &license_key, integrator_id)
                .await?;
            println!(
                "Customer created:\n  Name:        {}\n  ID:          {}\n  License key: {}",
                name, id, license_key
            );
        }
        CustomerCommands::List => {
            let customers = store.list_customers().await?;
            if customers.is_empty() {
                println!("No customers found.");
            } else {
                println!("{:<38} {:<24} {:<22} {:<10}", "ID", "NAME", "LICENSE", "STATUS");
                for c in customers {
                    println!(
                        "{:<38} {:<24} {:<22} {:<10}",
                        c.id,
                        c.name,
                        c.license_key,
                        c.status.as_str()
                    );
                }
            }
        }
        CustomerCommands::Suspend { license_key } => {
            let changed = store
                .set_customer_status(&license_key, TenantStatus::Suspended)
                .await?;
            if changed {
                println!("Customer suspended.");
            } else {
                println!("License key not found.");
            }
        }
        CustomerCommands::Reactivate { license_key } => {
            let changed = store
                .set_customer_status(&license_key, TenantStatus::Active)
                .await?;
            if changed {
                println!("Customer reactivated.");
            } else {
                println!("License key not found.");
            }
        }
    }
    Ok(())
}

async fn handle_integrator_command(
    store: &PgStore,
    cmd: IntegratorCommands,
) -> anyhow::Result<()> {
    match cmd {
        IntegratorCommands::Create {
            company_name,
            white_label,
        } => {
            let license_key = tenant::generate_license_key(true);
            let id = store
                .create_service_integrator(&company_name, &license_key, white_label)
                .await?;
            println!(
                "Service integrator created:\n  Company:    {}\n  ID:         {}\n  Master key: {}",
                company_name, id, license_key
            );
        }
        IntegratorCommands::List => {
            let integrators = store.list_service_integrators().await?;
            if integrators.is_empty() {
                println!("No service integrators found.");
            } else {
                println!("{:<38} {:<24} {:<22} {:<10}", "ID", "COMPANY", "MASTER KEY", "STATUS");
                for si in integrators {
                    println!(
                        "{:<38} {:<24} {:<22} {:<10}",
                        si.id,
                        si.company_name,
                        si.license_key,
                        si.status.as_str()
                    );
                }
            }
        }
    }
    Ok(())
}
