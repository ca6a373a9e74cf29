//! Snowgate — multi-tenant credential vault and tool-execution gateway.
//!
//! Authenticates tenants by license key, stores and refreshes third-party
//! OAuth2/API credentials on their behalf, and brokers execution of named
//! remote tools against those credentials under rate limits, timeouts and
//! usage auditing.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod metering;
pub mod middleware;
pub mod models;
pub mod store;
pub mod tenant;
pub mod tools;
pub mod vault;

/// Shared application state passed to handlers.
pub struct AppState {
    pub gateway: gateway::ExecutionGateway,
    pub config: config::Config,
}
