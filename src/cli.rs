use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "snowgate", about = "Multi-tenant credential vault and tool-execution gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway.
    Serve {
        #[arg(long, default_value_t = 8443)]
        port: u16,
    },
    /// Tenant provisioning and status management.
    Customer {
        #[command(subcommand)]
        command: CustomerCommands,
    },
    /// Service-integrator (MSP) provisioning.
    Integrator {
        #[command(subcommand)]
        command: IntegratorCommands,
    },
}

#[derive(Subcommand)]
pub enum CustomerCommands {
    /// Create a customer and issue its license key.
    Create {
        name: String,
        /// Owning service-integrator id, if any.
        #[arg(long)]
        integrator: Option<String>,
    },
    /// List all customers.
    List,
    /// Suspend a customer by license key (takes effect within seconds).
    Suspend { license_key: String },
    /// Re-activate a suspended customer.
    Reactivate { license_key: String },
}

#[derive(Subcommand)]
pub enum IntegratorCommands {
    /// Create a service integrator and issue its master license key.
    Create {
        company_name: String,
        #[arg(long, default_value_t = false)]
        white_label: bool,
    },
    /// List all service integrators.
    List,
}
