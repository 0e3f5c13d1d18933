//! # Dispatch Node
//!
//! Command-line entry point: plan deliveries, update order status, or
//! migrate the order database.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dispatch_core::{CancelHandle, OrderId};
use dispatch_node::{telemetry, Config, DeliveryPlanner};
use dispatch_planner::StrategyKind;
use dispatch_store::PgOrderStore;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dispatch-node", version, about = "Robot delivery dispatch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assign pending orders to a robot and print the plan as JSON.
    Plan {
        /// Robot identifier recorded on the plan.
        #[arg(long)]
        robot: String,

        /// Weight the robot can carry.
        #[arg(long)]
        capacity: i64,

        /// Override the configured strategy (exact or greedy).
        #[arg(long)]
        strategy: Option<StrategyKind>,

        /// Override the configured timeout.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Move one order to a new status.
    Status {
        #[arg(long)]
        order: i64,

        /// Target status: assigned, delivered or cancelled.
        #[arg(long)]
        status: String,
    },
    /// Apply database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    let store = PgOrderStore::connect(&config.store_options()).await?;

    // Ctrl-C cancels the call in flight; its transaction rolls back.
    let handle = Arc::new(CancelHandle::new());
    let cancel = handle.token();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling");
                handle.cancel();
            }
        }
    });

    match cli.command {
        Command::Plan {
            robot,
            capacity,
            strategy,
            timeout_ms,
        } => {
            if let Some(strategy) = strategy {
                config.planner.strategy = strategy;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.planner.plan_timeout_ms = timeout_ms;
            }

            let planner = DeliveryPlanner::from_config(Arc::new(store), &config.planner);
            info!(
                strategy = planner.strategy_name(),
                timeout = ?Duration::from_millis(config.planner.plan_timeout_ms),
                "Planning deliveries"
            );

            let plan = planner
                .generate_delivery_plan(&robot, capacity, &cancel)
                .await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Status { order, status } => {
            let planner = DeliveryPlanner::from_config(Arc::new(store), &config.planner);
            planner
                .update_order_status(OrderId(order), &status, &cancel)
                .await?;
            println!("order {} is now {}", order, status.trim().to_lowercase());
        }
        Command::Migrate => {
            store.migrate().await?;
        }
    }

    Ok(())
}
