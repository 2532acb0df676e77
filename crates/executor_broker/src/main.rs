// =============================================================================
// QMesh Distributed QPU - Executor Broker CLI
// =============================================================================
// Table of Contents:
//   1. CommandLine - Positional arguments
//   2. main - Startup and run loop
// =============================================================================
// Purpose: Process entry point for the executor broker. Two positional
//          arguments select the simulator backend and the number of QPU peers
//          in the batch; the batch key and registry path come from the
//          environment so launchers can inject them per job.
// =============================================================================

use clap::Parser;
use executor_broker::{BrokerConfig, ExecutorBroker};
use state_kernel::SimulatorKind;
use std::process::ExitCode;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

// =============================================================================
// 1. CommandLine - Positional arguments
// =============================================================================

#[derive(Debug, Parser)]
#[command(name = "executor_broker")]
#[command(about = "Co-simulates quantum tasks collected from a batch of QPU peers")]
struct CommandLine {
    /// Simulator backend identifier (Aer, Munich, Cunqa, Qulacs, Maestro)
    #[arg(value_parser = SimulatorKind::from_str)]
    simulator: SimulatorKind,

    /// Number of QPU peers contributing tasks to each batch
    peer_count: usize,
}

// =============================================================================
// 2. main - Startup and run loop
// =============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let arguments = CommandLine::parse();

    let batch_key = std::env::var("QMESH_JOB_ID").unwrap_or_else(|_| "local".to_string());
    let registry_path =
        std::env::var("QMESH_REGISTRY").unwrap_or_else(|_| "/tmp/qmesh_registry.json".to_string());

    let config = BrokerConfig::new(
        arguments.simulator,
        arguments.peer_count,
        registry_path,
        batch_key,
    );

    let mut broker = match ExecutorBroker::start(config) {
        Ok(broker) => broker,
        Err(error) => {
            tracing::error!(%error, "broker startup failed");
            return ExitCode::FAILURE;
        }
    };

    match broker.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "broker stopped on error");
            ExitCode::FAILURE
        }
    }
}
