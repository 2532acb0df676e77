// =============================================================================
// QMesh Distributed QPU - Executor Broker
// =============================================================================
// Table of Contents:
//   1. BrokerError - Broker failures
//   2. BrokerConfig - Startup parameters
//   3. ExecutorBroker - Collect, co-simulate, reply
// =============================================================================
// Purpose: The coordinator for quantum-communication mode. It discovers the
//          batch's QPU peers through the registry, greets each with a ready
//          marker, then loops: collect one encoded task per peer, co-simulate
//          the batch on a single kernel, and return the result document to
//          every contributing peer. QSEND/QRECV/EXPOSE/RCONTROL resolve
//          inside this process; only classical SEND/RECV crosses peers.
// =============================================================================

use peer_services::{
    ChannelError, ClassicalChannel, DeploymentMode, DiscoveryRegistry, RegistryError,
};
use shot_runtime::{BatchLayout, ResultDocument, ShotInterpreter};
use state_kernel::{build_kernel, KernelError, SimulatorKind};
use std::path::PathBuf;
use std::time::Duration;
use task_codec::{decode_task, CodecError, QuantumTask};
use thiserror::Error;

// =============================================================================
// 1. BrokerError - Broker failures
// =============================================================================

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// =============================================================================
// 2. BrokerConfig - Startup parameters
// =============================================================================

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub simulator: SimulatorKind,
    pub expected_peer_count: usize,
    pub registry_path: PathBuf,
    pub batch_key: String,
    pub discovery_timeout: Duration,
}

impl BrokerConfig {
    pub fn new(
        simulator: SimulatorKind,
        expected_peer_count: usize,
        registry_path: impl Into<PathBuf>,
        batch_key: impl Into<String>,
    ) -> Self {
        Self {
            simulator,
            expected_peer_count,
            registry_path: registry_path.into(),
            batch_key: batch_key.into(),
            discovery_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn executor_identifier(&self) -> String {
        format!("{}_executor", self.batch_key)
    }
}

// =============================================================================
// 3. ExecutorBroker - Collect, co-simulate, reply
// =============================================================================

pub struct ExecutorBroker {
    simulator: SimulatorKind,
    channel: ClassicalChannel,
    peer_identifiers: Vec<String>,
}

impl ExecutorBroker {
    // Discovers the batch's peers, publishes this endpoint, connects to every
    // peer and sends the ready marker. An unavailable simulator identifier
    // fails here, before any peer is touched.
    pub fn start(config: BrokerConfig) -> Result<Self, BrokerError> {
        build_kernel(config.simulator, 1, None)?;

        let registry = DiscoveryRegistry::new(&config.registry_path);
        let executor_identifier = config.executor_identifier();
        let channel = ClassicalChannel::bind(executor_identifier.clone(), registry.clone())?;

        let peers = registry.wait_for_peers(
            &config.batch_key,
            config.expected_peer_count,
            &executor_identifier,
            config.discovery_timeout,
        )?;

        channel.publish(DeploymentMode::CoLocated)?;

        let peer_identifiers: Vec<String> = peers.keys().cloned().collect();
        for peer in &peer_identifiers {
            channel.connect(peer)?;
            channel.send_info(b"ready", peer)?;
        }

        tracing::info!(
            simulator = %config.simulator,
            peers = peer_identifiers.len(),
            "executor broker ready"
        );

        Ok(Self {
            simulator: config.simulator,
            channel,
            peer_identifiers,
        })
    }

    pub fn peer_identifiers(&self) -> &[String] {
        &self.peer_identifiers
    }

    // One collect -> simulate -> reply cycle. Returns how many peers
    // contributed a task; an empty payload means "no work" from that peer.
    pub fn run_round(&mut self) -> Result<usize, BrokerError> {
        let mut tasks: Vec<QuantumTask> = Vec::new();
        let mut contributing: Vec<String> = Vec::new();

        for peer in &self.peer_identifiers {
            let payload = self.channel.recv_info(peer)?;
            if payload.is_empty() {
                continue;
            }
            let document = String::from_utf8_lossy(&payload);
            tasks.push(decode_task(&document)?);
            contributing.push(peer.clone());
        }

        if tasks.is_empty() {
            return Ok(0);
        }

        tracing::debug!(tasks = tasks.len(), "co-simulating batch");
        let result = self.simulate_batch(&tasks);
        let wire = result.to_wire();
        for peer in &contributing {
            self.channel.send_info(wire.as_bytes(), peer)?;
        }
        Ok(contributing.len())
    }

    pub fn run(&mut self) -> Result<(), BrokerError> {
        loop {
            self.run_round()?;
        }
    }

    fn simulate_batch(&self, tasks: &[QuantumTask]) -> ResultDocument {
        let register_width = BatchLayout::required_register_width(tasks);
        let seed = tasks[0].config.seed;
        let mut kernel = match build_kernel(self.simulator, register_width, seed) {
            Ok(kernel) => kernel,
            Err(error) => return ResultDocument::failure(error.to_string()),
        };
        ShotInterpreter::new(kernel.as_mut())
            .with_classical_channel(&self.channel)
            .simulate(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_codec::{encode_task, Instruction, OpCode, TaskConfig};

    fn peer_process(
        registry: DiscoveryRegistry,
        identifier: &'static str,
        executor: &'static str,
        task: QuantumTask,
    ) -> std::thread::JoinHandle<ResultDocument> {
        std::thread::spawn(move || {
            let channel = ClassicalChannel::bind(identifier, registry.clone()).unwrap();
            channel.publish(DeploymentMode::CoLocated).unwrap();

            registry
                .wait_for_peers(executor, 1, identifier, Duration::from_secs(10))
                .unwrap();
            channel.connect(executor).unwrap();

            assert_eq!(channel.recv_info(executor).unwrap(), b"ready");

            channel
                .send_info(encode_task(&task).as_bytes(), executor)
                .unwrap();

            let reply = channel.recv_info(executor).unwrap();
            ResultDocument::from_wire(&String::from_utf8_lossy(&reply)).unwrap()
        })
    }

    #[test]
    fn test_broker_round_with_teleportation_batch() {
        let directory = tempfile::tempdir().unwrap();
        let registry = DiscoveryRegistry::new(directory.path().join("registry.json"));

        let sender = QuantumTask::new("alice", TaskConfig::new(1, 1, 256).with_seed(19))
            .dynamic()
            .with_circuit(vec![
                Instruction::new(OpCode::H).with_qubits(vec![0]),
                Instruction::new(OpCode::Qsend)
                    .with_qubits(vec![0])
                    .with_qpus(vec!["bob".to_string()]),
            ]);
        let receiver = QuantumTask::new("bob", TaskConfig::new(1, 1, 256).with_seed(19))
            .dynamic()
            .with_circuit(vec![
                Instruction::new(OpCode::Qrecv)
                    .with_qubits(vec![0])
                    .with_qpus(vec!["alice".to_string()]),
                Instruction::new(OpCode::Measure)
                    .with_qubits(vec![0])
                    .with_clbits(vec![0]),
            ]);

        let first = peer_process(registry.clone(), "job7_qpu0", "job7_executor", sender);
        let second = peer_process(registry.clone(), "job7_qpu1", "job7_executor", receiver);

        let config = BrokerConfig::new(
            SimulatorKind::Cunqa,
            2,
            directory.path().join("registry.json"),
            "job7",
        )
        .with_discovery_timeout(Duration::from_secs(10));
        let mut broker = ExecutorBroker::start(config).unwrap();
        let contributing = broker.run_round().unwrap();
        assert_eq!(contributing, 2);

        let first_document = first.join().unwrap();
        let second_document = second.join().unwrap();

        // Both contributing peers receive the same batch document.
        assert_eq!(first_document, second_document);
        let counts = first_document.counts().expect("teleportation succeeds");
        assert_eq!(counts.values().sum::<u64>(), 256);
        let teleported_ones = counts.get("10").copied().unwrap_or(0);
        assert!((40..=216).contains(&teleported_ones), "{counts:?}");
    }

    #[test]
    fn test_broker_skips_round_when_all_peers_are_idle() {
        let directory = tempfile::tempdir().unwrap();
        let registry = DiscoveryRegistry::new(directory.path().join("registry.json"));

        let idle = std::thread::spawn({
            let registry = registry.clone();
            move || {
                let channel = ClassicalChannel::bind("job8_qpu0", registry.clone()).unwrap();
                channel.publish(DeploymentMode::CoLocated).unwrap();
                registry
                    .wait_for_peers("job8_executor", 1, "job8_qpu0", Duration::from_secs(10))
                    .unwrap();
                channel.connect("job8_executor").unwrap();
                assert_eq!(channel.recv_info("job8_executor").unwrap(), b"ready");
                // Empty document: no work this round.
                channel.send_info(b"", "job8_executor").unwrap();
            }
        });

        let config = BrokerConfig::new(
            SimulatorKind::Cunqa,
            1,
            directory.path().join("registry.json"),
            "job8",
        )
        .with_discovery_timeout(Duration::from_secs(10));
        let mut broker = ExecutorBroker::start(config).unwrap();
        assert_eq!(broker.run_round().unwrap(), 0);
        idle.join().unwrap();
    }

    #[test]
    fn test_unlinked_simulator_fails_startup() {
        let directory = tempfile::tempdir().unwrap();
        let config = BrokerConfig::new(
            SimulatorKind::Aer,
            0,
            directory.path().join("registry.json"),
            "job9",
        );
        let result = ExecutorBroker::start(config);
        assert!(matches!(result, Err(BrokerError::Kernel(_))));
    }
}
