// =============================================================================
// QMesh Distributed QPU - Teleportation Demo
// =============================================================================
// Two QPU peers hand their halves of a teleportation circuit to an executor
// broker, which co-simulates them on one shared register. Alice prepares |+>
// and teleports it; Bob receives it and measures. Both peers get the batch
// histogram back.
// =============================================================================

use executor_broker::{BrokerConfig, ExecutorBroker};
use peer_services::{ClassicalChannel, DeploymentMode, DiscoveryRegistry};
use shot_runtime::ResultDocument;
use state_kernel::SimulatorKind;
use std::time::Duration;
use task_codec::{encode_task, Instruction, OpCode, QuantumTask, TaskConfig};

fn spawn_peer(
    registry: DiscoveryRegistry,
    identifier: &'static str,
    task: QuantumTask,
) -> std::thread::JoinHandle<ResultDocument> {
    std::thread::spawn(move || {
        let channel = ClassicalChannel::bind(identifier, registry.clone())
            .expect("peer channel binds");
        channel
            .publish(DeploymentMode::CoLocated)
            .expect("peer publishes");

        registry
            .wait_for_peers("demo_executor", 1, identifier, Duration::from_secs(10))
            .expect("executor appears in the registry");
        channel.connect("demo_executor").expect("peer connects");

        let greeting = channel.recv_info("demo_executor").expect("ready marker");
        assert_eq!(greeting, b"ready");

        channel
            .send_info(encode_task(&task).as_bytes(), "demo_executor")
            .expect("task is sent");

        let reply = channel.recv_info("demo_executor").expect("result arrives");
        ResultDocument::from_wire(&String::from_utf8_lossy(&reply)).expect("result decodes")
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let directory = std::env::temp_dir().join("qmesh_teleportation_demo");
    std::fs::create_dir_all(&directory).expect("demo directory");
    let registry_path = directory.join("registry.json");
    let _ = std::fs::remove_file(&registry_path);
    let registry = DiscoveryRegistry::new(&registry_path);

    let alice = QuantumTask::new("alice", TaskConfig::new(1, 1, 1024).with_seed(99))
        .dynamic()
        .with_circuit(vec![
            Instruction::new(OpCode::H).with_qubits(vec![0]),
            Instruction::new(OpCode::Qsend)
                .with_qubits(vec![0])
                .with_qpus(vec!["bob".to_string()]),
        ]);
    let bob = QuantumTask::new("bob", TaskConfig::new(1, 1, 1024).with_seed(99))
        .dynamic()
        .with_circuit(vec![
            Instruction::new(OpCode::Qrecv)
                .with_qubits(vec![0])
                .with_qpus(vec!["alice".to_string()]),
            Instruction::new(OpCode::Measure)
                .with_qubits(vec![0])
                .with_clbits(vec![0]),
        ]);

    let first = spawn_peer(registry.clone(), "demo_qpu0", alice);
    let second = spawn_peer(registry.clone(), "demo_qpu1", bob);

    let config = BrokerConfig::new(SimulatorKind::Cunqa, 2, &registry_path, "demo")
        .with_discovery_timeout(Duration::from_secs(10));
    let mut broker = ExecutorBroker::start(config).expect("broker starts");
    broker.run_round().expect("round completes");

    let document = first.join().expect("alice peer finishes");
    second.join().expect("bob peer finishes");

    match document {
        ResultDocument::Success { counts, time_taken } => {
            println!("teleported |+> histogram over 1024 shots:");
            for (bitstring, count) in &counts {
                println!("  {bitstring}: {count}");
            }
            println!("time taken: {time_taken:.3}s");
        }
        ResultDocument::Failure { error } => {
            eprintln!("batch failed: {error}");
        }
    }

    let _ = registry.remove_prefix("demo");
}
