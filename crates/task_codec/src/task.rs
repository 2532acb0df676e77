// =============================================================================
// QMesh Distributed QPU - Quantum Task Documents
// =============================================================================
// Table of Contents:
//   1. TaskConfig - Execution configuration
//   2. QuantumTask - Decoded task
//   3. Decode / encode
//   4. Positional parameter update
// =============================================================================
// Purpose: The wire task document and its canonical in-memory form. Encoding
//          is stable ASCII with a fixed top-level key order (id, config,
//          instructions, sending_to, is_dynamic); a task with an empty
//          circuit encodes to the empty string, which transports read as
//          "no work".
// =============================================================================

use crate::error::CodecError;
use crate::instruction::Instruction;
use serde::{Deserialize, Serialize};

// =============================================================================
// 1. TaskConfig - Execution configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub num_qubits: usize,
    pub num_clbits: usize,
    pub shots: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<serde_json::Value>,

    // Noise-model parameters and similar backend knobs pass through opaquely.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskConfig {
    pub fn new(num_qubits: usize, num_clbits: usize, shots: usize) -> Self {
        Self {
            num_qubits,
            num_clbits,
            shots,
            method: None,
            seed: None,
            device: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

// =============================================================================
// 2. QuantumTask - Decoded task
// =============================================================================

// Field order here is the wire key order of the encoded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantumTask {
    pub id: String,
    pub config: TaskConfig,

    #[serde(rename = "instructions")]
    pub circuit: Vec<Instruction>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sending_to: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_dynamic: bool,
}

impl QuantumTask {
    pub fn new(id: impl Into<String>, config: TaskConfig) -> Self {
        Self {
            id: id.into(),
            config,
            circuit: Vec::new(),
            sending_to: Vec::new(),
            is_dynamic: false,
        }
    }

    pub fn with_circuit(mut self, circuit: Vec<Instruction>) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn with_sending_to(mut self, peers: Vec<String>) -> Self {
        self.sending_to = peers;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.is_dynamic = true;
        self
    }
}

// =============================================================================
// 3. Decode / encode
// =============================================================================

pub fn decode_task(document: &str) -> Result<QuantumTask, CodecError> {
    if document.is_empty() {
        return Err(CodecError::EmptyDocument);
    }
    let task: QuantumTask = serde_json::from_str(document)?;
    for instruction in &task.circuit {
        validate_composite_bodies(instruction)?;
    }
    Ok(task)
}

pub fn encode_task(task: &QuantumTask) -> String {
    if task.circuit.is_empty() {
        return String::new();
    }
    // QuantumTask serialization cannot fail: every field is a plain data type.
    serde_json::to_string(task).unwrap_or_default()
}

fn validate_composite_bodies(instruction: &Instruction) -> Result<(), CodecError> {
    if instruction.name.has_composite_body() {
        for nested in &instruction.instructions {
            if nested.name.is_suspending() {
                return Err(CodecError::RemoteOperationInCompositeBody {
                    opcode: nested.name.wire_name().to_string(),
                });
            }
            validate_composite_bodies(nested)?;
        }
    }
    Ok(())
}

// =============================================================================
// 4. Positional parameter update
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub params: Vec<f64>,
}

pub fn decode_update(document: &str) -> Result<ParameterUpdate, CodecError> {
    if document.is_empty() {
        return Err(CodecError::EmptyDocument);
    }
    Ok(serde_json::from_str(document)?)
}

impl QuantumTask {
    // Walks the circuit in insertion order, overwriting each parametric
    // instruction's parameters with the next `arity` update values. Values
    // left over after the walk, or a value list that ends mid-instruction,
    // are update errors.
    pub fn apply_parameter_update(&mut self, values: &[f64]) -> Result<(), CodecError> {
        if self.circuit.is_empty() {
            return Err(CodecError::UpdateBeforeCircuit);
        }

        let capacity: usize = self
            .circuit
            .iter()
            .map(|instruction| instruction.name.parameter_count())
            .sum();

        let mut remaining = values;
        for instruction in &mut self.circuit {
            let arity = instruction.name.parameter_count();
            if arity == 0 {
                continue;
            }
            if remaining.is_empty() {
                break;
            }
            if remaining.len() < arity {
                return Err(CodecError::ParameterUpdateTruncated {
                    opcode: instruction.name.wire_name().to_string(),
                    required: arity,
                    available: remaining.len(),
                });
            }
            instruction.params = remaining[..arity].to_vec();
            remaining = &remaining[arity..];
        }

        if !remaining.is_empty() {
            return Err(CodecError::ParameterUpdateOverflow {
                provided: values.len(),
                capacity,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::OpCode;

    fn sample_task() -> QuantumTask {
        QuantumTask::new("task_a", TaskConfig::new(2, 2, 1024).with_seed(42)).with_circuit(vec![
            Instruction::new(OpCode::H).with_qubits(vec![0]),
            Instruction::new(OpCode::Cx).with_qubits(vec![0, 1]),
            Instruction::new(OpCode::Measure)
                .with_qubits(vec![0])
                .with_clbits(vec![0]),
            Instruction::new(OpCode::Measure)
                .with_qubits(vec![1])
                .with_clbits(vec![1]),
        ])
    }

    #[test]
    fn test_decode_encode_round_trip() {
        let task = sample_task();
        let encoded = encode_task(&task);
        assert!(encoded.is_ascii());
        let decoded = decode_task(&encoded).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_encoded_key_order_is_stable() {
        let task = sample_task().with_sending_to(vec!["qpu_b".to_string()]).dynamic();
        let encoded = encode_task(&task);
        let id_position = encoded.find("\"id\"").unwrap();
        let config_position = encoded.find("\"config\"").unwrap();
        let instructions_position = encoded.find("\"instructions\"").unwrap();
        let sending_position = encoded.find("\"sending_to\"").unwrap();
        let dynamic_position = encoded.find("\"is_dynamic\"").unwrap();
        assert!(id_position < config_position);
        assert!(config_position < instructions_position);
        assert!(instructions_position < sending_position);
        assert!(sending_position < dynamic_position);
    }

    #[test]
    fn test_empty_circuit_encodes_to_empty_string() {
        let task = QuantumTask::new("idle", TaskConfig::new(1, 1, 1));
        assert_eq!(encode_task(&task), "");
    }

    #[test]
    fn test_decode_defaults() {
        let document = r#"{
            "id": "t",
            "config": {"num_qubits": 1, "num_clbits": 1, "shots": 16},
            "instructions": [{"name": "x", "qubits": [0]}]
        }"#;
        let task = decode_task(document).unwrap();
        assert!(task.sending_to.is_empty());
        assert!(!task.is_dynamic);
        assert_eq!(task.config.method, None);
    }

    #[test]
    fn test_config_passthrough_keys_survive() {
        let document = r#"{
            "id": "t",
            "config": {"num_qubits": 1, "num_clbits": 1, "shots": 16, "noise_model": {"depolarizing": 0.01}},
            "instructions": [{"name": "x", "qubits": [0]}]
        }"#;
        let task = decode_task(document).unwrap();
        assert!(task.config.extra.contains_key("noise_model"));
        let round_tripped = decode_task(&encode_task(&task)).unwrap();
        assert_eq!(round_tripped, task);
    }

    #[test]
    fn test_remote_operation_inside_cif_is_rejected() {
        let document = r#"{
            "id": "t",
            "config": {"num_qubits": 1, "num_clbits": 1, "shots": 16},
            "instructions": [{
                "name": "cif",
                "clbits": [0],
                "instructions": [{"name": "qsend", "qubits": [0], "qpus": ["other"]}]
            }]
        }"#;
        let result = decode_task(document);
        assert!(matches!(
            result,
            Err(CodecError::RemoteOperationInCompositeBody { .. })
        ));
    }

    #[test]
    fn test_parameter_update_is_positional() {
        let mut task = QuantumTask::new("t", TaskConfig::new(1, 1, 1)).with_circuit(vec![
            Instruction::new(OpCode::Rx).with_qubits(vec![0]).with_params(vec![0.0]),
            Instruction::new(OpCode::H).with_qubits(vec![0]),
            Instruction::new(OpCode::Rz).with_qubits(vec![0]).with_params(vec![0.0]),
        ]);
        task.apply_parameter_update(&[1.5]).unwrap();
        assert_eq!(task.circuit[0].params, vec![1.5]);
        // Only the first parametric instruction was touched.
        assert_eq!(task.circuit[2].params, vec![0.0]);

        task.apply_parameter_update(&[2.0, 3.0]).unwrap();
        assert_eq!(task.circuit[0].params, vec![2.0]);
        assert_eq!(task.circuit[2].params, vec![3.0]);
    }

    #[test]
    fn test_parameter_update_consumes_full_arity() {
        let mut task = QuantumTask::new("t", TaskConfig::new(1, 1, 1)).with_circuit(vec![
            Instruction::new(OpCode::U3)
                .with_qubits(vec![0])
                .with_params(vec![0.0, 0.0, 0.0]),
        ]);
        task.apply_parameter_update(&[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(task.circuit[0].params, vec![0.1, 0.2, 0.3]);

        let truncated = task.apply_parameter_update(&[0.1, 0.2]);
        assert!(matches!(
            truncated,
            Err(CodecError::ParameterUpdateTruncated { .. })
        ));
    }

    #[test]
    fn test_parameter_update_overflow_is_rejected() {
        let mut task = QuantumTask::new("t", TaskConfig::new(1, 1, 1)).with_circuit(vec![
            Instruction::new(OpCode::Rx).with_qubits(vec![0]).with_params(vec![0.0]),
        ]);
        let result = task.apply_parameter_update(&[1.0, 2.0]);
        assert!(matches!(
            result,
            Err(CodecError::ParameterUpdateOverflow { provided: 2, capacity: 1 })
        ));
    }

    #[test]
    fn test_parameter_update_before_circuit_is_rejected() {
        let mut task = QuantumTask::new("t", TaskConfig::new(1, 1, 1));
        assert!(matches!(
            task.apply_parameter_update(&[1.0]),
            Err(CodecError::UpdateBeforeCircuit)
        ));
    }

    #[test]
    fn test_update_document_decoding() {
        let update = decode_update(r#"{"params": [0.5, 1.5]}"#).unwrap();
        assert_eq!(update.params, vec![0.5, 1.5]);
    }
}
