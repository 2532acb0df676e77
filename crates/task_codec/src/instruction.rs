// =============================================================================
// QMesh Distributed QPU - Instruction Records
// =============================================================================
// Table of Contents:
//   1. OpCode - Enumerated instruction alphabet
//   2. Instruction - Tagged wire record
// =============================================================================
// Purpose: The instruction alphabet as a closed enumeration with its wire
//          names, and the tagged record the interpreter dispatches on. The
//          qubit sentinel -1 ("borrow communication qubit") is preserved
//          verbatim, which is why qubit operands are signed here.
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// 1. OpCode - Enumerated instruction alphabet
// =============================================================================

// Unknown names fail deserialization, so the dispatcher never sees an opcode
// outside this alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpCode {
    Measure,
    Id,
    X,
    Y,
    Z,
    H,
    S,
    Sdg,
    Sx,
    Sxdg,
    T,
    Tdg,
    P0,
    P1,
    Rx,
    Ry,
    Rz,
    P,
    U1,
    U2,
    U3,
    U,
    R,
    Swap,
    Ecr,
    Cx,
    Cy,
    Cz,
    Crx,
    Cry,
    Crz,
    Copy,
    Cif,
    Send,
    Recv,
    Qsend,
    Qrecv,
    Expose,
    Rcontrol,
}

impl OpCode {
    pub fn wire_name(&self) -> &'static str {
        match self {
            OpCode::Measure => "measure",
            OpCode::Id => "id",
            OpCode::X => "x",
            OpCode::Y => "y",
            OpCode::Z => "z",
            OpCode::H => "h",
            OpCode::S => "s",
            OpCode::Sdg => "sdg",
            OpCode::Sx => "sx",
            OpCode::Sxdg => "sxdg",
            OpCode::T => "t",
            OpCode::Tdg => "tdg",
            OpCode::P0 => "p0",
            OpCode::P1 => "p1",
            OpCode::Rx => "rx",
            OpCode::Ry => "ry",
            OpCode::Rz => "rz",
            OpCode::P => "p",
            OpCode::U1 => "u1",
            OpCode::U2 => "u2",
            OpCode::U3 => "u3",
            OpCode::U => "u",
            OpCode::R => "r",
            OpCode::Swap => "swap",
            OpCode::Ecr => "ecr",
            OpCode::Cx => "cx",
            OpCode::Cy => "cy",
            OpCode::Cz => "cz",
            OpCode::Crx => "crx",
            OpCode::Cry => "cry",
            OpCode::Crz => "crz",
            OpCode::Copy => "copy",
            OpCode::Cif => "cif",
            OpCode::Send => "send",
            OpCode::Recv => "recv",
            OpCode::Qsend => "qsend",
            OpCode::Qrecv => "qrecv",
            OpCode::Expose => "expose",
            OpCode::Rcontrol => "rcontrol",
        }
    }

    // Fixed per opcode; the positional parameter update relies on this.
    pub fn parameter_count(&self) -> usize {
        match self {
            OpCode::Rx
            | OpCode::Ry
            | OpCode::Rz
            | OpCode::P
            | OpCode::U1
            | OpCode::Crx
            | OpCode::Cry
            | OpCode::Crz => 1,
            OpCode::U2 | OpCode::R => 2,
            OpCode::U3 | OpCode::U => 3,
            _ => 0,
        }
    }

    pub fn is_parametric(&self) -> bool {
        self.parameter_count() > 0
    }

    // Operations that may suspend the issuing task. Composite bodies must not
    // contain them, which keeps nested dispatch free of suspension points.
    pub fn is_suspending(&self) -> bool {
        matches!(
            self,
            OpCode::Qsend | OpCode::Qrecv | OpCode::Expose | OpCode::Rcontrol | OpCode::Recv
        )
    }

    pub fn has_composite_body(&self) -> bool {
        matches!(self, OpCode::Cif | OpCode::Rcontrol)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

// =============================================================================
// 2. Instruction - Tagged wire record
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub name: OpCode,

    // Task-local qubit indices; -1 borrows communication qubit n-1.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qubits: Vec<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clbits: Vec<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clreg: Vec<usize>,

    // COPY destinations and sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub l_clbits: Vec<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub r_clbits: Vec<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<f64>,

    // Peer identifiers; semantics depend on the opcode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qpus: Vec<String>,

    // Composite bodies for cif and rcontrol.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<Instruction>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditional_reg: Vec<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_conditional_reg: Vec<usize>,
}

impl Instruction {
    pub fn new(name: OpCode) -> Self {
        Self {
            name,
            qubits: Vec::new(),
            clbits: Vec::new(),
            clreg: Vec::new(),
            l_clbits: Vec::new(),
            r_clbits: Vec::new(),
            params: Vec::new(),
            qpus: Vec::new(),
            instructions: Vec::new(),
            conditional_reg: Vec::new(),
            remote_conditional_reg: Vec::new(),
        }
    }

    pub fn with_qubits(mut self, qubits: Vec<i64>) -> Self {
        self.qubits = qubits;
        self
    }

    pub fn with_clbits(mut self, clbits: Vec<usize>) -> Self {
        self.clbits = clbits;
        self
    }

    pub fn with_params(mut self, params: Vec<f64>) -> Self {
        self.params = params;
        self
    }

    pub fn with_qpus(mut self, qpus: Vec<String>) -> Self {
        self.qpus = qpus;
        self
    }

    pub fn with_body(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_wire_names_round_trip() {
        let encoded = serde_json::to_string(&OpCode::Qsend).unwrap();
        assert_eq!(encoded, "\"qsend\"");
        let decoded: OpCode = serde_json::from_str("\"rcontrol\"").unwrap();
        assert_eq!(decoded, OpCode::Rcontrol);
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        let result: Result<OpCode, _> = serde_json::from_str("\"teleport\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_absent_sequences_decode_to_empty() {
        let instruction: Instruction = serde_json::from_str(r#"{"name": "h", "qubits": [0]}"#).unwrap();
        assert_eq!(instruction.name, OpCode::H);
        assert_eq!(instruction.qubits, vec![0]);
        assert!(instruction.clbits.is_empty());
        assert!(instruction.params.is_empty());
        assert!(instruction.qpus.is_empty());
    }

    #[test]
    fn test_communication_sentinel_is_preserved() {
        let instruction: Instruction =
            serde_json::from_str(r#"{"name": "cx", "qubits": [-1, 0]}"#).unwrap();
        assert_eq!(instruction.qubits, vec![-1, 0]);
        let encoded = serde_json::to_string(&instruction).unwrap();
        let decoded: Instruction = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, instruction);
    }

    #[test]
    fn test_empty_optionals_are_not_serialized() {
        let encoded = serde_json::to_string(&Instruction::new(OpCode::Id).with_qubits(vec![0])).unwrap();
        assert_eq!(encoded, r#"{"name":"id","qubits":[0]}"#);
    }
}
