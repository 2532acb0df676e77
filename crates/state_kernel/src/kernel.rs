// =============================================================================
// QMesh Distributed QPU - Kernel Interface and Native Backend
// =============================================================================
// Table of Contents:
//   1. StateKernelInterface - Capability set for simulator backends
//   2. StateVectorKernel - Native dense backend
//   3. Gate dispatch
//   4. SimulatorKind - Backend identifiers and factory
// =============================================================================
// Purpose: The capability set every simulator backend must provide, and the
//          native dense state-vector implementation of it. Measurement and
//          sampling draw from a single generator seeded from the task config,
//          which makes whole histograms reproducible under a fixed seed.
// =============================================================================

use crate::alphabet::GateKind;
use crate::error::KernelError;
use crate::register::StateVectorRegister;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::str::FromStr;

// =============================================================================
// 1. StateKernelInterface - Capability set for simulator backends
// =============================================================================

pub trait StateKernelInterface: Send {
    fn number_of_qubits(&self) -> usize;
    fn apply_gate(&mut self, gate: GateKind, qubits: &[usize]) -> Result<(), KernelError>;
    fn apply_parametric_gate(
        &mut self,
        gate: GateKind,
        qubits: &[usize],
        parameters: &[f64],
    ) -> Result<(), KernelError>;
    fn apply_measure(&mut self, qubit: usize) -> Result<u8, KernelError>;
    fn apply_reset(&mut self, qubits: &[usize]) -> Result<(), KernelError>;
    fn reset_to_zero(&mut self);
    fn sample(&mut self, shots: usize) -> Result<Vec<String>, KernelError>;
}

// =============================================================================
// 2. StateVectorKernel - Native dense backend
// =============================================================================

#[derive(Debug)]
pub struct StateVectorKernel {
    register: StateVectorRegister,
    random_generator: StdRng,
}

impl StateVectorKernel {
    pub fn new(number_of_qubits: usize, seed: Option<u64>) -> Self {
        let random_generator = match seed {
            Some(value) => StdRng::seed_from_u64(value),
            None => StdRng::from_entropy(),
        };
        Self {
            register: StateVectorRegister::zero_state(number_of_qubits),
            random_generator,
        }
    }

    pub fn register(&self) -> &StateVectorRegister {
        &self.register
    }

    fn validate_qubits(
        &self,
        gate: GateKind,
        qubits: &[usize],
    ) -> Result<(), KernelError> {
        let required = gate.qubit_count();
        if qubits.len() != required {
            return Err(KernelError::QubitCountMismatch {
                gate: gate.gate_name(),
                required,
                provided: qubits.len(),
            });
        }
        let total = self.register.number_of_qubits();
        for &qubit in qubits {
            if qubit >= total {
                return Err(KernelError::InvalidQubitIndex {
                    index: qubit,
                    total,
                });
            }
        }
        if required == 2 && qubits[0] == qubits[1] {
            return Err(KernelError::DuplicateQubit(qubits[0]));
        }
        Ok(())
    }
}

// =============================================================================
// 3. Gate dispatch
// =============================================================================

fn rotation_x_matrix(theta: f64) -> [[Complex64; 2]; 2] {
    let cos_half = (theta / 2.0).cos();
    let sin_half = (theta / 2.0).sin();
    [
        [
            Complex64::new(cos_half, 0.0),
            Complex64::new(0.0, -sin_half),
        ],
        [
            Complex64::new(0.0, -sin_half),
            Complex64::new(cos_half, 0.0),
        ],
    ]
}

fn rotation_y_matrix(theta: f64) -> [[Complex64; 2]; 2] {
    let cos_half = (theta / 2.0).cos();
    let sin_half = (theta / 2.0).sin();
    [
        [
            Complex64::new(cos_half, 0.0),
            Complex64::new(-sin_half, 0.0),
        ],
        [
            Complex64::new(sin_half, 0.0),
            Complex64::new(cos_half, 0.0),
        ],
    ]
}

fn rotation_z_matrix(theta: f64) -> [[Complex64; 2]; 2] {
    [
        [
            Complex64::from_polar(1.0, -theta / 2.0),
            Complex64::new(0.0, 0.0),
        ],
        [
            Complex64::new(0.0, 0.0),
            Complex64::from_polar(1.0, theta / 2.0),
        ],
    ]
}

fn unitary_u3_matrix(theta: f64, phi: f64, lambda: f64) -> [[Complex64; 2]; 2] {
    let cos_half = (theta / 2.0).cos();
    let sin_half = (theta / 2.0).sin();
    [
        [
            Complex64::new(cos_half, 0.0),
            -Complex64::from_polar(sin_half, lambda),
        ],
        [
            Complex64::from_polar(sin_half, phi),
            Complex64::from_polar(cos_half, phi + lambda),
        ],
    ]
}

fn unitary_u2_matrix(phi: f64, lambda: f64) -> [[Complex64; 2]; 2] {
    let inv_sqrt2 = 1.0 / std::f64::consts::SQRT_2;
    [
        [
            Complex64::new(inv_sqrt2, 0.0),
            -Complex64::from_polar(inv_sqrt2, lambda),
        ],
        [
            Complex64::from_polar(inv_sqrt2, phi),
            Complex64::from_polar(inv_sqrt2, phi + lambda),
        ],
    ]
}

fn axis_rotation_matrix(theta: f64, phi: f64) -> [[Complex64; 2]; 2] {
    let cos_half = (theta / 2.0).cos();
    let sin_half = (theta / 2.0).sin();
    [
        [
            Complex64::new(cos_half, 0.0),
            Complex64::new(0.0, -1.0) * Complex64::from_polar(sin_half, -phi),
        ],
        [
            Complex64::new(0.0, -1.0) * Complex64::from_polar(sin_half, phi),
            Complex64::new(cos_half, 0.0),
        ],
    ]
}

fn sqrt_x_matrix() -> [[Complex64; 2]; 2] {
    [
        [Complex64::new(0.5, 0.5), Complex64::new(0.5, -0.5)],
        [Complex64::new(0.5, -0.5), Complex64::new(0.5, 0.5)],
    ]
}

fn sqrt_x_dagger_matrix() -> [[Complex64; 2]; 2] {
    [
        [Complex64::new(0.5, -0.5), Complex64::new(0.5, 0.5)],
        [Complex64::new(0.5, 0.5), Complex64::new(0.5, -0.5)],
    ]
}

fn pauli_y_matrix() -> [[Complex64; 2]; 2] {
    [
        [Complex64::new(0.0, 0.0), Complex64::new(0.0, -1.0)],
        [Complex64::new(0.0, 1.0), Complex64::new(0.0, 0.0)],
    ]
}

impl StateKernelInterface for StateVectorKernel {
    fn number_of_qubits(&self) -> usize {
        self.register.number_of_qubits()
    }

    fn apply_gate(&mut self, gate: GateKind, qubits: &[usize]) -> Result<(), KernelError> {
        if gate.is_parametric() {
            return Err(KernelError::MissingParameters {
                gate: gate.gate_name(),
            });
        }
        self.validate_qubits(gate, qubits)?;

        match gate {
            GateKind::Id => {}
            GateKind::X => self.register.apply_pauli_x(qubits[0]),
            GateKind::Y => self.register.apply_pauli_y(qubits[0]),
            GateKind::Z => self.register.apply_pauli_z(qubits[0]),
            GateKind::H => self.register.apply_hadamard(qubits[0]),
            GateKind::S => self
                .register
                .apply_phase(qubits[0], Complex64::new(0.0, 1.0)),
            GateKind::Sdg => self
                .register
                .apply_phase(qubits[0], Complex64::new(0.0, -1.0)),
            GateKind::Sx => self
                .register
                .apply_single_qubit_matrix(qubits[0], sqrt_x_matrix()),
            GateKind::Sxdg => self
                .register
                .apply_single_qubit_matrix(qubits[0], sqrt_x_dagger_matrix()),
            GateKind::T => self
                .register
                .apply_phase(qubits[0], Complex64::from_polar(1.0, std::f64::consts::FRAC_PI_4)),
            GateKind::Tdg => self
                .register
                .apply_phase(qubits[0], Complex64::from_polar(1.0, -std::f64::consts::FRAC_PI_4)),
            GateKind::P0 => self.register.project_to_basis_state(qubits[0], 0)?,
            GateKind::P1 => self.register.project_to_basis_state(qubits[0], 1)?,
            GateKind::Swap => self.register.apply_swap(qubits[0], qubits[1]),
            GateKind::Ecr => {
                // Kernel-defined echoed cross-resonance: swap . (H (x) I) . (I (x) X).
                self.register.apply_pauli_x(qubits[1]);
                self.register.apply_hadamard(qubits[0]);
                self.register.apply_swap(qubits[0], qubits[1]);
            }
            GateKind::Cx => self.register.apply_controlled_not(qubits[0], qubits[1]),
            GateKind::Cy => self.register.apply_controlled_single_qubit_matrix(
                qubits[0],
                qubits[1],
                pauli_y_matrix(),
            ),
            GateKind::Cz => self
                .register
                .apply_controlled_pauli_z(qubits[0], qubits[1]),
            GateKind::Rx
            | GateKind::Ry
            | GateKind::Rz
            | GateKind::P
            | GateKind::U1
            | GateKind::U2
            | GateKind::U3
            | GateKind::U
            | GateKind::R
            | GateKind::Crx
            | GateKind::Cry
            | GateKind::Crz => unreachable!("parametric gates are rejected above"),
        }
        Ok(())
    }

    fn apply_parametric_gate(
        &mut self,
        gate: GateKind,
        qubits: &[usize],
        parameters: &[f64],
    ) -> Result<(), KernelError> {
        let expected = gate.parameter_count();
        if expected == 0 {
            return Err(KernelError::UnexpectedParameters {
                gate: gate.gate_name(),
            });
        }
        if parameters.len() != expected {
            return Err(KernelError::ParameterCountMismatch {
                gate: gate.gate_name(),
                expected,
                actual: parameters.len(),
            });
        }
        self.validate_qubits(gate, qubits)?;

        match gate {
            GateKind::Rx => self
                .register
                .apply_single_qubit_matrix(qubits[0], rotation_x_matrix(parameters[0])),
            GateKind::Ry => self
                .register
                .apply_single_qubit_matrix(qubits[0], rotation_y_matrix(parameters[0])),
            GateKind::Rz => self
                .register
                .apply_single_qubit_matrix(qubits[0], rotation_z_matrix(parameters[0])),
            GateKind::P | GateKind::U1 => self
                .register
                .apply_phase(qubits[0], Complex64::from_polar(1.0, parameters[0])),
            GateKind::U2 => self
                .register
                .apply_single_qubit_matrix(qubits[0], unitary_u2_matrix(parameters[0], parameters[1])),
            GateKind::U3 | GateKind::U => self.register.apply_single_qubit_matrix(
                qubits[0],
                unitary_u3_matrix(parameters[0], parameters[1], parameters[2]),
            ),
            GateKind::R => self
                .register
                .apply_single_qubit_matrix(qubits[0], axis_rotation_matrix(parameters[0], parameters[1])),
            GateKind::Crx => self.register.apply_controlled_single_qubit_matrix(
                qubits[0],
                qubits[1],
                rotation_x_matrix(parameters[0]),
            ),
            GateKind::Cry => self.register.apply_controlled_single_qubit_matrix(
                qubits[0],
                qubits[1],
                rotation_y_matrix(parameters[0]),
            ),
            GateKind::Crz => self.register.apply_controlled_single_qubit_matrix(
                qubits[0],
                qubits[1],
                rotation_z_matrix(parameters[0]),
            ),
            _ => unreachable!("non-parametric gates are rejected above"),
        }
        Ok(())
    }

    fn apply_measure(&mut self, qubit: usize) -> Result<u8, KernelError> {
        let total = self.register.number_of_qubits();
        if qubit >= total {
            return Err(KernelError::InvalidQubitIndex {
                index: qubit,
                total,
            });
        }
        let random_value: f64 = self.random_generator.gen();
        self.register.measure_with(qubit, random_value)
    }

    fn apply_reset(&mut self, qubits: &[usize]) -> Result<(), KernelError> {
        for &qubit in qubits {
            let outcome = self.apply_measure(qubit)?;
            if outcome == 1 {
                self.register.apply_pauli_x(qubit);
            }
        }
        Ok(())
    }

    fn reset_to_zero(&mut self) {
        self.register.reset_to_zero_state();
    }

    fn sample(&mut self, shots: usize) -> Result<Vec<String>, KernelError> {
        let mut bitstrings = Vec::with_capacity(shots);
        for _ in 0..shots {
            let random_value: f64 = self.random_generator.gen();
            let index = self.register.sample_index_with(random_value);
            bitstrings.push(self.register.bitstring_of_index(index));
        }
        Ok(bitstrings)
    }
}

// =============================================================================
// 4. SimulatorKind - Backend identifiers and factory
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorKind {
    Aer,
    Munich,
    Cunqa,
    Qulacs,
    Maestro,
}

impl SimulatorKind {
    pub fn identifier(&self) -> &'static str {
        match self {
            SimulatorKind::Aer => "Aer",
            SimulatorKind::Munich => "Munich",
            SimulatorKind::Cunqa => "Cunqa",
            SimulatorKind::Qulacs => "Qulacs",
            SimulatorKind::Maestro => "Maestro",
        }
    }
}

impl FromStr for SimulatorKind {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Aer" => Ok(SimulatorKind::Aer),
            "Munich" => Ok(SimulatorKind::Munich),
            "Cunqa" => Ok(SimulatorKind::Cunqa),
            "Qulacs" => Ok(SimulatorKind::Qulacs),
            "Maestro" => Ok(SimulatorKind::Maestro),
            other => Err(KernelError::UnknownSimulator(other.to_string())),
        }
    }
}

impl std::fmt::Display for SimulatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}

// Only the native dense backend is linked into this build; the remaining
// identifiers require their vendor libraries and fail construction.
pub fn build_kernel(
    kind: SimulatorKind,
    number_of_qubits: usize,
    seed: Option<u64>,
) -> Result<Box<dyn StateKernelInterface>, KernelError> {
    match kind {
        SimulatorKind::Cunqa | SimulatorKind::Maestro => {
            Ok(Box::new(StateVectorKernel::new(number_of_qubits, seed)))
        }
        other => Err(KernelError::BackendNotAvailable(
            other.identifier().to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bell_pair_sampling_is_correlated() {
        let mut kernel = StateVectorKernel::new(2, Some(11));
        kernel.apply_gate(GateKind::H, &[0]).unwrap();
        kernel.apply_gate(GateKind::Cx, &[0, 1]).unwrap();

        let bitstrings = kernel.sample(256).unwrap();
        assert_eq!(bitstrings.len(), 256);
        for bitstring in &bitstrings {
            assert!(bitstring == "00" || bitstring == "11");
        }
    }

    #[test]
    fn test_sampling_is_deterministic_under_seed() {
        let mut first = StateVectorKernel::new(2, Some(7));
        first.apply_gate(GateKind::H, &[0]).unwrap();
        let first_draws = first.sample(64).unwrap();

        let mut second = StateVectorKernel::new(2, Some(7));
        second.apply_gate(GateKind::H, &[0]).unwrap();
        let second_draws = second.sample(64).unwrap();

        assert_eq!(first_draws, second_draws);
    }

    #[test]
    fn test_measure_is_destructive() {
        let mut kernel = StateVectorKernel::new(1, Some(3));
        kernel.apply_gate(GateKind::H, &[0]).unwrap();
        let first = kernel.apply_measure(0).unwrap();
        let second = kernel.apply_measure(0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reset_returns_qubit_to_zero() {
        let mut kernel = StateVectorKernel::new(2, Some(5));
        kernel.apply_gate(GateKind::X, &[1]).unwrap();
        kernel.apply_reset(&[1]).unwrap();
        assert_eq!(kernel.apply_measure(1).unwrap(), 0);
    }

    #[test]
    fn test_reset_to_zero_restarts_register() {
        let mut kernel = StateVectorKernel::new(2, Some(5));
        kernel.apply_gate(GateKind::X, &[0]).unwrap();
        kernel.apply_gate(GateKind::H, &[1]).unwrap();
        kernel.reset_to_zero();
        assert_eq!(kernel.apply_measure(0).unwrap(), 0);
        assert_eq!(kernel.apply_measure(1).unwrap(), 0);
    }

    #[test]
    fn test_parametric_arity_is_enforced() {
        let mut kernel = StateVectorKernel::new(1, Some(1));
        let result = kernel.apply_parametric_gate(GateKind::Rx, &[0], &[0.1, 0.2]);
        assert!(matches!(
            result,
            Err(KernelError::ParameterCountMismatch { .. })
        ));
    }

    #[test]
    fn test_parametric_gate_without_parameters_is_rejected() {
        let mut kernel = StateVectorKernel::new(1, Some(1));
        let result = kernel.apply_gate(GateKind::Rz, &[0]);
        assert!(matches!(result, Err(KernelError::MissingParameters { .. })));
    }

    #[test]
    fn test_qubit_bounds_are_enforced() {
        let mut kernel = StateVectorKernel::new(2, Some(1));
        let result = kernel.apply_gate(GateKind::X, &[5]);
        assert!(matches!(
            result,
            Err(KernelError::InvalidQubitIndex { index: 5, total: 2 })
        ));
    }

    #[test]
    fn test_rotation_x_half_turn_acts_as_pauli_x() {
        let mut kernel = StateVectorKernel::new(1, Some(2));
        kernel
            .apply_parametric_gate(GateKind::Rx, &[0], &[std::f64::consts::PI])
            .unwrap();
        assert_eq!(kernel.apply_measure(0).unwrap(), 1);
    }

    #[test]
    fn test_projector_p1_on_superposition() {
        let mut kernel = StateVectorKernel::new(1, Some(2));
        kernel.apply_gate(GateKind::H, &[0]).unwrap();
        kernel.apply_gate(GateKind::P1, &[0]).unwrap();
        assert_eq!(kernel.apply_measure(0).unwrap(), 1);
    }

    #[test]
    fn test_simulator_kind_parsing() {
        assert_eq!("Cunqa".parse::<SimulatorKind>().unwrap(), SimulatorKind::Cunqa);
        assert!(matches!(
            "aer".parse::<SimulatorKind>(),
            Err(KernelError::UnknownSimulator(_))
        ));
    }

    #[test]
    fn test_unlinked_backend_fails_construction() {
        let result = build_kernel(SimulatorKind::Qulacs, 2, None);
        assert!(matches!(result, Err(KernelError::BackendNotAvailable(_))));
        assert!(build_kernel(SimulatorKind::Cunqa, 2, Some(0)).is_ok());
    }
}
