// =============================================================================
// QMesh Distributed QPU - State Vector Register
// =============================================================================
// Table of Contents:
//   1. StateVectorRegister - Dense amplitude storage
//   2. Single-qubit transforms
//   3. Two-qubit transforms
//   4. Measurement, projection and sampling
// =============================================================================
// Purpose: Dense state-vector storage plus the raw amplitude loops behind the
//          gate alphabet. Qubit k maps to bit k of the basis-state index
//          (little-endian); the textual bitstring of an index prints qubit 0
//          rightmost. Randomness is injected by the caller so that a single
//          seeded generator drives every probabilistic operation.
// =============================================================================

use crate::error::KernelError;
use num_complex::Complex64;

const RENORMALIZATION_EPSILON: f64 = 1e-12;

// =============================================================================
// 1. StateVectorRegister - Dense amplitude storage
// =============================================================================

#[derive(Debug, Clone)]
pub struct StateVectorRegister {
    amplitudes: Vec<Complex64>,
    number_of_qubits: usize,
}

impl StateVectorRegister {
    pub fn zero_state(number_of_qubits: usize) -> Self {
        let dimension = 1usize << number_of_qubits;
        let mut amplitudes = vec![Complex64::new(0.0, 0.0); dimension];
        amplitudes[0] = Complex64::new(1.0, 0.0);
        Self {
            amplitudes,
            number_of_qubits,
        }
    }

    pub fn number_of_qubits(&self) -> usize {
        self.number_of_qubits
    }

    pub fn dimension(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn amplitude(&self, index: usize) -> Complex64 {
        self.amplitudes[index]
    }

    pub fn reset_to_zero_state(&mut self) {
        for amplitude in &mut self.amplitudes {
            *amplitude = Complex64::new(0.0, 0.0);
        }
        self.amplitudes[0] = Complex64::new(1.0, 0.0);
    }

    pub fn probability_distribution(&self) -> Vec<f64> {
        self.amplitudes.iter().map(|a| a.norm_sqr()).collect()
    }

    // Bitstring with qubit 0 as the rightmost character.
    pub fn bitstring_of_index(&self, index: usize) -> String {
        (0..self.number_of_qubits)
            .rev()
            .map(|qubit| {
                if index & (1usize << qubit) != 0 {
                    '1'
                } else {
                    '0'
                }
            })
            .collect()
    }

    // =========================================================================
    // 2. Single-qubit transforms
    // =========================================================================

    pub fn apply_single_qubit_matrix(&mut self, qubit: usize, matrix: [[Complex64; 2]; 2]) {
        let target_mask = 1usize << qubit;
        let dimension = self.dimension();
        for i in 0..dimension {
            if (i & target_mask) == 0 {
                let j = i | target_mask;
                let a = self.amplitudes[i];
                let b = self.amplitudes[j];
                self.amplitudes[i] = matrix[0][0] * a + matrix[0][1] * b;
                self.amplitudes[j] = matrix[1][0] * a + matrix[1][1] * b;
            }
        }
    }

    pub fn apply_pauli_x(&mut self, qubit: usize) {
        let target_mask = 1usize << qubit;
        let dimension = self.dimension();
        for i in 0..dimension {
            if (i & target_mask) == 0 {
                let j = i | target_mask;
                self.amplitudes.swap(i, j);
            }
        }
    }

    pub fn apply_pauli_y(&mut self, qubit: usize) {
        let target_mask = 1usize << qubit;
        let dimension = self.dimension();
        for i in 0..dimension {
            if (i & target_mask) == 0 {
                let j = i | target_mask;
                let a = self.amplitudes[i];
                let b = self.amplitudes[j];
                self.amplitudes[i] = Complex64::new(0.0, -1.0) * b;
                self.amplitudes[j] = Complex64::new(0.0, 1.0) * a;
            }
        }
    }

    pub fn apply_pauli_z(&mut self, qubit: usize) {
        let target_mask = 1usize << qubit;
        let dimension = self.dimension();
        for i in 0..dimension {
            if (i & target_mask) != 0 {
                self.amplitudes[i] = -self.amplitudes[i];
            }
        }
    }

    pub fn apply_hadamard(&mut self, qubit: usize) {
        let target_mask = 1usize << qubit;
        let inv_sqrt2 = 1.0 / std::f64::consts::SQRT_2;
        let dimension = self.dimension();
        for i in 0..dimension {
            if (i & target_mask) == 0 {
                let j = i | target_mask;
                let a = self.amplitudes[i];
                let b = self.amplitudes[j];
                self.amplitudes[i] = (a + b) * inv_sqrt2;
                self.amplitudes[j] = (a - b) * inv_sqrt2;
            }
        }
    }

    // diag(1, phase) on the target qubit; covers S, Sdg, T, Tdg, P and U1.
    pub fn apply_phase(&mut self, qubit: usize, phase: Complex64) {
        let target_mask = 1usize << qubit;
        let dimension = self.dimension();
        for i in 0..dimension {
            if (i & target_mask) != 0 {
                self.amplitudes[i] *= phase;
            }
        }
    }

    // =========================================================================
    // 3. Two-qubit transforms
    // =========================================================================

    pub fn apply_controlled_not(&mut self, control_qubit: usize, target_qubit: usize) {
        let control_mask = 1usize << control_qubit;
        let target_mask = 1usize << target_qubit;
        let dimension = self.dimension();
        for i in 0..dimension {
            if (i & control_mask) != 0 && (i & target_mask) == 0 {
                let j = i | target_mask;
                self.amplitudes.swap(i, j);
            }
        }
    }

    pub fn apply_controlled_pauli_z(&mut self, control_qubit: usize, target_qubit: usize) {
        let control_mask = 1usize << control_qubit;
        let target_mask = 1usize << target_qubit;
        let dimension = self.dimension();
        for i in 0..dimension {
            if (i & control_mask) != 0 && (i & target_mask) != 0 {
                self.amplitudes[i] = -self.amplitudes[i];
            }
        }
    }

    pub fn apply_controlled_single_qubit_matrix(
        &mut self,
        control_qubit: usize,
        target_qubit: usize,
        matrix: [[Complex64; 2]; 2],
    ) {
        let control_mask = 1usize << control_qubit;
        let target_mask = 1usize << target_qubit;
        let dimension = self.dimension();
        for i in 0..dimension {
            if (i & control_mask) != 0 && (i & target_mask) == 0 {
                let j = i | target_mask;
                let a = self.amplitudes[i];
                let b = self.amplitudes[j];
                self.amplitudes[i] = matrix[0][0] * a + matrix[0][1] * b;
                self.amplitudes[j] = matrix[1][0] * a + matrix[1][1] * b;
            }
        }
    }

    pub fn apply_swap(&mut self, qubit_a: usize, qubit_b: usize) {
        let mask_a = 1usize << qubit_a;
        let mask_b = 1usize << qubit_b;
        let dimension = self.dimension();
        for i in 0..dimension {
            let bit_value_a = (i & mask_a) != 0;
            let bit_value_b = (i & mask_b) != 0;
            if bit_value_a && !bit_value_b {
                let j = (i & !mask_a) | mask_b;
                self.amplitudes.swap(i, j);
            }
        }
    }

    // =========================================================================
    // 4. Measurement, projection and sampling
    // =========================================================================

    pub fn probability_of_one(&self, qubit: usize) -> f64 {
        let target_mask = 1usize << qubit;
        self.amplitudes
            .iter()
            .enumerate()
            .filter(|(i, _)| i & target_mask != 0)
            .map(|(_, a)| a.norm_sqr())
            .sum()
    }

    // Destructive projective measurement. The caller supplies the uniform
    // random value so that all randomness flows from one seeded generator.
    pub fn measure_with(&mut self, qubit: usize, random_value: f64) -> Result<u8, KernelError> {
        let probability_one = self.probability_of_one(qubit);
        let outcome: u8 = if random_value < probability_one { 1 } else { 0 };
        self.project_to_basis_state(qubit, outcome)?;
        Ok(outcome)
    }

    // Projects the qubit onto |outcome> and renormalizes. Projecting onto a
    // branch of zero weight is a numerical failure, not a panic.
    pub fn project_to_basis_state(&mut self, qubit: usize, outcome: u8) -> Result<(), KernelError> {
        let target_mask = 1usize << qubit;
        let keep_set = outcome == 1;

        let mut retained_weight = 0.0;
        for (i, amplitude) in self.amplitudes.iter_mut().enumerate() {
            if ((i & target_mask) != 0) == keep_set {
                retained_weight += amplitude.norm_sqr();
            } else {
                *amplitude = Complex64::new(0.0, 0.0);
            }
        }

        if retained_weight < RENORMALIZATION_EPSILON {
            return Err(KernelError::NumericalFailure(format!(
                "projection of qubit {} onto |{}> has zero weight",
                qubit, outcome
            )));
        }

        let normalization = retained_weight.sqrt();
        for amplitude in &mut self.amplitudes {
            *amplitude /= normalization;
        }
        Ok(())
    }

    // Non-collapsing draw of a full basis state; used by sample().
    pub fn sample_index_with(&self, random_value: f64) -> usize {
        let mut cumulative = 0.0;
        for (i, amplitude) in self.amplitudes.iter().enumerate() {
            cumulative += amplitude.norm_sqr();
            if random_value < cumulative {
                return i;
            }
        }
        self.dimension() - 1
    }
}
