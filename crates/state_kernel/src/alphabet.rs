// =============================================================================
// QMesh Distributed QPU - Gate Alphabet
// =============================================================================
// Table of Contents:
//   1. GateKind - Closed gate alphabet
//   2. Operand and parameter arities
// =============================================================================
// Purpose: Enumerates the gates the kernel understands. The alphabet is
//          closed: anything outside it is rejected before it reaches the
//          register, so the amplitude loops never see an unknown name.
// =============================================================================

// =============================================================================
// 1. GateKind - Closed gate alphabet
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateKind {
    // Single-qubit, non-parametric
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
    // Single-qubit, parametric
    Rx,
    Ry,
    Rz,
    P,
    U1,
    U2,
    U3,
    U,
    R,
    // Two-qubit, non-parametric
    Swap,
    Ecr,
    Cx,
    Cy,
    Cz,
    // Two-qubit, parametric
    Crx,
    Cry,
    Crz,
}

// =============================================================================
// 2. Operand and parameter arities
// =============================================================================

impl GateKind {
    pub fn gate_name(&self) -> &'static str {
        match self {
            GateKind::Id => "id",
            GateKind::X => "x",
            GateKind::Y => "y",
            GateKind::Z => "z",
            GateKind::H => "h",
            GateKind::S => "s",
            GateKind::Sdg => "sdg",
            GateKind::Sx => "sx",
            GateKind::Sxdg => "sxdg",
            GateKind::T => "t",
            GateKind::Tdg => "tdg",
            GateKind::P0 => "p0",
            GateKind::P1 => "p1",
            GateKind::Rx => "rx",
            GateKind::Ry => "ry",
            GateKind::Rz => "rz",
            GateKind::P => "p",
            GateKind::U1 => "u1",
            GateKind::U2 => "u2",
            GateKind::U3 => "u3",
            GateKind::U => "u",
            GateKind::R => "r",
            GateKind::Swap => "swap",
            GateKind::Ecr => "ecr",
            GateKind::Cx => "cx",
            GateKind::Cy => "cy",
            GateKind::Cz => "cz",
            GateKind::Crx => "crx",
            GateKind::Cry => "cry",
            GateKind::Crz => "crz",
        }
    }

    pub fn qubit_count(&self) -> usize {
        match self {
            GateKind::Swap
            | GateKind::Ecr
            | GateKind::Cx
            | GateKind::Cy
            | GateKind::Cz
            | GateKind::Crx
            | GateKind::Cry
            | GateKind::Crz => 2,
            _ => 1,
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            GateKind::Rx
            | GateKind::Ry
            | GateKind::Rz
            | GateKind::P
            | GateKind::U1
            | GateKind::Crx
            | GateKind::Cry
            | GateKind::Crz => 1,
            GateKind::U2 | GateKind::R => 2,
            GateKind::U3 | GateKind::U => 3,
            _ => 0,
        }
    }

    pub fn is_parametric(&self) -> bool {
        self.parameter_count() > 0
    }
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.gate_name())
    }
}
