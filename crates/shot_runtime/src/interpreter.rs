// =============================================================================
// QMesh Distributed QPU - Shot Interpreter
// =============================================================================
// Table of Contents:
//   1. ShotInterpreter - Batch entry point
//   2. Fast path for non-dynamic single tasks
//   3. ShotExecution - One shot over a batch
//   4. Cooperative scheduler
//   5. Instruction dispatch
//   6. Remote-operation state machines
// =============================================================================
// Purpose: Drives one batch of co-scheduled tasks through the shot loop. The
//          scheduler is single-threaded cooperative: one dispatch in flight
//          at a time, round-robin in task insertion order, and the only
//          suspension points are QRECV/RCONTROL waiting on the entanglement
//          channel and a classical-channel receive. A round in which no task
//          advances and nobody is unblocked is a protocol violation and ends
//          the batch with a deadlock error instead of spinning.
// =============================================================================

use crate::aggregator::{ResultDocument, ShotHistogram};
use crate::error::{DispatchFailure, InterpreterError};
use crate::task_state::{BatchLayout, TaskShotState};
use peer_services::ClassicalChannel;
use state_kernel::{GateKind, StateKernelInterface};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use task_codec::{Instruction, OpCode, QuantumTask};

// =============================================================================
// 1. ShotInterpreter - Batch entry point
// =============================================================================

pub struct ShotInterpreter<'a> {
    kernel: &'a mut dyn StateKernelInterface,
    channel: Option<&'a ClassicalChannel>,
}

impl<'a> ShotInterpreter<'a> {
    pub fn new(kernel: &'a mut dyn StateKernelInterface) -> Self {
        Self {
            kernel,
            channel: None,
        }
    }

    pub fn with_classical_channel(mut self, channel: &'a ClassicalChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    // Runs the whole batch and always produces a result document: counts and
    // timing on success, a single ERROR entry on batch-fatal failure.
    pub fn simulate(&mut self, tasks: &[QuantumTask]) -> ResultDocument {
        let started = Instant::now();
        match self.run_batch(tasks) {
            Ok(histogram) => ResultDocument::success(
                histogram.into_counts(),
                started.elapsed().as_secs_f64(),
            ),
            Err(error) => {
                tracing::error!(%error, "batch aborted");
                ResultDocument::failure(error.to_string())
            }
        }
    }

    fn run_batch(&mut self, tasks: &[QuantumTask]) -> Result<ShotHistogram, InterpreterError> {
        let mut histogram = ShotHistogram::new();
        if tasks.is_empty() {
            return Ok(histogram);
        }

        let layout = BatchLayout::for_tasks(tasks);
        if self.kernel.number_of_qubits() != layout.total_qubits {
            return Err(InterpreterError::Instruction(format!(
                "kernel holds {} qubits but the batch needs {}",
                self.kernel.number_of_qubits(),
                layout.total_qubits
            )));
        }

        let shots = tasks[0].config.shots;

        if tasks.len() == 1 && !tasks[0].is_dynamic && eligible_for_sampling(&tasks[0]) {
            self.run_sampling_path(&tasks[0], &layout, shots, &mut histogram)?;
            return Ok(histogram);
        }

        for _ in 0..shots {
            let bitstring = ShotExecution::new(self.kernel, self.channel, tasks, &layout).run()?;
            histogram.record(bitstring);
            self.kernel.reset_to_zero();
        }
        Ok(histogram)
    }

    // =========================================================================
    // 2. Fast path for non-dynamic single tasks
    // =========================================================================

    // Applies the circuit once and draws every shot from the final state.
    fn run_sampling_path(
        &mut self,
        task: &QuantumTask,
        layout: &BatchLayout,
        shots: usize,
        histogram: &mut ShotHistogram,
    ) -> Result<(), InterpreterError> {
        let mut measurement_targets: Vec<(usize, usize)> = Vec::new();

        for instruction in &task.circuit {
            match instruction.name {
                OpCode::Measure => {
                    let qubit = instruction.qubits.first().copied().ok_or_else(|| {
                        InterpreterError::Instruction("measure without a qubit operand".into())
                    })? as usize;
                    let clbit = instruction
                        .clbits
                        .first()
                        .or_else(|| instruction.clreg.first())
                        .copied()
                        .ok_or_else(|| {
                            InterpreterError::Instruction("measure without a destination".into())
                        })?;
                    if qubit >= layout.total_qubits || clbit >= layout.total_clbits {
                        return Err(InterpreterError::Instruction(format!(
                            "measure operands ({}, {}) outside the register",
                            qubit, clbit
                        )));
                    }
                    measurement_targets.push((qubit, clbit));
                }
                opcode => {
                    let gate = gate_kind(opcode).ok_or_else(|| {
                        InterpreterError::Instruction(format!(
                            "opcode '{}' is not samplable",
                            opcode
                        ))
                    })?;
                    let qubits: Vec<usize> =
                        instruction.qubits.iter().map(|&q| q as usize).collect();
                    if gate.is_parametric() {
                        if instruction.params.len() != gate.parameter_count() {
                            return Err(InterpreterError::Instruction(format!(
                                "opcode '{}' takes {} parameters, got {}",
                                opcode,
                                gate.parameter_count(),
                                instruction.params.len()
                            )));
                        }
                        self.kernel
                            .apply_parametric_gate(gate, &qubits, &instruction.params)?;
                    } else {
                        self.kernel.apply_gate(gate, &qubits)?;
                    }
                }
            }
        }

        let sampled = self.kernel.sample(shots)?;
        let total_qubits = layout.total_qubits;
        let total_clbits = layout.total_clbits;
        for qubit_bitstring in sampled {
            let bytes = qubit_bitstring.as_bytes();
            let mut classical_bits = vec![b'0'; total_clbits];
            for &(qubit, clbit) in &measurement_targets {
                // Qubit q prints at position n-1-q; clbit c lands at n_clbits-1-c.
                classical_bits[total_clbits - 1 - clbit] = bytes[total_qubits - 1 - qubit];
            }
            // The bitstring is built from ASCII '0'/'1' bytes only.
            histogram.record(String::from_utf8(classical_bits).unwrap_or_default());
        }
        Ok(())
    }
}

// Sampling covers plain unitary circuits with measurements; anything with
// control flow, guards, remote operations or the borrow sentinel takes the
// shot loop.
fn eligible_for_sampling(task: &QuantumTask) -> bool {
    task.circuit.iter().all(|instruction| {
        let plain_operands = instruction.qubits.iter().all(|&qubit| qubit >= 0)
            && instruction.conditional_reg.is_empty()
            && instruction.remote_conditional_reg.is_empty();
        let samplable_opcode =
            instruction.name == OpCode::Measure || gate_kind(instruction.name).is_some();
        plain_operands && samplable_opcode
    })
}

fn gate_kind(opcode: OpCode) -> Option<GateKind> {
    match opcode {
        OpCode::Id => Some(GateKind::Id),
        OpCode::X => Some(GateKind::X),
        OpCode::Y => Some(GateKind::Y),
        OpCode::Z => Some(GateKind::Z),
        OpCode::H => Some(GateKind::H),
        OpCode::S => Some(GateKind::S),
        OpCode::Sdg => Some(GateKind::Sdg),
        OpCode::Sx => Some(GateKind::Sx),
        OpCode::Sxdg => Some(GateKind::Sxdg),
        OpCode::T => Some(GateKind::T),
        OpCode::Tdg => Some(GateKind::Tdg),
        OpCode::P0 => Some(GateKind::P0),
        OpCode::P1 => Some(GateKind::P1),
        OpCode::Rx => Some(GateKind::Rx),
        OpCode::Ry => Some(GateKind::Ry),
        OpCode::Rz => Some(GateKind::Rz),
        OpCode::P => Some(GateKind::P),
        OpCode::U1 => Some(GateKind::U1),
        OpCode::U2 => Some(GateKind::U2),
        OpCode::U3 => Some(GateKind::U3),
        OpCode::U => Some(GateKind::U),
        OpCode::R => Some(GateKind::R),
        OpCode::Swap => Some(GateKind::Swap),
        OpCode::Ecr => Some(GateKind::Ecr),
        OpCode::Cx => Some(GateKind::Cx),
        OpCode::Cy => Some(GateKind::Cy),
        OpCode::Cz => Some(GateKind::Cz),
        OpCode::Crx => Some(GateKind::Crx),
        OpCode::Cry => Some(GateKind::Cry),
        OpCode::Crz => Some(GateKind::Crz),
        _ => None,
    }
}

// =============================================================================
// 3. ShotExecution - One shot over a batch
// =============================================================================

struct ShotExecution<'a> {
    kernel: &'a mut dyn StateKernelInterface,
    channel: Option<&'a ClassicalChannel>,
    tasks: &'a [QuantumTask],
    layout: &'a BatchLayout,
    task_identifiers: Vec<String>,
    index_by_identifier: HashMap<String, usize>,
    states: Vec<TaskShotState>,
    creg: BTreeMap<usize, bool>,
    remote_creg: BTreeMap<usize, bool>,
    // Per-sender LIFO stacks of quantum-communication measurement outcomes.
    qc_meas: HashMap<String, Vec<u8>>,
}

impl<'a> ShotExecution<'a> {
    fn new(
        kernel: &'a mut dyn StateKernelInterface,
        channel: Option<&'a ClassicalChannel>,
        tasks: &'a [QuantumTask],
        layout: &'a BatchLayout,
    ) -> Self {
        let task_identifiers: Vec<String> = tasks.iter().map(|task| task.id.clone()).collect();
        let index_by_identifier = task_identifiers
            .iter()
            .enumerate()
            .map(|(index, identifier)| (identifier.clone(), index))
            .collect();
        Self {
            kernel,
            channel,
            tasks,
            layout,
            task_identifiers,
            index_by_identifier,
            states: TaskShotState::fresh_batch(tasks.len()),
            creg: BTreeMap::new(),
            remote_creg: BTreeMap::new(),
            qc_meas: HashMap::new(),
        }
    }

    // =========================================================================
    // 4. Cooperative scheduler
    // =========================================================================

    fn run(mut self) -> Result<String, InterpreterError> {
        let task_count = self.tasks.len();
        let mut scan_start = 0usize;
        let mut stalled_rounds = 0u32;

        loop {
            let mut made_progress = false;

            for offset in 0..task_count {
                let index = (scan_start + offset) % task_count;
                if self.states[index].finished || self.states[index].blocked {
                    continue;
                }

                let blocked_before: Vec<bool> =
                    self.states.iter().map(|state| state.blocked).collect();

                let instruction: &'a Instruction =
                    &self.tasks[index].circuit[self.states[index].cursor];
                match self.dispatch(index, instruction) {
                    Ok(()) => {}
                    Err(DispatchFailure::TaskFatal(error)) => {
                        tracing::warn!(
                            task = %self.task_identifiers[index],
                            %error,
                            "task ended early; shot continues for the rest of the batch"
                        );
                        self.states[index].finished = true;
                        self.states[index].blocked = false;
                        made_progress = true;
                        continue;
                    }
                    Err(DispatchFailure::BatchFatal(error)) => return Err(error),
                }

                // A blocked dispatch leaves the cursor on the same instruction.
                if !self.states[index].blocked {
                    self.states[index].cursor += 1;
                    made_progress = true;
                    if self.states[index].cursor == self.tasks[index].circuit.len() {
                        self.states[index].finished = true;
                    }
                }

                // Unblocking another task also counts as progress.
                for (other, was_blocked) in blocked_before.iter().enumerate() {
                    if *was_blocked && !self.states[other].blocked {
                        made_progress = true;
                    }
                }
            }

            if self.states.iter().all(|state| state.finished) {
                break;
            }

            if made_progress {
                stalled_rounds = 0;
            } else {
                stalled_rounds += 1;
                scan_start = (scan_start + 1) % task_count;
                if stalled_rounds >= 2 {
                    let unfinished = self
                        .states
                        .iter()
                        .filter(|state| !state.finished)
                        .count();
                    return Err(InterpreterError::Deadlock { unfinished });
                }
            }
        }

        if !self.qc_meas.is_empty() {
            let senders: Vec<&str> = self.qc_meas.keys().map(String::as_str).collect();
            return Err(InterpreterError::ProtocolImbalance(format!(
                "unconsumed quantum-channel measurements from {:?} at end of shot",
                senders
            )));
        }

        Ok(self.assemble_bitstring())
    }

    fn assemble_bitstring(&self) -> String {
        let total_clbits = self.layout.total_clbits;
        let mut bits = vec![b'0'; total_clbits];
        for (&clbit, &value) in &self.creg {
            if clbit < total_clbits && value {
                bits[total_clbits - 1 - clbit] = b'1';
            }
        }
        String::from_utf8(bits).unwrap_or_default()
    }

    // =========================================================================
    // 5. Instruction dispatch
    // =========================================================================

    fn dispatch(
        &mut self,
        task_index: usize,
        instruction: &'a Instruction,
    ) -> Result<(), DispatchFailure> {
        match instruction.name {
            OpCode::Measure => self.dispatch_measure(task_index, instruction),
            OpCode::Copy => self.dispatch_copy(task_index, instruction),
            OpCode::Cif => self.dispatch_cif(task_index, instruction),
            OpCode::Send => self.dispatch_send(task_index, instruction),
            OpCode::Recv => self.dispatch_recv(task_index, instruction),
            OpCode::Qsend => self.dispatch_qsend(task_index, instruction),
            OpCode::Qrecv => self.dispatch_qrecv(task_index, instruction),
            OpCode::Expose => self.dispatch_expose(task_index, instruction),
            OpCode::Rcontrol => self.dispatch_rcontrol(task_index, instruction),
            opcode => {
                let gate = gate_kind(opcode).ok_or_else(|| {
                    DispatchFailure::instruction(format!("opcode '{}' has no dispatch rule", opcode))
                })?;
                self.dispatch_gate(task_index, instruction, gate)
            }
        }
    }

    fn dispatch_gate(
        &mut self,
        task_index: usize,
        instruction: &Instruction,
        gate: GateKind,
    ) -> Result<(), DispatchFailure> {
        if !self.gate_guard_passes(task_index, instruction) {
            return Ok(());
        }

        let mut qubits = Vec::with_capacity(gate.qubit_count());
        for position in 0..gate.qubit_count() {
            qubits.push(self.resolve_qubit(task_index, instruction, position)?);
        }

        if gate.is_parametric() {
            if instruction.params.len() != gate.parameter_count() {
                return Err(DispatchFailure::instruction(format!(
                    "opcode '{}' takes {} parameters, got {}",
                    instruction.name,
                    gate.parameter_count(),
                    instruction.params.len()
                )));
            }
            self.kernel
                .apply_parametric_gate(gate, &qubits, &instruction.params)?;
        } else {
            self.kernel.apply_gate(gate, &qubits)?;
        }
        Ok(())
    }

    fn dispatch_measure(
        &mut self,
        task_index: usize,
        instruction: &Instruction,
    ) -> Result<(), DispatchFailure> {
        let qubit = self.resolve_qubit(task_index, instruction, 0)?;
        let destination = instruction
            .clbits
            .first()
            .or_else(|| instruction.clreg.first())
            .copied()
            .ok_or_else(|| DispatchFailure::instruction("measure without a destination"))?;
        let destination = self.resolve_clbit(task_index, destination)?;

        let outcome = self.kernel.apply_measure(qubit)?;
        self.creg.insert(destination, outcome == 1);
        Ok(())
    }

    fn dispatch_copy(
        &mut self,
        task_index: usize,
        instruction: &Instruction,
    ) -> Result<(), DispatchFailure> {
        if instruction.l_clbits.len() != instruction.r_clbits.len() {
            return Err(DispatchFailure::BatchFatal(InterpreterError::ArityMismatch {
                destinations: instruction.l_clbits.len(),
                sources: instruction.r_clbits.len(),
            }));
        }
        for (&destination, &source) in instruction.l_clbits.iter().zip(&instruction.r_clbits) {
            let destination = self.resolve_clbit(task_index, destination)?;
            let source = self.resolve_clbit(task_index, source)?;
            let value = self.creg.get(&source).copied().unwrap_or(false);
            self.creg.insert(destination, value);
        }
        Ok(())
    }

    fn dispatch_cif(
        &mut self,
        task_index: usize,
        instruction: &'a Instruction,
    ) -> Result<(), DispatchFailure> {
        let condition = instruction
            .clbits
            .first()
            .copied()
            .ok_or_else(|| DispatchFailure::instruction("cif without a condition clbit"))?;
        let condition = self.resolve_clbit(task_index, condition)?;

        if self.creg.get(&condition).copied().unwrap_or(false) {
            for nested in &instruction.instructions {
                self.dispatch(task_index, nested)?;
            }
        }
        Ok(())
    }

    fn dispatch_send(
        &mut self,
        task_index: usize,
        instruction: &Instruction,
    ) -> Result<(), DispatchFailure> {
        let channel = self.require_channel()?;
        let peer = first_peer(instruction)?;
        for &clbit in &instruction.clbits {
            let clbit = self.resolve_clbit(task_index, clbit)?;
            let value = self.creg.get(&clbit).copied().unwrap_or(false);
            channel.send_measure(u8::from(value), peer)?;
        }
        Ok(())
    }

    // Blocks at the channel, not at the scheduler: nothing in this batch can
    // produce the awaited message, so suspending the task would not help.
    fn dispatch_recv(
        &mut self,
        task_index: usize,
        instruction: &Instruction,
    ) -> Result<(), DispatchFailure> {
        let channel = self.require_channel()?;
        let peer = first_peer(instruction)?;

        if instruction.clbits.is_empty() && instruction.remote_conditional_reg.is_empty() {
            return Err(DispatchFailure::instruction("recv without a destination"));
        }

        for &clbit in &instruction.clbits {
            let clbit = self.resolve_clbit(task_index, clbit)?;
            let measurement = channel.recv_measure(peer)?;
            self.creg.insert(clbit, measurement == 1);
        }

        if let Some(&register) = instruction.remote_conditional_reg.first() {
            let register = self.resolve_clbit(task_index, register)?;
            let measurement = channel.recv_measure(peer)?;
            self.remote_creg.insert(register, measurement == 1);
        }
        Ok(())
    }

    // =========================================================================
    // 6. Remote-operation state machines
    // =========================================================================

    fn dispatch_qsend(
        &mut self,
        task_index: usize,
        instruction: &Instruction,
    ) -> Result<(), DispatchFailure> {
        let peer_index = self.peer_task_index(instruction)?;
        let own_identifier = self.task_identifiers[task_index].clone();

        // A matched batch consumes pairs; an odd stack means the previous
        // QSEND's values were never received.
        if let Some(stack) = self.qc_meas.get(&own_identifier) {
            if stack.len() % 2 != 0 {
                return Err(DispatchFailure::BatchFatal(
                    InterpreterError::ProtocolImbalance(format!(
                        "task {} issued QSEND while {} of its measurements are still pending",
                        own_identifier,
                        stack.len()
                    )),
                ));
            }
        }

        let data_qubit = self.resolve_qubit(task_index, instruction, 0)?;
        let (outgoing, _) = self.communication_qubits()?;

        self.generate_entanglement_pair()?;
        self.kernel.apply_gate(GateKind::Cx, &[data_qubit, outgoing])?;
        self.kernel.apply_gate(GateKind::H, &[data_qubit])?;

        let data_measurement = self.kernel.apply_measure(data_qubit)?;
        let ancilla_measurement = self.kernel.apply_measure(outgoing)?;

        let stack = self.qc_meas.entry(own_identifier).or_default();
        stack.push(data_measurement);
        stack.push(ancilla_measurement);

        self.kernel.apply_reset(&[data_qubit, outgoing])?;

        self.states[peer_index].blocked = false;
        Ok(())
    }

    fn dispatch_qrecv(
        &mut self,
        task_index: usize,
        instruction: &Instruction,
    ) -> Result<(), DispatchFailure> {
        let peer = first_peer(instruction)?;

        // The sender has not produced its pair yet: suspend on this
        // instruction and wait for the matching QSEND to unblock us.
        let ancilla_measurement =
            match self.qc_meas.get_mut(peer).and_then(|stack| stack.pop()) {
                Some(measurement) => measurement,
                None => {
                    self.states[task_index].blocked = true;
                    return Ok(());
                }
            };
        let data_measurement = self
            .qc_meas
            .get_mut(peer)
            .and_then(|stack| stack.pop())
            .ok_or_else(|| {
                DispatchFailure::BatchFatal(InterpreterError::ProtocolImbalance(format!(
                    "QRECV found a single measurement from {}, expected a pair",
                    peer
                )))
            })?;
        self.drop_stack_if_empty(peer);

        let target_qubit = self.resolve_qubit(task_index, instruction, 0)?;
        let (_, incoming) = self.communication_qubits()?;

        if ancilla_measurement == 1 {
            self.kernel.apply_gate(GateKind::X, &[incoming])?;
        }
        if data_measurement == 1 {
            self.kernel.apply_gate(GateKind::Z, &[incoming])?;
        }

        self.kernel
            .apply_gate(GateKind::Swap, &[incoming, target_qubit])?;
        self.kernel.apply_reset(&[incoming])?;
        Ok(())
    }

    fn dispatch_expose(
        &mut self,
        task_index: usize,
        instruction: &Instruction,
    ) -> Result<(), DispatchFailure> {
        if !self.states[task_index].cat_entangled {
            // Opening half: entangle, hand the measurement to the remote
            // controller, and suspend on this same instruction.
            let peer_index = self.peer_task_index(instruction)?;
            let data_qubit = self.resolve_qubit(task_index, instruction, 0)?;
            let (outgoing, _) = self.communication_qubits()?;

            self.generate_entanglement_pair()?;
            self.kernel.apply_gate(GateKind::Cx, &[data_qubit, outgoing])?;
            let measurement = self.kernel.apply_measure(outgoing)?;

            let own_identifier = self.task_identifiers[task_index].clone();
            self.qc_meas.entry(own_identifier).or_default().push(measurement);

            self.states[task_index].cat_entangled = true;
            self.states[task_index].blocked = true;
            self.states[peer_index].blocked = false;
            Ok(())
        } else {
            // Closing half: consume the controller's basis measurement and
            // undo the phase it left behind.
            let peer = first_peer(instruction)?;
            let measurement = self
                .qc_meas
                .get_mut(peer)
                .and_then(|stack| stack.pop())
                .ok_or_else(|| {
                    DispatchFailure::BatchFatal(InterpreterError::ProtocolImbalance(format!(
                        "closing EXPOSE found no measurement from {}",
                        peer
                    )))
                })?;
            self.drop_stack_if_empty(peer);

            if measurement == 1 {
                let data_qubit = self.resolve_qubit(task_index, instruction, 0)?;
                self.kernel.apply_gate(GateKind::Z, &[data_qubit])?;
            }
            self.states[task_index].cat_entangled = false;
            Ok(())
        }
    }

    fn dispatch_rcontrol(
        &mut self,
        task_index: usize,
        instruction: &'a Instruction,
    ) -> Result<(), DispatchFailure> {
        let peer = first_peer(instruction)?;

        // Nothing exposed yet: suspend until the opening EXPOSE unblocks us.
        let measurement = match self.qc_meas.get_mut(peer).and_then(|stack| stack.pop()) {
            Some(measurement) => measurement,
            None => {
                self.states[task_index].blocked = true;
                return Ok(());
            }
        };

        let (_, incoming) = self.communication_qubits()?;
        if measurement == 1 {
            self.kernel.apply_gate(GateKind::X, &[incoming])?;
        }

        // The body runs as if at top level; local controls reach the shared
        // control qubit through the -1 sentinel.
        for nested in &instruction.instructions {
            self.dispatch(task_index, nested)?;
        }

        self.kernel.apply_gate(GateKind::H, &[incoming])?;
        let basis_measurement = self.kernel.apply_measure(incoming)?;

        let own_identifier = self.task_identifiers[task_index].clone();
        self.qc_meas
            .entry(own_identifier)
            .or_default()
            .push(basis_measurement);

        let peer_index = self.peer_task_index(instruction)?;
        self.states[peer_index].blocked = false;

        // Frees the peer-pair slot for the next region.
        self.qc_meas.remove(peer);
        Ok(())
    }

    // Fresh EPR pair on the communication qubits, whatever the previous
    // region left there.
    fn generate_entanglement_pair(&mut self) -> Result<(), DispatchFailure> {
        let (outgoing, incoming) = self.communication_qubits()?;
        self.kernel.apply_reset(&[outgoing, incoming])?;
        self.kernel.apply_gate(GateKind::H, &[outgoing])?;
        self.kernel.apply_gate(GateKind::Cx, &[outgoing, incoming])?;
        Ok(())
    }

    fn communication_qubits(&self) -> Result<(usize, usize), DispatchFailure> {
        if !self.layout.has_communication_qubits {
            return Err(DispatchFailure::instruction(
                "quantum-channel operation in a batch without communication qubits",
            ));
        }
        Ok((
            self.layout.outgoing_communication_qubit(),
            self.layout.incoming_communication_qubit(),
        ))
    }

    fn peer_task_index(&self, instruction: &Instruction) -> Result<usize, DispatchFailure> {
        let peer = first_peer(instruction)?;
        self.index_by_identifier.get(peer).copied().ok_or_else(|| {
            DispatchFailure::instruction(format!("peer task '{}' is not in this batch", peer))
        })
    }

    fn drop_stack_if_empty(&mut self, peer: &str) {
        if self.qc_meas.get(peer).is_some_and(|stack| stack.is_empty()) {
            self.qc_meas.remove(peer);
        }
    }

    fn gate_guard_passes(&self, task_index: usize, instruction: &Instruction) -> bool {
        if let Some(&register) = instruction.conditional_reg.first() {
            let register = register + self.layout.zero_clbits[task_index];
            return self.creg.get(&register).copied().unwrap_or(false);
        }
        if let Some(&register) = instruction.remote_conditional_reg.first() {
            let register = register + self.layout.zero_clbits[task_index];
            return self.remote_creg.get(&register).copied().unwrap_or(false);
        }
        true
    }

    fn resolve_qubit(
        &self,
        task_index: usize,
        instruction: &Instruction,
        position: usize,
    ) -> Result<usize, DispatchFailure> {
        let raw = instruction.qubits.get(position).copied().ok_or_else(|| {
            DispatchFailure::instruction(format!(
                "opcode '{}' is missing qubit operand {}",
                instruction.name, position
            ))
        })?;

        if raw == -1 {
            if !self.layout.has_communication_qubits {
                return Err(DispatchFailure::instruction(
                    "communication-qubit sentinel used in a batch without communication qubits",
                ));
            }
            return Ok(self.layout.incoming_communication_qubit());
        }
        if raw < 0 {
            return Err(DispatchFailure::instruction(format!(
                "negative qubit index {} in opcode '{}'",
                raw, instruction.name
            )));
        }

        let resolved = raw as usize + self.layout.zero_qubits[task_index];
        if resolved >= self.layout.total_qubits {
            return Err(DispatchFailure::instruction(format!(
                "qubit {} resolves outside the {}-qubit register",
                raw, self.layout.total_qubits
            )));
        }
        Ok(resolved)
    }

    fn resolve_clbit(&self, task_index: usize, clbit: usize) -> Result<usize, DispatchFailure> {
        let resolved = clbit + self.layout.zero_clbits[task_index];
        if resolved >= self.layout.total_clbits {
            return Err(DispatchFailure::instruction(format!(
                "clbit {} resolves outside the {}-clbit register",
                clbit, self.layout.total_clbits
            )));
        }
        Ok(resolved)
    }

    fn require_channel(&self) -> Result<&'a ClassicalChannel, DispatchFailure> {
        self.channel.ok_or_else(|| {
            DispatchFailure::instruction("classical inter-QPU operation without a channel")
        })
    }
}

fn first_peer(instruction: &Instruction) -> Result<&str, DispatchFailure> {
    instruction
        .qpus
        .first()
        .map(String::as_str)
        .ok_or_else(|| {
            DispatchFailure::instruction(format!(
                "opcode '{}' is missing its peer identifier",
                instruction.name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use peer_services::{DeploymentMode, DiscoveryRegistry};
    use state_kernel::StateVectorKernel;
    use task_codec::{Instruction, TaskConfig};

    fn measure(qubit: i64, clbit: usize) -> Instruction {
        Instruction::new(OpCode::Measure)
            .with_qubits(vec![qubit])
            .with_clbits(vec![clbit])
    }

    fn simulate_batch(tasks: &[QuantumTask], seed: u64) -> ResultDocument {
        let width = BatchLayout::required_register_width(tasks);
        let mut kernel = StateVectorKernel::new(width, Some(seed));
        ShotInterpreter::new(&mut kernel).simulate(tasks)
    }

    #[test]
    fn test_bell_pair_single_task() {
        let task = QuantumTask::new("bell", TaskConfig::new(2, 2, 1024).with_seed(17)).with_circuit(
            vec![
                Instruction::new(OpCode::H).with_qubits(vec![0]),
                Instruction::new(OpCode::Cx).with_qubits(vec![0, 1]),
                measure(0, 0),
                measure(1, 1),
            ],
        );

        let document = simulate_batch(&[task], 17);
        let counts = document.counts().expect("bell batch succeeds");
        let total: u64 = counts.values().sum();
        assert_eq!(total, 1024);
        for key in counts.keys() {
            assert!(key == "00" || key == "11", "unexpected key {key}");
        }
        assert!(counts.contains_key("00") && counts.contains_key("11"));
    }

    #[test]
    fn test_empty_circuit_produces_all_zero_bitstring() {
        let task = QuantumTask::new("idle", TaskConfig::new(2, 3, 64));
        let document = simulate_batch(&[task], 1);
        match document {
            ResultDocument::Success { counts, time_taken } => {
                assert_eq!(counts.get("000"), Some(&64));
                assert_eq!(counts.len(), 1);
                assert!(time_taken >= 0.0);
            }
            ResultDocument::Failure { error } => panic!("unexpected failure: {error}"),
        }
    }

    #[test]
    fn test_determinism_under_seed() {
        let build = || {
            QuantumTask::new("t", TaskConfig::new(2, 2, 256).with_seed(5)).with_circuit(vec![
                Instruction::new(OpCode::H).with_qubits(vec![0]),
                Instruction::new(OpCode::Rx)
                    .with_qubits(vec![1])
                    .with_params(vec![0.7]),
                measure(0, 0),
                measure(1, 1),
            ])
        };
        let first = simulate_batch(&[build()], 5);
        let second = simulate_batch(&[build()], 5);
        assert_eq!(first.counts(), second.counts());
    }

    #[test]
    fn test_copy_sanity() {
        // Dynamic so the shot loop (and with it COPY's creg semantics) runs.
        let task = QuantumTask::new("copy", TaskConfig::new(2, 4, 32).with_seed(2))
            .dynamic()
            .with_circuit(vec![
                Instruction::new(OpCode::X).with_qubits(vec![0]),
                measure(0, 0),
                measure(1, 1),
                {
                    let mut copy = Instruction::new(OpCode::Copy);
                    copy.l_clbits = vec![2, 3];
                    copy.r_clbits = vec![0, 1];
                    copy
                },
            ]);

        let document = simulate_batch(&[task], 2);
        let counts = document.counts().expect("copy batch succeeds");
        // c0=1, c1=0 copied to c2=1, c3=0; bitstring prints c0 rightmost.
        assert_eq!(counts.get("0101"), Some(&32));
    }

    #[test]
    fn test_copy_arity_mismatch_is_batch_fatal() {
        let task = QuantumTask::new("copy", TaskConfig::new(1, 4, 8))
            .dynamic()
            .with_circuit(vec![measure(0, 0), {
                let mut copy = Instruction::new(OpCode::Copy);
                copy.l_clbits = vec![2];
                copy.r_clbits = vec![0, 1];
                copy
            }]);

        let document = simulate_batch(&[task], 3);
        match document {
            ResultDocument::Failure { error } => assert!(error.contains("arity"), "{error}"),
            ResultDocument::Success { .. } => panic!("expected arity failure"),
        }
    }

    #[test]
    fn test_copy_with_empty_lists_is_a_no_op() {
        let task = QuantumTask::new("copy", TaskConfig::new(1, 1, 4))
            .dynamic()
            .with_circuit(vec![Instruction::new(OpCode::Copy), measure(0, 0)]);
        let document = simulate_batch(&[task], 4);
        assert_eq!(document.counts().unwrap().get("0"), Some(&4));
    }

    #[test]
    fn test_teleportation_across_co_scheduled_tasks() {
        let sender = QuantumTask::new("alice", TaskConfig::new(1, 1, 1024).with_seed(23))
            .dynamic()
            .with_circuit(vec![
                Instruction::new(OpCode::H).with_qubits(vec![0]),
                Instruction::new(OpCode::Qsend)
                    .with_qubits(vec![0])
                    .with_qpus(vec!["bob".to_string()]),
                measure(0, 0),
            ]);
        let receiver = QuantumTask::new("bob", TaskConfig::new(1, 1, 1024).with_seed(23))
            .dynamic()
            .with_circuit(vec![
                Instruction::new(OpCode::Qrecv)
                    .with_qubits(vec![0])
                    .with_qpus(vec!["alice".to_string()]),
                measure(0, 0),
            ]);

        let document = simulate_batch(&[sender, receiver], 23);
        let counts = document.counts().expect("teleportation succeeds");
        let total: u64 = counts.values().sum();
        assert_eq!(total, 1024);

        // Alice's qubit is reset by QSEND, so her clbit (rightmost) is 0.
        for key in counts.keys() {
            assert!(key == "00" || key == "10", "unexpected key {key}");
        }

        // Bob's marginal is the teleported |+> state: roughly balanced.
        let bob_one = counts.get("10").copied().unwrap_or(0);
        assert!((200..=824).contains(&bob_one), "marginal skewed: {bob_one}");
    }

    #[test]
    fn test_expose_rcontrol_telegate_correlation() {
        let exposer = QuantumTask::new("alice", TaskConfig::new(1, 1, 512).with_seed(31))
            .dynamic()
            .with_circuit(vec![
                Instruction::new(OpCode::H).with_qubits(vec![0]),
                Instruction::new(OpCode::Expose)
                    .with_qubits(vec![0])
                    .with_qpus(vec!["bob".to_string()]),
                measure(0, 0),
            ]);
        let controller = QuantumTask::new("bob", TaskConfig::new(1, 1, 512).with_seed(31))
            .dynamic()
            .with_circuit(vec![
                Instruction::new(OpCode::Rcontrol)
                    .with_qpus(vec!["alice".to_string()])
                    .with_body(vec![Instruction::new(OpCode::Cx).with_qubits(vec![-1, 0])]),
                measure(0, 0),
            ]);

        let document = simulate_batch(&[exposer, controller], 31);
        let counts = document.counts().expect("telegate succeeds");
        let total: u64 = counts.values().sum();
        assert_eq!(total, 512);

        // The remote CX entangles the two data qubits: outcomes correlate.
        for key in counts.keys() {
            assert!(key == "00" || key == "11", "unexpected key {key}");
        }
        assert!(counts.contains_key("00") && counts.contains_key("11"));
    }

    #[test]
    fn test_qrecv_without_qsend_raises_deadlock() {
        let bystander = QuantumTask::new("alice", TaskConfig::new(1, 1, 4))
            .dynamic()
            .with_circuit(vec![Instruction::new(OpCode::X).with_qubits(vec![0])]);
        let stuck = QuantumTask::new("bob", TaskConfig::new(1, 1, 4))
            .dynamic()
            .with_circuit(vec![Instruction::new(OpCode::Qrecv)
                .with_qubits(vec![0])
                .with_qpus(vec!["alice".to_string()])]);

        let document = simulate_batch(&[bystander, stuck], 7);
        match document {
            ResultDocument::Failure { error } => {
                assert!(error.contains("Deadlock"), "{error}")
            }
            ResultDocument::Success { .. } => panic!("expected deadlock"),
        }
    }

    #[test]
    fn test_qsend_without_qrecv_is_a_protocol_imbalance() {
        let sender = QuantumTask::new("alice", TaskConfig::new(1, 1, 4))
            .dynamic()
            .with_circuit(vec![Instruction::new(OpCode::Qsend)
                .with_qubits(vec![0])
                .with_qpus(vec!["bob".to_string()])]);
        let bystander = QuantumTask::new("bob", TaskConfig::new(1, 1, 4))
            .dynamic()
            .with_circuit(vec![Instruction::new(OpCode::X).with_qubits(vec![0])]);

        let document = simulate_batch(&[sender, bystander], 7);
        match document {
            ResultDocument::Failure { error } => {
                assert!(error.contains("imbalance") || error.contains("unconsumed"), "{error}")
            }
            ResultDocument::Success { .. } => panic!("expected protocol imbalance"),
        }
    }

    #[test]
    fn test_sentinel_in_single_task_batch_is_an_instruction_error() {
        let task = QuantumTask::new("solo", TaskConfig::new(2, 1, 4))
            .dynamic()
            .with_circuit(vec![Instruction::new(OpCode::Swap).with_qubits(vec![-1, 0])]);
        let document = simulate_batch(&[task], 1);
        match document {
            ResultDocument::Failure { error } => {
                assert!(error.contains("sentinel"), "{error}")
            }
            ResultDocument::Success { .. } => panic!("expected instruction error"),
        }
    }

    #[test]
    fn test_cif_executes_body_only_when_condition_is_set() {
        let task = QuantumTask::new("cond", TaskConfig::new(2, 2, 16).with_seed(6))
            .dynamic()
            .with_circuit(vec![
                Instruction::new(OpCode::X).with_qubits(vec![0]),
                measure(0, 0),
                Instruction::new(OpCode::Cif)
                    .with_clbits(vec![0])
                    .with_body(vec![Instruction::new(OpCode::X).with_qubits(vec![1])]),
                measure(1, 1),
            ]);
        let document = simulate_batch(&[task], 6);
        assert_eq!(document.counts().unwrap().get("11"), Some(&16));

        let untriggered = QuantumTask::new("cond", TaskConfig::new(2, 2, 16).with_seed(6))
            .dynamic()
            .with_circuit(vec![
                measure(0, 0),
                Instruction::new(OpCode::Cif)
                    .with_clbits(vec![0])
                    .with_body(vec![Instruction::new(OpCode::X).with_qubits(vec![1])]),
                measure(1, 1),
            ]);
        let document = simulate_batch(&[untriggered], 6);
        assert_eq!(document.counts().unwrap().get("00"), Some(&16));
    }

    #[test]
    fn test_conditional_reg_guard_skips_gate() {
        let task = QuantumTask::new("guarded", TaskConfig::new(2, 2, 8).with_seed(1))
            .dynamic()
            .with_circuit(vec![
                measure(0, 0), // c0 = 0
                {
                    let mut gate = Instruction::new(OpCode::X).with_qubits(vec![1]);
                    gate.conditional_reg = vec![0];
                    gate
                },
                measure(1, 1),
            ]);
        let document = simulate_batch(&[task], 1);
        assert_eq!(document.counts().unwrap().get("00"), Some(&8));
    }

    #[test]
    fn test_mismatched_kernel_width_is_rejected() {
        let task = QuantumTask::new("t", TaskConfig::new(2, 1, 1));
        let mut kernel = StateVectorKernel::new(5, Some(0));
        let document = ShotInterpreter::new(&mut kernel).simulate(&[task]);
        assert!(!document.is_success());
    }

    #[test]
    fn test_classical_send_recv_between_two_interpreters() {
        let directory = tempfile::tempdir().unwrap();
        let registry = DiscoveryRegistry::new(directory.path().join("registry.json"));
        let shots = 128usize;

        let registry_a = registry.clone();
        let alice = std::thread::spawn(move || {
            let channel = ClassicalChannel::bind("qpu_a", registry_a.clone()).unwrap();
            channel.publish(DeploymentMode::CoLocated).unwrap();
            registry_a
                .wait_for_peers("qpu_b", 1, "qpu_a", std::time::Duration::from_secs(5))
                .unwrap();
            channel.connect("qpu_b").unwrap();

            let task = QuantumTask::new("a", TaskConfig::new(1, 1, shots).with_seed(40))
                .dynamic()
                .with_circuit(vec![
                    Instruction::new(OpCode::H).with_qubits(vec![0]),
                    measure(0, 0),
                    Instruction::new(OpCode::Send)
                        .with_clbits(vec![0])
                        .with_qpus(vec!["qpu_b".to_string()]),
                ]);

            let mut kernel = StateVectorKernel::new(1, Some(40));
            ShotInterpreter::new(&mut kernel)
                .with_classical_channel(&channel)
                .simulate(&[task])
        });

        let registry_b = registry.clone();
        let bob = std::thread::spawn(move || {
            let channel = ClassicalChannel::bind("qpu_b", registry_b.clone()).unwrap();
            channel.publish(DeploymentMode::CoLocated).unwrap();
            registry_b
                .wait_for_peers("qpu_a", 1, "qpu_b", std::time::Duration::from_secs(5))
                .unwrap();
            channel.connect("qpu_a").unwrap();

            let task = QuantumTask::new("b", TaskConfig::new(1, 1, shots).with_seed(41))
                .dynamic()
                .with_circuit(vec![
                    Instruction::new(OpCode::Recv)
                        .with_clbits(vec![0])
                        .with_qpus(vec!["qpu_a".to_string()]),
                    Instruction::new(OpCode::Cif)
                        .with_clbits(vec![0])
                        .with_body(vec![Instruction::new(OpCode::X).with_qubits(vec![0])]),
                    measure(0, 0),
                ]);

            let mut kernel = StateVectorKernel::new(1, Some(41));
            ShotInterpreter::new(&mut kernel)
                .with_classical_channel(&channel)
                .simulate(&[task])
        });

        let alice_document = alice.join().unwrap();
        let bob_document = bob.join().unwrap();

        // Bob reconstructs Alice's bit exactly, so the histograms match.
        let alice_counts = alice_document.counts().expect("alice succeeds");
        let bob_counts = bob_document.counts().expect("bob succeeds");
        assert_eq!(alice_counts, bob_counts);
        assert_eq!(alice_counts.values().sum::<u64>(), shots as u64);
    }

    #[test]
    fn test_recv_without_channel_is_batch_fatal() {
        let task = QuantumTask::new("t", TaskConfig::new(1, 1, 2))
            .dynamic()
            .with_circuit(vec![Instruction::new(OpCode::Recv)
                .with_clbits(vec![0])
                .with_qpus(vec!["elsewhere".to_string()])]);
        let document = simulate_batch(&[task], 1);
        assert!(!document.is_success());
    }

    #[test]
    fn test_zero_offsets_follow_insertion_order_across_shots() {
        // Two tasks writing fixed patterns into their own registers; the
        // merged bitstring proves the offsets never moved.
        let first = QuantumTask::new("one", TaskConfig::new(1, 1, 16).with_seed(8))
            .dynamic()
            .with_circuit(vec![
                Instruction::new(OpCode::X).with_qubits(vec![0]),
                measure(0, 0),
            ]);
        let second = QuantumTask::new("two", TaskConfig::new(1, 1, 16).with_seed(8))
            .dynamic()
            .with_circuit(vec![measure(0, 0)]);

        let document = simulate_batch(&[first, second], 8);
        // Task "one" owns global clbit 0 (rightmost), task "two" clbit 1.
        assert_eq!(document.counts().unwrap().get("01"), Some(&16));
    }
}
