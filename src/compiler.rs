//! Patch graph -> bytecode.
//!
//! Compilation runs in three stages:
//!
//! 1. Topological sort (Kahn's algorithm) so every producer is emitted
//!    before its consumers. Ready nodes are drained in ascending-id order,
//!    which makes the emitted bytecode reproducible: compiling the same
//!    graph twice yields byte-identical output.
//! 2. Register allocation: a counter that hands out one fresh register per
//!    constant and per output port. Registers are never reused within a
//!    program; the register file is sized by the header.
//! 3. Instruction emission: `LOAD_K` for constants, `PROC` for ordinary
//!    modules, `AUDIO_OUT` for the sink, then `END` and the header.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use thiserror::Error;

use crate::bytecode::{BytecodeHeader, OpCode, HEADER_WORDS, MAGIC, NULL_REG, VERSION};
use crate::dsp::modules;
use crate::patch::{PatchGraph, PatchNode};
use crate::registry::{ModuleRegistry, RegistryError};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    UnknownModule(#[from] RegistryError),
    #[error("patch graph contains a cycle")]
    CycleDetected,
    #[error("sink input {node}:{port} has no source")]
    UnconnectedSinkInput { node: u32, port: String },
}

/// Kahn's algorithm over the patch graph. Returns node ids in an order
/// that places every source before every node it feeds. Ties between
/// simultaneously-ready nodes break toward the smaller id.
pub fn topological_sort(graph: &PatchGraph) -> Result<Vec<u32>, CompileError> {
    let mut in_degree: BTreeMap<u32, usize> = BTreeMap::new();
    let mut adjacent: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

    for node in &graph.nodes {
        in_degree.insert(node.id, 0);
    }
    for conn in &graph.connections {
        // Wires touching ids that are not nodes of this graph contribute
        // nothing to the ordering.
        if !in_degree.contains_key(&conn.from_node) {
            continue;
        }
        let Some(degree) = in_degree.get_mut(&conn.to_node) else {
            continue;
        };
        *degree += 1;
        adjacent.entry(conn.from_node).or_default().push(conn.to_node);
    }

    let mut ready: BinaryHeap<Reverse<u32>> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&id, _)| Reverse(id))
        .collect();

    let mut sorted = Vec::with_capacity(graph.nodes.len());
    while let Some(Reverse(id)) = ready.pop() {
        sorted.push(id);
        if let Some(downstream) = adjacent.get(&id) {
            for &next in downstream {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(next));
                    }
                }
            }
        }
    }

    if sorted.len() < graph.nodes.len() {
        return Err(CompileError::CycleDetected);
    }
    Ok(sorted)
}

/// Find the source register feeding `node`'s input `port`, if any wire
/// ends there.
fn connected_register(
    graph: &PatchGraph,
    port_to_reg: &HashMap<(u32, String), u32>,
    node: &PatchNode,
    port: &str,
) -> Option<u32> {
    let conn = graph
        .connections
        .iter()
        .find(|c| c.to_node == node.id && c.to_port == port)?;
    // A wire from an id or port the compiler never saw produce a value is
    // treated the same as no wire at all.
    port_to_reg
        .get(&(conn.from_node, conn.from_port.clone()))
        .copied()
}

/// Compile a patch graph to a complete bytecode program, header included.
pub fn compile(graph: &PatchGraph, registry: &ModuleRegistry) -> Result<Vec<u32>, CompileError> {
    let order = topological_sort(graph)?;

    let node_by_id: BTreeMap<u32, &PatchNode> =
        graph.nodes.iter().map(|n| (n.id, n)).collect();

    // (node_id, output port) -> register holding that output.
    let mut port_to_reg: HashMap<(u32, String), u32> = HashMap::new();
    let mut next_reg: u32 = 0;
    let mut instructions: Vec<u32> = Vec::new();

    for node_id in order {
        let node = node_by_id[&node_id];
        let module_id = registry.id_of(&node.name)?;
        let info = registry.info_of(&node.name)?;

        // Stage 2.1: constants each get a fresh register up front.
        let mut constant_regs: HashMap<&str, u32> = HashMap::new();
        for constant in &node.constants {
            let reg = next_reg;
            next_reg += 1;
            constant_regs.insert(constant.port.as_str(), reg);
            instructions.push(OpCode::LoadK as u32);
            instructions.push(reg);
            instructions.push(constant.value.to_bits());
        }

        // Stage 2.2: the input register list, in declared port order.
        let mut in_regs = Vec::with_capacity(info.inputs.len());
        for port in &info.inputs {
            let reg = constant_regs
                .get(port.as_str())
                .copied()
                .or_else(|| connected_register(graph, &port_to_reg, node, port))
                .unwrap_or(NULL_REG);
            in_regs.push(reg);
        }

        if module_id == modules::AUDIO_OUT {
            // The sink is always lowered to AUDIO_OUT, never PROC, and its
            // operand slots cannot carry the unconnected sentinel.
            for (port, &reg) in info.inputs.iter().zip(&in_regs) {
                if reg == NULL_REG {
                    return Err(CompileError::UnconnectedSinkInput {
                        node: node.id,
                        port: port.clone(),
                    });
                }
            }
            instructions.push(OpCode::AudioOut as u32);
            instructions.push(in_regs.len() as u32);
            instructions.extend_from_slice(&in_regs);
            continue;
        }

        // Stage 2.3: fresh registers for every declared output.
        let mut out_regs = Vec::with_capacity(info.outputs.len());
        for port in &info.outputs {
            let reg = next_reg;
            next_reg += 1;
            out_regs.push(reg);
            port_to_reg.insert((node.id, port.clone()), reg);
        }

        instructions.push(OpCode::Proc as u32);
        instructions.push(node.id);
        instructions.push(module_id);
        instructions.push(in_regs.len() as u32);
        instructions.push(out_regs.len() as u32);
        instructions.extend_from_slice(&in_regs);
        instructions.extend_from_slice(&out_regs);
    }

    instructions.push(OpCode::End as u32);

    let header = BytecodeHeader {
        magic: MAGIC,
        version: VERSION,
        program_size_words: (instructions.len() + HEADER_WORDS) as u32,
        num_registers: next_reg,
    };
    let mut bytecode = Vec::with_capacity(HEADER_WORDS + instructions.len());
    header.write(&mut bytecode);
    bytecode.extend_from_slice(&instructions);
    Ok(bytecode)
}
