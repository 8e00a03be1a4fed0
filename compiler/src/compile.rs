// compile.rs — Compiling a flattened circuit into a chip template
//
// Allocates every component a fixed address range in the chip's flat signal
// array, lowers components to `Node`s, derives mark lists and the
// spontaneous set, picks the execution strategy (level order when the level
// compiler succeeds, event-driven otherwise), computes the default signal
// snapshot, and fingerprints the result.
//
// Preconditions: `circuit` elaborated without error diagnostics; every chip
//                it instantiates is present in `chips`.
// Postconditions: the returned template satisfies the address and level
//                 certs below; its default snapshot is fully settled.
// Failure modes: none — structural infeasibility (feedback) is a normal
//                branch that selects the event engine.
// Side effects: none.

use std::collections::HashMap;
use std::sync::Arc;

use crate::active::ActiveStack;
use crate::chip::{ChipType, PortInfo};
use crate::circuit::{Circuit, CompKind, PinRef};
use crate::engine::{EventBox, LevelBox, NodeBox, NodeSet};
use crate::level::assign_levels;
use crate::node::{mask, Addr, Node, NodeId, PackField, Signal, UnpackField, NO_SOURCE};

// ── Options ─────────────────────────────────────────────────────────────────

/// Compilation knobs.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Attempt level compilation (the default). Disabled, every chip gets
    /// the event engine — useful for debugging and differential testing.
    pub prefer_levels: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            prefer_levels: true,
        }
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Compile one elaborated circuit into a reusable chip template.
pub fn compile(
    circuit: &Circuit,
    chips: &HashMap<String, Arc<ChipType>>,
    options: &CompileOptions,
) -> Arc<ChipType> {
    let mut compiler = Compiler::new(circuit, chips);
    compiler.allocate_addresses();
    compiler.build_nodes();
    compiler.derive_marks();
    let set = compiler.into_node_set();

    let node_box = if options.prefer_levels {
        match assign_levels(circuit) {
            Some(assignment) => {
                let node_of = comp_to_node(circuit);
                let levels = assignment
                    .levels
                    .iter()
                    .map(|level| level.iter().map(|&c| node_of[c.index()].unwrap()).collect())
                    .collect();
                NodeBox::Level(LevelBox { set, levels })
            }
            None => NodeBox::Event(EventBox { set }),
        }
    } else {
        NodeBox::Event(EventBox { set })
    };

    let inputs = port_infos(circuit, &circuit.inputs);
    let outputs = port_infos(circuit, &circuit.outputs);
    let spontaneous = !node_box.set().spontaneous.is_empty();
    let default_signals = settle_defaults(&node_box);

    let mut ty = ChipType {
        label: circuit.name.clone(),
        inputs,
        outputs,
        node_box,
        default_signals,
        spontaneous,
        fingerprint: [0; 32],
    };
    ty.fingerprint = fingerprint(&ty.canonical_json());
    Arc::new(ty)
}

/// SHA-256 of the canonical JSON dump.
pub fn fingerprint(canonical_json: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

// ── Internal compiler ───────────────────────────────────────────────────────

/// Node index per component (Output markers carry none).
fn comp_to_node(circuit: &Circuit) -> Vec<Option<NodeId>> {
    let mut node_of = Vec::with_capacity(circuit.components.len());
    let mut next = 0u32;
    for comp in &circuit.components {
        if matches!(comp.kind, CompKind::Output { .. }) {
            node_of.push(None);
        } else {
            node_of.push(Some(NodeId(next)));
            next += 1;
        }
    }
    node_of
}

struct Compiler<'a> {
    circuit: &'a Circuit,
    chips: &'a HashMap<String, Arc<ChipType>>,
    node_of: Vec<Option<NodeId>>,
    /// First output address per component (`u32::MAX` for output markers).
    out_base: Vec<u32>,
    /// Nested region offset per component (chip instances only).
    inner_offset: Vec<u32>,
    own_width: u32,
    width: u32,
    nodes: Vec<Node>,
}

impl<'a> Compiler<'a> {
    fn new(circuit: &'a Circuit, chips: &'a HashMap<String, Arc<ChipType>>) -> Self {
        Compiler {
            circuit,
            chips,
            node_of: comp_to_node(circuit),
            out_base: Vec::new(),
            inner_offset: Vec::new(),
            own_width: 0,
            width: 0,
            nodes: Vec::new(),
        }
    }

    fn inner_type(&self, name: &str) -> &Arc<ChipType> {
        self.chips
            .get(name)
            .expect("nested chip compiled before its parent")
    }

    /// One address per output, assigned contiguously in component order;
    /// nested chip regions are appended after every own slot so the own
    /// region stays contiguous at `[0, own_width)`.
    fn allocate_addresses(&mut self) {
        let mut next = 0u32;
        for comp in &self.circuit.components {
            if matches!(comp.kind, CompKind::Output { .. }) {
                self.out_base.push(u32::MAX);
            } else {
                self.out_base.push(next);
                next += comp.kind.output_count();
            }
        }
        self.own_width = next;
        for comp in &self.circuit.components {
            if let CompKind::Chip { name, .. } = &comp.kind {
                self.inner_offset.push(next);
                next += self.inner_type(name).node_box.set().width;
            } else {
                self.inner_offset.push(u32::MAX);
            }
        }
        self.width = next;
    }

    fn pin_addr(&self, pin: Option<PinRef>) -> Addr {
        match pin {
            Some(p) => Addr(self.out_base[p.comp.index()] + p.pin),
            None => NO_SOURCE,
        }
    }

    fn build_nodes(&mut self) {
        for (i, comp) in self.circuit.components.iter().enumerate() {
            let base = self.out_base[i];
            let node = match &comp.kind {
                CompKind::Output { .. } => continue,
                CompKind::Input { width, .. } => Node::Start {
                    addr: Addr(base),
                    mask: mask(*width),
                    marks: vec![],
                },
                CompKind::Const { value, width } => Node::Const {
                    addr: Addr(base),
                    value: value & mask(*width),
                },
                CompKind::Gate { op, width } => Node::Gate {
                    op: *op,
                    mask: mask(*width),
                    inputs: comp.inputs.iter().map(|&p| self.pin_addr(p)).collect(),
                    addr: Addr(base),
                    marks: vec![],
                },
                CompKind::Unary { op, width } => Node::Unary {
                    op: *op,
                    mask: mask(*width),
                    input: self.pin_addr(comp.inputs[0]),
                    addr: Addr(base),
                    marks: vec![],
                },
                CompKind::Pack { widths } => {
                    let mut shift = 0;
                    let fields = comp
                        .inputs
                        .iter()
                        .zip(widths)
                        .map(|(&p, &w)| {
                            let field = PackField {
                                src: self.pin_addr(p),
                                width: w,
                                shift,
                            };
                            shift += w;
                            field
                        })
                        .collect();
                    Node::Pack {
                        fields,
                        addr: Addr(base),
                        marks: vec![],
                    }
                }
                CompKind::Unpack { widths } => {
                    let mut shift = 0;
                    let fields = widths
                        .iter()
                        .enumerate()
                        .map(|(j, &w)| {
                            let field = UnpackField {
                                addr: Addr(base + j as u32),
                                width: w,
                                shift,
                            };
                            shift += w;
                            field
                        })
                        .collect();
                    Node::Unpack {
                        input: self.pin_addr(comp.inputs[0]),
                        fields,
                        marks: vec![],
                    }
                }
                CompKind::Clock => Node::Clock {
                    addr: Addr(base),
                    marks: vec![],
                },
                CompKind::Chip { name, .. } => {
                    let ty = self.inner_type(name).clone();
                    let outputs = (0..ty.outputs.len() as u32)
                        .map(|k| Addr(base + k))
                        .collect();
                    Node::Chip {
                        ty,
                        inputs: comp.inputs.iter().map(|&p| self.pin_addr(p)).collect(),
                        outputs,
                        inner_offset: self.inner_offset[i],
                        marks: vec![],
                    }
                }
            };
            self.nodes.push(node);
        }
    }

    /// A node's mark list is the set of nodes reading any of its outputs.
    fn derive_marks(&mut self) {
        let mut owner: Vec<NodeId> = vec![NodeId(u32::MAX); self.own_width as usize];
        for (i, node) in self.nodes.iter().enumerate() {
            for addr in node.output_addrs() {
                owner[addr.index()] = NodeId(i as u32);
            }
        }
        let mut marks: Vec<Vec<NodeId>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for addr in node.input_addrs() {
                let src = owner[addr.index()];
                marks[src.index()].push(NodeId(i as u32));
            }
        }
        for (node, mut list) in self.nodes.iter_mut().zip(marks.into_iter()) {
            list.sort();
            list.dedup();
            node.set_marks(list);
        }
    }

    fn into_node_set(self) -> NodeSet {
        let inputs = self
            .circuit
            .inputs
            .iter()
            .map(|&c| self.node_of[c.index()].unwrap())
            .collect();
        let outputs = self
            .circuit
            .outputs
            .iter()
            .map(|&c| self.pin_addr(self.circuit.components[c.index()].inputs[0]))
            .collect();
        let spontaneous = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| match n {
                Node::Clock { .. } => true,
                Node::Chip { ty, .. } => ty.spontaneous,
                _ => false,
            })
            .map(|(i, _)| NodeId(i as u32))
            .collect();
        NodeSet {
            nodes: self.nodes,
            inputs,
            outputs,
            spontaneous,
            own_width: self.own_width,
            width: self.width,
        }
    }
}

fn port_infos(circuit: &Circuit, ids: &[crate::circuit::CompId]) -> Vec<PortInfo> {
    ids.iter()
        .map(|&c| match &circuit.components[c.index()].kind {
            CompKind::Input { name, width } | CompKind::Output { name, width } => PortInfo {
                name: name.clone(),
                width: *width,
            },
            _ => unreachable!("boundary list entry is not a boundary marker"),
        })
        .collect()
}

/// The all-inputs-unset snapshot: zeros, constants written, nested regions
/// copied from their own defaults, then one full settle.
fn settle_defaults(node_box: &NodeBox) -> Vec<Signal> {
    let set = node_box.set();
    let mut signals = vec![0u64; set.width as usize];
    for node in &set.nodes {
        match node {
            Node::Const { addr, value } => signals[addr.index()] = *value,
            Node::Chip {
                ty, inner_offset, ..
            } => {
                let at = *inner_offset as usize;
                let inner_width = ty.node_box.set().width as usize;
                signals[at..at + inner_width].copy_from_slice(&ty.default_signals);
            }
            _ => {}
        }
    }
    let mut wave = ActiveStack::new();
    node_box.settle(&mut signals, 0, &mut wave);
    signals
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for compiler postconditions.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

/// Level-table postconditions (L1-L2).
#[derive(Debug, Clone)]
pub struct LevelCert {
    /// L1: every leveled node's inputs resolve to strictly lower levels
    /// (seeds count as level −1).
    pub l1_inputs_strictly_lower: bool,
    /// L2: every node needing evaluation appears exactly once in the table.
    pub l2_each_node_once: bool,
}

impl StageCert for LevelCert {
    fn all_pass(&self) -> bool {
        self.l1_inputs_strictly_lower && self.l2_each_node_once
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("L1_inputs_strictly_lower", self.l1_inputs_strictly_lower),
            ("L2_each_node_once", self.l2_each_node_once),
        ]
    }
}

/// Verify level-table postconditions for a level-compiled box.
pub fn verify_levels(lbox: &LevelBox) -> LevelCert {
    let set = &lbox.set;
    let owner = addr_owner(set);

    let mut level_of: HashMap<NodeId, i32> = HashMap::new();
    let mut duplicated = false;
    for (lvl, ids) in lbox.levels.iter().enumerate() {
        for &id in ids {
            if level_of.insert(id, lvl as i32).is_some() {
                duplicated = true;
            }
        }
    }

    let mut l1 = true;
    for (lvl, ids) in lbox.levels.iter().enumerate() {
        for &id in ids {
            for addr in set.nodes[id.index()].input_addrs() {
                let src = owner[addr.index()];
                let src_level = level_of.get(&src).copied().unwrap_or(-1);
                if src_level >= lvl as i32 {
                    l1 = false;
                }
            }
        }
    }

    let mut l2 = !duplicated;
    for (i, node) in set.nodes.iter().enumerate() {
        let needs_level = !matches!(
            node,
            Node::Start { .. } | Node::Const { .. } | Node::Clock { .. } | Node::Chip { .. }
        ) && !node.input_addrs().is_empty();
        if needs_level != level_of.contains_key(&NodeId(i as u32)) {
            l2 = false;
        }
    }

    LevelCert {
        l1_inputs_strictly_lower: l1,
        l2_each_node_once: l2,
    }
}

/// Addressing postconditions (A1-A2).
#[derive(Debug, Clone)]
pub struct AddressCert {
    /// A1: every own slot is written by exactly one node output.
    pub a1_no_overlap: bool,
    /// A2: every reader of a slot appears in the writer's mark list.
    pub a2_marks_cover_readers: bool,
}

impl StageCert for AddressCert {
    fn all_pass(&self) -> bool {
        self.a1_no_overlap && self.a2_marks_cover_readers
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("A1_no_overlap", self.a1_no_overlap),
            ("A2_marks_cover_readers", self.a2_marks_cover_readers),
        ]
    }
}

/// Verify addressing postconditions for any compiled box.
pub fn verify_addressing(set: &NodeSet) -> AddressCert {
    let mut writes = vec![0usize; set.own_width as usize];
    for node in &set.nodes {
        for addr in node.output_addrs() {
            writes[addr.index()] += 1;
        }
    }
    let a1 = writes.iter().all(|&c| c == 1);

    let owner = addr_owner(set);
    let mut a2 = true;
    for (i, node) in set.nodes.iter().enumerate() {
        for addr in node.input_addrs() {
            let src = owner[addr.index()];
            if !set.nodes[src.index()].marks().contains(&NodeId(i as u32)) {
                a2 = false;
            }
        }
    }

    AddressCert {
        a1_no_overlap: a1,
        a2_marks_cover_readers: a2,
    }
}

fn addr_owner(set: &NodeSet) -> Vec<NodeId> {
    let mut owner = vec![NodeId(u32::MAX); set.own_width as usize];
    for (i, node) in set.nodes.iter().enumerate() {
        for addr in node.output_addrs() {
            owner[addr.index()] = NodeId(i as u32);
        }
    }
    owner
}

// ── Tests ───────────────────────────────────────────────────────────────────
