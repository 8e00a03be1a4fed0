// node.rs — Compiled node variants and their update semantics
//
// A `Node` is the smallest unit of compiled behavior inside a chip: gate,
// splitter, constant, clock, nested-chip instance, or boundary marker. Nodes
// never hold references to other nodes — only integer addresses into the
// owning chip's flat signal array, which is what makes instances cheap to
// duplicate and nest.
//
// Preconditions: addresses were assigned by the compiler and are in bounds
//                for the signal slice (after adding the region offset).
// Postconditions: `update` writes an output slot only when the recomputed
//                 value differs from the stored one, and reports the change.
// Failure modes: none at runtime; invalid configurations are rejected at
//                elaboration time.
// Side effects: mutates the shared signal array.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::active::ActiveStack;
use crate::chip::ChipType;

/// A bus value. Buses are 1–64 bits wide; all arithmetic is masked to width.
pub type Signal = u64;

/// A slot in a chip's flat signal array, relative to the owning region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Addr(pub u32);

/// Sentinel for an unconnected input. Always reads as 0.
pub const NO_SOURCE: Addr = Addr(u32::MAX);

impl Addr {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_none(self) -> bool {
        self == NO_SOURCE
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "@-")
        } else {
            write!(f, "@{}", self.0)
        }
    }
}

/// Index of a node within its owning box's node sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bit mask selecting the low `width` bits.
pub fn mask(width: u32) -> Signal {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Read a signal slot; the unconnected sentinel reads as 0.
pub fn read(signals: &[Signal], offset: usize, addr: Addr) -> Signal {
    if addr.is_none() {
        0
    } else {
        signals[offset + addr.index()]
    }
}

fn write_if_changed(signals: &mut [Signal], offset: usize, addr: Addr, value: Signal) -> bool {
    let slot = offset + addr.index();
    if signals[slot] == value {
        false
    } else {
        signals[slot] = value;
        true
    }
}

// ── Boolean functions ────────────────────────────────────────────────────

/// Table-selected boolean function of a multi-input gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOp {
    And,
    Or,
    Xor,
    Nand,
    Nor,
    Xnor,
}

impl GateOp {
    pub fn name(self) -> &'static str {
        match self {
            GateOp::And => "and",
            GateOp::Or => "or",
            GateOp::Xor => "xor",
            GateOp::Nand => "nand",
            GateOp::Nor => "nor",
            GateOp::Xnor => "xnor",
        }
    }

    pub fn from_name(name: &str) -> Option<GateOp> {
        match name {
            "and" => Some(GateOp::And),
            "or" => Some(GateOp::Or),
            "xor" => Some(GateOp::Xor),
            "nand" => Some(GateOp::Nand),
            "nor" => Some(GateOp::Nor),
            "xnor" => Some(GateOp::Xnor),
            _ => None,
        }
    }

    /// Fold the input values with the selected function, masked to width.
    pub fn eval(self, mut vals: impl Iterator<Item = Signal>, mask: Signal) -> Signal {
        let first = vals.next().unwrap_or(0);
        let folded = match self {
            GateOp::And | GateOp::Nand => vals.fold(first, |a, b| a & b),
            GateOp::Or | GateOp::Nor => vals.fold(first, |a, b| a | b),
            GateOp::Xor | GateOp::Xnor => vals.fold(first, |a, b| a ^ b),
        };
        let value = match self {
            GateOp::Nand | GateOp::Nor | GateOp::Xnor => !folded,
            _ => folded,
        };
        value & mask
    }
}

/// Single-input function: identity buffer or bitwise complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Buf,
    Not,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Buf => "buf",
            UnaryOp::Not => "not",
        }
    }

    pub fn from_name(name: &str) -> Option<UnaryOp> {
        match name {
            "buf" => Some(UnaryOp::Buf),
            "not" => Some(UnaryOp::Not),
            _ => None,
        }
    }

    pub fn eval(self, value: Signal, mask: Signal) -> Signal {
        match self {
            UnaryOp::Buf => value & mask,
            UnaryOp::Not => !value & mask,
        }
    }
}

// ── Splitter fields ──────────────────────────────────────────────────────

/// One packed sub-field: read `width` bits from `src`, place at `shift`.
#[derive(Debug, Clone)]
pub struct PackField {
    pub src: Addr,
    pub width: u32,
    pub shift: u32,
}

/// One unpacked sub-field: extract `width` bits at `shift` into `addr`.
/// Fields are least-significant first.
#[derive(Debug, Clone)]
pub struct UnpackField {
    pub addr: Addr,
    pub width: u32,
    pub shift: u32,
}

// ── Node ─────────────────────────────────────────────────────────────────

/// One compiled unit of behavior inside a chip.
///
/// Every node owns fixed, non-overlapping addresses (one per output) in the
/// owning box's signal region. Nodes that can change their output also carry
/// a mark list: the indices of downstream nodes to reconsider on change.
#[derive(Debug, Clone)]
pub enum Node {
    /// Fixed value, written into the default snapshot, never re-evaluated.
    Const { addr: Addr, value: Signal },
    /// A template's own external input slot. Its value is written by the
    /// owning box when external inputs arrive.
    Start {
        addr: Addr,
        mask: Signal,
        marks: Vec<NodeId>,
    },
    /// Multi-input boolean gate.
    Gate {
        op: GateOp,
        mask: Signal,
        inputs: Vec<Addr>,
        addr: Addr,
        marks: Vec<NodeId>,
    },
    /// Buffer or complement.
    Unary {
        op: UnaryOp,
        mask: Signal,
        input: Addr,
        addr: Addr,
        marks: Vec<NodeId>,
    },
    /// Packs N sub-fields into one wider value at fixed bit offsets.
    Pack {
        fields: Vec<PackField>,
        addr: Addr,
        marks: Vec<NodeId>,
    },
    /// Unpacks one wide value into N fields by fixed bit widths.
    Unpack {
        input: Addr,
        fields: Vec<UnpackField>,
        marks: Vec<NodeId>,
    },
    /// Toggles on an external tick stimulus; always spontaneous.
    Clock { addr: Addr, marks: Vec<NodeId> },
    /// Delegates to a nested chip's box at a private sub-region of the same
    /// flat signal array.
    Chip {
        ty: Arc<ChipType>,
        inputs: Vec<Addr>,
        outputs: Vec<Addr>,
        inner_offset: u32,
        marks: Vec<NodeId>,
    },
}

impl Node {
    /// Recompute this node's outputs from the current signal state.
    ///
    /// Writes an output slot only when the new value differs from the stored
    /// one, and returns whether anything changed. The caller is responsible
    /// for marking this node's dependents on change — except for nested
    /// chips, whose internal propagation runs in an isolated inner wave.
    pub fn update(
        &self,
        signals: &mut [Signal],
        offset: usize,
        wave: &mut ActiveStack,
        tick: bool,
    ) -> bool {
        match self {
            Node::Const { .. } => false,
            Node::Start { .. } => false,
            Node::Gate {
                op,
                mask,
                inputs,
                addr,
                ..
            } => {
                let value = op.eval(inputs.iter().map(|&a| read(signals, offset, a)), *mask);
                write_if_changed(signals, offset, *addr, value)
            }
            Node::Unary {
                op,
                mask,
                input,
                addr,
                ..
            } => {
                let value = op.eval(read(signals, offset, *input), *mask);
                write_if_changed(signals, offset, *addr, value)
            }
            Node::Pack { fields, addr, .. } => {
                let mut value = 0;
                for f in fields {
                    value |= (read(signals, offset, f.src) & mask(f.width)) << f.shift;
                }
                write_if_changed(signals, offset, *addr, value)
            }
            Node::Unpack { input, fields, .. } => {
                let value = read(signals, offset, *input);
                let mut changed = false;
                for f in fields {
                    let field = (value >> f.shift) & mask(f.width);
                    changed |= write_if_changed(signals, offset, f.addr, field);
                }
                changed
            }
            Node::Clock { addr, .. } => {
                if !tick {
                    return false;
                }
                let toggled = !read(signals, offset, *addr) & 1;
                write_if_changed(signals, offset, *addr, toggled)
            }
            Node::Chip {
                ty,
                inputs,
                outputs,
                inner_offset,
                ..
            } => {
                let values: Vec<Signal> =
                    inputs.iter().map(|&a| read(signals, offset, a)).collect();
                let inner = ty.node_box.update(
                    signals,
                    &values,
                    offset + *inner_offset as usize,
                    wave,
                    tick,
                );
                let mut changed = false;
                for (&addr, &value) in outputs.iter().zip(inner.iter()) {
                    changed |= write_if_changed(signals, offset, addr, value);
                }
                changed
            }
        }
    }

    /// Downstream nodes to reconsider when this node's output changes.
    pub fn marks(&self) -> &[NodeId] {
        match self {
            Node::Const { .. } => &[],
            Node::Start { marks, .. }
            | Node::Gate { marks, .. }
            | Node::Unary { marks, .. }
            | Node::Pack { marks, .. }
            | Node::Unpack { marks, .. }
            | Node::Clock { marks, .. }
            | Node::Chip { marks, .. } => marks,
        }
    }

    /// Replace the mark list (compiler use only).
    pub fn set_marks(&mut self, new_marks: Vec<NodeId>) {
        match self {
            Node::Const { .. } => {}
            Node::Start { marks, .. }
            | Node::Gate { marks, .. }
            | Node::Unary { marks, .. }
            | Node::Pack { marks, .. }
            | Node::Unpack { marks, .. }
            | Node::Clock { marks, .. }
            | Node::Chip { marks, .. } => *marks = new_marks,
        }
    }

    /// Addresses this node writes (one per output).
    pub fn output_addrs(&self) -> Vec<Addr> {
        match self {
            Node::Const { addr, .. }
            | Node::Start { addr, .. }
            | Node::Gate { addr, .. }
            | Node::Unary { addr, .. }
            | Node::Pack { addr, .. }
            | Node::Clock { addr, .. } => vec![*addr],
            Node::Unpack { fields, .. } => fields.iter().map(|f| f.addr).collect(),
            Node::Chip { outputs, .. } => outputs.clone(),
        }
    }

    /// Addresses this node reads (excluding the unconnected sentinel).
    pub fn input_addrs(&self) -> Vec<Addr> {
        let all: Vec<Addr> = match self {
            Node::Const { .. } | Node::Start { .. } | Node::Clock { .. } => Vec::new(),
            Node::Gate { inputs, .. } | Node::Chip { inputs, .. } => inputs.clone(),
            Node::Unary { input, .. } | Node::Unpack { input, .. } => vec![*input],
            Node::Pack { fields, .. } => fields.iter().map(|f| f.src).collect(),
        };
        all.into_iter().filter(|a| !a.is_none()).collect()
    }

    /// Structural description used for the canonical chip dump and the
    /// fingerprint. Nested chips contribute their fingerprint, not their
    /// full node set.
    pub fn dump(&self) -> serde_json::Value {
        match self {
            Node::Const { addr, value } => json!({
                "kind": "const", "addr": addr.0, "value": value,
            }),
            Node::Start { addr, mask, .. } => json!({
                "kind": "start", "addr": addr.0, "mask": mask,
            }),
            Node::Gate {
                op,
                mask,
                inputs,
                addr,
                ..
            } => json!({
                "kind": "gate", "op": op, "mask": mask,
                "inputs": inputs.iter().map(|a| a.0).collect::<Vec<_>>(),
                "addr": addr.0,
            }),
            Node::Unary {
                op,
                mask,
                input,
                addr,
                ..
            } => json!({
                "kind": "unary", "op": op, "mask": mask,
                "input": input.0, "addr": addr.0,
            }),
            Node::Pack { fields, addr, .. } => json!({
                "kind": "pack",
                "fields": fields
                    .iter()
                    .map(|f| json!({"src": f.src.0, "width": f.width, "shift": f.shift}))
                    .collect::<Vec<_>>(),
                "addr": addr.0,
            }),
            Node::Unpack { input, fields, .. } => json!({
                "kind": "unpack", "input": input.0,
                "fields": fields
                    .iter()
                    .map(|f| json!({"addr": f.addr.0, "width": f.width, "shift": f.shift}))
                    .collect::<Vec<_>>(),
            }),
            Node::Clock { addr, .. } => json!({
                "kind": "clock", "addr": addr.0,
            }),
            Node::Chip {
                ty,
                inputs,
                outputs,
                inner_offset,
                ..
            } => json!({
                "kind": "chip", "chip": ty.label, "fingerprint": ty.fingerprint_hex(),
                "inputs": inputs.iter().map(|a| a.0).collect::<Vec<_>>(),
                "outputs": outputs.iter().map(|a| a.0).collect::<Vec<_>>(),
                "inner_offset": inner_offset,
            }),
        }
    }
}

// ── Display ──────────────────────────────────────────────────────────────

fn fmt_addr_list(f: &mut fmt::Formatter<'_>, addrs: &[Addr]) -> fmt::Result {
    for (i, a) in addrs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Const { addr, value } => write!(f, "const {value} {addr}"),
            Node::Start { addr, .. } => write!(f, "start {addr}"),
            Node::Gate {
                op,
                mask,
                inputs,
                addr,
                ..
            } => {
                write!(f, "{}[{}] {} <- ", op.name(), mask.count_ones(), addr)?;
                fmt_addr_list(f, inputs)
            }
            Node::Unary {
                op,
                mask,
                input,
                addr,
                ..
            } => write!(f, "{}[{}] {} <- {}", op.name(), mask.count_ones(), addr, input),
            Node::Pack { fields, addr, .. } => {
                let widths: Vec<String> = fields.iter().map(|x| x.width.to_string()).collect();
                write!(f, "pack[{}] {} <- ", widths.join(","), addr)?;
                fmt_addr_list(f, &fields.iter().map(|x| x.src).collect::<Vec<_>>())
            }
            Node::Unpack { input, fields, .. } => {
                let widths: Vec<String> = fields.iter().map(|x| x.width.to_string()).collect();
                write!(f, "unpack[{}] ", widths.join(","))?;
                fmt_addr_list(f, &fields.iter().map(|x| x.addr).collect::<Vec<_>>())?;
                write!(f, " <- {input}")
            }
            Node::Clock { addr, .. } => write!(f, "clock {addr}"),
            Node::Chip {
                ty,
                inputs,
                outputs,
                inner_offset,
                ..
            } => {
                write!(f, "chip '{}' ", ty.label)?;
                fmt_addr_list(f, outputs)?;
                write!(f, " <- ")?;
                fmt_addr_list(f, inputs)?;
                write!(f, " (inner at {inner_offset})")
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
