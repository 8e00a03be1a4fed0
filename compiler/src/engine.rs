// engine.rs — Execution strategies for a compiled chip
//
// A `NodeBox` is the compiled representation of a chip's internals: an
// ordered node sequence plus output wiring and spontaneous-node bookkeeping,
// behind one of two interchangeable strategies. `EventBox` is the general
// engine: cycle-tolerant, iterative to a fixed point. `LevelBox` is the
// compiled fast path: one linear pass in precomputed topological level
// order. The level compiler decides which one a chip gets.
//
// Preconditions: the signal slice covers `[offset, offset + width)`; the
//                input vector length matches the box's input map.
// Postconditions: `update` leaves the region fully settled and returns the
//                 external output values read through the output map.
// Failure modes: none at runtime; waves are bounded by a round cap.
// Side effects: mutates the shared signal array.

use std::fmt;

use crate::active::ActiveStack;
use crate::node::{read, Addr, Node, NodeId, Signal};

// ── Shared node set ──────────────────────────────────────────────────────

/// The strategy-independent contents of a compiled box. Immutable once
/// built.
#[derive(Debug, Clone)]
pub struct NodeSet {
    /// Ordered node sequence; `NodeId` indexes into it.
    pub nodes: Vec<Node>,
    /// Start node per external input slot, in port order.
    pub inputs: Vec<NodeId>,
    /// Resolved address per external output, in port order.
    pub outputs: Vec<Addr>,
    /// Nodes that can change state without new external input: clocks, and
    /// nested chips that are themselves spontaneous.
    pub spontaneous: Vec<NodeId>,
    /// Slots owned by this box's own nodes; nested regions start here.
    pub own_width: u32,
    /// Total slots including every nested sub-region, recursively.
    pub width: u32,
}

impl NodeSet {
    /// Read the external outputs through the output map.
    pub fn read_outputs(&self, signals: &[Signal], offset: usize) -> Vec<Signal> {
        self.outputs
            .iter()
            .map(|&a| read(signals, offset, a))
            .collect()
    }

    /// Current values of the external input slots.
    pub fn current_inputs(&self, signals: &[Signal], offset: usize) -> Vec<Signal> {
        self.inputs
            .iter()
            .map(|&id| match &self.nodes[id.index()] {
                Node::Start { addr, .. } => read(signals, offset, *addr),
                _ => unreachable!("input map entry is not a start node"),
            })
            .collect()
    }

    /// Write one external input to its boundary address, masked to the port
    /// width. Returns the start node's marks if the value actually changed.
    fn write_input(&self, signals: &mut [Signal], offset: usize, slot: usize, value: Signal) -> bool {
        let id = self.inputs[slot];
        match &self.nodes[id.index()] {
            Node::Start { addr, mask, .. } => {
                let v = value & mask;
                let at = offset + addr.index();
                if signals[at] == v {
                    false
                } else {
                    signals[at] = v;
                    true
                }
            }
            _ => unreachable!("input map entry is not a start node"),
        }
    }
}

// ── EventBox ─────────────────────────────────────────────────────────────

/// The general engine: seeds changed inputs, appends the spontaneous set
/// unconditionally, then drains rounds until a round produces no marks.
/// Correct for arbitrary topology, including feedback.
#[derive(Debug, Clone)]
pub struct EventBox {
    pub set: NodeSet,
}

impl EventBox {
    pub fn update(
        &self,
        signals: &mut [Signal],
        inputs: &[Signal],
        offset: usize,
        wave: &mut ActiveStack,
        tick: bool,
    ) -> Vec<Signal> {
        wave.start_inner();
        for (slot, &value) in inputs.iter().enumerate() {
            if self.set.write_input(signals, offset, slot, value) {
                wave.mark(self.set.nodes[self.set.inputs[slot].index()].marks());
            }
        }
        // Clocks and nested-spontaneous chips always get a chance to
        // re-evaluate, even with no external input change.
        for &id in &self.set.spontaneous {
            wave.mark_one(id);
        }
        self.drain(signals, offset, wave, tick);
        wave.finish_inner();
        self.set.read_outputs(signals, offset)
    }

    /// Full settle: mark every node and run to the fixed point. Used to
    /// compute default snapshots and after instance migration.
    pub fn settle(&self, signals: &mut [Signal], offset: usize, wave: &mut ActiveStack) {
        wave.start_inner();
        for i in 0..self.set.nodes.len() {
            wave.mark_one(NodeId(i as u32));
        }
        self.drain(signals, offset, wave, false);
        wave.finish_inner();
    }

    fn drain(&self, signals: &mut [Signal], offset: usize, wave: &mut ActiveStack, tick: bool) {
        // The change gate alone does not bound oscillating feedback, so a
        // wave is capped at one round per node; remaining marks are dropped
        // deterministically and the last written values stand.
        let cap = self.set.nodes.len();
        let mut rounds = 0;
        while wave.next_round() {
            rounds += 1;
            if rounds > cap {
                while wave.next().is_some() {}
                continue;
            }
            while let Some(id) = wave.next() {
                let node = &self.set.nodes[id.index()];
                if node.update(signals, offset, wave, tick) {
                    wave.mark(node.marks());
                }
            }
        }
    }
}

// ── LevelBox ─────────────────────────────────────────────────────────────

/// The compiled fast path: every node executes exactly once per update, in
/// precomputed level order. Because levels guarantee all of a node's inputs
/// live at strictly lower levels, one linear pass yields a settled state —
/// no fixed-point loop, no active-set bookkeeping at run time.
#[derive(Debug, Clone)]
pub struct LevelBox {
    pub set: NodeSet,
    /// One node-index list per level, level 0 first. Seed nodes (inputs,
    /// constants, clocks) are not materialized.
    pub levels: Vec<Vec<NodeId>>,
}

impl LevelBox {
    pub fn update(
        &self,
        signals: &mut [Signal],
        inputs: &[Signal],
        offset: usize,
        wave: &mut ActiveStack,
        tick: bool,
    ) -> Vec<Signal> {
        for (slot, &value) in inputs.iter().enumerate() {
            self.set.write_input(signals, offset, slot, value);
        }
        if tick {
            for &id in &self.set.spontaneous {
                self.set.nodes[id.index()].update(signals, offset, wave, true);
            }
        }
        self.run_pass(signals, offset, wave);
        self.set.read_outputs(signals, offset)
    }

    /// Full settle: a level pass is already a full evaluation.
    pub fn settle(&self, signals: &mut [Signal], offset: usize, wave: &mut ActiveStack) {
        self.run_pass(signals, offset, wave);
    }

    fn run_pass(&self, signals: &mut [Signal], offset: usize, wave: &mut ActiveStack) {
        for level in &self.levels {
            for &id in level {
                self.set.nodes[id.index()].update(signals, offset, wave, false);
            }
        }
    }
}

// ── NodeBox ──────────────────────────────────────────────────────────────

/// A compiled chip body behind one of the two strategies.
#[derive(Debug, Clone)]
pub enum NodeBox {
    Event(EventBox),
    Level(LevelBox),
}

impl NodeBox {
    /// Apply new external inputs (and/or a clock tick) and propagate until
    /// the region is settled, returning the external outputs.
    pub fn update(
        &self,
        signals: &mut [Signal],
        inputs: &[Signal],
        offset: usize,
        wave: &mut ActiveStack,
        tick: bool,
    ) -> Vec<Signal> {
        match self {
            NodeBox::Event(b) => b.update(signals, inputs, offset, wave, tick),
            NodeBox::Level(b) => b.update(signals, inputs, offset, wave, tick),
        }
    }

    /// Evaluate everything once from the current state.
    pub fn settle(&self, signals: &mut [Signal], offset: usize, wave: &mut ActiveStack) {
        match self {
            NodeBox::Event(b) => b.settle(signals, offset, wave),
            NodeBox::Level(b) => b.settle(signals, offset, wave),
        }
    }

    pub fn set(&self) -> &NodeSet {
        match self {
            NodeBox::Event(b) => &b.set,
            NodeBox::Level(b) => &b.set,
        }
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            NodeBox::Event(_) => "event",
            NodeBox::Level(_) => "level",
        }
    }

    pub fn levels(&self) -> Option<&[Vec<NodeId>]> {
        match self {
            NodeBox::Event(_) => None,
            NodeBox::Level(b) => Some(&b.levels),
        }
    }
}

impl fmt::Display for NodeBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.set();
        for (i, node) in set.nodes.iter().enumerate() {
            writeln!(f, "  n{i}: {node}")?;
        }
        if let Some(levels) = self.levels() {
            for (lvl, ids) in levels.iter().enumerate() {
                let names: Vec<String> = ids.iter().map(|id| format!("n{}", id.0)).collect();
                writeln!(f, "  level {lvl}: {}", names.join(" "))?;
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{mask, GateOp, NO_SOURCE};

    /// A hand-built 2-input AND box: starts at @0/@1, gate at @2.
    fn and_set() -> NodeSet {
        NodeSet {
            nodes: vec![
                Node::Start {
                    addr: Addr(0),
                    mask: mask(1),
                    marks: vec![NodeId(2)],
                },
                Node::Start {
                    addr: Addr(1),
                    mask: mask(1),
                    marks: vec![NodeId(2)],
                },
                Node::Gate {
                    op: GateOp::And,
                    mask: mask(1),
                    inputs: vec![Addr(0), Addr(1)],
                    addr: Addr(2),
                    marks: vec![],
                },
            ],
            inputs: vec![NodeId(0), NodeId(1)],
            outputs: vec![Addr(2)],
            spontaneous: vec![],
            own_width: 3,
            width: 3,
        }
    }

    #[test]
    fn event_box_and_scenario() {
        // Default [0,0,0]; update [1,1] gives output 1 and signals [1,1,1];
        // update [1,0] gives output 0 with exactly one mark round.
        let ebox = EventBox { set: and_set() };
        let mut signals = vec![0, 0, 0];

        let mut wave = ActiveStack::new();
        let outs = ebox.update(&mut signals, &[1, 1], 0, &mut wave, false);
        assert_eq!(outs, vec![1]);
        assert_eq!(signals, vec![1, 1, 1]);

        let mut wave = ActiveStack::new();
        let outs = ebox.update(&mut signals, &[1, 0], 0, &mut wave, false);
        assert_eq!(outs, vec![0]);
        assert_eq!(signals, vec![1, 0, 0]);
        assert_eq!(wave.rounds(), 1, "one mark round for one gate");
    }

    #[test]
    fn event_box_idempotent_update() {
        let ebox = EventBox { set: and_set() };
        let mut signals = vec![0, 0, 0];
        let mut wave = ActiveStack::new();
        ebox.update(&mut signals, &[1, 1], 0, &mut wave, false);

        let before = signals.clone();
        let mut wave = ActiveStack::new();
        let outs = ebox.update(&mut signals, &[1, 1], 0, &mut wave, false);
        assert_eq!(outs, vec![1]);
        assert_eq!(signals, before, "settled update must not write");
        assert_eq!(wave.rounds(), 0, "settled update must not mark");
    }

    #[test]
    fn level_box_matches_event_box() {
        let lbox = LevelBox {
            set: and_set(),
            levels: vec![vec![NodeId(2)]],
        };
        let ebox = EventBox { set: and_set() };

        for inputs in [[0, 0], [0, 1], [1, 0], [1, 1]] {
            let mut sig_l = vec![0, 0, 0];
            let mut sig_e = vec![0, 0, 0];
            let mut wave = ActiveStack::new();
            let out_l = lbox.update(&mut sig_l, &inputs, 0, &mut wave, false);
            let mut wave = ActiveStack::new();
            let out_e = ebox.update(&mut sig_e, &inputs, 0, &mut wave, false);
            assert_eq!(out_l, out_e, "inputs {inputs:?}");
            assert_eq!(sig_l, sig_e, "inputs {inputs:?}");
        }
    }

    #[test]
    fn event_box_halts_on_combinational_loop() {
        // q = not(q): a synthetic oscillator. The wave must still halt.
        let set = NodeSet {
            nodes: vec![Node::Unary {
                op: crate::node::UnaryOp::Not,
                mask: mask(1),
                input: Addr(0),
                addr: Addr(0),
                marks: vec![NodeId(0)],
            }],
            inputs: vec![],
            outputs: vec![Addr(0)],
            spontaneous: vec![],
            own_width: 1,
            width: 1,
        };
        let ebox = EventBox { set };
        let mut signals = vec![0];
        let mut wave = ActiveStack::new();
        wave.start_inner();
        wave.mark_one(NodeId(0));
        ebox.drain(&mut signals, 0, &mut wave, false);
        wave.finish_inner();
        // Capped: one round per node, remaining marks dropped.
        assert!(wave.rounds() <= 2);
        assert!(signals[0] <= 1);
    }

    #[test]
    fn input_values_masked_to_port_width() {
        let ebox = EventBox { set: and_set() };
        let mut signals = vec![0, 0, 0];
        let mut wave = ActiveStack::new();
        // 0b11 masked to width 1 → 1.
        let outs = ebox.update(&mut signals, &[0b11, 1], 0, &mut wave, false);
        assert_eq!(signals[0], 1);
        assert_eq!(outs, vec![1]);
    }

    #[test]
    fn unconnected_output_reads_zero() {
        let mut set = and_set();
        set.outputs.push(NO_SOURCE);
        let ebox = EventBox { set };
        let mut signals = vec![0, 0, 0];
        let mut wave = ActiveStack::new();
        let outs = ebox.update(&mut signals, &[1, 1], 0, &mut wave, false);
        assert_eq!(outs, vec![1, 0]);
    }

    #[test]
    fn current_inputs_reflect_stored_state() {
        let ebox = EventBox { set: and_set() };
        let mut signals = vec![0, 0, 0];
        let mut wave = ActiveStack::new();
        ebox.update(&mut signals, &[1, 0], 0, &mut wave, false);
        assert_eq!(ebox.set.current_inputs(&signals, 0), vec![1, 0]);
    }
}
