// chip.rs — Chip templates, placed instances, and the chip library
//
// A `ChipType` is the reusable compiled template: label, port signatures,
// the compiled node box, and the default signal snapshot. A `ChipInstance`
// binds a template to a private flat signal array — including every nested
// chip region, recursively — so duplication is a value copy with no graph
// repair. The `Library` owns each chip's elaborated circuit and compiled
// template and handles rebuild cascades after edits.
//
// Preconditions: templates come from `compile::compile`.
// Postconditions: instance updates run serialized — one exclusive-access
//                 token per top-level signal array, held for the whole call.
// Failure modes: migration of a corrupted instance fails with `ChipError`,
//                fatal to that instance only.
// Side effects: none beyond instance state.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::json;

use crate::active::ActiveStack;
use crate::circuit::Circuit;
use crate::compile::{compile, fingerprint, CompileOptions};
use crate::engine::NodeBox;
use crate::node::Signal;

// ── Ports ────────────────────────────────────────────────────────────────

/// Name and bus width of one external port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub width: u32,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.width)
    }
}

// ── ChipType ─────────────────────────────────────────────────────────────

/// A reusable, named, compiled sub-circuit template.
///
/// Immutable once compiled; rebuilding a chip produces a fresh `ChipType`
/// and existing instances migrate to it.
#[derive(Debug)]
pub struct ChipType {
    pub label: String,
    pub inputs: Vec<PortInfo>,
    pub outputs: Vec<PortInfo>,
    pub node_box: NodeBox,
    /// The flat array state corresponding to all-inputs-unset.
    pub default_signals: Vec<Signal>,
    /// True if this chip can change state without new external input
    /// (it contains a clock, directly or in a nested chip).
    pub spontaneous: bool,
    /// SHA-256 of `canonical_json()`.
    pub fingerprint: [u8; 32],
}

impl ChipType {
    /// Total signal slots an instance of this chip owns, nested regions
    /// included.
    pub fn width(&self) -> usize {
        self.node_box.set().width as usize
    }

    /// Slots owned by this chip's own nodes (nested regions excluded).
    pub fn own_width(&self) -> usize {
        self.node_box.set().own_width as usize
    }

    /// Place a new instance with the default signal snapshot.
    pub fn instantiate(self: &Arc<Self>) -> ChipInstance {
        ChipInstance {
            ty: self.clone(),
            signals: Mutex::new(self.default_signals.clone()),
        }
    }

    /// Hex string of the fingerprint (64 characters).
    pub fn fingerprint_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.fingerprint {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }

    /// Canonical compact JSON describing the compiled structure. Stable
    /// independent of display formatting; input to the fingerprint. Nested
    /// chips contribute their fingerprint, not their node sets.
    pub fn canonical_json(&self) -> String {
        let set = self.node_box.set();
        let output_map: Vec<Option<u32>> = set
            .outputs
            .iter()
            .map(|a| if a.is_none() { None } else { Some(a.0) })
            .collect();
        let value = json!({
            "label": self.label,
            "strategy": self.node_box.strategy(),
            "width": set.width,
            "own_width": set.own_width,
            "inputs": self.inputs,
            "outputs": self.outputs,
            "output_map": output_map,
            "spontaneous": set.spontaneous.iter().map(|id| id.0).collect::<Vec<_>>(),
            "nodes": set.nodes.iter().map(|n| n.dump()).collect::<Vec<_>>(),
            "levels": self.node_box.levels().map(|levels| {
                levels
                    .iter()
                    .map(|l| l.iter().map(|id| id.0).collect::<Vec<_>>())
                    .collect::<Vec<_>>()
            }),
        });
        value.to_string()
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.node_box.set();
        writeln!(
            f,
            "chip '{}' ({}): {} nodes, width {} (own {})",
            self.label,
            self.node_box.strategy(),
            set.nodes.len(),
            set.width,
            set.own_width
        )?;
        writeln!(f, "  inputs: {}", fmt_ports(&self.inputs))?;
        writeln!(f, "  outputs: {}", fmt_ports(&self.outputs))?;
        write!(f, "{}", self.node_box)
    }
}

fn fmt_ports(ports: &[PortInfo]) -> String {
    if ports.is_empty() {
        return "(none)".to_string();
    }
    let parts: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
    parts.join(", ")
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Hard per-chip operational errors.
#[derive(Debug)]
pub enum ChipError {
    /// An instance's stored array no longer matches its type's layout.
    LayoutMismatch {
        chip: String,
        expected: usize,
        found: usize,
    },
    /// Rebuild of a chip the library has never seen.
    UnknownChip { name: String },
}

impl fmt::Display for ChipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipError::LayoutMismatch {
                chip,
                expected,
                found,
            } => write!(
                f,
                "instance of '{chip}' holds {found} signal slot(s), expected {expected}"
            ),
            ChipError::UnknownChip { name } => {
                write!(f, "chip '{name}' is not in the library")
            }
        }
    }
}

impl std::error::Error for ChipError {}

// ── ChipInstance ─────────────────────────────────────────────────────────

/// A placed occurrence of a chip with its own private signal state.
///
/// All state lives in one flat array guarded by a mutex: the exclusive-
/// access token serializing whole update calls against the same instance.
/// Nodes perform non-atomic read-modify-write on shared slots, so the lock
/// is held for the full duration of every call.
#[derive(Debug)]
pub struct ChipInstance {
    ty: Arc<ChipType>,
    signals: Mutex<Vec<Signal>>,
}

impl ChipInstance {
    pub fn chip(&self) -> &Arc<ChipType> {
        &self.ty
    }

    /// Apply new external input values and propagate to a settled state,
    /// returning the external outputs.
    pub fn update(&self, inputs: &[Signal]) -> Vec<Signal> {
        assert_eq!(
            inputs.len(),
            self.ty.inputs.len(),
            "instance of '{}' takes {} input(s)",
            self.ty.label,
            self.ty.inputs.len(),
        );
        let mut signals = self.signals.lock().unwrap();
        let mut wave = ActiveStack::new();
        self.ty
            .node_box
            .update(&mut signals, inputs, 0, &mut wave, false)
    }

    /// The external timing callback: advance every clock one half-period
    /// and propagate. Input values are left as they are.
    pub fn tick(&self) -> Vec<Signal> {
        let mut signals = self.signals.lock().unwrap();
        let inputs = self.ty.node_box.set().current_inputs(&signals, 0);
        let mut wave = ActiveStack::new();
        self.ty
            .node_box
            .update(&mut signals, &inputs, 0, &mut wave, true)
    }

    /// Current external output values, without propagating.
    pub fn outputs(&self) -> Vec<Signal> {
        let signals = self.signals.lock().unwrap();
        self.ty.node_box.set().read_outputs(&signals, 0)
    }

    /// Value copy of the whole signal array (persistence, tests).
    pub fn snapshot(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    /// Duplicate this instance: a value copy of the signal array. No graph
    /// repair is needed because all references are numeric addresses.
    pub fn duplicate(&self) -> ChipInstance {
        ChipInstance {
            ty: self.ty.clone(),
            signals: Mutex::new(self.snapshot()),
        }
    }

    /// Remap this instance onto a rebuilt type. Top-level signals are
    /// preserved positionally; nested regions are reset to the new default
    /// snapshot, then the whole array is settled. A best-effort recovery,
    /// not a content-preserving migration.
    pub fn migrate(&mut self, new_ty: &Arc<ChipType>) -> Result<(), ChipError> {
        let signals = self.signals.get_mut().unwrap();
        if signals.len() != self.ty.width() {
            return Err(ChipError::LayoutMismatch {
                chip: self.ty.label.clone(),
                expected: self.ty.width(),
                found: signals.len(),
            });
        }
        let mut fresh = new_ty.default_signals.clone();
        let preserved = self.ty.own_width().min(new_ty.own_width());
        fresh[..preserved].copy_from_slice(&signals[..preserved]);
        let mut wave = ActiveStack::new();
        new_ty.node_box.settle(&mut fresh, 0, &mut wave);
        *signals = fresh;
        self.ty = new_ty.clone();
        Ok(())
    }
}

// ── Library ──────────────────────────────────────────────────────────────

/// Report of a rebuild cascade.
#[derive(Debug, Default)]
pub struct RebuildReport {
    /// Chips whose template actually changed, in definition order.
    pub rebuilt: Vec<String>,
    /// Chips recompiled to an identical fingerprint (instances keep their
    /// template).
    pub unchanged: Vec<String>,
}

/// The set of defined chips: each one's elaborated circuit and compiled
/// template, in definition order.
#[derive(Debug, Default)]
pub struct Library {
    options: CompileOptions,
    circuits: Vec<Circuit>,
    index: HashMap<String, usize>,
    types: HashMap<String, Arc<ChipType>>,
}

impl Library {
    pub fn new() -> Self {
        Self::with_options(CompileOptions::default())
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Library {
            options,
            circuits: Vec::new(),
            index: HashMap::new(),
            types: HashMap::new(),
        }
    }

    /// Compile every circuit in definition order into a fresh library.
    pub fn from_circuits(circuits: Vec<Circuit>, options: CompileOptions) -> Self {
        let mut lib = Self::with_options(options);
        for circuit in circuits {
            lib.insert(circuit);
        }
        lib
    }

    /// Define a new chip (or rebuild an existing one by the same name).
    pub fn insert(&mut self, circuit: Circuit) -> Arc<ChipType> {
        let name = circuit.name.clone();
        if self.index.contains_key(&name) {
            let _ = self.rebuild(circuit);
            return self.types[&name].clone();
        }
        let ty = compile(&circuit, &self.types, &self.options);
        self.index.insert(name.clone(), self.circuits.len());
        self.circuits.push(circuit);
        self.types.insert(name, ty.clone());
        ty
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ChipType>> {
        self.types.get(name)
    }

    /// Place an instance of a defined chip.
    pub fn instantiate(&self, name: &str) -> Option<ChipInstance> {
        self.types.get(name).map(|ty| ty.instantiate())
    }

    /// Chip names in definition order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.circuits.iter().map(|c| c.name.as_str())
    }

    /// Replace a chip's circuit (the user edited its insides) and recompile
    /// it plus every dependent chip, in definition order. A recompile that
    /// lands on an identical fingerprint keeps the old template, so
    /// unrelated instances never remap. Callers migrate their instances of
    /// every chip listed in `rebuilt`.
    pub fn rebuild(&mut self, circuit: Circuit) -> Result<RebuildReport, ChipError> {
        let name = circuit.name.clone();
        let Some(&at) = self.index.get(&name) else {
            return Err(ChipError::UnknownChip { name });
        };
        self.circuits[at] = circuit;

        let mut report = RebuildReport::default();
        let mut changed: HashSet<String> = HashSet::new();

        for i in at..self.circuits.len() {
            let cname = self.circuits[i].name.clone();
            let affected =
                i == at || changed.iter().any(|dep| self.circuits[i].instantiates(dep));
            if !affected {
                continue;
            }
            let new_ty = compile(&self.circuits[i], &self.types, &self.options);
            let old_fp = self.types[&cname].fingerprint;
            if old_fp == new_ty.fingerprint {
                report.unchanged.push(cname);
            } else {
                self.types.insert(cname.clone(), new_ty);
                changed.insert(cname.clone());
                report.rebuilt.push(cname);
            }
        }
        Ok(report)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::elaborate;
    use crate::diag::DiagLevel;

    fn library(source: &str) -> Library {
        let parse_result = crate::parser::parse(source);
        assert!(
            parse_result.errors.is_empty(),
            "parse errors: {:?}",
            parse_result.errors
        );
        let netlist = parse_result.netlist.expect("parse failed");
        let result = elaborate(&netlist);
        assert!(
            result
                .diagnostics
                .iter()
                .all(|d| d.level != DiagLevel::Error),
            "elaboration errors: {:#?}",
            result.diagnostics
        );
        Library::from_circuits(result.circuits, CompileOptions::default())
    }

    fn circuit_of(source: &str, name: &str) -> Circuit {
        let netlist = crate::parser::parse(source).netlist.expect("parse failed");
        let result = elaborate(&netlist);
        result
            .circuits
            .into_iter()
            .find(|c| c.name == name)
            .expect("chip not found")
    }

    const AND2: &str = "chip and2 {\n    in a, b\n    out y\n    y = and(a, b)\n}";

    #[test]
    fn instance_update_basics() {
        let lib = library(AND2);
        let inst = lib.instantiate("and2").expect("and2 defined");
        assert_eq!(inst.update(&[1, 1]), vec![1]);
        assert_eq!(inst.snapshot(), vec![1, 1, 1]);
        assert_eq!(inst.update(&[1, 0]), vec![0]);
        assert_eq!(inst.outputs(), vec![0]);
    }

    #[test]
    fn duplicate_is_independent() {
        let lib = library(AND2);
        let a = lib.instantiate("and2").unwrap();
        a.update(&[1, 1]);
        let b = a.duplicate();
        assert_eq!(b.snapshot(), vec![1, 1, 1]);
        b.update(&[0, 0]);
        assert_eq!(b.outputs(), vec![0]);
        assert_eq!(a.outputs(), vec![1], "original unaffected");
    }

    #[test]
    fn clock_ticks_toggle_output() {
        let lib = library("chip blink {\n    out led\n    c = clock()\n    led = c\n}");
        let inst = lib.instantiate("blink").unwrap();
        assert_eq!(inst.update(&[]), vec![0]);
        assert_eq!(inst.tick(), vec![1]);
        assert_eq!(inst.tick(), vec![0]);
        assert_eq!(inst.tick(), vec![1]);
    }

    #[test]
    fn nested_spontaneous_chip_ticks_through_parent() {
        let lib = library(concat!(
            "chip blink {\n    out led\n    c = clock()\n    led = c\n}\n",
            "chip wrap {\n    out led\n    b = blink()\n    led = b\n}",
        ));
        let inst = lib.instantiate("wrap").unwrap();
        assert_eq!(inst.update(&[]), vec![0]);
        assert_eq!(inst.tick(), vec![1]);
        assert_eq!(inst.tick(), vec![0]);
    }

    #[test]
    fn rebuild_cascades_to_dependents() {
        let mut lib = library(concat!(
            "chip inv {\n    in a\n    out y\n    y = not(a)\n}\n",
            "chip pair {\n    in a\n    out y\n    u = inv(a)\n    v = inv(u)\n    y = v\n}",
        ));
        // Edit inv into a buffer: pair must be rebuilt too.
        let new_inv = circuit_of("chip inv {\n    in a\n    out y\n    y = buf(a)\n}", "inv");
        let report = lib.rebuild(new_inv).expect("rebuild");
        assert_eq!(report.rebuilt, vec!["inv".to_string(), "pair".to_string()]);
        assert!(report.unchanged.is_empty());

        let inst = lib.instantiate("pair").unwrap();
        assert_eq!(inst.update(&[1]), vec![1]);
    }

    #[test]
    fn rebuild_identical_circuit_is_a_no_op() {
        let mut lib = library(AND2);
        let old = lib.get("and2").unwrap().clone();
        let same = circuit_of(AND2, "and2");
        let report = lib.rebuild(same).expect("rebuild");
        assert!(report.rebuilt.is_empty());
        assert_eq!(report.unchanged, vec!["and2".to_string()]);
        assert!(
            Arc::ptr_eq(&old, lib.get("and2").unwrap()),
            "identical fingerprint keeps the old template"
        );
    }

    #[test]
    fn rebuild_unknown_chip_errors() {
        let mut lib = library(AND2);
        let other = circuit_of("chip other {\n    in a\n    out y\n    y = buf(a)\n}", "other");
        match lib.rebuild(other) {
            Err(ChipError::UnknownChip { name }) => assert_eq!(name, "other"),
            other => panic!("expected UnknownChip, got {other:?}"),
        }
    }

    #[test]
    fn migrate_preserves_top_level_positionally() {
        let mut lib = library(AND2);
        let mut inst = lib.instantiate("and2").unwrap();
        inst.update(&[1, 1]);

        // Rebuild and2 as or2 (same layout, different function).
        let new_circuit =
            circuit_of("chip and2 {\n    in a, b\n    out y\n    y = or(a, b)\n}", "and2");
        lib.rebuild(new_circuit).expect("rebuild");
        let new_ty = lib.get("and2").unwrap().clone();

        inst.migrate(&new_ty).expect("migrate");
        // Inputs preserved positionally; the gate re-settled as OR.
        assert_eq!(inst.snapshot(), vec![1, 1, 1]);
        assert_eq!(inst.update(&[1, 0]), vec![1], "now an OR");
    }

    #[test]
    fn chip_error_display() {
        let e = ChipError::LayoutMismatch {
            chip: "adder".to_string(),
            expected: 12,
            found: 7,
        };
        assert_eq!(
            format!("{e}"),
            "instance of 'adder' holds 7 signal slot(s), expected 12"
        );
    }

    #[test]
    fn canonical_json_parses_and_names_strategy() {
        let lib = library(AND2);
        let ty = lib.get("and2").unwrap();
        let value: serde_json::Value = serde_json::from_str(&ty.canonical_json()).unwrap();
        assert_eq!(value["label"], "and2");
        assert_eq!(value["strategy"], "level");
        assert_eq!(value["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(ty.fingerprint_hex().len(), 64);
    }
}
