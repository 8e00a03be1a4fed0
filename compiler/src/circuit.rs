// circuit.rs — Flattened primitive-component graphs
//
// Elaborates the netlist AST into one `Circuit` per chip: a flat component
// list with per-component input wiring, the exact shape the (out-of-scope)
// editor layer hands the simulation core. Handles width inference (including
// through feedback cycles), alias resolution, and all construction-time
// contract checks: widths 1..=64, gate operand widths equal, pack/unpack
// width sums consistent, constants in range, ports assigned exactly once.
//
// Preconditions: `netlist` is a parsed AST; chips may only instantiate chips
//                defined earlier in the file.
// Postconditions: returns a `Circuit` per chip plus diagnostics; circuits
//                 with error diagnostics must not be compiled.
// Failure modes: contract violations produce `Diagnostic` errors; elaboration
//                continues to collect as many as possible.
// Side effects: none.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ast::*;
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::node::{GateOp, UnaryOp};

// ── Public types ────────────────────────────────────────────────────────────

/// Unique identifier for a component within a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompId(pub u32);

impl CompId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A reference to one output pin of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinRef {
    pub comp: CompId,
    pub pin: u32,
}

/// The kind of a primitive component.
#[derive(Debug, Clone, PartialEq)]
pub enum CompKind {
    /// Boundary input marker (a switch).
    Input { name: String, width: u32 },
    /// Boundary output marker (a light). Pure sink.
    Output { name: String, width: u32 },
    /// Fixed value source.
    Const { value: u64, width: u32 },
    /// Multi-input boolean gate.
    Gate { op: GateOp, width: u32 },
    /// Buffer or complement.
    Unary { op: UnaryOp, width: u32 },
    /// Packs its inputs into one wider value, least-significant first.
    Pack { widths: Vec<u32> },
    /// Unpacks its input into fields, least-significant first.
    Unpack { widths: Vec<u32> },
    /// Free-running clock source.
    Clock,
    /// Nested chip instance.
    Chip {
        name: String,
        output_widths: Vec<u32>,
    },
}

impl CompKind {
    pub fn output_count(&self) -> u32 {
        match self {
            CompKind::Output { .. } => 0,
            CompKind::Unpack { widths } => widths.len() as u32,
            CompKind::Chip { output_widths, .. } => output_widths.len() as u32,
            _ => 1,
        }
    }

    pub fn output_width(&self, pin: u32) -> u32 {
        match self {
            CompKind::Input { width, .. }
            | CompKind::Const { width, .. }
            | CompKind::Gate { width, .. }
            | CompKind::Unary { width, .. } => *width,
            CompKind::Pack { widths } => widths.iter().sum(),
            CompKind::Unpack { widths } => widths[pin as usize],
            CompKind::Chip { output_widths, .. } => output_widths[pin as usize],
            CompKind::Clock => 1,
            CompKind::Output { .. } => 0,
        }
    }

    fn label(&self) -> String {
        match self {
            CompKind::Input { name, width } => format!("in {name}[{width}]"),
            CompKind::Output { name, width } => format!("out {name}[{width}]"),
            CompKind::Const { value, width } => format!("const {value}[{width}]"),
            CompKind::Gate { op, width } => format!("{}[{width}]", op.name()),
            CompKind::Unary { op, width } => format!("{}[{width}]", op.name()),
            CompKind::Pack { widths } => {
                let w: Vec<String> = widths.iter().map(|x| x.to_string()).collect();
                format!("pack[{}]", w.join(","))
            }
            CompKind::Unpack { widths } => {
                let w: Vec<String> = widths.iter().map(|x| x.to_string()).collect();
                format!("unpack[{}]", w.join(","))
            }
            CompKind::Clock => "clock".to_string(),
            CompKind::Chip { name, .. } => format!("chip '{name}'"),
        }
    }
}

/// A component with its input wiring. Unconnected inputs are `None`.
#[derive(Debug, Clone)]
pub struct Component {
    pub kind: CompKind,
    pub inputs: Vec<Option<PinRef>>,
    pub span: Span,
}

/// A flattened chip body: components plus boundary markers.
#[derive(Debug, Clone)]
pub struct Circuit {
    pub name: String,
    pub components: Vec<Component>,
    /// Input components, in port order.
    pub inputs: Vec<CompId>,
    /// Output components, in port order.
    pub outputs: Vec<CompId>,
}

impl Circuit {
    /// True if this circuit instantiates the named chip.
    pub fn instantiates(&self, chip: &str) -> bool {
        self.components
            .iter()
            .any(|c| matches!(&c.kind, CompKind::Chip { name, .. } if name == chip))
    }

    /// Successor lists: for each component, the components reading any of
    /// its outputs (deduplicated, ascending).
    pub fn successors(&self) -> Vec<Vec<CompId>> {
        let mut succ = vec![Vec::new(); self.components.len()];
        for (i, comp) in self.components.iter().enumerate() {
            for pin in comp.inputs.iter().flatten() {
                succ[pin.comp.index()].push(CompId(i as u32));
            }
        }
        for list in &mut succ {
            list.sort();
            list.dedup();
        }
        succ
    }
}

/// Port signature of an elaborated chip, used to elaborate later chips that
/// instantiate it.
#[derive(Debug, Clone)]
pub struct ChipSig {
    pub inputs: Vec<(String, u32)>,
    pub outputs: Vec<(String, u32)>,
}

/// Result of elaboration.
#[derive(Debug)]
pub struct ElaborateResult {
    pub circuits: Vec<Circuit>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "circuit '{}': {} components, {} inputs, {} outputs",
            self.name,
            self.components.len(),
            self.inputs.len(),
            self.outputs.len()
        )?;
        for (i, comp) in self.components.iter().enumerate() {
            write!(f, "  c{i}: {}", comp.kind.label())?;
            if !comp.inputs.is_empty() {
                write!(f, " <- ")?;
                for (j, pin) in comp.inputs.iter().enumerate() {
                    if j > 0 {
                        write!(f, ", ")?;
                    }
                    match pin {
                        Some(p) => write!(f, "c{}.{}", p.comp.0, p.pin)?,
                        None => write!(f, "-")?,
                    }
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Elaborate a parsed netlist into flattened circuits, in definition order.
pub fn elaborate(netlist: &Netlist) -> ElaborateResult {
    let mut diagnostics = Vec::new();
    let mut circuits = Vec::new();
    let mut sigs: HashMap<String, ChipSig> = HashMap::new();

    for def in &netlist.chips {
        if is_builtin(&def.name.name) {
            diagnostics.push(
                Diagnostic::new(
                    DiagLevel::Error,
                    def.name.span,
                    format!("chip name '{}' shadows a builtin primitive", def.name.name),
                )
                .with_code(codes::E0101),
            );
            continue;
        }
        if sigs.contains_key(&def.name.name) {
            diagnostics.push(
                Diagnostic::new(
                    DiagLevel::Error,
                    def.name.span,
                    format!("duplicate chip definition '{}'", def.name.name),
                )
                .with_code(codes::E0101),
            );
            continue;
        }
        let mut ctx = ElabCtx::new(def, &sigs);
        let circuit = ctx.run();
        let sig = ctx.signature();
        diagnostics.append(&mut ctx.diagnostics);
        sigs.insert(def.name.name.clone(), sig);
        circuits.push(circuit);
    }

    ElaborateResult {
        circuits,
        diagnostics,
    }
}

fn is_builtin(name: &str) -> bool {
    GateOp::from_name(name).is_some()
        || UnaryOp::from_name(name).is_some()
        || matches!(name, "const" | "clock" | "pack" | "unpack")
}

// ── Internal elaboration context ────────────────────────────────────────────

struct ElabCtx<'a> {
    def: &'a ChipDef,
    sigs: &'a HashMap<String, ChipSig>,
    diagnostics: Vec<Diagnostic>,
    in_ports: Vec<(String, u32)>,
    out_ports: Vec<(String, u32)>,
    /// LHS name → statement index.
    stmt_of: HashMap<String, usize>,
    /// Resolved widths per named signal (filled by the width pass).
    widths: HashMap<String, u32>,
    /// LHS of plain-ref statements → their operand (no component emitted).
    aliases: HashMap<String, &'a Operand>,
    /// Statement index → emitted component.
    comp_of_stmt: HashMap<usize, CompId>,
    /// Input port name → input component.
    input_comp: HashMap<String, CompId>,
    components: Vec<Component>,
    /// Names read at least once (for unused warnings).
    used_names: HashSet<String>,
}

impl<'a> ElabCtx<'a> {
    fn new(def: &'a ChipDef, sigs: &'a HashMap<String, ChipSig>) -> Self {
        ElabCtx {
            def,
            sigs,
            diagnostics: Vec::new(),
            in_ports: Vec::new(),
            out_ports: Vec::new(),
            stmt_of: HashMap::new(),
            widths: HashMap::new(),
            aliases: HashMap::new(),
            comp_of_stmt: HashMap::new(),
            input_comp: HashMap::new(),
            components: Vec::new(),
            used_names: HashSet::new(),
        }
    }

    fn error(&mut self, code: crate::diag::DiagCode, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Error, span, message).with_code(code));
    }

    fn warning(&mut self, code: crate::diag::DiagCode, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Warning, span, message).with_code(code));
    }

    fn signature(&self) -> ChipSig {
        ChipSig {
            inputs: self.in_ports.clone(),
            outputs: self.out_ports.clone(),
        }
    }

    fn run(&mut self) -> Circuit {
        self.collect_ports();
        self.collect_stmts();
        self.resolve_all_widths();
        self.build_components();
        self.wire_components();
        let outputs = self.build_outputs();
        self.warn_unused();

        let inputs: Vec<CompId> = self
            .in_ports
            .iter()
            .map(|(name, _)| self.input_comp[name])
            .collect();

        Circuit {
            name: self.def.name.name.clone(),
            components: std::mem::take(&mut self.components),
            inputs,
            outputs,
        }
    }

    // ── Ports and statements ────────────────────────────────────────────

    fn collect_ports(&mut self) {
        let mut seen: HashSet<String> = HashSet::new();
        for port in &self.def.ports {
            if !seen.insert(port.name.name.clone()) {
                self.error(
                    codes::E0101,
                    port.span,
                    format!("duplicate port '{}'", port.name.name),
                );
                continue;
            }
            let width = if port.width == 0 || port.width > 64 {
                self.error(
                    codes::E0104,
                    port.span,
                    format!(
                        "port '{}' has width {}, supported range is 1..=64",
                        port.name.name, port.width
                    ),
                );
                1
            } else {
                port.width as u32
            };
            match port.dir {
                PortDir::In => self.in_ports.push((port.name.name.clone(), width)),
                PortDir::Out => self.out_ports.push((port.name.name.clone(), width)),
            }
        }
    }

    fn collect_stmts(&mut self) {
        for (i, stmt) in self.def.stmts.iter().enumerate() {
            let name = &stmt.name.name;
            if self.in_ports.iter().any(|(p, _)| p == name) {
                self.error(
                    codes::E0112,
                    stmt.name.span,
                    format!("cannot assign to input port '{name}'"),
                );
                continue;
            }
            if self.stmt_of.insert(name.clone(), i).is_some() {
                self.error(
                    codes::E0101,
                    stmt.name.span,
                    format!("signal '{name}' is assigned more than once"),
                );
            }
            if let Expr::Ref(op) = &stmt.expr {
                self.aliases.insert(name.clone(), op);
            }
        }
    }

    // ── Width inference ─────────────────────────────────────────────────
    //
    // Widths flow from anchors (ports, const, pack/unpack declarations,
    // chip ports) through gates and aliases. Feedback is allowed: a gate
    // takes its width from the first operand that resolves. A cycle with no
    // anchor at all defaults to width 1 with a warning.

    fn resolve_all_widths(&mut self) {
        let names: Vec<String> = self.stmt_of.keys().cloned().collect();
        let mut names = names;
        names.sort();
        for name in names {
            let mut visiting = HashSet::new();
            let span = self.def.stmts[self.stmt_of[&name]].span;
            match self.width_of_name(&name, &mut visiting) {
                Some(w) => {
                    self.widths.insert(name, w);
                }
                None => {
                    self.warning(
                        codes::W0102,
                        span,
                        format!(
                            "cannot infer the width of '{name}' from a feedback cycle; assuming 1"
                        ),
                    );
                    self.widths.insert(name, 1);
                }
            }
        }
    }

    fn width_of_name(&self, name: &str, visiting: &mut HashSet<String>) -> Option<u32> {
        if let Some((_, w)) = self.in_ports.iter().find(|(p, _)| p == name) {
            return Some(*w);
        }
        if let Some(w) = self.widths.get(name) {
            return Some(*w);
        }
        if visiting.contains(name) {
            return None;
        }
        let stmt = self.def.stmts.get(*self.stmt_of.get(name)?)?;
        visiting.insert(name.to_string());
        let width = self.width_of_expr(&stmt.expr, visiting);
        visiting.remove(name);
        width
    }

    fn width_of_expr(&self, expr: &Expr, visiting: &mut HashSet<String>) -> Option<u32> {
        match expr {
            Expr::Ref(op) => self.width_of_operand(op, visiting),
            Expr::Call(call) => self.width_of_call(call, visiting),
        }
    }

    fn width_of_call(&self, call: &Call, visiting: &mut HashSet<String>) -> Option<u32> {
        let callee = call.name.name.as_str();
        if GateOp::from_name(callee).is_some() || UnaryOp::from_name(callee).is_some() {
            // First operand that resolves anchors the gate width.
            for arg in &call.args {
                if let Arg::Operand(op) = arg {
                    if let Some(w) = self.width_of_operand(op, visiting) {
                        return Some(w);
                    }
                }
            }
            return None;
        }
        match callee {
            "const" => match call.args.get(1) {
                Some(Arg::Number(w, _)) => Some(*w as u32),
                _ => None,
            },
            "clock" => Some(1),
            "pack" => {
                let mut total = 0;
                for arg in &call.args {
                    match arg {
                        Arg::Operand(op) => total += self.width_of_operand(op, visiting)?,
                        Arg::Number(..) => return None,
                    }
                }
                Some(total)
            }
            "unpack" => {
                // A bare reference to an unpack is only meaningful with a
                // single field.
                let fields: Vec<u64> = call
                    .args
                    .iter()
                    .skip(1)
                    .filter_map(|a| match a {
                        Arg::Number(n, _) => Some(*n),
                        _ => None,
                    })
                    .collect();
                if fields.len() == 1 {
                    Some(fields[0] as u32)
                } else {
                    None
                }
            }
            _ => {
                let sig = self.sigs.get(callee)?;
                if sig.outputs.len() == 1 {
                    Some(sig.outputs[0].1)
                } else {
                    None
                }
            }
        }
    }

    fn width_of_operand(&self, op: &Operand, visiting: &mut HashSet<String>) -> Option<u32> {
        match op {
            Operand::Signal(id) => self.width_of_name(&id.name, visiting),
            Operand::Field(base, sel, _) => {
                let stmt = self.def.stmts.get(*self.stmt_of.get(&base.name)?)?;
                let Expr::Call(call) = &stmt.expr else {
                    return None;
                };
                match call.name.name.as_str() {
                    "unpack" => {
                        let FieldSel::Index(i, _) = sel else {
                            return None;
                        };
                        match call.args.get(1 + *i as usize) {
                            Some(Arg::Number(w, _)) => Some(*w as u32),
                            _ => None,
                        }
                    }
                    chip => {
                        let sig = self.sigs.get(chip)?;
                        let idx = self.out_port_index(sig, sel)?;
                        Some(sig.outputs[idx].1)
                    }
                }
            }
        }
    }

    fn out_port_index(&self, sig: &ChipSig, sel: &FieldSel) -> Option<usize> {
        match sel {
            FieldSel::Index(i, _) => {
                if (*i as usize) < sig.outputs.len() {
                    Some(*i as usize)
                } else {
                    None
                }
            }
            FieldSel::Name(id) => sig.outputs.iter().position(|(n, _)| *n == id.name),
        }
    }

    // ── Component construction ──────────────────────────────────────────

    fn add_comp(&mut self, kind: CompKind, n_inputs: usize, span: Span) -> CompId {
        let id = CompId(self.components.len() as u32);
        self.components.push(Component {
            kind,
            inputs: vec![None; n_inputs],
            span,
        });
        id
    }

    fn build_components(&mut self) {
        // Input ports first, in declaration order.
        for (name, width) in self.in_ports.clone() {
            let span = self
                .def
                .ports
                .iter()
                .find(|p| p.name.name == name)
                .map(|p| p.span)
                .unwrap_or(self.def.span);
            let id = self.add_comp(
                CompKind::Input {
                    name: name.clone(),
                    width,
                },
                0,
                span,
            );
            self.input_comp.insert(name, id);
        }

        // Then one component per call statement, in source order.
        for (i, stmt) in self.def.stmts.iter().enumerate() {
            let Expr::Call(call) = &stmt.expr else {
                continue; // aliases emit no component
            };
            if let Some(id) = self.build_call_comp(&stmt.name.name, call) {
                self.comp_of_stmt.insert(i, id);
            }
        }
    }

    fn build_call_comp(&mut self, lhs: &str, call: &Call) -> Option<CompId> {
        let callee = call.name.name.as_str();
        let width = self.widths.get(lhs).copied().unwrap_or(1);
        let signal_args = call
            .args
            .iter()
            .filter(|a| matches!(a, Arg::Operand(_)))
            .count();

        if let Some(op) = GateOp::from_name(callee) {
            if !(2..=4).contains(&call.args.len()) || signal_args != call.args.len() {
                self.arity_error(call, "between 2 and 4 signal operands");
                return None;
            }
            self.check_width_range(width, call.span);
            return Some(self.add_comp(CompKind::Gate { op, width }, call.args.len(), call.span));
        }
        if let Some(op) = UnaryOp::from_name(callee) {
            if call.args.len() != 1 || signal_args != 1 {
                self.arity_error(call, "exactly 1 signal operand");
                return None;
            }
            return Some(self.add_comp(CompKind::Unary { op, width }, 1, call.span));
        }
        match callee {
            "const" => {
                let (value, w) = match (call.args.first(), call.args.get(1)) {
                    (Some(Arg::Number(v, _)), Some(Arg::Number(w, _))) if call.args.len() == 2 => {
                        (*v, *w)
                    }
                    _ => {
                        self.arity_error(call, "a value and a width, e.g. const(5, 4)");
                        return None;
                    }
                };
                if w == 0 || w > 64 {
                    self.error(
                        codes::E0104,
                        call.span,
                        format!("const width {w} outside the supported range 1..=64"),
                    );
                    return None;
                }
                let w = w as u32;
                if value & !crate::node::mask(w) != 0 {
                    self.error(
                        codes::E0105,
                        call.span,
                        format!("constant {value} does not fit in {w} bit(s)"),
                    );
                    return None;
                }
                Some(self.add_comp(CompKind::Const { value, width: w }, 0, call.span))
            }
            "clock" => {
                if !call.args.is_empty() {
                    self.arity_error(call, "no arguments");
                    return None;
                }
                Some(self.add_comp(CompKind::Clock, 0, call.span))
            }
            "pack" => {
                if call.args.len() < 2 || signal_args != call.args.len() {
                    self.arity_error(call, "at least 2 signal operands");
                    return None;
                }
                // Field widths are the operand widths; checked in the wiring
                // pass where operand widths are all known.
                Some(self.add_comp(
                    CompKind::Pack { widths: Vec::new() },
                    call.args.len(),
                    call.span,
                ))
            }
            "unpack" => {
                let ok_shape = matches!(call.args.first(), Some(Arg::Operand(_)))
                    && call.args.len() >= 3
                    && call.args[1..].iter().all(|a| matches!(a, Arg::Number(..)));
                if !ok_shape {
                    self.arity_error(call, "a signal operand and at least 2 field widths");
                    return None;
                }
                let mut widths = Vec::new();
                for arg in &call.args[1..] {
                    let Arg::Number(w, span) = arg else {
                        unreachable!()
                    };
                    if *w == 0 || *w > 64 {
                        self.error(
                            codes::E0104,
                            *span,
                            format!("field width {w} outside the supported range 1..=64"),
                        );
                        return None;
                    }
                    widths.push(*w as u32);
                }
                if widths.iter().sum::<u32>() > 64 {
                    self.error(
                        codes::E0104,
                        call.span,
                        "unpack fields exceed 64 bits in total".to_string(),
                    );
                    return None;
                }
                Some(self.add_comp(CompKind::Unpack { widths }, 1, call.span))
            }
            chip => {
                let Some(sig) = self.sigs.get(chip) else {
                    self.error(
                        codes::E0106,
                        call.name.span,
                        format!("unknown primitive or chip '{chip}'"),
                    );
                    return None;
                };
                let sig_inputs = sig.inputs.len();
                let output_widths: Vec<u32> = sig.outputs.iter().map(|(_, w)| *w).collect();
                if call.args.len() != sig_inputs || signal_args != call.args.len() {
                    let wanted = format!("{sig_inputs} signal operand(s)");
                    self.arity_error(call, &wanted);
                    return None;
                }
                Some(self.add_comp(
                    CompKind::Chip {
                        name: chip.to_string(),
                        output_widths,
                    },
                    sig_inputs,
                    call.span,
                ))
            }
        }
    }

    fn arity_error(&mut self, call: &Call, wanted: &str) {
        let has_number = call.args.iter().any(|a| matches!(a, Arg::Number(..)));
        let code = if has_number && !matches!(call.name.name.as_str(), "const" | "unpack") {
            codes::E0110
        } else {
            codes::E0107
        };
        self.error(
            code,
            call.span,
            format!("'{}' takes {}", call.name.name, wanted),
        );
    }

    fn check_width_range(&mut self, width: u32, span: Span) {
        if width == 0 || width > 64 {
            self.error(
                codes::E0104,
                span,
                format!("width {width} outside the supported range 1..=64"),
            );
        }
    }

    // ── Wiring ──────────────────────────────────────────────────────────

    fn wire_components(&mut self) {
        for (i, stmt) in self.def.stmts.iter().enumerate() {
            let Expr::Call(call) = &stmt.expr else {
                continue;
            };
            let Some(&comp_id) = self.comp_of_stmt.get(&i) else {
                continue;
            };
            let mut pack_widths = Vec::new();
            let expected = self.expected_input_widths(comp_id, call);
            let mut slot = 0;
            for arg in &call.args {
                let Arg::Operand(op) = arg else {
                    continue; // numbers were consumed at construction
                };
                let resolved = self.resolve_operand(op);
                if let Some(pin) = resolved {
                    let got = self.pin_width(pin);
                    if let Some(want) = expected.get(slot).copied().flatten() {
                        if got != want {
                            self.error(
                                codes::E0102,
                                op.span(),
                                format!("operand is {got} bit(s) wide, expected {want}"),
                            );
                        }
                    }
                    pack_widths.push(got);
                    self.components[comp_id.index()].inputs[slot] = Some(pin);
                }
                slot += 1;
            }
            self.finish_wiring(comp_id, stmt, pack_widths);
        }
    }

    /// Expected width per input slot, where the component kind dictates one.
    fn expected_input_widths(&self, comp_id: CompId, call: &Call) -> Vec<Option<u32>> {
        match &self.components[comp_id.index()].kind {
            CompKind::Gate { width, .. } | CompKind::Unary { width, .. } => {
                vec![Some(*width); call.args.len()]
            }
            CompKind::Unpack { .. } => vec![None], // checked in finish_wiring
            CompKind::Chip { name, .. } => self
                .sigs
                .get(name)
                .map(|sig| sig.inputs.iter().map(|(_, w)| Some(*w)).collect())
                .unwrap_or_default(),
            _ => vec![None; call.args.len()],
        }
    }

    fn finish_wiring(&mut self, comp_id: CompId, stmt: &Stmt, operand_widths: Vec<u32>) {
        match self.components[comp_id.index()].kind.clone() {
            CompKind::Pack { .. } => {
                let total: u32 = operand_widths.iter().sum();
                if total > 64 {
                    self.error(
                        codes::E0104,
                        stmt.span,
                        "pack fields exceed 64 bits in total".to_string(),
                    );
                }
                if let CompKind::Pack { widths } = &mut self.components[comp_id.index()].kind {
                    *widths = operand_widths;
                }
            }
            CompKind::Unpack { widths } => {
                let want: u32 = widths.iter().sum::<u32>();
                if let Some(got) = operand_widths.first() {
                    if *got != want {
                        self.error(
                            codes::E0103,
                            stmt.span,
                            format!(
                                "unpack fields sum to {want} bit(s) but the input is {got} bit(s) wide"
                            ),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    fn pin_width(&self, pin: PinRef) -> u32 {
        self.components[pin.comp.index()].kind.output_width(pin.pin)
    }

    /// Resolve an operand to a component output pin, chasing aliases.
    fn resolve_operand(&mut self, op: &Operand) -> Option<PinRef> {
        let mut base = op.base().clone();
        let mut sel: Option<FieldSel> = match op {
            Operand::Signal(_) => None,
            Operand::Field(_, s, _) => Some(s.clone()),
        };

        // Chase alias chains, carrying at most one field selector.
        let mut chased: HashSet<String> = HashSet::new();
        loop {
            self.used_names.insert(base.name.clone());
            if !chased.insert(base.name.clone()) {
                self.error(
                    codes::E0111,
                    op.span(),
                    format!("alias chain through '{}' closes on itself", base.name),
                );
                return None;
            }
            let next = self.aliases.get(&base.name).map(|o| (*o).clone());
            match next {
                Some(Operand::Signal(next_base)) => {
                    base = next_base;
                }
                Some(Operand::Field(next_base, next_sel, _)) => {
                    if sel.is_some() {
                        self.error(
                            codes::E0109,
                            op.span(),
                            format!("cannot select a field of field alias '{}'", base.name),
                        );
                        return None;
                    }
                    sel = Some(next_sel);
                    base = next_base;
                }
                None => break,
            }
        }

        // Input port?
        if let Some(&comp) = self.input_comp.get(&base.name) {
            if sel.is_some() {
                self.error(
                    codes::E0109,
                    op.span(),
                    format!("input port '{}' has no fields", base.name),
                );
                return None;
            }
            return Some(PinRef { comp, pin: 0 });
        }

        // Statement-defined signal?
        let Some(&stmt_idx) = self.stmt_of.get(&base.name) else {
            self.error(
                codes::E0100,
                op.span(),
                format!("signal '{}' is never defined", base.name),
            );
            return None;
        };
        let Some(&comp) = self.comp_of_stmt.get(&stmt_idx) else {
            return None; // the defining statement already failed
        };

        let kind = self.components[comp.index()].kind.clone();
        let n_out = kind.output_count();
        let pin = match &sel {
            None => {
                if n_out == 1 {
                    0
                } else {
                    self.error(
                        codes::E0109,
                        op.span(),
                        format!(
                            "'{}' has {n_out} outputs; select one with '.{{index}}'",
                            base.name
                        ),
                    );
                    return None;
                }
            }
            Some(FieldSel::Index(i, span)) => {
                if *i as u32 >= n_out {
                    self.error(
                        codes::E0109,
                        *span,
                        format!("'{}' has no output {i} (it has {n_out})", base.name),
                    );
                    return None;
                }
                *i as u32
            }
            Some(FieldSel::Name(port)) => match &kind {
                CompKind::Chip { name, .. } => {
                    let sig = &self.sigs[name];
                    match sig.outputs.iter().position(|(n, _)| *n == port.name) {
                        Some(idx) => idx as u32,
                        None => {
                            self.error(
                                codes::E0109,
                                port.span,
                                format!("chip '{}' has no output port '{}'", name, port.name),
                            );
                            return None;
                        }
                    }
                }
                _ => {
                    self.error(
                        codes::E0109,
                        port.span,
                        format!("'{}' is not a chip; use a numeric field index", base.name),
                    );
                    return None;
                }
            },
        };
        Some(PinRef { comp, pin })
    }

    // ── Output ports ────────────────────────────────────────────────────

    fn build_outputs(&mut self) -> Vec<CompId> {
        let mut out_ids = Vec::new();
        for (name, width) in self.out_ports.clone() {
            let span = self
                .def
                .ports
                .iter()
                .find(|p| p.name.name == name)
                .map(|p| p.span)
                .unwrap_or(self.def.span);
            if !self.stmt_of.contains_key(&name) {
                self.error(
                    codes::E0108,
                    span,
                    format!("output port '{name}' is never assigned"),
                );
                continue;
            }
            let op = Operand::Signal(Ident {
                name: name.clone(),
                span,
            });
            let pin = self.resolve_operand(&op);
            if let Some(pin) = pin {
                let got = self.pin_width(pin);
                if got != width {
                    self.error(
                        codes::E0102,
                        span,
                        format!("output '{name}' is declared {width} bit(s) but driven by {got}"),
                    );
                }
            }
            let id = self.add_comp(CompKind::Output { name, width }, 1, span);
            self.components[id.index()].inputs[0] = pin;
            out_ids.push(id);
        }
        out_ids
    }

    // ── Unused warnings ─────────────────────────────────────────────────

    fn warn_unused(&mut self) {
        for stmt in &self.def.stmts {
            let name = &stmt.name.name;
            if self.used_names.contains(name) {
                continue;
            }
            if self.out_ports.iter().any(|(p, _)| p == name) {
                continue;
            }
            if !self.stmt_of.contains_key(name) {
                continue; // assignment itself was rejected
            }
            self.diagnostics.push(
                Diagnostic::new(
                    DiagLevel::Warning,
                    stmt.name.span,
                    format!("signal '{name}' is assigned but never read"),
                )
                .with_code(codes::W0100)
                .with_hint("remove the assignment or wire it to an output"),
            );
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
