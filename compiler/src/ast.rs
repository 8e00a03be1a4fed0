// ast.rs — Netlist AST for .ckt circuit definitions
//
// Produced by the parser, consumed by elaboration. Every node carries a
// `SimpleSpan` into the source text for diagnostics.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Source span used throughout the frontend.
pub type Span = SimpleSpan;

/// An identifier with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// A parsed .ckt file: an ordered sequence of chip definitions.
///
/// Definition order matters — a chip may only instantiate chips defined
/// earlier in the file.
#[derive(Debug, Clone)]
pub struct Netlist {
    pub chips: Vec<ChipDef>,
    pub span: Span,
}

/// One `chip name { ... }` block.
#[derive(Debug, Clone)]
pub struct ChipDef {
    pub name: Ident,
    pub ports: Vec<PortDecl>,
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// Port direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDir {
    In,
    Out,
}

/// A single declared port: `in a`, `out sum[4]`.
///
/// The width defaults to 1 when no bracket suffix is given. Range checking
/// (1..=64) happens at elaboration, not here.
#[derive(Debug, Clone)]
pub struct PortDecl {
    pub dir: PortDir,
    pub name: Ident,
    pub width: u64,
    pub span: Span,
}

/// A signal assignment: `name = expr`.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub name: Ident,
    pub expr: Expr,
    pub span: Span,
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A call form: gate, primitive, or chip instantiation.
    Call(Call),
    /// A bare operand — an alias for another signal or field.
    Ref(Operand),
}

/// `name(arg, ...)` — the callee is resolved by elaboration (builtin table
/// first, then previously defined chips).
#[derive(Debug, Clone)]
pub struct Call {
    pub name: Ident,
    pub args: Vec<Arg>,
    pub span: Span,
}

/// One call argument: a signal operand or a bare number (only meaningful
/// for `const` and `unpack`, validated at elaboration).
#[derive(Debug, Clone)]
pub enum Arg {
    Operand(Operand),
    Number(u64, Span),
}

/// A reference to a value: a plain signal or a field of a multi-output
/// statement (`u.0`, `fa.sum`).
#[derive(Debug, Clone)]
pub enum Operand {
    Signal(Ident),
    Field(Ident, FieldSel, Span),
}

impl Operand {
    pub fn span(&self) -> Span {
        match self {
            Operand::Signal(id) => id.span,
            Operand::Field(_, _, span) => *span,
        }
    }

    /// The base identifier the operand refers to.
    pub fn base(&self) -> &Ident {
        match self {
            Operand::Signal(id) => id,
            Operand::Field(id, _, _) => id,
        }
    }
}

/// Field selector: numeric pin index or named chip output port.
#[derive(Debug, Clone)]
pub enum FieldSel {
    Index(u64, Span),
    Name(Ident),
}

impl Arg {
    pub fn span(&self) -> Span {
        match self {
            Arg::Operand(op) => op.span(),
            Arg::Number(_, span) => *span,
        }
    }
}
