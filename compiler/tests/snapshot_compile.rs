// Snapshot tests for the human-readable dumps of elaborated circuits and
// compiled chips. These formats back `--emit circuit` and `--emit chip`;
// changes here are user-visible and must be deliberate.

use chipc::chip::Library;
use chipc::compile::CompileOptions;
use chipc::diag::DiagLevel;

fn library(source: &str) -> (Library, Vec<chipc::circuit::Circuit>) {
    let netlist = chipc::parser::parse(source).netlist.expect("parse failed");
    let result = chipc::circuit::elaborate(&netlist);
    assert!(
        result
            .diagnostics
            .iter()
            .all(|d| d.level != DiagLevel::Error),
        "elaboration errors: {:#?}",
        result.diagnostics
    );
    let circuits = result.circuits.clone();
    (
        Library::from_circuits(result.circuits, CompileOptions::default()),
        circuits,
    )
}

const AND2: &str = "chip and2 {\n    in a, b\n    out y\n    y = and(a, b)\n}";

#[test]
fn circuit_display_and2() {
    let (_, circuits) = library(AND2);
    insta::assert_snapshot!(format!("{}", circuits[0]).trim_end(), @r"
    circuit 'and2': 4 components, 2 inputs, 1 outputs
      c0: in a[1]
      c1: in b[1]
      c2: and[1] <- c0.0, c1.0
      c3: out y[1] <- c2.0
    ");
}

#[test]
fn chip_display_and2() {
    let (lib, _) = library(AND2);
    let ty = lib.get("and2").unwrap();
    insta::assert_snapshot!(format!("{ty}").trim_end(), @r"
    chip 'and2' (level): 3 nodes, width 3 (own 3)
      inputs: a[1], b[1]
      outputs: y[1]
      n0: start @0
      n1: start @1
      n2: and[1] @2 <- @0, @1
      level 0: n2
    ");
}

#[test]
fn chip_display_split() {
    let (lib, _) = library(concat!(
        "chip split {\n    in w[5]\n    out lo[2], hi[3]\n",
        "    u = unpack(w, 2, 3)\n    lo = u.0\n    hi = u.1\n}",
    ));
    let ty = lib.get("split").unwrap();
    insta::assert_snapshot!(format!("{ty}").trim_end(), @r"
    chip 'split' (level): 2 nodes, width 3 (own 3)
      inputs: w[5]
      outputs: lo[2], hi[3]
      n0: start @0
      n1: unpack[2,3] @1, @2 <- @0
      level 0: n1
    ");
}

#[test]
fn chip_display_feedback_event_engine() {
    let (lib, _) = library(concat!(
        "chip latch {\n    in s, r\n    out q, qn\n",
        "    q = nor(r, qn)\n    qn = nor(s, q)\n}",
    ));
    let ty = lib.get("latch").unwrap();
    insta::assert_snapshot!(format!("{ty}").trim_end(), @r"
    chip 'latch' (event): 4 nodes, width 4 (own 4)
      inputs: s[1], r[1]
      outputs: q[1], qn[1]
      n0: start @0
      n1: start @1
      n2: nor[1] @2 <- @1, @3
      n3: nor[1] @3 <- @0, @2
    ");
}
