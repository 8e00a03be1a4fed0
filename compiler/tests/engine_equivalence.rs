// Property-based tests for the execution engines.
//
// Two categories:
// 1. Engine agreement: for random acyclic circuits and input sequences,
//    the level engine and the event engine produce identical outputs.
// 2. Change gating: a repeated update is a no-op on the signal array.
//
// Circuits are generated directly as component graphs (bypassing the
// frontend) so the space covers arbitrary wiring, not just what the
// grammar makes convenient.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use chipc::chip::ChipType;
use chipc::circuit::{CompId, CompKind, Component, Circuit, PinRef};
use chipc::compile::{compile, verify_addressing, CompileOptions, StageCert};
use chipc::node::{GateOp, UnaryOp};

// ── Circuit generator ───────────────────────────────────────────────────────

const N_INPUTS: usize = 3;

fn sp() -> chipc::ast::Span {
    use chumsky::span::Span as _;
    chipc::ast::Span::new((), 0..0)
}

/// One generated element: an op selector plus raw source indices, reduced
/// modulo the number of already-placed components so the graph is always
/// acyclic (sources strictly precede their readers).
type RawGate = (u8, u16, u16, Option<u16>);

fn build_circuit(width: u32, raw_gates: &[RawGate]) -> Circuit {
    let mut components: Vec<Component> = Vec::new();
    for i in 0..N_INPUTS {
        components.push(Component {
            kind: CompKind::Input {
                name: format!("i{i}"),
                width,
            },
            inputs: vec![],
            span: sp(),
        });
    }

    for &(op_raw, s1, s2, s3) in raw_gates {
        let avail = components.len() as u16;
        let pick = |raw: u16| {
            Some(PinRef {
                comp: CompId((raw % avail) as u32),
                pin: 0,
            })
        };
        let comp = if op_raw % 8 < 6 {
            let op = match op_raw % 8 {
                0 => GateOp::And,
                1 => GateOp::Or,
                2 => GateOp::Xor,
                3 => GateOp::Nand,
                4 => GateOp::Nor,
                _ => GateOp::Xnor,
            };
            let mut srcs = vec![pick(s1), pick(s2)];
            if let Some(s3) = s3 {
                srcs.push(pick(s3));
            }
            Component {
                kind: CompKind::Gate { op, width },
                inputs: srcs,
                span: sp(),
            }
        } else {
            let op = if op_raw % 2 == 0 {
                UnaryOp::Buf
            } else {
                UnaryOp::Not
            };
            Component {
                kind: CompKind::Unary { op, width },
                inputs: vec![pick(s1)],
                span: sp(),
            }
        };
        components.push(comp);
    }

    // One output marker per non-input component so the whole internal state
    // is observable.
    let n_comps = components.len();
    let mut outputs = Vec::new();
    for i in N_INPUTS..n_comps {
        let id = CompId(components.len() as u32);
        components.push(Component {
            kind: CompKind::Output {
                name: format!("o{}", i - N_INPUTS),
                width,
            },
            inputs: vec![Some(PinRef {
                comp: CompId(i as u32),
                pin: 0,
            })],
            span: sp(),
        });
        outputs.push(id);
    }

    Circuit {
        name: "generated".to_string(),
        components,
        inputs: (0..N_INPUTS).map(|i| CompId(i as u32)).collect(),
        outputs,
    }
}

fn compile_with(circuit: &Circuit, prefer_levels: bool) -> Arc<ChipType> {
    compile(
        circuit,
        &HashMap::new(),
        &CompileOptions { prefer_levels },
    )
}

fn arb_raw_gates() -> impl Strategy<Value = Vec<RawGate>> {
    prop::collection::vec(
        (any::<u8>(), any::<u16>(), any::<u16>(), prop::option::of(any::<u16>())),
        1..=14,
    )
}

fn arb_input_sequence() -> impl Strategy<Value = Vec<[u64; N_INPUTS]>> {
    prop::collection::vec(any::<[u64; N_INPUTS]>(), 1..=6)
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    #[test]
    fn engines_agree_on_acyclic_circuits(
        width in 1u32..=8,
        raw_gates in arb_raw_gates(),
        sequence in arb_input_sequence(),
    ) {
        let circuit = build_circuit(width, &raw_gates);
        let level_ty = compile_with(&circuit, true);
        let event_ty = compile_with(&circuit, false);
        prop_assert_eq!(level_ty.node_box.strategy(), "level");
        prop_assert_eq!(event_ty.node_box.strategy(), "event");

        let level_inst = level_ty.instantiate();
        let event_inst = event_ty.instantiate();
        prop_assert_eq!(
            &level_ty.default_signals,
            &event_ty.default_signals,
            "default snapshots must agree"
        );

        for inputs in &sequence {
            let a = level_inst.update(inputs);
            let b = event_inst.update(inputs);
            prop_assert_eq!(a, b, "outputs diverged on {:?}", inputs);
        }
    }

    #[test]
    fn repeated_update_is_a_no_op(
        width in 1u32..=8,
        raw_gates in arb_raw_gates(),
        inputs in any::<[u64; N_INPUTS]>(),
    ) {
        let circuit = build_circuit(width, &raw_gates);
        for prefer_levels in [true, false] {
            let ty = compile_with(&circuit, prefer_levels);
            let inst = ty.instantiate();
            let first = inst.update(&inputs);
            let settled = inst.snapshot();
            let second = inst.update(&inputs);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(&settled, &inst.snapshot(), "settled update must not write");
        }
    }

    #[test]
    fn addressing_cert_holds_for_generated_circuits(
        width in 1u32..=8,
        raw_gates in arb_raw_gates(),
    ) {
        let circuit = build_circuit(width, &raw_gates);
        let ty = compile_with(&circuit, true);
        let cert = verify_addressing(ty.node_box.set());
        prop_assert!(cert.all_pass(), "cert failed: {:?}", cert.obligations());
    }
}
