use clap::Parser;
use std::path::PathBuf;

use chipc::chip::Library;
use chipc::compile::CompileOptions;
use chipc::diag::DiagLevel;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Simulate the selected chip (default).
    Run,
    /// Parsed netlist AST.
    Ast,
    /// Elaborated component graph.
    Circuit,
    /// Compiled chip template.
    Chip,
    /// Canonical JSON dump of the compiled chip.
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "chipc",
    version,
    about = "Chip compiler — compiles .ckt logic circuit definitions into reusable, simulatable chip templates"
)]
struct Cli {
    /// Input .ckt source file
    source: PathBuf,

    /// Chip to simulate or emit (default: the last chip defined)
    #[arg(short, long)]
    chip: Option<String>,

    /// Input vector, comma-separated, one update per occurrence
    /// (e.g. -i 1,0 -i 1,1)
    #[arg(short, long = "inputs")]
    inputs: Vec<String>,

    /// Clock ticks to run after the input vectors
    #[arg(long, default_value_t = 0)]
    ticks: u32,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Run)]
    emit: EmitStage,

    /// Disable level compilation; every chip gets the event engine
    #[arg(long)]
    no_levels: bool,

    /// Print compiler phases and chip summaries
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("chipc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let parse_result = chipc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            eprintln!("chipc: parse error: {}", err);
        }
        std::process::exit(1);
    }
    let netlist = match parse_result.netlist {
        Some(n) => n,
        None => {
            eprintln!("chipc: parse failed with no output");
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!("chipc: parsed {} chip definition(s)", netlist.chips.len());
    }

    if matches!(cli.emit, EmitStage::Ast) {
        println!("{netlist:#?}");
        return;
    }

    // ── Elaborate ──
    let elab = chipc::circuit::elaborate(&netlist);
    for diag in &elab.diagnostics {
        eprintln!("chipc: {}", diag);
    }
    if elab.diagnostics.iter().any(|d| d.level == DiagLevel::Error) {
        std::process::exit(1);
    }

    let chip_name = match cli.chip.clone().or_else(|| {
        elab.circuits.last().map(|c| c.name.clone())
    }) {
        Some(name) => name,
        None => {
            eprintln!("chipc: error: no chips defined in {}", cli.source.display());
            std::process::exit(1);
        }
    };

    if matches!(cli.emit, EmitStage::Circuit) {
        match elab.circuits.iter().find(|c| c.name == chip_name) {
            Some(circuit) => print!("{circuit}"),
            None => {
                eprintln!("chipc: error: no chip named '{chip_name}'");
                std::process::exit(1);
            }
        }
        return;
    }

    // ── Compile ──
    let options = CompileOptions {
        prefer_levels: !cli.no_levels,
    };
    let library = Library::from_circuits(elab.circuits, options);

    let Some(ty) = library.get(&chip_name) else {
        eprintln!("chipc: error: no chip named '{chip_name}'");
        std::process::exit(1);
    };

    if cli.verbose {
        for name in library.names() {
            let t = library.get(name).unwrap();
            eprintln!(
                "chipc: compiled '{}' ({}, {} nodes, width {})",
                name,
                t.node_box.strategy(),
                t.node_box.set().nodes.len(),
                t.width(),
            );
        }
    }

    match cli.emit {
        EmitStage::Chip => {
            print!("{ty}");
            return;
        }
        EmitStage::Json => {
            println!("{}", ty.canonical_json());
            return;
        }
        EmitStage::Run => {}
        EmitStage::Ast | EmitStage::Circuit => unreachable!(),
    }

    // ── Simulate ──
    let instance = ty.instantiate();
    let mut step = 0;
    for vector in &cli.inputs {
        let values = match parse_vector(vector, ty.inputs.len()) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("chipc: error: input vector '{vector}': {e}");
                std::process::exit(1);
            }
        };
        let outputs = instance.update(&values);
        print_step(step, "update", &outputs, ty);
        step += 1;
    }
    for _ in 0..cli.ticks {
        let outputs = instance.tick();
        print_step(step, "tick", &outputs, ty);
        step += 1;
    }
    if step == 0 {
        // No stimulus given: report the settled default outputs.
        let outputs = instance.outputs();
        print_step(0, "default", &outputs, ty);
    }
}

fn parse_vector(raw: &str, expected: usize) -> Result<Vec<u64>, String> {
    let values: Result<Vec<u64>, String> = raw
        .split(',')
        .map(|part| {
            let part = part.trim();
            if let Some(hex) = part.strip_prefix("0x") {
                u64::from_str_radix(hex, 16).map_err(|e| e.to_string())
            } else if let Some(bin) = part.strip_prefix("0b") {
                u64::from_str_radix(bin, 2).map_err(|e| e.to_string())
            } else {
                part.parse().map_err(|e: std::num::ParseIntError| e.to_string())
            }
        })
        .collect();
    let values = values?;
    if values.len() != expected {
        return Err(format!(
            "expected {expected} value(s), got {}",
            values.len()
        ));
    }
    Ok(values)
}

fn print_step(step: usize, kind: &str, outputs: &[u64], ty: &chipc::chip::ChipType) {
    let parts: Vec<String> = ty
        .outputs
        .iter()
        .zip(outputs)
        .map(|(port, value)| format!("{}={}", port.name, value))
        .collect();
    println!("step {step} ({kind}): {}", parts.join(" "));
}
