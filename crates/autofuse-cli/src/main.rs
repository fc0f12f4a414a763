use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use autofuse_decider::DeciderRegistry;
use autofuse_ir::Framework;
use autofuse_solver::{FusionStrategySolver, SolverConfig};

/// autofuse: operator-fusion strategy solver for compute graphs
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input graph file (line-oriented text format)
    input: PathBuf,

    /// Output path for the fused graph dump (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Decider framework when the graph carries no tag
    #[arg(long, default_value = "generic")]
    framework: Framework,

    /// Maximum fusion rounds
    #[arg(long, default_value_t = 8)]
    max_rounds: u32,

    /// Maximum topological spread for sibling fusion
    #[arg(long, default_value_t = 16)]
    max_proximity: i64,

    /// Maximum combined output bytes for sibling fusion
    #[arg(long, default_value_t = 1 << 20)]
    max_output_bytes: i64,

    /// Dump the graph to stderr before and after solving
    #[arg(long)]
    dump_graph: bool,

    /// Solve and report statistics without emitting the fused graph
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    let mut graph = autofuse_parser::parse(&source)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("graph parse failed")?;

    if cli.dump_graph {
        eprintln!("{}", autofuse_ir::dump_graph(&graph));
    }

    let solver = FusionStrategySolver::new(SolverConfig {
        max_fuse_rounds: cli.max_rounds,
        max_proximity: cli.max_proximity,
        max_output_memory_size_after_fusion: cli.max_output_bytes,
        framework: cli.framework,
    });
    let registry = DeciderRegistry::with_builtins();
    let report = solver
        .fuse(&mut graph, &registry)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("fusion solve failed")?;

    eprintln!("{report}");

    if cli.dump_graph {
        eprintln!("{}", autofuse_ir::dump_graph(&graph));
    }
    if cli.dry_run {
        return Ok(());
    }

    let dump = autofuse_ir::dump_graph(&graph);
    match &cli.output {
        Some(path) => {
            std::fs::write(path, dump)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        }
        None => print!("{dump}"),
    }

    Ok(())
}
