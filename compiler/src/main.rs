use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tfc::pass::PassId;
use tfc::pipeline::{self, CompilationState, Options, PipelineError};
use tfc::resolve::Define;
use tfc::visitor::Target;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Json,
    Code,
    Graph,
    Dot,
    Ast,
}

#[derive(Parser, Debug)]
#[command(
    name = "tfc",
    version,
    about = "Task Flow Compiler: discovers task hierarchies in annotated C++ and extracts their dataflow graphs"
)]
struct Cli {
    /// Input C++ translation unit
    source: PathBuf,

    /// Name of the root task
    #[arg(long)]
    top: String,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Json)]
    emit: EmitStage,

    /// Backend target (xilinx-hls, generic)
    #[arg(long, default_value_t = Target::XilinxHls)]
    target: Target,

    /// Constant override, as NAME=VALUE (repeatable)
    #[arg(short = 'D', value_name = "NAME=VALUE")]
    define: Vec<Define>,

    /// Treat unfoldable port widths as errors
    #[arg(long)]
    strict_widths: bool,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("tfc: error: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "tfc=debug" } else { "tfc=warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if cli.verbose {
        eprintln!("tfc: source = {}", cli.source.display());
        eprintln!("tfc: top    = {}", cli.top);
        eprintln!("tfc: target = {}", cli.target);
        eprintln!("tfc: emit   = {:?}", cli.emit);
    }

    // ── Read and parse source ──
    let source = std::fs::read_to_string(&cli.source)
        .with_context(|| format!("cannot read {}", cli.source.display()))?;
    let path = cli.source.display().to_string();

    let parsed = pipeline::parse_source(&source);
    for diag in &parsed.diagnostics {
        eprintln!("{}", diag.render(&path, &source));
    }
    let unit = match parsed.unit {
        Some(unit) if parsed.diagnostics.is_empty() => unit,
        _ => return Ok(ExitCode::from(1)),
    };
    if cli.verbose {
        eprintln!("tfc: parsed {} items", unit.items.len());
    }
    if let EmitStage::Ast = cli.emit {
        write_output(cli.output.as_deref(), &format!("{unit:#?}\n"))?;
        return Ok(ExitCode::SUCCESS);
    }

    // ── Run passes ──
    let options = Options {
        top: cli.top.clone(),
        target: cli.target,
        defines: cli.define.clone(),
        strict_widths: cli.strict_widths,
        verbose: cli.verbose,
    };
    let terminal = match cli.emit {
        EmitStage::Graph => PassId::Discover,
        _ => PassId::Classify,
    };
    let mut state = CompilationState::new(&source, &unit);
    let result = pipeline::run_pipeline(&mut state, terminal, &options, |_, diags| {
        for diag in diags {
            eprintln!("{}", diag.render(&path, &source));
        }
    });
    match result {
        Ok(()) => {}
        Err(PipelineError::Diagnostics { .. }) => return Ok(ExitCode::from(1)),
        Err(err) => {
            eprintln!("tfc: error: {err}");
            return Ok(ExitCode::from(1));
        }
    }

    // ── Emit ──
    let graph = state
        .graph
        .as_ref()
        .context("internal: task graph missing after discovery")?;
    let text = match cli.emit {
        EmitStage::Graph => {
            let index = state
                .index
                .as_ref()
                .context("internal: program index missing after discovery")?;
            to_json(&tfc::emit::graph(graph, index))?
        }
        EmitStage::Json | EmitStage::Code | EmitStage::Dot => {
            let registry = state
                .registry
                .as_ref()
                .context("internal: task registry missing after classification")?;
            match cli.emit {
                EmitStage::Json => to_json(&tfc::emit::bundle(
                    &options.top,
                    options.target,
                    &state.provenance,
                    graph,
                    registry,
                ))?,
                EmitStage::Code => tfc::emit::code(&source, registry),
                _ => tfc::dot::emit_dot(graph, registry),
            }
        }
        EmitStage::Ast => unreachable!("ast is emitted before the pass runner"),
    };
    write_output(cli.output.as_deref(), &text)?;

    if cli.verbose {
        eprintln!("tfc: {} tasks, {} diagnostics", graph.order.len(), state.diagnostics.len());
    }
    Ok(ExitCode::SUCCESS)
}

fn to_json(value: &serde_json::Value) -> Result<String> {
    let mut text = serde_json::to_string_pretty(value).context("cannot serialize output")?;
    text.push('\n');
    Ok(text)
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("cannot write {}", path.display())),
        None => std::io::stdout()
            .lock()
            .write_all(text.as_bytes())
            .context("cannot write to stdout"),
    }
}
