use clap::{Parser, Subcommand};
use pilotc::dag::visualizer::render_execution_plan;
use pilotc::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Compile Logical IR documents into validated workflow step graphs
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile an IR document (or a technical workflow) into workflow steps
    Compile {
        /// Path to the IR JSON file
        ir_path: PathBuf,
        /// Path to the capability catalog JSON file
        #[arg(short, long)]
        catalog: PathBuf,
        /// Treat the input as a technical workflow and normalize it first
        #[arg(short, long)]
        technical: bool,
        /// Optional configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the output envelope here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the execution plan after a successful compilation
        #[arg(short, long)]
        plan: bool,
    },
    /// Validate a JSON array of workflow steps as a DAG
    Validate {
        /// Path to the step list JSON file
        steps_path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Compile {
            ir_path,
            catalog,
            technical,
            config,
            output,
            plan,
        } => run_compile(ir_path, catalog, technical, config, output, plan),
        Command::Validate { steps_path } => run_validate(steps_path),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_compile(
    ir_path: PathBuf,
    catalog_path: PathBuf,
    technical: bool,
    config_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    print_plan: bool,
) {
    let total_start = Instant::now();

    // --- 1. File Loading ---
    let load_start = Instant::now();
    let config = match &config_path {
        Some(path) => Config::from_file(&path.to_string_lossy())
            .unwrap_or_else(|e| exit_with_error(&format!("Failed to load config: {}", e))),
        None => Config::default(),
    };
    let catalog = InMemoryCatalog::from_file(&catalog_path.to_string_lossy())
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to load catalog: {}", e)));
    let input = read_file(&ir_path);
    let load_duration = load_start.elapsed();

    // --- 2. Parsing and Normalization ---
    let ir = if technical {
        let workflow: TechnicalWorkflow = serde_json::from_str(&input).unwrap_or_else(|e| {
            exit_with_error(&format!("Failed to parse technical workflow JSON: {}", e))
        });
        workflow
            .into_logical_ir()
            .unwrap_or_else(|e| exit_with_error(&format!("Failed to normalize workflow: {}", e)))
    } else {
        LogicalIr::from_json(&input).unwrap_or_else(|e| exit_with_error(&e.to_string()))
    };

    // --- 3. Compilation ---
    let compile_start = Instant::now();
    let compiler = Compiler::builder(Arc::new(catalog))
        .with_config(config.compiler)
        .build();
    let output = compiler.compile(&ir);
    let compile_duration = compile_start.elapsed();

    let json = output
        .to_json_pretty()
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to serialize output: {}", e)));
    match &output_path {
        Some(path) => fs::write(path, &json).unwrap_or_else(|e| {
            exit_with_error(&format!("Failed to write '{}': {}", path.display(), e))
        }),
        None => println!("{}", json),
    }

    if let (true, Some(workflow)) = (print_plan, output.workflow()) {
        eprintln!(
            "\n{}",
            render_execution_plan(
                &workflow.dsl_wrapper.agent_name,
                &workflow.workflow_steps,
                &workflow.execution_plan
            )
        );
    }

    // --- 4. Summary ---
    let total_duration = total_start.elapsed();
    eprintln!("\n--- Performance Summary ---");
    eprintln!("File Loading:         {:?}", load_duration);
    eprintln!("Compilation:          {:?}", compile_duration);
    eprintln!("-----------------------------");
    eprintln!("Total Execution:      {:?}", total_duration);

    if !output.is_success() {
        std::process::exit(2);
    }
}

fn run_validate(steps_path: PathBuf) {
    let steps: Vec<WorkflowStep> = serde_json::from_str(&read_file(&steps_path))
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to parse step list JSON: {}", e)));

    match DagValidator::default().validate(&steps) {
        DagValidation::Valid { analysis, warnings } => {
            println!("{}", render_execution_plan("step list", &steps, &analysis));
            for warning in &warnings {
                println!("warning[{}]: {}", warning.code(), warning);
            }
        }
        DagValidation::Invalid { errors } => {
            for error in &errors {
                eprintln!("error[{}]: {}", error.code(), error);
            }
            std::process::exit(2);
        }
    }
}

fn read_file(path: &PathBuf) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        exit_with_error(&format!("Failed to read '{}': {}", path.display(), e))
    })
}

fn exit_with_error(message: &str) -> ! {
    eprintln!("\nError: {}", message);
    std::process::exit(1);
}
