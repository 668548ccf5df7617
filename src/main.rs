//! Halldyll CLI entrypoint.
//!
//! This is the main entrypoint for the halldyll command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use halldyll_orchestrator::addrs::ResourceInstanceAddr;
use halldyll_orchestrator::cli::{Cli, Commands, GraphKindArg, OutputFormatter, PlanArgs, StateCommands};
use halldyll_orchestrator::config::{ConfigParser, find_config_file};
use halldyll_orchestrator::diagnostics::Diagnostics;
use halldyll_orchestrator::error::Result;
use halldyll_orchestrator::graph::{InterruptHandle, InterruptLevel};
use halldyll_orchestrator::operation::{read_state, run_apply, run_plan};
use halldyll_orchestrator::orchestrator::{ApplyOptions, Orchestrator};
use halldyll_orchestrator::plans::{Plan, PlanMode};
use halldyll_orchestrator::provider::ProviderFactory;
use halldyll_orchestrator::state::{LocalStateStore, StateStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything a command needs: configuration, state store and orchestrator.
struct Workspace {
    orchestrator: Orchestrator,
    store: Box<dyn StateStore>,
    formatter: OutputFormatter,
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let workspace = load_workspace(cli.config.as_deref(), cli.state.as_deref(), OutputFormatter::new(cli.output))?;
    watch_interrupts(workspace.orchestrator.interrupt_handle().clone());

    match cli.command {
        Commands::Validate => cmd_validate(&workspace).await,
        Commands::Plan { destroy, out, plan } => cmd_plan(&workspace, destroy, out.as_deref(), &plan).await,
        Commands::Apply { plan_file, yes, plan } => {
            cmd_apply(&workspace, plan_file.as_deref(), yes, &plan).await
        }
        Commands::Destroy { yes, plan } => cmd_destroy(&workspace, yes, &plan).await,
        Commands::Graph { kind, plan } => cmd_graph(&workspace, kind, &plan).await,
        Commands::State { command } => cmd_state(&workspace, command).await,
        Commands::ForceUnlock { lock_id, yes } => cmd_force_unlock(&workspace, &lock_id, yes).await,
    }
}

/// Validate the configuration.
async fn cmd_validate(ws: &Workspace) -> Result<ExitCode> {
    let diags = ws.orchestrator.validate().await;
    report(&ws.formatter, &diags);

    if diags.has_errors() {
        return Ok(ExitCode::FAILURE);
    }
    eprintln!("✓ Configuration is valid");
    Ok(ExitCode::SUCCESS)
}

/// Show the changes an apply would make.
async fn cmd_plan(ws: &Workspace, destroy: bool, out: Option<&Path>, args: &PlanArgs) -> Result<ExitCode> {
    let mode = if destroy { PlanMode::Destroy } else { PlanMode::Normal };
    let options = args.to_options(mode)?;

    let (plan, diags) = run_plan(ws.store.as_ref(), &ws.orchestrator, &options).await?;
    report(&ws.formatter, &diags);

    let Some(plan) = plan else {
        return Ok(ExitCode::FAILURE);
    };
    emit(&ws.formatter.format_plan(&plan))?;

    if let Some(path) = out {
        plan.save(path)?;
        eprintln!("Saved plan to {}", path.display());
        eprintln!("Run 'halldyll apply {}' to apply it.", path.display());
    }

    Ok(exit_code(&diags))
}

/// Apply a saved plan, or plan and apply.
async fn cmd_apply(ws: &Workspace, plan_file: Option<&Path>, auto_approve: bool, args: &PlanArgs) -> Result<ExitCode> {
    let plan = if let Some(path) = plan_file {
        debug!("Loading plan from {}", path.display());
        Plan::load(path)?
    } else {
        let options = args.to_options(PlanMode::Normal)?;
        let (plan, diags) = run_plan(ws.store.as_ref(), &ws.orchestrator, &options).await?;
        report(&ws.formatter, &diags);
        let Some(plan) = plan else {
            return Ok(ExitCode::FAILURE);
        };
        plan
    };

    if !plan.has_changes() {
        eprintln!("No changes to apply.");
        return Ok(ExitCode::SUCCESS);
    }

    // Show plan
    emit(&ws.formatter.format_plan(&plan))?;

    // Confirm
    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    apply(ws, &plan, args.parallelism).await
}

/// Destroy everything recorded in state.
async fn cmd_destroy(ws: &Workspace, auto_approve: bool, args: &PlanArgs) -> Result<ExitCode> {
    let options = args.to_options(PlanMode::Destroy)?;
    let (plan, diags) = run_plan(ws.store.as_ref(), &ws.orchestrator, &options).await?;
    report(&ws.formatter, &diags);

    let Some(plan) = plan else {
        return Ok(ExitCode::FAILURE);
    };
    if !plan.has_changes() {
        eprintln!("Nothing to destroy.");
        return Ok(ExitCode::SUCCESS);
    }
    emit(&ws.formatter.format_plan(&plan))?;

    if !auto_approve {
        eprintln!("⚠️  This will destroy every resource listed above.");
        if !confirm("Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destroy cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    apply(ws, &plan, args.parallelism).await
}

/// Runs an apply and reports its outcome.
async fn apply(ws: &Workspace, plan: &Plan, parallelism: usize) -> Result<ExitCode> {
    let options = ApplyOptions { parallelism };
    let result = run_apply(ws.store.as_ref(), &ws.orchestrator, plan, &options).await?;

    report(&ws.formatter, &result.diagnostics);
    emit(&ws.formatter.format_apply(&result))?;

    if result.is_success() {
        info!("Apply finished at state serial {}", result.file.serial);
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Print an operation's graph in DOT format.
async fn cmd_graph(ws: &Workspace, kind: GraphKindArg, args: &PlanArgs) -> Result<ExitCode> {
    let mode = if matches!(kind, GraphKindArg::Destroy) {
        PlanMode::Destroy
    } else {
        PlanMode::Normal
    };
    let options = args.to_options(mode)?;
    let file = read_state(ws.store.as_ref()).await?;

    let (graph, diags) = ws.orchestrator.graph(kind.into(), &file.state, &options).await;
    report(&ws.formatter, &diags);

    let Some(graph) = graph else {
        return Ok(ExitCode::FAILURE);
    };
    emit(&graph.to_dot("halldyll"))?;
    Ok(exit_code(&diags))
}

/// Inspect state.
async fn cmd_state(ws: &Workspace, command: StateCommands) -> Result<ExitCode> {
    let file = read_state(ws.store.as_ref()).await?;

    match command {
        StateCommands::List => {
            emit(&ws.formatter.format_state_list(&file.state))?;
        }
        StateCommands::Show { address } => {
            let addr: ResourceInstanceAddr = address.parse()?;
            let Some(instance) = file.state.resource_instance(&addr) else {
                eprintln!("No instance {addr} in state.");
                return Ok(ExitCode::FAILURE);
            };
            emit(&ws.formatter.format_instance(&addr, instance))?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Remove a stale state lock.
async fn cmd_force_unlock(ws: &Workspace, lock_id: &str, auto_approve: bool) -> Result<ExitCode> {
    if let Some(info) = ws.store.lock_info().await? {
        eprintln!("Current lock: {info}");
    } else {
        eprintln!("State is not locked.");
        return Ok(ExitCode::SUCCESS);
    }

    if !auto_approve {
        eprintln!("⚠️  Removing a lock held by a running operation can corrupt state.");
        if !confirm("Do you want to force-unlock? [y/N]: ", "y")? {
            eprintln!("Force-unlock cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    ws.store.force_unlock(lock_id).await?;
    eprintln!("✓ Lock {lock_id} removed");
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helpers
// ============================================================================

/// Loads configuration and creates the state store and orchestrator.
fn load_workspace(config_path: Option<&Path>, state_path: Option<&Path>, formatter: OutputFormatter) -> Result<Workspace> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let base_dir = config_file.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let parser = ConfigParser::new().with_base_path(base_dir.clone());
    parser.load_dotenv()?;
    let config = parser.load_file(&config_file)?;

    let store = state_path.map_or_else(
        || LocalStateStore::with_base_dir(base_dir.join(".halldyll")),
        LocalStateStore::with_state_path,
    );
    debug!("Using state file: {}", store.state_path().display());

    Ok(Workspace {
        orchestrator: Orchestrator::new(config, ProviderFactory::builtin()),
        store: Box::new(store),
        formatter,
    })
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => find_config_file(std::env::current_dir()?),
    }
}

/// Feeds Ctrl-C presses into the interrupt handle: the first stops
/// dispatching, the second abandons running operations.
fn watch_interrupts(handle: InterruptHandle) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match handle.interrupt() {
                InterruptLevel::Stop => {
                    warn!("Interrupt received, waiting for running operations to finish");
                    warn!("Press Ctrl-C again to abandon them");
                }
                InterruptLevel::Fatal => {
                    warn!("Second interrupt received, abandoning running operations");
                }
                InterruptLevel::None => {}
            }
        }
    });
}

/// Prints diagnostics to stderr.
fn report(formatter: &OutputFormatter, diags: &Diagnostics) {
    let output = formatter.format_diagnostics(diags);
    if !output.is_empty() {
        eprintln!("{output}");
    }
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{output}")?;
    Ok(())
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

fn exit_code(diags: &Diagnostics) -> ExitCode {
    if diags.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
