//! ActionRunner CLI Entry Point
//!
//! Runs a workflow file through the engine.
//!
//! # Usage
//!
//! ```bash
//! # Execute a workflow
//! actionrunner workflow.yaml
//!
//! # With pause control: the run pauses while the flag file exists
//! actionrunner workflow.yaml /tmp/pause.flag
//!
//! # Override or add variables
//! actionrunner workflow.yaml --var user=alice --var retries=3
//!
//! # Use a specific engine configuration
//! actionrunner workflow.yaml --config engine.yaml
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use colored::Colorize;
use log::{error, info, warn};
use serde_json::Value;

use actionrunner::config::EngineConfig;
use actionrunner::events::{Event, EventType};
use actionrunner::execution::{ContextSource, ExecutionContext, WorkflowEngine, WorkflowStatus};
use actionrunner::variables::{VariableMap, VariableScope};
use actionrunner::workflow::{load_workflow, ActionRegistry};
use actionrunner::{APP_NAME, VERSION};

/// Default workflow file used when none is specified.
const DEFAULT_WORKFLOW: &str = "workflow.yaml";

/// How often the pause flag is checked.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Command-line options parsed from arguments.
#[derive(Debug)]
struct CliOptions {
    workflow_path: String,
    pause_flag_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    run_id: Option<String>,
    variables: VariableMap,
    verbose: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            workflow_path: DEFAULT_WORKFLOW.to_string(),
            pause_flag_path: None,
            config_path: None,
            run_id: None,
            variables: VariableMap::new(),
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Workflow Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: actionrunner [OPTIONS] <WORKFLOW_FILE> [PAUSE_FLAG_PATH]");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to workflow YAML file");
    println!("  [PAUSE_FLAG_PATH]   Optional path for pause/resume control");
    println!();
    println!("Options:");
    println!("  --config PATH       Engine configuration file");
    println!("  --var NAME=VALUE    Set a global variable (JSON, or plain string)");
    println!("  --run-id ID         Use a fixed run id");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  actionrunner checks.yaml");
    println!("  actionrunner checks.yaml /tmp/pause.flag");
    println!("  actionrunner checks.yaml --var user=alice --var limit=10");
}

/// Splits `NAME=VALUE`; the value is read as JSON when possible.
fn parse_variable(assignment: &str) -> Result<(String, Value), String> {
    let (name, raw) = assignment
        .split_once('=')
        .ok_or_else(|| format!("Expected NAME=VALUE, got: {}", assignment))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Missing variable name in: {}", assignment));
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

/// Parses command-line arguments into CLI options.
fn parse_arguments(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                options.verbose = true;
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a path argument".to_string());
                }
                options.config_path = Some(PathBuf::from(&args[i]));
            }
            "--run-id" => {
                i += 1;
                if i >= args.len() {
                    return Err("--run-id requires an id argument".to_string());
                }
                options.run_id = Some(args[i].clone());
            }
            "--var" => {
                i += 1;
                if i >= args.len() {
                    return Err("--var requires a NAME=VALUE argument".to_string());
                }
                let (name, value) = parse_variable(&args[i])?;
                options.variables.insert(name, value);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => options.workflow_path = arg.clone(),
                    1 => options.pause_flag_path = Some(PathBuf::from(arg)),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(options)
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            info!("Engine configuration: {}", path.display());
            EngineConfig::load(path)?
        }
        None => EngineConfig::discover()?,
    };
    Ok(config)
}

/// Prints one line per finished action as events arrive.
fn print_action_event(event: &dyn Event) {
    let Some(action) = event.as_action_event() else {
        return;
    };
    let message = action
        .result
        .as_ref()
        .map(|r| r.message.as_str())
        .unwrap_or_default();

    match action.event_type {
        EventType::ActionCompleted => println!(
            "  {} [{}] {} {}",
            "✓".green(),
            action.action_index,
            action.action_name.bold(),
            message.dimmed()
        ),
        EventType::ActionFailed => println!(
            "  {} [{}] {} {}",
            "✗".red(),
            action.action_index,
            action.action_name.bold(),
            message.red()
        ),
        _ => {}
    }
}

/// One supervision round: waits on the run and applies the pause flag.
///
/// Returns the status seen, or `None` once the run is gone.
fn supervise_step(
    engine: &WorkflowEngine,
    run_id: &str,
    pause_flag: Option<&Path>,
) -> Option<WorkflowStatus> {
    let snapshot = engine.wait_for_workflow(run_id, POLL_INTERVAL)?;
    if snapshot.status.is_terminal() {
        return Some(snapshot.status);
    }

    // A parked run is already settled, so the wait above returns at once
    if snapshot.status == WorkflowStatus::Paused {
        thread::sleep(POLL_INTERVAL);
    }

    if let Some(flag) = pause_flag {
        match (flag.exists(), snapshot.status) {
            (true, WorkflowStatus::Running) => {
                if engine.pause_workflow(run_id) {
                    println!("{}", format!("Paused; remove {} to resume", flag.display()).yellow());
                }
            }
            (false, WorkflowStatus::Paused) => {
                if engine.resume_workflow(run_id) {
                    println!("{}", "Resumed".yellow());
                }
            }
            _ => {}
        }
    }

    Some(snapshot.status)
}

/// Drives the run until it is finished, pausing while the flag file exists.
fn supervise(
    engine: &WorkflowEngine,
    run_id: &str,
    pause_flag: Option<&Path>,
) -> Option<WorkflowStatus> {
    loop {
        let status = supervise_step(engine, run_id, pause_flag)?;
        if status.is_terminal() {
            return Some(status);
        }
    }
}

/// Main application entry point.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let options = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(options.verbose);
    print_banner();

    let config = load_config(options.config_path.as_deref())?;

    info!("Loading workflow: {}", options.workflow_path);
    let definition = load_workflow(&options.workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!(
            "Could not load workflow from '{}': {}",
            options.workflow_path, e
        )
    })?;

    let registry = ActionRegistry::with_builtins();
    let actions = registry.build_all(&definition.steps)?;

    info!(
        "Workflow '{}' loaded: {} steps, {} action types",
        definition.display_name(),
        actions.len(),
        definition.action_types().len()
    );

    let context = ExecutionContext::with_options(config.context);
    for (name, value) in definition.variables.iter().chain(options.variables.iter()) {
        context
            .variables()
            .set_in(name, value.clone(), VariableScope::Global)?;
    }

    if let Some(ref path) = options.pause_flag_path {
        info!("Pause control: {}", path.display());
        if path.exists() {
            warn!("Pause flag already present; the run will pause after its first action");
        }
    }

    let engine = WorkflowEngine::new(config);
    engine.add_listener(None, print_action_event);

    println!();
    let run_id = engine.submit_workflow(
        actions,
        Some(ContextSource::from(context)),
        options.run_id.as_deref(),
    )?;

    let status = supervise(&engine, &run_id, options.pause_flag_path.as_deref())
        .ok_or_else(|| format!("Run '{}' disappeared", run_id))?;

    println!();
    let headline = format!("Workflow {}", status);
    match status {
        WorkflowStatus::Completed => println!("{}", headline.green().bold()),
        _ => println!("{}", headline.red().bold()),
    }

    if let Some(report) = engine.get_workflow_report(&run_id) {
        println!();
        println!("{}", report);
    }

    engine.shutdown();
    Ok(status == WorkflowStatus::Completed)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
