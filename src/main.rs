//! Stepflow CLI Entry Point
//!
//! Runs a small demonstration flow through the engine.
//!
//! # Usage
//!
//! ```bash
//! # Count down from 5 with the default 50 ms tick
//! stepflow
//!
//! # Load engine options from a file
//! stepflow --config engine.yaml
//!
//! # Faster ticks, longer countdown, stopped early
//! stepflow --tick 10 --count 100 --stop-after 300
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use log::{debug, error, info, warn};

use stepflow::config::{load_config, EngineConfig};
use stepflow::execution::Outcome;
use stepflow::{Context, Engine, Flow, FlowRef, Next, Step, APP_NAME, VERSION};

/// Countdown start used when none is specified.
const DEFAULT_COUNT: u64 = 5;

/// Name of the demonstration flow.
const DEMO_FLOW: &str = "countdown";

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    config_path: Option<PathBuf>,
    tick_ms: Option<u64>,
    count: Option<u64>,
    stop_after: Option<Duration>,
    verbose: bool,
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
    println!("{} v{}", APP_NAME, VERSION);
    println!("Tick-driven Step Flow Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: stepflow [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config PATH       Load engine options from a YAML or JSON file");
    println!("  --tick MS           Tick period in milliseconds (overrides config)");
    println!("  --count N           Countdown start (default: {})", DEFAULT_COUNT);
    println!("  --stop-after MS     Stop the run after this many milliseconds");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  stepflow --count 3");
    println!("  stepflow --config engine.yaml --stop-after 200");
}

/// Reads the value following an option.
fn option_value<'a>(args: &'a [String], i: &mut usize, option: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", option))
}

fn parse_number(option: &str, value: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", option, value))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
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
                config.verbose = true;
            }
            "--config" => {
                let value = option_value(args, &mut i, "--config")?;
                config.config_path = Some(PathBuf::from(value));
            }
            "--tick" => {
                let value = option_value(args, &mut i, "--tick")?;
                let tick = parse_number("--tick", value)?;
                if tick == 0 {
                    return Err("--tick must be at least 1".to_string());
                }
                config.tick_ms = Some(tick);
            }
            "--count" => {
                let value = option_value(args, &mut i, "--count")?;
                config.count = Some(parse_number("--count", value)?);
            }
            "--stop-after" => {
                let value = option_value(args, &mut i, "--stop-after")?;
                config.stop_after = Some(Duration::from_millis(parse_number("--stop-after", value)?));
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Builds the demonstration flow: a step that jumps back to itself until
/// the counter in the context reaches zero.
fn countdown_flow(tick: Duration) -> stepflow::Result<Flow> {
    let tick_step: Step = Step::sync("tick", |call| {
        let remaining = call
            .context
            .get("remaining")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        if remaining == 0 {
            return Ok(Next::Continue);
        }

        info!("{}...", remaining);
        call.context.insert("remaining", remaining - 1);
        Ok(Next::name("tick"))
    });

    let liftoff: Step = Step::sync("liftoff", |call| {
        debug!("Reached '{}'", call.step_name());
        info!("Liftoff!");
        Ok(Next::Continue)
    });

    Flow::new(DEMO_FLOW)
        .with_tick(tick)
        .with_steps(vec![tick_step, liftoff])
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    // Load engine options
    let mut engine_config = match config.config_path {
        Some(ref path) => load_config(path).map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })?,
        None => EngineConfig::default(),
    };

    if let Some(tick_ms) = config.tick_ms {
        engine_config.tick_ms = tick_ms;
    }

    let mut engine = Engine::from_config(&engine_config);
    let flow = countdown_flow(engine.tick())?;
    engine.add_flow(flow)?;

    let count = config.count.unwrap_or(DEFAULT_COUNT);
    let mut context = Context::new();
    context.insert("remaining".to_string(), count.into());

    info!(
        "Engine '{}': counting down from {} every {} ms",
        engine.name(),
        count,
        engine_config.tick_ms
    );

    let handle = engine.dispatch(FlowRef::named(DEMO_FLOW), context)?;
    let timeline = handle.timeline();

    if let Some(delay) = config.stop_after {
        let stop = handle.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            warn!("Stopping after {} ms", delay.as_millis());
            stop.stop(format!("stopped after {} ms", delay.as_millis()));
        });
    }

    let outcome = handle.wait().await?;

    println!("{}", timeline.summary());
    match outcome {
        Outcome::Succeeded => info!("Flow '{}' completed", DEMO_FLOW),
        Outcome::Stopped(value) => warn!("Flow '{}' stopped: {}", DEMO_FLOW, value),
        Outcome::Recovered { error } => warn!("Flow '{}' recovered from: {}", DEMO_FLOW, error),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
