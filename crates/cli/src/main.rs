use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use keel_compile::{install, ChartConfig, CompilerConfig, DeploymentCompiler, Values};
use keel_core::{ApplicationSpec, EnvironmentSpec};
use keel_procfile::Procfile;
use keel_rollout::{spawn_canary, CancellationRegistry, CanaryStepper, Clock, ManualClock, SystemClock, TickOutcome, TrafficSplit};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

mod fsio;

use fsio::{DirInstaller, DirTemplateReader};

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel deployment compiler")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a process file and show the routable process
    Procfile {
        path: PathBuf,
    },
    /// Compile an application spec into its chart value tree
    Compile {
        /// Application spec (YAML or JSON)
        #[arg(long = "app")]
        app: PathBuf,
        /// Target environment spec; a bare default environment when omitted
        #[arg(long = "env")]
        env: Option<PathBuf>,
    },
    /// Compile and write a chart directory
    Package {
        #[arg(long = "app")]
        app: PathBuf,
        #[arg(long = "env")]
        env: Option<PathBuf>,
        /// Directory holding one template set per ingress type
        #[arg(long = "templates")]
        templates: PathBuf,
        /// Output directory; the chart lands in <out>/<app name>
        #[arg(long = "out", default_value = ".")]
        out: PathBuf,
    },
    /// Step the application's canary between its two deployments
    Canary {
        #[arg(long = "app")]
        app: PathBuf,
        /// Follow the wall clock instead of simulating the schedule
        #[arg(long = "live", action = ArgAction::SetTrue)]
        live: bool,
        /// Poll period in seconds when live
        #[arg(long = "tick", default_value_t = 1)]
        tick: u64,
    },
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

/// YAML is a superset of JSON, so one reader covers both.
fn read_spec<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn read_env(path: Option<&Path>) -> Result<EnvironmentSpec> {
    match path {
        Some(p) => read_spec(p),
        None => Ok(EnvironmentSpec { name: "default".to_string(), ..Default::default() }),
    }
}

#[derive(Serialize)]
struct Compiled<'a> {
    chart: ChartConfig,
    values: &'a Values,
}

fn print_structured<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn print_values_human(chart: &ChartConfig, values: &Values) {
    println!("app {} • chart {} • {} deployment(s)", values.app.name, chart.version, values.app.deployments.len());
    for dep in &values.app.deployments {
        println!("  v{} • {} • weight {}", dep.version, dep.image, dep.routing_settings.weight);
        for p in &dep.processes {
            let ports: Vec<String> = p.container_ports.iter().map(|c| c.container_port.to_string()).collect();
            let marker = if p.routable { " (routable)" } else { "" };
            println!("    {}{} • units {} • ports [{}]", p.name, marker, p.units, ports.join(","));
        }
    }
    for http in &values.app.ingress.http {
        println!("  http  {}", http);
    }
    for https in &values.app.ingress.https {
        println!("  https {} • secret {}", https.cname, https.secret_name);
    }
}

fn print_split(output: Output, label: &str, split: TrafficSplit) -> Result<()> {
    match output {
        Output::Human => println!("{:<10} old {:>3} • new {:>3}", label, split.old, split.new),
        Output::Json => println!("{}", serde_json::to_string(&split)?),
        Output::Yaml => print!("---\n{}", serde_yaml::to_string(&split)?),
    }
    Ok(())
}

/// Walk the schedule on a manual clock; no waiting.
fn simulate_canary(output: Output, app: &ApplicationSpec) -> Result<CanaryStepper> {
    let Some(spec) = app.canary.as_ref() else { bail!("application {} has no canary section", app.name) };
    let clock = ManualClock::new(chrono::Utc::now());
    let mut stepper = CanaryStepper::new();
    stepper.activate(spec, clock.now())?;
    print_split(output, "start", stepper.split())?;
    let interval = chrono::Duration::seconds(i64::try_from(spec.step_interval_seconds).unwrap_or(i64::MAX).min(86_400 * 365));
    loop {
        clock.advance(interval);
        match stepper.tick(clock.now()) {
            TickOutcome::Advanced { step, split } => print_split(output, &format!("step {}", step), split)?,
            TickOutcome::Completed { split } => {
                print_split(output, "complete", split)?;
                break;
            }
            TickOutcome::Skipped { .. } => continue,
            TickOutcome::Idle => break,
        }
    }
    Ok(stepper)
}

async fn run_live_canary(output: Output, app: &ApplicationSpec, tick: u64) -> Result<CanaryStepper> {
    let Some(spec) = app.canary.as_ref() else { bail!("application {} has no canary section", app.name) };
    let registry = CancellationRegistry::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut run = spawn_canary(&registry, app.name.clone(), spec, clock, Duration::from_secs(tick.max(1)))?;
    print_split(output, "start", *run.splits.borrow())?;
    loop {
        tokio::select! {
            changed = run.splits.changed() => {
                if changed.is_err() { break; }
                let split = *run.splits.borrow_and_update();
                print_split(output, "step", split)?;
            }
            _ = signal::ctrl_c() => {
                warn!(app = %app.name, "interrupted; cancelling canary");
                run.cleanup.invoke();
                break;
            }
        }
    }
    Ok(run.handle.await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let compiler = DeploymentCompiler::new(CompilerConfig::from_env());

    match cli.command {
        Commands::Procfile { path } => {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let procfile = Procfile::parse(&raw)?;
            match cli.output {
                Output::Human => {
                    for (name, cmd) in &procfile.processes {
                        let marker = if procfile.is_routable(name) { " (routable)" } else { "" };
                        println!("{}{} • {}", name, marker, cmd.join(" "));
                    }
                }
                other => print_structured(other, &procfile)?,
            }
        }
        Commands::Compile { app, env } => {
            let app: ApplicationSpec = read_spec(&app)?;
            let env = read_env(env.as_deref())?;
            let values = compiler.compile(&app, &env)?;
            let chart = compiler.chart_config(&app);
            match cli.output {
                Output::Human => print_values_human(&chart, &values),
                other => print_structured(other, &Compiled { chart, values: &values })?,
            }
        }
        Commands::Package { app, env, templates, out } => {
            let app: ApplicationSpec = read_spec(&app)?;
            let env = read_env(env.as_deref())?;
            let package = compiler.build_package(&app, &env, &DirTemplateReader::new(templates))?;
            let installer = DirInstaller::new(out);
            install(&package, &installer)?;
            let dir = installer.chart_dir(&package);
            match cli.output {
                Output::Human => println!("wrote {} ({} template file(s))", dir.display(), package.templates.len()),
                other => print_structured(other, &package.chart)?,
            }
        }
        Commands::Canary { app, live, tick } => {
            let mut spec: ApplicationSpec = read_spec(&app)?;
            let stepper = if live { run_live_canary(cli.output, &spec, tick).await? } else { simulate_canary(cli.output, &spec)? };
            match stepper.apply_to(&mut spec) {
                Ok(()) => info!(app = %spec.name, old = stepper.split().old, new = stepper.split().new, "final routing weights"),
                Err(e) => warn!(error = %e, "weights not applied"),
            }
        }
    }
    Ok(())
}
