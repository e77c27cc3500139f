use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use hn_core::SchedulerClock;
use hn_project::{ComponentDef, ProjectError, load_yaml};
use hn_sim::{Site, SimError};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Sim(#[from] SimError),
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "hn-cli")]
#[command(about = "heatnet CLI - thermal network edge controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a site file
    Validate {
        /// Path to the site YAML file
        site_path: PathBuf,
    },
    /// List the components and controllers of a site
    Show {
        /// Path to the site YAML file
        site_path: PathBuf,
    },
    /// Run the site's controllers for a number of cycles
    Run {
        /// Path to the site YAML file
        site_path: PathBuf,
        /// Number of scheduling cycles
        #[arg(short, long, default_value_t = 20)]
        cycles: u64,
        /// Pace cycles at the site's cycle period on the wall clock
        #[arg(long)]
        realtime: bool,
        /// Only print the final cycle
        #[arg(short, long)]
        quiet: bool,
    },
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { site_path } => cmd_validate(&site_path),
        Commands::Show { site_path } => cmd_show(&site_path),
        Commands::Run {
            site_path,
            cycles,
            realtime,
            quiet,
        } => cmd_run(&site_path, cycles, realtime, quiet),
    }
}

fn cmd_validate(site_path: &Path) -> CliResult<()> {
    println!("Validating site: {}", site_path.display());
    let site = load_yaml(site_path)?;
    // building catches what structural validation can't: bad timer or
    // threshold settings inside components
    Site::from_def(&site)?;
    println!("✓ Site is valid");
    Ok(())
}

fn cmd_show(site_path: &Path) -> CliResult<()> {
    let site = load_yaml(site_path)?;
    println!("{} (cycle period {} ms)", site.name, site.cycle_period_ms);

    println!("Components:");
    for c in &site.components {
        let detail = match c {
            ComponentDef::Thermometer { reading, .. } => match reading {
                Some(t) => format!("thermometer, reads {t}"),
                None => "thermometer, no reading".to_string(),
            },
            ComponentDef::ThermalUnit(u) => format!("thermal unit, {:?}", u.capability),
            ComponentDef::Actuator(a) => format!("actuator at {}", a.position),
            ComponentDef::ThresholdThermometer(t) => {
                format!("threshold thermometer following {}", t.reference_id)
            }
        };
        println!("  {} - {}", c.id(), detail);
    }

    println!("Controllers:");
    for o in &site.orchestrators {
        println!("  {} - orchestrator over {}", o.id, o.unit_ids.join(", "));
    }
    for d in &site.decentralized {
        println!("  {} - decentralized {:?} on {}", d.id, d.kind, d.actuator_id);
    }
    for h in &site.hydraulics {
        println!("  {} - hydraulic {:?} on {}", h.id, h.control_type, h.actuator_id);
    }
    if !site.events.is_empty() {
        println!("Scripted events: {}", site.events.len());
    }
    Ok(())
}

fn cmd_run(site_path: &Path, cycles: u64, realtime: bool, quiet: bool) -> CliResult<()> {
    let def = load_yaml(site_path)?;
    let period = Duration::from_millis(def.cycle_period_ms);
    let clock = if realtime {
        SchedulerClock::wall()
    } else {
        SchedulerClock::simulated(period)
    };
    let mut site = Site::from_def_with_clock(&def, clock)?;
    info!(site = site.name(), cycles, realtime, "running");

    let mut rejected = 0;
    for n in 0..cycles {
        let report = site.run_cycle();
        rejected += report.rejected_events;
        if !quiet || n + 1 == cycles {
            println!("{report}");
        }
        if realtime {
            std::thread::sleep(period);
        }
    }

    println!("✓ {} cycles run", site.cycles_run());
    if rejected > 0 {
        println!("  {rejected} event(s) rejected, see log");
    }
    Ok(())
}
