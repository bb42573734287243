use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use autosmp_governor::config::DaemonPaths;
use autosmp_governor::constants::DEFAULT_CONFIG_PATH;
use autosmp_governor::cpu::{CoreExecutor, SysfsCores};
use autosmp_governor::freq::SysfsFrequency;
use autosmp_governor::power::{PowerEvent, StateNotifier};
use autosmp_governor::stats::{CycleReport, StatsWriter, write_stats_file};
use autosmp_governor::{Controller, GovernorConfig};
use clap::Parser;
use log::{error, info, warn};
use toml::Table;
use watch::WatchReceiver;

/// Brings CPU cores online when every online core runs fast and takes the
/// slowest one offline when every online core is idle.
///
/// Tunables can be read and written on stdin: `ramp_up_percent` prints the
/// value, `ramp_up_percent=90` sets it. `stats` prints hotplug statistics,
/// `suspend` and `resume` simulate display power transitions.
#[derive(Debug, Parser)]
#[command(version)]
struct Opts {
    /// TOML configuration file.
    #[clap(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Start with the governor disabled.
    #[clap(long)]
    disabled: bool,

    /// Keep a JSON snapshot of hotplug statistics in this file.
    #[clap(long)]
    stats: Option<PathBuf>,

    /// Root of the sysfs cpu hierarchy.
    #[clap(long)]
    sysfs: Option<PathBuf>,

    /// Do not read tuning commands from stdin.
    #[clap(long)]
    no_console: bool,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    simplelog::TermLogger::init(
        llv,
        simplelog::ConfigBuilder::new()
            .set_time_offset_to_local()
            .unwrap_or_else(|builder| builder)
            .set_time_level(simplelog::LevelFilter::Error)
            .set_location_level(simplelog::LevelFilter::Off)
            .set_target_level(simplelog::LevelFilter::Off)
            .set_thread_level(simplelog::LevelFilter::Off)
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let config = read_config(&opts.config)?;
    let mut paths = DaemonPaths::from_table(&config);
    if let Some(sysfs) = opts.sysfs {
        paths.sysfs = sysfs;
    }
    if opts.stats.is_some() {
        paths.stats = opts.stats;
    }

    let cores = Arc::new(SysfsCores::new(&paths.sysfs));
    let possible = cores
        .possible_cores()
        .context("failed to enumerate possible cores")?;
    let mut governor = GovernorConfig::from_table(&config, possible.len());
    if opts.disabled {
        governor.enabled = false;
    }

    let notifier = Arc::new(StateNotifier::new());
    let (send, recv) = watch::channel(CycleReport::default());
    let controller = Arc::new(Controller::new(
        governor,
        cores,
        Arc::new(SysfsFrequency::new(&paths.sysfs)),
        Some(notifier.clone()),
        Some(send),
    )?);

    if let Err(e) = controller.start_if_enabled() {
        error!("{e}, staying disabled until enabled=1");
    }

    if let Some(path) = &paths.stats {
        spawn_stats_writer(controller.clone(), recv, path.clone())?;
    }
    if !opts.no_console {
        spawn_console(controller.clone(), notifier)?;
    }

    let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("Error setting Ctrl-C handler")?;
    let _ = shutdown_rx.recv();

    info!("shutting down");
    controller.shutdown();
    if let Some(path) = &paths.stats {
        write_stats_file(path, &controller.stats())?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<Table> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} not found, using defaults", path.display());
            String::new()
        }
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    text.parse::<Table>()
        .with_context(|| format!("failed to parse {}", path.display()))
}

/// Refresh the stats file whenever the topology changes
fn spawn_stats_writer(
    controller: Arc<Controller>,
    mut recv: WatchReceiver<CycleReport>,
    path: PathBuf,
) -> Result<()> {
    let mut writer = StatsWriter::new(path);
    writer.refresh(&controller.stats())?;
    thread::Builder::new()
        .name("stats".to_string())
        .spawn(move || {
            loop {
                recv.wait();
                if let Err(e) = writer.refresh(&controller.stats()) {
                    warn!("failed to write stats: {e}");
                }
            }
        })?;
    Ok(())
}

fn spawn_console(controller: Arc<Controller>, notifier: Arc<StateNotifier>) -> Result<()> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if let Err(e) = handle_command(&controller, &notifier, line.trim()) {
                    eprintln!("{e}");
                }
            }
        })?;
    Ok(())
}

fn handle_command(controller: &Controller, notifier: &StateNotifier, line: &str) -> Result<()> {
    match line {
        "" => {}
        "stats" => println!("{}", serde_json::to_string_pretty(&controller.stats())?),
        "suspend" | "resume" => {
            let event = line.parse::<PowerEvent>()?;
            if !notifier.notify(event) {
                println!("already in {event:?} state");
            }
        }
        _ => match line.split_once('=') {
            Some((key, value)) => controller.write_tunable(key, value)?,
            None => print!("{}", controller.read_tunable(line)?),
        },
    }
    Ok(())
}
