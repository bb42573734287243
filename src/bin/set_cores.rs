use std::io::{Error as IoError, ErrorKind};

use autosmp_governor::GovernorConfig;
use autosmp_governor::config::DaemonPaths;
use autosmp_governor::constants::DEFAULT_CONFIG_PATH;
use autosmp_governor::cpu::{CoreExecutor, SysfsCores, online_mask};
use autosmp_governor::governor::REFERENCE_CORE;
use toml::Table;

fn main() -> anyhow::Result<()> {
    // Parse arguments: program <count> [config]
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <cores> [config_file]", args[0]);
        eprintln!("  cores: Number of cores to keep online (core 0 always stays online)");
        eprintln!("  config_file: Optional path to config.toml (default: {DEFAULT_CONFIG_PATH})");
        eprintln!();
        eprintln!("Example: sudo {} 2", args[0]);
        std::process::exit(1);
    }

    let target: usize = args[1]
        .parse()
        .map_err(|_| IoError::new(ErrorKind::InvalidInput, "cores must be a valid number"))?;

    let config_path = args.get(2).map_or(DEFAULT_CONFIG_PATH, String::as_str);
    let config = std::fs::read_to_string(config_path)
        .unwrap_or_else(|_| {
            eprintln!("Warning: Could not read config file, using defaults");
            String::new()
        })
        .parse::<Table>()?;

    let paths = DaemonPaths::from_table(&config);
    let cores = SysfsCores::new(&paths.sysfs);
    let possible = cores.possible_cores()?;
    let governor = GovernorConfig::from_table(&config, possible.len());

    if target < governor.min_cores || target > governor.max_cores {
        eprintln!(
            "Error: {} cores is outside the configured range [{} - {}]",
            target, governor.min_cores, governor.max_cores
        );
        std::process::exit(1);
    }

    // lowest cores first, highest taken offline first
    let keep: Vec<_> = possible.iter().copied().take(target).collect();
    for &core in &keep {
        cores.bring_online(core)?;
    }
    for &core in possible.iter().rev() {
        if core != REFERENCE_CORE && !keep.contains(&core) {
            cores.take_offline(core)?;
        }
    }

    let online = cores.online_cores()?;
    println!(
        "✓ {} cores online | Mask [{}]",
        online.len(),
        online_mask(&possible, &online)
    );

    Ok(())
}
