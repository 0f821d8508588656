use anyhow::Context;
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;

use crate::simulation::{Simulation, SimulationConfig};

mod rl;
mod simulation;

/// TDMA link-layer simulator with agent-driven slot reservation
#[derive(Parser, Debug)]
#[command(name = "tdma-rl-simulator")]
#[command(version, about, long_about = None)]
struct Args {
    /// Simulation configuration (TOML)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Where to write the JSON report; printed to stdout when omitted
    #[arg(value_name = "REPORT")]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logging setup; RUST_LOG overrides the defaults
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("tdma_rl_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Starting up");
    let config = SimulationConfig::load(&args.config)?;
    info!("Loaded configuration file: {:?}", args.config);

    let mut simulation = Simulation::new(config)?;
    let report = simulation.run();

    info!(
        "Throughput {:.0} b/s, average delay {:.3} ms, delivery ratio {:.3}, control overhead {:.3}",
        report.throughput_bps,
        report.average_delay_ms,
        report.delivery_ratio,
        report.control_overhead
    );

    let json = report.to_json().context("Failed to serialize report")?;
    match args.report {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("Report written to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_path_is_optional() {
        let args = Args::try_parse_from(["tdma-rl-simulator", "demos/line.toml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("demos/line.toml"));
        assert!(args.report.is_none());

        let args = Args::try_parse_from(["tdma-rl-simulator", "a.toml", "out.json"]).unwrap();
        assert_eq!(args.report, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn missing_config_is_a_usage_error() {
        assert!(Args::try_parse_from(["tdma-rl-simulator"]).is_err());
    }
}
