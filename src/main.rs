use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;
use nand_flash_sim::workloads::{Workload, run_workload};
use nand_flash_sim::{
    FlashConfig, FlashController, MeteredController, SimulatedNandFlashBuilder, Simulation,
    TransactionLogLevel,
};
use simplelog::{ConfigBuilder, LevelFilter, SimpleLogger};
use time::macros::format_description;

/// Run a synthetic workload against a simulated NAND flash controller.
#[derive(Parser, Debug)]
#[command(name = "flashsim")]
struct Args {
    /// TOML file with a `[flash]` table; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Access pattern: sequential, random or striped.
    #[arg(long, default_value = "striped")]
    workload: Workload,
    /// Number of pages the workload touches.
    #[arg(long, default_value_t = 256)]
    pages: usize,
    /// Seed for the random workload and the wear-out model.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Erase cycles a block survives before stuck bits appear.
    #[arg(long)]
    endurance: Option<u32>,
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_cfg = ConfigBuilder::new()
        .set_time_format_custom(format_description!("[hour]:[minute]:[second].[subsecond]"))
        .build();
    SimpleLogger::init(args.log_level, log_cfg).context("Unable to initialize logging")?;

    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config {}", path.display()))?;
            FlashConfig::from_toml_str(&text).context("Unable to parse config")?
        }
        None => FlashConfig::default(),
    };

    let mut sim = Simulation::new();
    let controller =
        FlashController::new(sim.handle(), &config).context("Invalid flash configuration")?;
    let mut flash = SimulatedNandFlashBuilder::new(controller.geometry())
        .with_rng_seed(args.seed)
        .with_logging(TransactionLogLevel::None);
    if let Some(cycles) = args.endurance {
        flash = flash.with_minimum_erase_cycles(cycles).with_failure_rate(1);
    }
    let mut metered = MeteredController::new(controller, flash.build());

    let report = run_workload(&mut sim, &mut metered, args.workload, args.pages, args.seed)
        .context("Unable to run workload")?;

    info!("{report:?}");
    for (id, stats) in metered.controller().channel_stats().iter().enumerate() {
        if stats.operations() > 0 {
            info!(
                "channel {id}: {} reads, {} writes, {} erases, busy {} ticks",
                stats.reads, stats.writes, stats.erases, stats.busy_ticks
            );
        }
    }
    info!("simulation finished at tick {}", sim.now().ticks());
    Ok(())
}
