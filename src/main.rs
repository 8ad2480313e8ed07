use lbm_flow::{Config, Engine, EngineError, Macroscopic, VTKWriter};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::env;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <config.json>", args[0]);
        eprintln!("  config.json - JSON file containing grid, simulation, preset and output settings");
        std::process::exit(1);
    }

    let config_path = &args[1];
    info!("Loading configuration from: {}", config_path);
    let config = Config::from_file(config_path)?;

    let dims = config.dimensions()?;
    info!("Simulation parameters:");
    info!("  Grid: {}x{} ({:?})", dims.nx, dims.ny, config.grid.resolution);
    info!("  Backend: {:?}", config.grid.backend);
    info!("  Viscosity: {}", config.simulation.viscosity);
    info!("  Flow speed: {}", config.simulation.flow_speed);
    info!("  Steps per frame: {}", config.simulation.compute_rate);
    info!("  Presets: {:?} fluid, {:?} barriers", config.presets.fluid, config.presets.barrier);
    info!("  Tau (relaxation time): {}", config.calculate_tau());

    let mut engine = Engine::from_config(&config).await?;

    let output_directory = Path::new(&config.output.output_directory);
    std::fs::create_dir_all(output_directory)?;
    let mut writer = VTKWriter::new(output_directory);
    writer.write(&Macroscopic::from_lattice(engine.lattice()), engine.iteration())?;

    let progress = ProgressBar::new(config.output.frames as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} frames [{elapsed_precise}] {msg}")?,
    );

    let mut resets = 0;
    for frame in 1..=config.output.frames {
        match engine.frame() {
            Ok(report) => progress.set_message(format!("iteration {}", report.iteration)),
            Err(EngineError::Divergence { x, y, iteration, .. }) => {
                warn!(
                    "diverged at ({}, {}) after {} steps; resetting fluid to {:?}",
                    x, y, iteration, config.presets.fluid
                );
                engine.change_fluid_preset(config.presets.fluid);
                resets += 1;
            }
            Err(e) => return Err(e.into()),
        }

        if config.output.output_frequency > 0 && frame % config.output.output_frequency == 0 {
            let path = writer.write(&Macroscopic::from_lattice(engine.lattice()), engine.iteration())?;
            progress.println(format!("Wrote output file: {}", path.display()));
        }
        progress.inc(1);
    }
    progress.finish_with_message("done");

    let collection = output_directory.join("simulation.pvd");
    writer.write_collection(&collection)?;

    info!("Simulation completed: {} frames, {} fluid resets", config.output.frames, resets);
    info!("Output files written to: {}", config.output.output_directory);
    info!("To visualize, open {} in ParaView", collection.display());

    Ok(())
}
