use clap::{Parser, Subcommand};
use psim_core::SimulationConfig;
use std::path::{Path, PathBuf};

mod demos;
mod headless;
mod runner;
mod viewer;

use demos::Demo;

#[derive(Parser)]
#[command(name = "psim")]
#[command(about = "psim - a fixed-step 2D particle simulation sandbox", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG still overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one of the built-in demos
    Run {
        #[arg(value_enum)]
        demo: Demo,

        /// TOML file with simulation settings, watched for changes in the viewer
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Step without opening a window and print a summary
        #[arg(long)]
        headless: bool,

        /// Frames to run in headless mode
        #[arg(long, default_value_t = 600)]
        frames: u32,

        /// Frames per second fed to the simulation in headless mode
        #[arg(short, long, default_value_t = 60)]
        framerate: u32,

        /// Seed for demos that scatter particles randomly
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// List the built-in demos
    List,
    /// Print the default simulation settings as TOML
    Config,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .init();

    let result = match cli.command {
        Commands::Run {
            demo,
            config,
            headless,
            frames,
            framerate,
            seed,
        } => run_demo(demo, config.as_deref(), headless, frames, framerate, seed),
        Commands::List => {
            for demo in Demo::ALL {
                println!("{:<10} {}", demo.name(), demo.description());
            }
            Ok(())
        }
        Commands::Config => print_default_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<SimulationConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(SimulationConfig::from_toml_file(path)?),
        None => Ok(SimulationConfig::default()),
    }
}

fn run_demo(
    demo: Demo,
    config_path: Option<&Path>,
    headless: bool,
    frames: u32,
    framerate: u32,
    seed: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;

    if headless {
        let sim = demo.builder(config, seed)?.build()?;
        let summary = headless::run(sim, frames, framerate)?;

        println!("demo       = {}", demo.name());
        println!("frames     = {}", summary.frames);
        println!("steps      = {}", summary.steps);
        println!("dropped    = {}", summary.steps_dropped);
        println!("time       = {:.3}", summary.time);
        println!("particles  = {}", summary.particles);
        println!("centroid   = ({:.3}, {:.3})", summary.centroid.x, summary.centroid.y);
        println!("spread     = {:.3}", summary.spread);
        return Ok(());
    }

    let config_path = config_path.map(Path::to_path_buf);
    let options = eframe::NativeOptions::default();
    eframe::run_native(
        &format!("psim - {}", demo.name()),
        options,
        Box::new(move |cc| {
            Ok(Box::new(viewer::ViewerApp::new(
                demo,
                seed,
                config_path,
                config,
                cc,
            )))
        }),
    )?;
    Ok(())
}

fn print_default_config() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", SimulationConfig::default().to_toml_string()?);
    Ok(())
}
