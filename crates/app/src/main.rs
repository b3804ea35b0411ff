use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use pixelstrip_core::{
    audio::render_analyzer_config, AppConfig, Mode, PixelBuffer, StateMachine, TransportConfig,
};
use tracing_subscriber::EnvFilter;

fn main() -> pixelstrip_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            mode,
            dry_run,
        } => run(config.as_deref(), mode, dry_run),
        Commands::Modes => {
            for mode in Mode::ALL {
                println!("{mode}");
            }
            Ok(())
        }
        Commands::AnalyzerConfig { config } => {
            let config = AppConfig::load(config.as_deref())?;
            print!(
                "{}",
                render_analyzer_config(&config.analyzer, config.analyzer_bars())
            );
            Ok(())
        }
    }
}

fn run(path: Option<&Path>, mode: Option<Mode>, dry_run: bool) -> pixelstrip_core::Result<()> {
    let mut config = AppConfig::load(path)?;
    if let Some(mode) = mode {
        config.engine.initial_mode = mode;
    }
    if dry_run {
        config.strip.transport = TransportConfig::DryRun;
    }
    tracing::info!(
        pixels = config.strip.pixel_count,
        transport = ?config.strip.transport,
        mode = %config.engine.initial_mode,
        "starting controller"
    );

    let pixels = PixelBuffer::from_config(&config.strip)?;
    let mut engine = StateMachine::new(pixels, config);
    engine.run()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let command = line.trim();
        match command {
            "" => continue,
            "quit" | "exit" => break,
            "status" => {
                let mut stdout = io::stdout().lock();
                serde_json::to_writer(&mut stdout, &engine.status())?;
                writeln!(stdout)?;
            }
            name => match engine.submit_named(name) {
                Ok(mode) => tracing::info!(%mode, "mode requested"),
                Err(err) => tracing::warn!(%err, "ignoring command"),
            },
        }
    }

    tracing::info!("shutting down");
    engine.shutdown()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive LED strip controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the strip and take mode names, `status` or `quit` on stdin.
    Run {
        /// JSON configuration file; defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Mode to start in, overriding the configuration.
        #[arg(short, long)]
        mode: Option<Mode>,
        /// Discard frames instead of opening the hardware transport.
        #[arg(long)]
        dry_run: bool,
    },
    /// List the selectable modes.
    Modes,
    /// Print the configuration file handed to the external analyzer.
    AnalyzerConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
