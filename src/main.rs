//! # Vinci CLI
//!
//! Command-line interface for da Vinci V3 printers.
//!
//! ## Usage
//!
//! ```bash
//! # Find the printer
//! vinci ports
//!
//! # Show status
//! vinci status --port /dev/ttyACM0
//!
//! # Print a toolpath, or slice and print a model
//! vinci print --port /dev/ttyACM0 part.gcode
//! vinci print --port /dev/ttyACM0 --quality fine bracket.stl
//!
//! # Convert without a printer attached
//! vinci convert --model dv1MX0A000 part.gcode -o part.3w
//! vinci decrypt part.3w -o part.gcode
//!
//! # Control a running print
//! vinci control --port /dev/ttyACM0 pause
//!
//! # HTTP control surface
//! vinci serve --listen 0.0.0.0:8080
//! ```
//!
//! Logging goes to stderr; set `RUST_LOG` (default `vinci=info`).

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use vinci::{
    Session, VinciError,
    config::{SessionConfig, SlicerConfig},
    convert::{self, ConversionProfile, gcode},
    job::{self, CuraEngine, JobResult, Quality},
    server::{self, ServerConfig},
    transport,
};

/// Vinci - da Vinci 3D printer utility
#[derive(Parser, Debug)]
#[command(name = "vinci")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Session tuning shared by commands that talk to a printer.
#[derive(Args, Debug, Clone)]
struct SessionArgs {
    /// Status poll interval in seconds
    #[arg(long, default_value = "2")]
    poll_interval: u64,

    /// Control command timeout in seconds
    #[arg(long, default_value = "5")]
    command_timeout: u64,

    /// Upload block acknowledgment timeout in seconds
    #[arg(long, default_value = "30")]
    block_timeout: u64,

    /// Retries per upload block
    #[arg(long, default_value = "3")]
    retries: u32,
}

impl From<&SessionArgs> for SessionConfig {
    fn from(args: &SessionArgs) -> Self {
        SessionConfig {
            poll_interval: Duration::from_secs(args.poll_interval),
            command_timeout: Duration::from_secs(args.command_timeout),
            block_timeout: Duration::from_secs(args.block_timeout),
            block_retries: args.retries,
            ..Default::default()
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Action {
    Home,
    Load,
    Unload,
    Pause,
    Resume,
    Cancel,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
enum QualityArg {
    Fine,
    #[default]
    Normal,
    Draft,
}

impl From<QualityArg> for Quality {
    fn from(q: QualityArg) -> Self {
        match q {
            QualityArg::Fine => Quality::Fine,
            QualityArg::Normal => Quality::Normal,
            QualityArg::Draft => Quality::Draft,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports, likely printers first
    Ports,

    /// Connect and print the printer's status
    Status {
        /// Serial port (e.g. /dev/ttyACM0, COM3)
        #[arg(long)]
        port: String,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Print a toolpath (.gcode) or slice and print a model (.stl)
    Print {
        /// File to print
        file: PathBuf,

        /// Serial port
        #[arg(long)]
        port: String,

        /// Slicing quality (models only)
        #[arg(long, value_enum, default_value_t = QualityArg::Normal)]
        quality: QualityArg,

        /// Directory holding CuraEngine and its definitions
        #[arg(long, default_value = "cura-engine")]
        engine_dir: PathBuf,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Convert a toolpath into a .3w container
    Convert {
        /// Toolpath file
        input: PathBuf,

        /// Printer model identifier (e.g. dv1MX0A000)
        #[arg(long)]
        model: String,

        /// Output file (defaults to the input with a .3w extension)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Store the toolpath as-is, without firmware preparation
        #[arg(long)]
        raw: bool,
    },

    /// Decrypt a .3w container back to its toolpath
    Decrypt {
        /// Container file
        input: PathBuf,

        /// Output file (defaults to the input with a .gcode extension)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Send a control command
    Control {
        #[arg(value_enum)]
        action: Action,

        /// Serial port
        #[arg(long)]
        port: String,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Run the HTTP control surface
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,

        /// Where uploaded files are kept until printed
        #[arg(long, default_value = "uploads")]
        upload_dir: PathBuf,

        /// Directory holding CuraEngine and its definitions
        #[arg(long, default_value = "cura-engine")]
        engine_dir: PathBuf,

        #[command(flatten)]
        session: SessionArgs,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vinci=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), VinciError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ports => {
            let ports = transport::list_ports()?;
            if ports.is_empty() {
                println!("No serial ports found.");
            }
            for p in ports {
                let marker = if p.likely_printer { "*" } else { " " };
                println!("{} {:<20} {}", marker, p.port, p.description);
            }
            Ok(())
        }

        Commands::Status { port, session } => {
            let session = Session::connect(&port, SessionConfig::from(&session))?;
            let status = session.status();
            let model = session.model().map(|m| m.name).unwrap_or("unknown model");
            println!("Printer:   {} ({})", model, status.model_id);
            println!("Serial:    {}", status.serial_number);
            println!("Firmware:  {}", status.firmware_version);
            println!("State:     {} ({})", status.state_name(), session.state());
            println!(
                "Extruder:  {}°C / {}°C   Bed: {}°C",
                status.extruder_temp, status.extruder_target, status.bed_temp
            );
            println!(
                "Progress:  {}%  elapsed {} min, remaining {} min",
                status.print_percent, status.elapsed_min, status.remaining_min
            );
            println!("Filament:  {} mm left", status.filament_remaining_mm);
            if let Some(code) = status.error_code {
                println!("Error:     {}", code);
            }
            Ok(())
        }

        Commands::Print {
            file,
            port,
            quality,
            engine_dir,
            session,
        } => {
            let session = Session::connect(&port, SessionConfig::from(&session))?;
            let progress = |p: job::JobProgress| {
                eprintln!("[{:>3}%] {:?}: {}", p.percent, p.stage, p.message);
            };
            let result = if is_geometry(&file) {
                let engine = CuraEngine::new(SlicerConfig {
                    engine_dir,
                    ..Default::default()
                });
                job::run_print_from_geometry(&session, &file, quality.into(), &engine, progress)?
            } else {
                job::run_print_from_toolpath(&session, &file, progress)?
            };
            match result {
                JobResult::Started(report) => println!(
                    "Print started: {} ({} bytes, {} blocks, {} retries, ~{} min)",
                    report.name,
                    report.container_bytes,
                    report.upload.blocks.len(),
                    report.upload.total_retries(),
                    report.info.print_time_s / 60
                ),
                JobResult::Cancelled(report) => println!(
                    "Upload cancelled after {} of {} bytes",
                    report.bytes_acknowledged(),
                    report.total_bytes
                ),
            }
            Ok(())
        }

        Commands::Convert {
            input,
            model,
            output,
            raw,
        } => {
            let profile = ConversionProfile::for_model(&model)?;
            let toolpath = std::fs::read(&input)?;
            let toolpath = if raw {
                toolpath
            } else {
                gcode::prepare(
                    &toolpath,
                    &gcode::Preparation {
                        model_id: profile.model_id(),
                        info: gcode::extract_print_info(&toolpath),
                        layer_height_mm: Quality::default().layer_height_mm(),
                    },
                )
            };
            let container = convert::convert(&toolpath, &profile)?;
            let output = output.unwrap_or_else(|| input.with_extension("3w"));
            std::fs::write(&output, container.as_bytes())?;
            let header = container.header();
            println!(
                "Wrote {} ({} bytes, {:?}, ~{} min, {} mm filament)",
                output.display(),
                container.len(),
                header.encryption,
                header.print_time_s / 60,
                header.filament_mm
            );
            Ok(())
        }

        Commands::Decrypt { input, output } => {
            let bytes = std::fs::read(&input)?;
            let (header, toolpath) = convert::decrypt(&bytes)?;
            let output = output.unwrap_or_else(|| input.with_extension("gcode"));
            std::fs::write(&output, &toolpath)?;
            println!(
                "Wrote {} ({} bytes, model {})",
                output.display(),
                toolpath.len(),
                header.model_id
            );
            Ok(())
        }

        Commands::Control {
            action,
            port,
            session,
        } => {
            let session = Session::connect(&port, SessionConfig::from(&session))?;
            match action {
                Action::Home => session.home()?,
                Action::Load => session.load_filament()?,
                Action::Unload => session.unload_filament()?,
                Action::Pause => session.pause()?,
                Action::Resume => session.resume()?,
                Action::Cancel => session.cancel()?,
            }
            println!("{:?} sent.", action);
            Ok(())
        }

        Commands::Serve {
            listen,
            upload_dir,
            engine_dir,
            session,
        } => {
            let config = ServerConfig {
                listen_addr: listen,
                upload_dir,
                session: SessionConfig::from(&session),
                slicer: SlicerConfig {
                    engine_dir,
                    ..Default::default()
                },
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(config))
        }
    }
}

fn is_geometry(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| matches!(e.as_str(), "stl" | "obj" | "3mf"))
}
