// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use bet::responder::Responder;
use bet::{Link, LinkOptions, Progress, SerialConfig};
use clap::{Parser, Subcommand, ValueEnum};
use serialport::{DataBits, Parity, StopBits};

#[derive(Parser)]
#[command(name = "bet")]
#[command(about = "Push and pull files over a serial link, or soft reset the machine", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM8)
    #[arg(short, long, env = "BET_PORT")]
    port: String,

    /// Baud rate
    #[arg(short, long, env = "BET_BAUD", default_value = "115200")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Give up when the remote sends nothing for this long (default: wait forever)
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Log level
    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Enable debug output (same as --log-level debug)
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a local file to the machine
    Push {
        /// File to send
        file: PathBuf,
        /// Name to store it under (defaults to the file's name)
        remote: Option<String>,
    },
    /// Fetch a file from the machine
    Pull {
        /// File to fetch
        remote: String,
        /// Where to save it (defaults to the remote name)
        file: Option<PathBuf>,
    },
    /// Soft reset the machine
    Reset,
    /// Answer push, pull and reset commands from the other end of the link
    Serve {
        /// Directory to serve from and store into
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

fn init_logging(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn serial_config(cli: &Cli) -> Result<SerialConfig, String> {
    Ok(SerialConfig {
        port: cli.port.clone(),
        baud: cli.baud,
        data_bits: parse_data_bits(cli.data_bits)?,
        parity: parse_parity(&cli.parity)?,
        stop_bits: parse_stop_bits(cli.stop_bits)?,
    })
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{} failed: {}", context, err);
    std::process::exit(1);
}

/// One dot per chunk.
fn dots(_: Progress) {
    print!(".");
    let _ = std::io::stdout().flush();
}

fn main() {
    let cli = Cli::parse();

    init_logging(if cli.debug { LogLevel::Debug } else { cli.log_level });

    let config = match serial_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let options = LinkOptions {
        read_timeout: cli.timeout.map(Duration::from_millis),
    };

    match cli.command {
        Commands::Push { file, remote } => {
            let remote = remote.or_else(|| {
                file.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            });
            let Some(remote) = remote else {
                fail("Push", format!("no file name in {}, give a remote name", file.display()));
            };
            println!("Sending {} as {}", file.display(), remote);
            match bet::send_file(&config, &options, &file, &remote, &mut dots) {
                Ok(size) => println!("\nOK ({} bytes)", size),
                Err(e) => fail("\nPush", e),
            }
        }
        Commands::Pull { remote, file } => {
            let file = file.unwrap_or_else(|| PathBuf::from(&remote));
            println!("Receiving {} into {}", remote, file.display());
            match bet::receive_file(&config, &options, &remote, &file, &mut dots) {
                Ok(size) => println!("\nOK ({} bytes)", size),
                Err(e) => fail("\nPull", e),
            }
        }
        Commands::Reset => match bet::reset_remote(&config, &options) {
            Ok(()) => println!("OK"),
            Err(e) => fail("Reset", e),
        },
        Commands::Serve { dir } => {
            if !dir.is_dir() {
                fail("Serve", format!("directory not found: {}", dir.display()));
            }
            println!("Serving {} on {}", dir.display(), config.port);
            // Idle periods between commands are expected, so no read timeout here
            let result = Link::open(&config, &LinkOptions::default()).and_then(|link| {
                bet::session::scoped(link, |link| {
                    Responder::new(dir)
                        .on_reset(|| println!("Reset requested"))
                        .serve(link)
                })
            });
            if let Err(e) = result {
                fail("Serve", e);
            }
        }
    }
}
