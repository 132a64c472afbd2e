use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod jit;

use config::{DumpFormat, RuntimeConfig};

// Wrapper type for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum DumpFormatArg {
    #[default]
    Human,
    Json,
}

impl From<DumpFormatArg> for DumpFormat {
    fn from(arg: DumpFormatArg) -> Self {
        match arg {
            DumpFormatArg::Human => DumpFormat::Human,
            DumpFormatArg::Json => DumpFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "picojit")]
#[command(about = "A minimal x86-64 JIT emitter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the demo program and execute it
    Run {
        /// Code region capacity in bytes
        #[arg(long, default_value = "4096")]
        code_size: usize,

        /// Data region capacity in bytes
        #[arg(long, default_value = "4096")]
        data_size: usize,

        /// Trace JIT emission events to stderr
        #[arg(long)]
        trace_jit: bool,
    },
    /// Assemble the demo program and print its machine code without running it
    Dump {
        /// Output format (human, json)
        #[arg(long, value_enum, default_value = "human")]
        format: DumpFormatArg,

        /// Write the dump to a file instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Code region capacity in bytes
        #[arg(long, default_value = "4096")]
        code_size: usize,

        /// Data region capacity in bytes
        #[arg(long, default_value = "4096")]
        data_size: usize,
    },
}

#[derive(Serialize)]
struct CodeListing {
    length: usize,
    code: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            code_size,
            data_size,
            trace_jit,
        } => {
            let config = RuntimeConfig {
                code_capacity: code_size,
                data_capacity: data_size,
                trace_jit,
            };
            if let Err(e) = jit::demo::run(&config) {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Dump {
            format,
            output,
            code_size,
            data_size,
        } => {
            let config = RuntimeConfig {
                code_capacity: code_size,
                data_capacity: data_size,
                trace_jit: false,
            };
            let text = match dump(&config, format.into()) {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            match output {
                Some(path) => {
                    if let Err(e) = std::fs::write(&path, text) {
                        eprintln!("error: failed to write {}: {}", path.display(), e);
                        return ExitCode::FAILURE;
                    }
                }
                None => print!("{}", text),
            }
        }
    }

    ExitCode::SUCCESS
}

fn dump(config: &RuntimeConfig, format: DumpFormat) -> Result<String, String> {
    let (buf, _data) = jit::demo::assemble(config).map_err(|e| e.to_string())?;
    let code = buf.into_code();

    match format {
        DumpFormat::Human => {
            let mut out = String::new();
            for (row, chunk) in code.chunks(16).enumerate() {
                out.push_str(&format!("{:04x}:", row * 16));
                for byte in chunk {
                    out.push_str(&format!(" {:02x}", byte));
                }
                out.push('\n');
            }
            Ok(out)
        }
        DumpFormat::Json => {
            let listing = CodeListing {
                length: code.len(),
                code: code.iter().map(|b| format!("{:02x}", b)).collect(),
            };
            let mut text = serde_json::to_string_pretty(&listing).map_err(|e| e.to_string())?;
            text.push('\n');
            Ok(text)
        }
    }
}
