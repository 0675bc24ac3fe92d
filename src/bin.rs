use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use custard::{HeaderDefaults, ReaderOptions, WriterOptions, custard_to_tar, tar_to_custard};

#[derive(Parser)]
#[command(name = "custard")]
#[command(about = "convert between custard streams and tar archives")]
#[command(version)]
struct Cli {
    /// TOML file with [defaults] and [reader] tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// read custard on stdin, write tar on stdout
    Pack {
        /// fill missing fields from the current user and time
        #[arg(long)]
        from_env: bool,
    },

    /// read tar on stdin, write custard on stdout
    Unpack {
        /// warn instead of failing on bad checksums and magic
        #[arg(long)]
        lenient: bool,

        /// emit zero-length members instead of skipping them
        #[arg(long)]
        keep_empty: bool,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Config {
    defaults: Option<HeaderDefaults>,
    reader: Option<ReaderOptions>,
    max_header_len: Option<usize>,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let mut stdin = BufReader::new(io::stdin().lock());
    let mut stdout = BufWriter::new(io::stdout().lock());

    match cli.command {
        Commands::Pack { from_env } => {
            let defaults = match (config.defaults, from_env) {
                (Some(defaults), _) => defaults,
                (None, true) => HeaderDefaults::from_env(),
                (None, false) => HeaderDefaults::default(),
            };
            let mut options = WriterOptions::with_defaults(defaults);
            if let Some(max) = config.max_header_len {
                options.max_header_len = max;
            }
            let members = custard_to_tar(&mut stdin, &mut stdout, options).context("packing custard into tar")?;
            log::info!("packed {members} members");
        }
        Commands::Unpack { lenient, keep_empty } => {
            let mut options = match (config.reader, lenient) {
                (_, true) => ReaderOptions::lenient(),
                (Some(reader), false) => reader,
                (None, false) => ReaderOptions::default(),
            };
            if keep_empty {
                options.keep_empty_members = true;
            }
            let members = tar_to_custard(&mut stdin, &mut stdout, options).context("unpacking tar into custard")?;
            log::info!("unpacked {members} members");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
