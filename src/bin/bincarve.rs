//! bincarve command-line front end
//!
//! Parses a binary file against a YAML grammar and writes an annotated
//! HTML hex view, a plain-text summary, or a JSON snapshot.

use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bincarve::config::Config;
use bincarve::grammar;
use bincarve::parser::FileParser;
use bincarve::render;

/// Input is fed to the parser in chunks of this size
const READ_CHUNK: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "bincarve")]
#[command(version)]
#[command(about = "Annotate a binary file using a declarative grammar", long_about = None)]
struct CliArgs {
    /// Binary file to parse
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Grammar document (YAML)
    #[arg(short, long, value_name = "FILE")]
    format: PathBuf,

    /// Output file
    #[arg(short, long, value_name = "FILE", default_value = "output.html")]
    out_file: PathBuf,

    /// Write a JSON snapshot instead of HTML
    #[arg(long, conflicts_with = "text")]
    json: bool,

    /// Print a plain-text summary to stdout instead of writing HTML
    #[arg(long)]
    text: bool,

    /// Bytes per hex line (overrides the config file)
    #[arg(long, value_name = "N")]
    columns: Option<usize>,

    /// Path to custom config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8, fallback: &str) {
    let default = match verbose {
        0 => fallback,
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(args: CliArgs, mut config: Config) -> Result<(), Box<dyn Error>> {
    if let Some(columns) = args.columns {
        config.column_len = columns;
        config.validate()?;
    }

    let grammar = grammar::load_file(&args.format)?;
    tracing::debug!(
        "loaded {} structs, {} fields from {}",
        grammar.struct_count(),
        grammar.field_count(),
        args.format.display()
    );

    let mut parser = FileParser::new(grammar);
    let mut input = File::open(&args.input)?;
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        parser.feed(&buf[..n])?;
    }
    let output = parser.finish()?;

    for warning in output.warnings() {
        tracing::warn!("{}", warning);
    }

    if args.text {
        io::stdout().write_all(render::text_summary(&output).as_bytes())?;
        return Ok(());
    }

    let mut out = BufWriter::new(File::create(&args.out_file)?);
    if args.json {
        out.write_all(output.snapshot().to_json()?.as_bytes())?;
    } else {
        render::write_page(&mut out, &output, &config.page_options())?;
    }
    out.flush()?;

    tracing::info!("wrote {}", args.out_file.display());
    Ok(())
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::load_or_default(),
    };

    init_logging(args.verbose, &config.log_filter);

    match run(args, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
