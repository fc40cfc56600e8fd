//! Command-line interface for the harvester.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::celex::{expand_variants, Sector};
use crate::config::{validate_date, ClientConfig};
use crate::error::{HarvesterError, Result};
use crate::identifier::detect_kind;
use crate::output::{render_fragments, save_fragments, OutputFormat};
use crate::parser::{self, ParseOutcome};
use crate::retrieval::BlockingClient;
use crate::scanned;
use crate::sparql::DateType;

/// EUR-Lex harvester - Retrieve EU legislation and parse it into fragments.
#[derive(Parser)]
#[command(name = "eurlex-harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch documents and write their fragments.
    Fetch {
        /// CELEX IDs, cellar URLs, cellar ids or OJ references
        #[arg(required = true)]
        identifiers: Vec<String>,

        /// Maximum number of documents fetched at once
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Output directory (default: print to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse a local HTML or PDF file.
    Parse {
        file: PathBuf,

        /// Document id recorded on every fragment
        #[arg(long)]
        id: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print the identifier kind of each input.
    Detect {
        #[arg(required = true)]
        identifiers: Vec<String>,
    },

    /// List CELEX candidates for a short reference such as 2019/947.
    Expand {
        reference: String,

        /// Document type code (R, L, D, ...)
        #[arg(short = 't', long = "type")]
        document_type: Option<String>,

        /// Sector code (default: 3)
        #[arg(short, long)]
        sector: Option<char>,
    },

    /// Ask the metadata service which CELEX candidates exist.
    Guess {
        reference: String,

        #[arg(short = 't', long = "type")]
        document_type: Option<String>,

        #[arg(short, long)]
        sector: Option<char>,
    },

    /// List documents by date.
    Query {
        /// Start date in YYYY-MM-DD format
        #[arg(long)]
        from: String,

        /// End date in YYYY-MM-DD format (default: same day)
        #[arg(long)]
        to: Option<String>,

        #[arg(long, value_enum, default_value_t = DateType::Document)]
        date_type: DateType,
    },
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            identifiers,
            concurrency,
            format,
            output,
        } => fetch_command(&identifiers, concurrency, format, output.as_deref()),
        Commands::Parse { file, id, format } => parse_command(&file, id.as_deref(), format),
        Commands::Detect { identifiers } => {
            for identifier in &identifiers {
                println!("{identifier}\t{}", detect_kind(identifier));
            }
            Ok(())
        }
        Commands::Expand {
            reference,
            document_type,
            sector,
        } => {
            let sector = sector.map(parse_sector).transpose()?;
            for celex in expand_variants(&reference, document_type.as_deref(), sector)? {
                println!("{celex}");
            }
            Ok(())
        }
        Commands::Guess {
            reference,
            document_type,
            sector,
        } => {
            let sector = sector.map(parse_sector).transpose()?;
            let client = BlockingClient::new(ClientConfig::from_env())?;
            let pb = spinner("Querying metadata service...");
            let found = client.guess_celex_ids(&reference, document_type.as_deref(), sector);
            pb.finish_and_clear();
            for celex in found? {
                println!("{celex}");
            }
            Ok(())
        }
        Commands::Query {
            from,
            to,
            date_type,
        } => query_command(&from, to.as_deref(), date_type),
    }
}

fn parse_sector(code: char) -> Result<Sector> {
    Sector::from_code(code).ok_or_else(|| {
        HarvesterError::Config(format!("Unknown sector code '{code}'"))
    })
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Execute the fetch command.
fn fetch_command(
    identifiers: &[String],
    concurrency: usize,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    if let Some(output_dir) = output {
        if output_dir.exists() && !output_dir.is_dir() {
            return Err(HarvesterError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Output path is not a directory: {}", output_dir.display()),
            )));
        }
    }

    let client = BlockingClient::new(ClientConfig::from_env())?;

    let pb = spinner("Fetching documents...");
    let results = client.fetch_many(identifiers, concurrency);
    pb.finish_and_clear();

    let mut first_error = None;
    let mut succeeded = 0usize;

    for (identifier, result) in identifiers.iter().zip(results) {
        let document = match result {
            Ok(document) => document,
            Err(e) => {
                eprintln!("{} {identifier}: {e}", style("Failed").red().bold());
                first_error.get_or_insert(e);
                continue;
            }
        };

        let outcome = parser::parse_retrieved(&document);
        if let Some(e) = &outcome.error {
            eprintln!("{} {identifier}: {e}", style("Warning").yellow().bold());
        }

        match output {
            Some(output_dir) => {
                let path = save_fragments(
                    &outcome.fragments,
                    &document.reference.raw_id,
                    output_dir,
                    format,
                )?;
                eprintln!(
                    "{} {} ({} fragments, {}) -> {}",
                    style("Saved").green().bold(),
                    style(identifier).cyan(),
                    outcome.fragments.len(),
                    document.strategy,
                    path.display()
                );
            }
            None => print!("{}", render_fragments(&outcome.fragments, format)?),
        }
        succeeded += 1;
    }

    match first_error {
        Some(e) if succeeded == 0 => Err(e),
        _ => Ok(()),
    }
}

/// Execute the parse command on a local file.
fn parse_command(file: &Path, id: Option<&str>, format: OutputFormat) -> Result<()> {
    let bytes = std::fs::read(file)?;

    let outcome: ParseOutcome = if bytes.starts_with(b"%PDF") {
        parser::parse_text(&scanned::extract_text(&bytes)?, id)
    } else {
        parser::parse_html(&String::from_utf8_lossy(&bytes), id)
    };

    if outcome.fragments.is_empty() {
        eprintln!(
            "{} no fragments found in {}",
            style("Warning:").yellow().bold(),
            file.display()
        );
    }
    print!("{}", render_fragments(&outcome.fragments, format)?);
    Ok(())
}

/// Execute the query command.
fn query_command(from: &str, to: Option<&str>, date_type: DateType) -> Result<()> {
    let start = validate_date(from)?;
    let end = to.map(validate_date).transpose()?;

    let client = BlockingClient::new(ClientConfig::from_env())?;
    let pb = spinner("Querying metadata service...");
    let references = client.query_by_date_range(start, end, date_type);
    pb.finish_and_clear();

    let references: Vec<_> = references?.collect();
    println!("{}", serde_json::to_string_pretty(&references)?);
    Ok(())
}
