use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pagedates_core::analyze::{ProgressObserver, analyze_space};
use pagedates_core::client::ConfluenceClient;
use pagedates_core::config::{Credentials, ENV_PASSWORD, ENV_URL, ENV_USERNAME, env_value};
use pagedates_core::report::{ReportColumns, default_report_path, write_report};

#[derive(Debug, Parser)]
#[command(
    name = "pagedates",
    version,
    about = "Report Confluence page modification and view dates as a sorted CSV"
)]
struct Cli {
    /// Confluence space key
    space: String,
    /// Include last modified dates in the output
    #[arg(long)]
    date_modified: bool,
    /// Include last viewed dates in the output
    #[arg(long)]
    date_viewed: bool,
    /// Output CSV path (default: auto-generated from space key and UTC time)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

struct ConsoleProgress;

impl ProgressObserver for ConsoleProgress {
    fn pages_listed(&self, total: usize) {
        println!("Fetched {total} pages so far...");
    }

    fn analysis_started(&self, total: usize) {
        println!("Found {total} pages to analyze...");
    }

    fn pages_analyzed(&self, done: usize, total: usize) {
        println!("Analyzed {done}/{total} pages...");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let columns = ReportColumns {
        include_modified: cli.date_modified,
        include_viewed: cli.date_viewed,
    }
    .validate()?;

    let credentials = resolve_credentials()?;
    let client = ConfluenceClient::new(credentials)?;

    println!("Analyzing pages in space: {}", cli.space);
    println!("Fetching pages from Confluence...");
    let mut records = analyze_space(&client, &cli.space, columns, &ConsoleProgress)?;
    println!("Analysis complete - processed {} pages", records.len());

    let output = cli
        .output
        .unwrap_or_else(|| default_report_path(&cli.space));
    write_report(&output, &mut records, columns)?;
    println!("Results written to {}", output.display());
    println!("Analysis complete. Found {} pages.", records.len());
    Ok(())
}

/// Env file first, interactive prompt for whatever is missing. Resolved once
/// here; the rest of the program only ever sees the explicit value.
fn resolve_credentials() -> Result<Credentials> {
    dotenvy::dotenv().ok();

    let base_url = match env_value(ENV_URL) {
        Some(value) => value,
        None => prompt_line("Enter Confluence URL: ")?,
    };
    let username = match env_value(ENV_USERNAME) {
        Some(value) => value,
        None => prompt_line("Enter username: ")?,
    };
    let password = match env_value(ENV_PASSWORD) {
        Some(value) => value,
        None => rpassword::prompt_password("Enter password: ")
            .context("failed to read password")?,
    };
    Ok(Credentials::new(base_url, username, password))
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read input")?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("a value is required");
    }
    Ok(value)
}
