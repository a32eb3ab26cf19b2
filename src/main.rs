use registry_scraper_lib::{logger, Fetcher, HttpSearchApi, Orchestrator, Renewal, RunConfig, RunOutcome};

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use url::Url;

const DEFAULT_API_URL: &str = "https://scraping-trial-test.vercel.app/api/search";

#[derive(Parser, Debug)]
#[command(
    name = "registry-scraper",
    version,
    about = "Collects paginated registry search results into a local JSON store"
)]
struct Cli {
    /// Search query to collect results for
    query: String,

    /// Session credential for the search API (prompted for when omitted)
    #[arg(long)]
    session: Option<String>,

    /// Page to start from, for resuming an interrupted run
    #[arg(long, default_value_t = 1)]
    start_page: u32,

    /// Delay between page requests, in seconds
    #[arg(long, default_value_t = 1.0)]
    delay: f64,

    /// Per-request timeout, in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Search API endpoint
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Directory holding output.json and scraper.log
    #[arg(long, default_value = "search_results")]
    output_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    let cli = Cli::parse();

    let api_url = Url::parse(&cli.api_url)?;
    let request_delay = parse_delay(cli.delay)?;

    let credential = match cli.session {
        Some(session) if !session.trim().is_empty() => session.trim().to_string(),
        _ => prompt_line("Enter session credential: ")?,
    };
    if credential.is_empty() {
        return Err("session credential cannot be empty".into());
    }

    let config = RunConfig {
        query: cli.query,
        credential,
        start_page: cli.start_page,
        request_delay,
        output_path: cli.output_dir.join("output.json"),
        log_path: cli.output_dir.join("scraper.log"),
    };

    info!("Starting scrape for query: {}", config.query);
    info!("Output file: {}", config.output_path.display());
    info!("Log file: {}", config.log_path.display());
    if config.start_page > 1 {
        info!("Resuming from page {}", config.start_page);
    }

    let api = HttpSearchApi::new(api_url, Duration::from_secs(cli.timeout))?;
    let fetcher = Fetcher::new(&api);
    let mut orchestrator = Orchestrator::new(config, fetcher);
    let report = orchestrator.run(&mut prompt_for_renewal);

    match report.total_results_expected {
        Some(expected) => info!(
            "Run finished for '{}': {} results collected this run ({} reported by the API in total)",
            report.query, report.records_collected, expected
        ),
        None => info!(
            "Run finished for '{}': {} results collected this run",
            report.query, report.records_collected
        ),
    }

    match report.outcome {
        RunOutcome::Completed => {
            info!("All pages fetched.");
            Ok(())
        }
        RunOutcome::Stopped => {
            info!("Stopped at operator request. Re-run with --start-page to resume.");
            Ok(())
        }
        RunOutcome::FetchFailed(err) => {
            error!("Run failed: {err}");
            Err(err.into())
        }
        RunOutcome::StoreFailed(err) => {
            error!("Run failed: {err}");
            Err(err.into())
        }
    }
}

fn prompt_for_renewal(resume_page: u32) -> Renewal {
    println!();
    println!("{}", "=".repeat(60));
    println!("SESSION EXPIRED");
    println!("Obtain a fresh session credential and paste it below.");
    println!("The run will resume from page {resume_page}.");
    println!("{}", "=".repeat(60));

    match prompt_line("Enter new session credential (or 'quit' to stop): ") {
        Ok(line) if !line.is_empty() && !line.eq_ignore_ascii_case("quit") => {
            Renewal::Credential(line)
        }
        _ => Renewal::Stop,
    }
}

fn prompt_line(prompt: &str) -> io::Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

// Covers everything Duration refuses: NaN, negatives, infinities, and
// values too large for it.
fn parse_delay(secs: f64) -> Result<Duration, Box<dyn Error>> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| "--delay must be a valid non-negative duration in seconds".into())
}
