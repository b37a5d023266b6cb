//! clint: command-line front end for the utilities.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Parse the command line described by `[cli]`
//!   4. Init logger at the configured level, raised by `-v`
//!   5. Run the requested date and HTTP actions

use clint_utilities::{
    cli::{self, CliError, ParsedArgs},
    config::{self, Config},
    dates,
    error::AppError,
    http::{DurableClient, RequestError, RetryPolicy},
    logger,
};
use serde_json::Value;
use tracing::{debug, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let config = config::load()?;

    let args = match cli::parse_args(&config.cli) {
        Ok(args) => args,
        Err(CliError::Parse(e)) => e.exit(),
        Err(e) => return Err(e.into()),
    };

    let mut logging = config.logging.clone();
    match args.get_count("verbose") {
        0 => {}
        1 => logging.level = "debug".into(),
        _ => logging.level = "trace".into(),
    }
    logger::init(&logging)?;

    let parsed = Value::Object(args.to_json());
    debug!(args = %parsed, "arguments parsed");

    let mut acted = false;

    if let Some(date) = args.get_str("date") {
        let ts = dates::date_string_to_timestamp(date)?;
        info!(date, timestamp = ts, "date converted");
        println!("{ts}");
        acted = true;
    }

    if let Some(url) = args.get_str("url") {
        fetch(&config, &args, url).await?;
        acted = true;
    }

    if !acted {
        cli::build_command(&config.cli)?.print_help()?;
    }

    Ok(())
}

async fn fetch(config: &Config, args: &ParsedArgs, url: &str) -> Result<(), AppError> {
    let attempts = match args.get_int("attempts") {
        Some(n) => u32::try_from(n)
            .map_err(|_| AppError::Config(format!("--attempts must be a positive count, got {n}")))?,
        None => config.http.attempts,
    };
    let delay = args.get_float("delay").unwrap_or(config.http.delay_secs);
    let client = DurableClient::new(config.http.timeout)?;

    let response = match args.get_str("json") {
        Some(raw) => {
            let body: Value = serde_json::from_str(raw)?;
            let policy = RetryPolicy::store(attempts, delay)?;
            info!(url, attempts, delay, "storing");
            client.post(url, &body, &policy).await?
        }
        None => {
            let policy = RetryPolicy::new(attempts, delay)?;
            info!(url, attempts, delay, "fetching");
            client.get(url, &policy).await?
        }
    };

    let status = response.status();
    let body = response.text().await.map_err(RequestError::Transport)?;
    println!("{status}");
    if !body.is_empty() {
        println!("{body}");
    }
    Ok(())
}
