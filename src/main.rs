//! BigQuery SQL Agent - command-line entry point.

use std::process::ExitCode;
use std::sync::Arc;

use bq_sql_agent::agent::{Agent, Outcome};
use bq_sql_agent::bigquery::BigQueryClient;
use bq_sql_agent::cli::Cli;
use bq_sql_agent::config::Config;
use bq_sql_agent::console::Console;
use bq_sql_agent::llm::OpenAiClient;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status when the loop budget runs out. clap already uses 2 for usage errors.
const EXIT_ABORTED: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout is reserved for the console output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bq_sql_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut console = Console::stdout();

    match run(&cli, &mut console).await {
        Ok(Outcome::Completed(_)) => ExitCode::SUCCESS,
        Ok(Outcome::Aborted { .. }) => ExitCode::from(EXIT_ABORTED),
        Err(e) => {
            console.error(&format!("{:#}", e)).ok();
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, console: &mut Console<std::io::Stdout>) -> anyhow::Result<Outcome> {
    let config = Config::from_cli(cli)?;
    info!(
        "Loaded configuration: model={}, table={}, max_loops={}",
        config.model, config.table, config.max_loops
    );

    let warehouse = BigQueryClient::connect(config.table.clone(), config.credentials.clone()).await?;
    let llm = OpenAiClient::new(config.api_key.clone(), &config.api_base)?;
    let agent = Agent::new(Arc::new(llm), Arc::new(warehouse), &config.model, config.max_loops);

    let run = agent
        .run(&cli.prompt, &mut |event| {
            if let Err(e) = console.event(event) {
                tracing::warn!("Failed to write to console: {}", e);
            }
        })
        .await?;

    console.finish(&run)?;
    Ok(run.outcome)
}
