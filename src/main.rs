mod address;
mod agents;
mod anthropic;
mod cli;
mod config;
mod error;
mod orchestrator;
mod poller;
mod remote;
mod report;
mod routes;
mod runner;
mod server;
mod state_machine;
mod status;
mod store;
mod ui;

use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::Style;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cli::{Cli, Command};
use config::PropvalConfig;
use poller::{ClientPoller, PollOutcome};
use remote::RemoteClient;
use ui::JobProgress;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", Style::new().red().bold().apply_to("error:"));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("propval=debug")
        } else {
            EnvFilter::new("propval=info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = PropvalConfig::load().context("failed to load propval.toml")?;
    let server_url = cli.server;

    match cli.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            server::start_server(&config).await?;
            Ok(())
        }
        Command::Submit { address, no_wait } => {
            cmd_submit(&RemoteClient::new(server_url)?, &config, &address, no_wait).await
        }
        Command::Status { id } => cmd_status(&RemoteClient::new(server_url)?, &id).await,
        Command::Watch { id } => {
            watch(&RemoteClient::new(server_url)?, &config, &id, "Checking status...").await
        }
        Command::Retry { id, no_wait } => {
            cmd_retry(&RemoteClient::new(server_url)?, &config, &id, no_wait).await
        }
        Command::Fetch { id, output, pdf } => {
            let client = RemoteClient::new(server_url)?;
            if pdf {
                cmd_fetch_pdf(&client, &id, output).await
            } else {
                cmd_fetch(&client, &id, output).await
            }
        }
        Command::Validate { address } => {
            cmd_validate(&RemoteClient::new(server_url)?, &address).await
        }
    }
}

async fn cmd_submit(
    client: &RemoteClient,
    config: &PropvalConfig,
    address: &str,
    no_wait: bool,
) -> Result<()> {
    let reply = client.submit(address).await?;
    if !reply.success {
        bail!(reply.message);
    }
    let id = reply
        .report_id
        .context("server accepted the address but returned no report id")?;

    if no_wait {
        println!("{id}");
        return Ok(());
    }
    watch(client, config, &id, address).await
}

async fn cmd_status(client: &RemoteClient, id: &str) -> Result<()> {
    let report = client.status(id).await?;
    ui::print_status(&report);
    Ok(())
}

async fn cmd_retry(
    client: &RemoteClient,
    config: &PropvalConfig,
    id: &str,
    no_wait: bool,
) -> Result<()> {
    let reply = client.retry(id).await?;
    if !reply.success {
        bail!(reply.message);
    }
    let new_id = reply
        .report_id
        .context("server accepted the retry but returned no report id")?;

    if no_wait {
        println!("{new_id}");
        return Ok(());
    }
    watch(client, config, &new_id, "Restarting report generation...").await
}

async fn cmd_fetch(client: &RemoteClient, id: &str, output: Option<std::path::PathBuf>) -> Result<()> {
    let markdown = client.fetch_markdown(id).await?;
    match output {
        Some(path) => {
            std::fs::write(&path, markdown)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "  {} Saved {}",
                Style::new().green().bold().apply_to("✓"),
                path.display()
            );
        }
        None => print!("{markdown}"),
    }
    Ok(())
}

async fn cmd_fetch_pdf(client: &RemoteClient, id: &str, output: Option<std::path::PathBuf>) -> Result<()> {
    let pdf = client.fetch_pdf(id).await?;
    let path = output.unwrap_or_else(|| {
        let short: String = id.chars().take(8).collect();
        format!("Property_Valuation_{short}.pdf").into()
    });
    std::fs::write(&path, pdf).with_context(|| format!("failed to write {}", path.display()))?;
    println!(
        "  {} Saved {}",
        Style::new().green().bold().apply_to("✓"),
        path.display()
    );
    Ok(())
}

async fn cmd_validate(client: &RemoteClient, address: &str) -> Result<()> {
    let reply = client.validate(address).await?;
    if !reply.valid {
        bail!(reply.message.unwrap_or_else(|| "Invalid address".to_string()));
    }
    println!(
        "  {} {}",
        Style::new().green().bold().apply_to("✓"),
        reply.formatted_address.unwrap_or_default()
    );
    Ok(())
}

/// Poll `id` with a progress bar until it finishes. Ctrl-C stops watching
/// without affecting the job on the server.
async fn watch(client: &RemoteClient, config: &PropvalConfig, id: &str, label: &str) -> Result<()> {
    let mut progress = JobProgress::start(id, label);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let outcome = ClientPoller::new(config.poll_policy())
        .run(client, id, &cancel, |report| progress.update(report))
        .await;
    progress.finish(id, &outcome);

    match outcome {
        PollOutcome::Complete(_) | PollOutcome::Cancelled => Ok(()),
        PollOutcome::Failed { .. } => bail!("report {id} failed"),
        PollOutcome::NotFound => bail!("report {id} not found"),
        PollOutcome::Connectivity(err) => Err(err.into()),
    }
}
