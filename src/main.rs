use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cloudacct::cli::{Cli, Command};
use cloudacct::config::AccountsConfig;
use cloudacct::orchestrator::{self, DEMO_ORG, Operation, Orchestrator};
use cloudacct::signal::ChannelSignal;
use cloudacct::ui::TaskProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AccountsConfig::load(cli.config.as_deref())?;
    let adapters = orchestrator::adapters(&config).context("building provider adapters")?;

    let (signal, mut enumerations) = ChannelSignal::new();
    tokio::spawn(async move {
        while let Some(request) = enumerations.recv().await {
            tracing::info!(account_id = %request.account_id, org_ref = %request.org_ref, "re-enumeration requested");
        }
    });
    let mut orch = Orchestrator::new(&config, adapters, Arc::new(signal));

    match cli.command {
        Command::Run { file, members } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let operations: Vec<Operation> = serde_json::from_str(&contents)
                .with_context(|| format!("parsing operations in {}", file.display()))?;
            for member in &members {
                orch.add_member(&member.org_ref, &member.identity).await;
            }
            run_all(&mut orch, operations).await;
        }
        Command::Demo => {
            orch.add_member(DEMO_ORG, "alice").await;
            run_all(&mut orch, orchestrator::demo_operations()).await;

            let accounts = orch.service().list_accounts(DEMO_ORG).await?;
            println!("{}", serde_json::to_string_pretty(&accounts)?);
        }
    }

    Ok(())
}

async fn run_all(orch: &mut Orchestrator, operations: Vec<Operation>) {
    for operation in operations {
        let label = operation.label();
        let progress = TaskProgress::start(&label);
        match orch.execute(operation).await {
            Ok(outcome) => {
                progress.complete(&label, &outcome);
                progress.print_document(&outcome);
            }
            Err(err) => progress.rejected(&label, &err),
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
