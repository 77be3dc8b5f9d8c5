use anyhow::{Context, Result};
use clap::Parser;
use log_threshold_rs::services::alert_sink::JsonLinesAlertFactory;
use log_threshold_rs::services::elasticsearch::ElasticsearchClient;
use log_threshold_rs::services::log_threshold::{evaluate_rules_now, LogThresholdService};
use log_threshold_rs::{cli, config};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::RunnerConfig::from_env(args.rules)?;
    let rules = config::load_rules(&config.rules_path)?;
    let source = config.log_source()?;
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build http client")?;
    let client = Arc::new(ElasticsearchClient::new(
        config.es_url.clone(),
        http,
        config.basic_auth(),
        config.request_timeout(),
    ));
    let factory = Arc::new(JsonLinesAlertFactory::stdout());

    tracing::info!(
        rules = rules.len(),
        index = %source.indices,
        es_url = %config.es_url,
        "log threshold runner starting"
    );

    let cancel = CancellationToken::new();
    if args.once {
        let failures = evaluate_rules_now(
            &rules,
            &source,
            client.as_ref(),
            factory.as_ref(),
            &cancel,
        )
        .await;
        if failures > 0 {
            anyhow::bail!("{failures} of {} rules failed to evaluate", rules.len());
        }
        return Ok(());
    }

    let service = LogThresholdService::new(
        rules,
        source,
        client,
        factory,
        config.poll_interval_seconds,
    );
    let handle = service.start(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");
    cancel.cancel();
    handle.await.context("log threshold service task failed")?;
    Ok(())
}
