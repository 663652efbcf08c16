// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use herald::config::{Cli, Command, ListenConfig, NotifyConfig};
use herald::{Broker, Notifier};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli);

    let result = match cli.command {
        Command::Listen(config) => listen(config).await,
        Command::Notify(config) => notify(config).await,
    };
    if let Err(e) = result {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

async fn listen(config: ListenConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let mut broker = Broker::bind(&config).await?;

    let events = broker.events_mut();
    events.on_update(|roster| debug!(subscribers = roster.len(), "roster updated"));
    events.on_message(|delivery| {
        debug!(targets = delivery.targets.len(), bytes = delivery.message.len(), "message routed")
    });
    events.on_error(|fault| warn!(kind = %fault.kind, "broker error event: {:#}", fault.error));

    let sd = shutdown.clone();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!("received {signal}");
        sd.cancel();
    });

    broker.run(shutdown).await;
    Ok(())
}

/// Resolve on SIGTERM or SIGINT, returning which one arrived.
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();

    tokio::select! {
        _ = async {
            if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
        } => "SIGTERM",
        _ = async {
            if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
        } => "SIGINT",
    }
}

async fn notify(config: NotifyConfig) -> anyhow::Result<()> {
    let notifier = Notifier::from_config(&config);
    notifier.send(&config.envelope()).await?;
    info!(endpoint = %notifier.endpoint(), "notification sent");
    Ok(())
}
