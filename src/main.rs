use clap::error::ErrorKind;
use clap::Parser;
use std::process::ExitCode;
use tokio::net::TcpListener;

use chord_kvs::node::{NodeConfig, OverlayNode};
use chord_kvs::ring::NodeRef;
use chord_kvs::server::listener::DEFAULT_WORKERS;
use chord_kvs::server::KvServer;

/// Distributed key-value store node.
#[derive(Parser, Debug)]
#[command(name = "chord-kvs", disable_help_flag = true)]
struct Args {
    /// Server port (the node identity is derived from host:port).
    #[arg(short = 'p', long = "port")]
    port: u16,

    /// Join an existing ring via this node (host:port); omit to create a
    /// new ring.
    #[arg(short = 'j', long = "join", value_name = "HOST:PORT")]
    join: Option<String>,

    /// Number of connection worker slots.
    #[arg(short = 't', long = "threads", default_value_t = DEFAULT_WORKERS)]
    threads: usize,

    /// Show this help message.
    #[arg(short = 'h', long = "help", action = clap::ArgAction::Help)]
    help: Option<bool>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
            let _ = e.print();
            return code;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let host = "127.0.0.1";

    let mut config = NodeConfig::default();
    if let Some(factor) = std::env::var("REPLICATION_FACTOR")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        config.replication.replication_factor = factor;
    }
    if let Ok(value) = std::env::var("ASYNC_REPLICATION") {
        config.replication.async_mode = matches!(value.as_str(), "1" | "true" | "yes");
    }

    let node = OverlayNode::new(host, args.port, config);
    tracing::info!("node identity: {}", node.local());

    // Bind before touching the ring, so a taken port fails fast.
    let listener = TcpListener::bind((host, args.port)).await?;

    match &args.join {
        Some(seed) => {
            let seed = NodeRef::parse(seed)?;
            tracing::info!("joining ring via {}", seed);
            node.join(seed).await?;
        }
        None => {
            node.create();
        }
    }

    node.start_maintenance();

    let server = KvServer::new(node.clone(), args.threads);
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    node.leave().await;
    server.shutdown();
    serving.await??;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                tracing::warn!("no SIGTERM handler ({}), relying on SIGINT", e);
                let _ = interrupt.await;
                return;
            }
        };
        tokio::select! {
            _ = interrupt => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = interrupt.await;
    }
}
