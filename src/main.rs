/*
    Launcher for one hub session: starts three processes on the configured
    ports, each registering with the hub on its own, then waits for Ctrl-C.
    A process that fails to start takes the whole launcher down; a process
    that dies later only stops itself.
*/

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use dalgs_node::cli::Args;
use dalgs_node::config::NodeConfig;
use dalgs_node::network::Node;
use dalgs_node::tracing_setup;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    tracing_setup::init(args.log.as_deref());

    let config = NodeConfig::try_from(args).context("invalid configuration")?;
    let shutdown = CancellationToken::new();

    let mut nodes = Vec::new();
    for process in config.processes() {
        let node = Node::start(&process, &config, shutdown.child_token())
            .await
            .with_context(|| format!("could not start process {} on port {}", process.index, process.port))?;
        nodes.push(node);
    }
    tracing::info!(owner = %config.owner, count = nodes.len(), "processes running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("could not listen for Ctrl-C")?;
    tracing::info!("shutting down");
    shutdown.cancel();
    for node in nodes {
        node.join().await;
    }
    Ok(())
}
