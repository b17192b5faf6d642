//! Cluster demo - runs a group of executors in one process
//!
//! Starts several nodes on an in-memory group bus, waits for membership to
//! converge, multicasts a greeting and prints every node's outcome.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use clap::Parser;
use colored::*;
use serde_json::json;
use ream_cluster::cluster::{
    argument, ClusterExecutor, ClusterRequest, MemoryGroup, MethodHandler, MethodKey, MethodRegistry,
    StaticNodeIdentity, UuidGenerator,
};
use ream_cluster::{logging, ClusterConfig, ClusterNodeResponses};

#[derive(Parser)]
#[command(
    name = "cluster-demo",
    version = "0.1.0",
    about = "Run an in-process cluster and multicast a request to every node"
)]
struct Cli {
    /// Number of nodes to start
    #[arg(short, long, default_value_t = 3)]
    nodes: usize,

    /// Message sent to every node
    #[arg(short, long, default_value = "hello")]
    message: String,

    /// Cluster configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not run the request on the sending node
    #[arg(long)]
    skip_local: bool,

    /// Also send a unicast to a node that does not exist
    #[arg(long)]
    ghost: bool,

    /// How long to wait for responses, in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

fn greet_key() -> MethodKey {
    MethodKey::new("Demo", "greet")
}

fn registry() -> Arc<MethodRegistry> {
    let registry = MethodRegistry::new();
    registry.register(greet_key(), |ctx, args| {
        let message: String = argument(args, 0)?;
        let node = ctx
            .local_node()
            .map(|node| node.node_id().to_string())
            .unwrap_or_else(|| "local".to_string());
        Ok(format!("{} from {}", message, node))
    });
    Arc::new(registry)
}

fn wait_for_members(executors: &[ClusterExecutor], expected: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if executors.iter().all(|executor| executor.list_members().len() == expected) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn print_responses(title: &str, responses: &ClusterNodeResponses) {
    println!("{}", title.bold());
    let mut node_ids: Vec<_> = responses.node_ids().cloned().collect();
    node_ids.sort();
    for node_id in node_ids {
        let Some(response) = responses.get(&node_id) else {
            continue;
        };
        match response.result() {
            Ok(value) => println!("  {} {} {}", "✓".green(), node_id, value),
            Err(failure) => println!("  {} {} {}", "✗".red(), node_id, failure),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ClusterConfig::from_file(path)?,
        None => ClusterConfig::enabled(),
    };
    logging::init(&config.log_level);

    if !config.enabled {
        println!("{}", "Clustering is disabled in the configuration".yellow());
        return Ok(());
    }

    let group = MemoryGroup::new();
    let generator = Arc::new(UuidGenerator);
    let registry = registry();

    let mut executors = Vec::with_capacity(cli.nodes);
    for index in 0..cli.nodes {
        let port = 7800 + index as u16;
        let identity = StaticNodeIdentity::new(
            format!("node-{}", index + 1),
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        );
        let executor = ClusterExecutor::new(
            config.clone(),
            Arc::new(group.transport()),
            Arc::new(identity),
            generator.clone(),
            Arc::clone(&registry),
        );
        executor.initialize()?;
        executors.push(executor);
    }

    let timeout = Duration::from_millis(cli.timeout_ms);
    if !wait_for_members(&executors, cli.nodes, timeout) {
        anyhow::bail!("membership did not converge within {:?}", timeout);
    }

    let Some(origin) = executors.first() else {
        println!("{}", "No nodes to run".yellow());
        return Ok(());
    };
    println!(
        "{} {} nodes, sending from {}",
        "Cluster up:".green().bold(),
        cli.nodes,
        origin.local_node().map(|node| node.to_string()).unwrap_or_default()
    );

    let handler = MethodHandler::new(greet_key(), vec![json!(cli.message)]);
    let request = ClusterRequest::multicast_skip_local(handler.clone(), cli.skip_local);
    if let Some(future) = origin.execute(request)? {
        print_responses("Multicast", &future.get_timeout(timeout)?);
    }

    if cli.ghost {
        let request = ClusterRequest::unicast(handler, ["ghost-1"]);
        if let Some(future) = origin.execute(request)? {
            print_responses("Unicast to ghost-1", &future.get_timeout(timeout)?);
        }
    }

    for executor in &executors {
        executor.destroy();
    }
    Ok(())
}
