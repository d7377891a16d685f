use std::process;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kubesim::cli::{
    format_cluster_status, format_node_list, format_pod_list, format_reschedule, Cli, Commands,
    CommandError, ControlPlaneClient, GetResource, NodeAction, PodAction, ServeArgs,
};
use kubesim::cluster::{
    create_control_plane_router, spawn_detector, spawn_heartbeat, ClusterController,
    ControlPlaneState, HeartbeatConfig,
};
use kubesim::config::{expand_path, load_config, load_config_from, ClusterConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = ControlPlaneClient::new(cli.url.clone());

    match cli.command {
        Commands::Serve(args) => serve(cli.config.as_deref(), &args).await,
        Commands::Agent(args) => {
            let config = HeartbeatConfig::new(cli.url, args.node_id).with_interval(args.interval);
            let shutdown = spawn_heartbeat(config)?;
            tokio::signal::ctrl_c().await?;
            let _ = shutdown.send(true);
            Ok(())
        }
        Commands::Get(args) => {
            match args.resource {
                GetResource::Nodes => print!("{}", format_node_list(&client.list_nodes().await?)),
                GetResource::Pods => print!("{}", format_pod_list(&client.list_pods().await?)),
            }
            Ok(())
        }
        Commands::Status => {
            print!("{}", format_cluster_status(&client.status().await?));
            Ok(())
        }
        Commands::Node(args) => {
            match args.action {
                NodeAction::Add { cpu, affinity } => {
                    let added = client.add_node(cpu, affinity).await?;
                    println!("{}", added.message);
                }
                NodeAction::Fail { node_id } => {
                    print!("{}", format_reschedule(&client.fail_node(node_id).await?));
                }
                NodeAction::Heartbeat { node_id } => {
                    println!("{}", client.heartbeat(node_id).await?.message);
                }
            }
            Ok(())
        }
        Commands::Pod(args) => {
            match args.action {
                PodAction::Request { cpu } => {
                    let placed = client.request_pod(cpu).await?;
                    println!("{}", placed.message);
                }
                PodAction::Remove { pod_id } => {
                    println!("{}", client.remove_pod(pod_id).await?.message);
                }
                PodAction::Reschedule => {
                    print!("{}", format_reschedule(&client.reschedule().await?));
                }
            }
            Ok(())
        }
    }
}

fn resolve_config(path: Option<&str>, args: &ServeArgs) -> Result<ClusterConfig, CommandError> {
    let mut config = match path {
        Some(raw) => {
            let path = expand_path(raw).map_err(|e| CommandError::Config(e.to_string()))?;
            load_config_from(&path)
        }
        None => load_config(),
    }
    .map_err(|e| CommandError::Config(e.to_string()))?;

    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| CommandError::Config(e.to_string()))?;
    Ok(config)
}

async fn serve(config_path: Option<&str>, args: &ServeArgs) -> anyhow::Result<()> {
    let config = resolve_config(config_path, args)?;

    let controller = Arc::new(ClusterController::with_provisioner(
        config.build_provisioner(),
    ));
    let detector = spawn_detector(controller.clone(), config.detector_config());
    let app = create_control_plane_router(ControlPlaneState::with_controller(controller.clone()));

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(
        "Control plane listening on {} ({} provisioner, heartbeat timeout {}s)",
        addr,
        controller.provisioner_name(),
        config.heartbeat_timeout_secs
    );
    info!("Endpoints:");
    info!("  POST   /node/add                  - Add a node");
    info!("  GET    /nodes                     - List nodes");
    info!("  POST   /node/heartbeat/{{node_id}}  - Node heartbeat");
    info!("  POST   /node/fail/{{node_id}}       - Fail a node");
    info!("  POST   /pod/request               - Request a pod");
    info!("  DELETE /pod/remove/{{pod_id}}       - Remove a pod");
    info!("  GET    /pods                      - List pods");
    info!("  POST   /pods/reschedule           - Retry pending pods");
    info!("  GET    /cluster/status            - Cluster summary");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    let _ = detector.send(true);
    controller.shutdown().await;
    info!("Control plane stopped");
    Ok(())
}
