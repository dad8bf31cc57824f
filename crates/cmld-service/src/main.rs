//! cml-service binary entry point.
//!
//! `serve` hosts the service socket for a standalone container, `agent`
//! plays the companion agent for one message.

use clap::Parser;
use tokio::task::LocalSet;
use tracing::{error, info, warn};

use cmld_core::Result;
use cmld_service::cli::{AgentArgs, Command, ServeArgs};
use cmld_service::{AgentClient, Cli, StandaloneConfig, StandaloneContainer};

fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = cmld_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "cml-service starting");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let local = LocalSet::new();
    let result = local.block_on(&rt, async {
        match &cli.command {
            Command::Serve(args) => serve(args).await,
            Command::Agent(args) => agent(args).await,
        }
    });

    if let Err(e) = result {
        error!(error = %e, "cml-service failed");
        eprintln!("cml-service: {}", e);
        std::process::exit(1);
    }
}

async fn serve(args: &ServeArgs) -> Result<()> {
    let container = StandaloneContainer::new(StandaloneConfig {
        name: args.name.clone(),
        dns_server: args.dns_server.clone(),
        allow_exec: args.allow_exec,
    });
    container.start(args.service_config())?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to wait for Ctrl-C");
            }
            info!("Interrupted, stopping container");
            if let Err(e) = cmld_core::Container::stop(&*container) {
                warn!(error = %e, "Failed to stop container");
            }
        }
        _ = container.stop_requested() => {
            info!("Container stop requested");
        }
    }

    container.finish(args.stop_timeout()).await;
    info!("cml-service stopped");
    Ok(())
}

async fn agent(args: &AgentArgs) -> Result<()> {
    let message = args
        .message()
        .map_err(|message| cmld_core::Error::Config { message })?;

    let path = args.socket.service_config().socket_path();
    let mut client = AgentClient::connect(&path).await?;
    info!(path = %path.display(), "Connected to service socket");

    client.send(&message).await?;
    info!(code = message.code().as_str_name(), "Message sent");

    if let Some(wait) = args.wait() {
        match client.recv_timeout(wait).await? {
            Some(reply) => println!("{:?}", reply),
            None => warn!(wait = ?wait, "No reply received"),
        }
    }

    client.shutdown().await?;
    Ok(())
}
