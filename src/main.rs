use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tunnel::constants::exit_codes;
use tunnel::errors::TunnelError;
use tunnel::managers::provisioner::{ProvisionerConfig, TunnelProvisioner};
use tunnel::services::cancel::CancelSignal;
use tunnel::services::credentials::HostKeyKind;
use tunnel::services::executor::LocalExecutor;
use tunnel::services::logger::Logger;
use tunnel::services::ui::ConsoleUi;

#[derive(Parser, Debug)]
#[command(name = "tunnel")]
#[command(about = "Run a local tool against a one-shot loopback SSH endpoint", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON file with exec, args, host_key and env_prefix
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Host key algorithm for the ephemeral server identity
    #[arg(long, value_name = "KIND")]
    host_key: Option<HostKeyKind>,

    /// Prefix of the USERNAME/PASSWORD/PORT variables given to the tool
    #[arg(long, value_name = "PREFIX")]
    env_prefix: Option<String>,

    /// Tool to run and its arguments
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

async fn run(cli: Cli, logger: Logger, cancel: CancelSignal) -> Result<(), TunnelError> {
    let config = match &cli.config {
        Some(path) => ProvisionerConfig::from_json_file(path)?,
        None => ProvisionerConfig::default(),
    }
    .merge(cli.command, cli.host_key, cli.env_prefix);

    let mut provisioner = TunnelProvisioner::prepare(logger.clone(), &config)?;
    let executor = Arc::new(LocalExecutor::new(logger.child("executor")));
    let report = provisioner.provision(&ConsoleUi, executor, &cancel).await?;
    logger.debug(
        "provisioning finished",
        Some(&serde_json::json!({
            "channels": report.channels,
            "exit_statuses": report.exit_statuses,
        })),
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let logger = Logger::new("tunnel");
    let cancel = CancelSignal::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    if let Err(err) = run(cli, logger, cancel).await {
        eprintln!("tunnel: {}", err);
        let code = if err.is_cancelled() {
            exit_codes::CANCELLED
        } else {
            exit_codes::FAILURE
        };
        std::process::exit(code);
    }
}
