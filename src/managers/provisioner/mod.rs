mod config;
mod launch;

pub use config::{PreparedConfig, ProvisionerConfig};
pub use launch::{run_local_command, BridgeEnv};

use crate::errors::TunnelError;
use crate::services::cancel::CancelSignal;
use crate::services::executor::RemoteExecutor;
use crate::services::logger::Logger;
use crate::services::ui::Ui;
use crate::ssh::{Lifecycle, ServeReport, TunnelServer};
use crate::utils::template::ProcessContext;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Couples one tunnel server with one run of the local tool.
pub struct TunnelProvisioner {
    logger: Logger,
    config: PreparedConfig,
    server: Option<TunnelServer>,
}

impl TunnelProvisioner {
    /// Validates the config and brings the server up (keys, credentials, listener),
    /// so setup failures surface before anything is launched.
    pub fn prepare(logger: Logger, config: &ProvisionerConfig) -> Result<Self, TunnelError> {
        let config = config.prepare(&ProcessContext)?;
        let server = TunnelServer::new(logger.child("server"), config.host_key)
            .map_err(|err| err.context("could not initialize ssh server"))?;
        Ok(Self {
            logger,
            config,
            server: Some(server),
        })
    }

    pub fn config(&self) -> &PreparedConfig {
        &self.config
    }

    /// Port of the not-yet-used server.
    pub fn port(&self) -> Option<u16> {
        self.server.as_ref().map(TunnelServer::port)
    }

    pub async fn provision(
        &mut self,
        ui: &dyn Ui,
        executor: Arc<dyn RemoteExecutor>,
        cancel: &CancelSignal,
    ) -> Result<ServeReport, TunnelError> {
        let server = self.server.take().ok_or_else(|| {
            TunnelError::internal("tunnel server was already used")
                .with_hint("Prepare a new provisioner for every run.")
        })?;

        ui.say("Starting tunnel");
        let bridge = BridgeEnv::new(
            &self.config.env_prefix,
            server.username(),
            server.password(),
            server.port(),
        );
        let secret = server.password().to_string();
        let lifecycle = server.lifecycle();
        self.logger.info(
            "tunnel ready",
            Some(&serde_json::json!({ "port": server.port() })),
        );

        let (tx, rx) = oneshot::channel();
        let serve = tokio::spawn(async move {
            let _ = tx.send(server.serve_one(executor).await);
        });

        let launched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                serve.abort();
                return Err(self.cancelled());
            }
            result = run_local_command(
                &self.logger,
                ui,
                &self.config.exec,
                &self.config.args,
                &bridge,
                &secret,
            ) => result,
        };
        if let Err(err) = launched {
            serve.abort();
            return Err(err);
        }

        if *lifecycle.borrow() == Lifecycle::Listening {
            serve.abort();
            return Err(TunnelError::handshake(
                "local command exited without connecting to the tunnel",
            )
            .with_hint(format!(
                "The command must connect to 127.0.0.1:${}_PORT.",
                self.config.env_prefix
            )));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                serve.abort();
                Err(self.cancelled())
            }
            outcome = rx => outcome.map_err(|_| {
                TunnelError::internal("tunnel server task ended without reporting")
            })?,
        }
    }

    fn cancelled(&self) -> TunnelError {
        self.logger.warn("Cancelled", None);
        TunnelError::cancelled("provisioning was cancelled")
    }
}
