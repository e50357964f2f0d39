use crate::constants::protocol::AUTH_REJECTION_DELAY_MS;
use crate::errors::{TunnelError, TunnelErrorKind};
use crate::services::credentials::{CredentialIssuer, Credentials, HostKeyKind};
use crate::services::executor::RemoteExecutor;
use crate::services::listener::LoopbackListener;
use crate::services::logger::Logger;
use crate::ssh::events::Inbox;
use crate::ssh::handler::TunnelHandler;
use crate::ssh::session::ChannelSession;
use russh::keys::PrivateKey;
use russh::server::Handle;
use russh::{ChannelId, MethodKind, MethodSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Listening,
    Connected,
    Closed,
}

/// Publishes lifecycle transitions and marks the server closed however it goes away:
/// served, failed, or dropped mid-accept.
#[derive(Debug)]
struct LifecycleCell(watch::Sender<Lifecycle>);

impl LifecycleCell {
    fn set(&self, state: Lifecycle) {
        self.0.send_replace(state);
    }
}

impl Drop for LifecycleCell {
    fn drop(&mut self) {
        self.0.send_replace(Lifecycle::Closed);
    }
}

/// Outcome of the single served connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeReport {
    pub authenticated: bool,
    pub channels: usize,
    pub exit_statuses: Vec<u8>,
}

/// One-shot SSH endpoint: fresh identity, loopback listener, one connection.
#[derive(Debug)]
pub struct TunnelServer {
    logger: Logger,
    credentials: Credentials,
    listener: LoopbackListener,
    lifecycle: LifecycleCell,
}

impl TunnelServer {
    pub fn new(logger: Logger, host_key: HostKeyKind) -> Result<Self, TunnelError> {
        let (tx, _rx) = watch::channel(Lifecycle::Created);
        let lifecycle = LifecycleCell(tx);
        let credentials = CredentialIssuer::new(host_key).issue()?;
        let listener = LoopbackListener::bind()?;
        lifecycle.set(Lifecycle::Listening);
        logger.debug(
            "tunnel listening",
            Some(&serde_json::json!({
                "addr": listener.local_addr().to_string(),
                "host_key": host_key.to_string(),
                "fingerprint": credentials.host_key_fingerprint(),
            })),
        );
        Ok(Self {
            logger,
            credentials,
            listener,
            lifecycle,
        })
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn password(&self) -> &str {
        &self.credentials.password
    }

    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.0.subscribe()
    }

    /// Accepts one connection and serves it to completion. Consumes the server, so the
    /// listener is closed as soon as that connection has been taken.
    pub async fn serve_one(
        self,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<ServeReport, TunnelError> {
        let TunnelServer {
            logger,
            credentials,
            listener,
            lifecycle,
        } = self;

        let (stream, peer) = listener.accept_one(&logger).await?;
        lifecycle.set(Lifecycle::Connected);
        logger.info(
            "tunnel connection accepted",
            Some(&serde_json::json!({ "peer": peer.to_string() })),
        );

        let config = Arc::new(protocol_config(credentials.host_key.clone()));
        let password = credentials.password.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = TunnelHandler::new(logger.child("ssh"), credentials, tx);
        let running = russh::server::run_stream(config, stream, handler)
            .await
            .map_err(|err| TunnelError::handshake(err.message).context("ssh handshake failed"))?;

        let mut inbox = Inbox::new(rx);
        let (session, dispatched) = tokio::join!(
            running,
            dispatch(&logger, &mut inbox, executor.as_ref(), &password)
        );
        let authenticated = inbox.authenticated();
        let (channels, exit_statuses) = dispatched?;

        match session {
            Err(err) if !authenticated => {
                return Err(TunnelError::handshake(err.message).context("client never authenticated"));
            }
            Err(err) if err.kind == TunnelErrorKind::Disconnected => {
                logger.debug(
                    "client hung up",
                    Some(&serde_json::json!({ "error": err.to_string() })),
                );
            }
            Err(err) => {
                logger.warn(
                    "connection failed",
                    Some(&serde_json::json!({ "error": err.to_string() })),
                );
                return Err(err);
            }
            Ok(()) if !authenticated => {
                return Err(TunnelError::handshake(
                    "connection closed before authentication",
                ));
            }
            Ok(()) => {}
        }

        logger.info(
            "tunnel connection finished",
            Some(&serde_json::json!({
                "user": inbox.authenticated_user(),
                "channels": channels,
                "exit_statuses": exit_statuses,
            })),
        );
        Ok(ServeReport {
            authenticated,
            channels,
            exit_statuses,
        })
    }
}

fn protocol_config(host_key: PrivateKey) -> russh::server::Config {
    russh::server::Config {
        keys: vec![host_key],
        methods: MethodSet::from(&[MethodKind::Password][..]),
        auth_rejection_time: Duration::from_millis(AUTH_REJECTION_DELAY_MS),
        auth_rejection_time_initial: Some(Duration::ZERO),
        inactivity_timeout: None,
        ..Default::default()
    }
}

/// Channels strictly one at a time, in open order, until the connection ends or a
/// channel aborts it.
async fn dispatch(
    logger: &Logger,
    inbox: &mut Inbox<ChannelId, Handle>,
    executor: &dyn RemoteExecutor,
    secret: &str,
) -> Result<(usize, Vec<u8>), TunnelError> {
    let session_logger = logger.child("channel");
    let mut channels = 0;
    let mut statuses = Vec::new();
    while let Some((channel, handle)) = inbox.next_channel().await {
        channels += 1;
        let session = ChannelSession::new(&session_logger, channel, handle, secret);
        if let Some(status) = session.run(inbox, executor).await? {
            statuses.push(status);
        }
    }
    Ok((channels, statuses))
}
