use crate::constants::protocol::{EXEC_START_FAILURE_STATUS, EXTENDED_DATA_STDERR};
use crate::errors::TunnelError;
use crate::services::executor::{OutputSink, RemoteExecutor};
use crate::services::logger::Logger;
use crate::ssh::events::{ChannelRequest, Inbox};
use crate::utils::redact::redact_text;
use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec, Disconnect};
use std::sync::Arc;

/// Environment assignments of one channel, kept in the order they arrived.
/// Setting a name twice replaces the value and keeps the first position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSet {
    entries: Vec<(String, String)>,
}

impl EnvironmentSet {
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `K1=V1 K2=V2 <command>`. Values are passed through untouched.
    pub fn compose(&self, command: &str) -> String {
        let mut line = String::new();
        for (name, value) in &self.entries {
            line.push_str(name);
            line.push('=');
            line.push_str(value);
            line.push(' ');
        }
        line.push_str(command);
        line
    }
}

/// Low byte of whatever the executor reported.
pub fn truncate_exit_status(code: i32) -> u8 {
    (code & 0xff) as u8
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Forwards executor output onto the channel's regular or extended data stream.
struct ChannelSink {
    handle: Handle,
    channel: ChannelId,
    stream: Stream,
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn write(&self, bytes: &[u8]) -> Result<(), TunnelError> {
        let data = CryptoVec::from_slice(bytes);
        let sent = match self.stream {
            Stream::Stdout => self.handle.data(self.channel, data).await,
            Stream::Stderr => {
                self.handle
                    .extended_data(self.channel, EXTENDED_DATA_STDERR, data)
                    .await
            }
        };
        sent.map_err(|_| TunnelError::internal("channel closed while forwarding output"))
    }
}

/// Drains one channel: env requests, then at most one exec handed to the executor.
pub struct ChannelSession<'a> {
    logger: &'a Logger,
    channel: ChannelId,
    handle: Handle,
    secret: &'a str,
    env: EnvironmentSet,
}

impl<'a> ChannelSession<'a> {
    pub fn new(logger: &'a Logger, channel: ChannelId, handle: Handle, secret: &'a str) -> Self {
        Self {
            logger,
            channel,
            handle,
            secret,
            env: EnvironmentSet::default(),
        }
    }

    /// Returns the exit status sent to the client, or `None` if the channel closed
    /// without an exec request. A malformed request is refused, the connection is torn
    /// down, and the parse error is returned.
    pub async fn run(
        mut self,
        inbox: &mut Inbox<ChannelId, Handle>,
        executor: &dyn RemoteExecutor,
    ) -> Result<Option<u8>, TunnelError> {
        while let Some(request) = inbox.next_request(self.channel).await {
            match request {
                ChannelRequest::Env { name, .. } if name.is_empty() => {
                    self.reply(false).await;
                    return Err(self
                        .abort(TunnelError::parse("env request carried an empty variable name"))
                        .await);
                }
                ChannelRequest::Env { name, value } => {
                    self.reply(true).await;
                    self.env.set(name, value);
                }
                ChannelRequest::Exec { command } => {
                    self.reply(true).await;
                    let status = self.execute(&command, inbox, executor).await;
                    self.finish(status).await;
                    return Ok(Some(status));
                }
                ChannelRequest::Unsupported { kind } => {
                    self.reply(false).await;
                    self.logger.debug(
                        "refused unsupported channel request",
                        Some(&serde_json::json!({ "request": kind })),
                    );
                }
            }
        }
        Ok(None)
    }

    async fn reply(&self, success: bool) {
        let sent = if success {
            self.handle.channel_success(self.channel).await
        } else {
            self.handle.channel_failure(self.channel).await
        };
        if sent.is_err() {
            self.logger.debug("failed to send request reply", None);
        }
    }

    async fn abort(&self, err: TunnelError) -> TunnelError {
        self.logger.warn(
            "aborting connection on malformed request",
            Some(&serde_json::json!({ "error": err.to_string() })),
        );
        if self
            .handle
            .disconnect(Disconnect::ProtocolError, err.message.clone(), String::new())
            .await
            .is_err()
        {
            self.logger.debug("failed to send disconnect", None);
        }
        err
    }

    async fn execute(
        &mut self,
        command: &str,
        inbox: &mut Inbox<ChannelId, Handle>,
        executor: &dyn RemoteExecutor,
    ) -> u8 {
        let line = std::mem::take(&mut self.env).compose(command);
        self.logger.info(
            "executing remote command",
            Some(&serde_json::json!({ "command": redact_text(&line, &[self.secret]) })),
        );

        let stdout: Arc<dyn OutputSink> = Arc::new(ChannelSink {
            handle: self.handle.clone(),
            channel: self.channel,
            stream: Stream::Stdout,
        });
        let stderr: Arc<dyn OutputSink> = Arc::new(ChannelSink {
            handle: self.handle.clone(),
            channel: self.channel,
            stream: Stream::Stderr,
        });

        let mut running = match executor.start(&line, stdout, stderr).await {
            Ok(running) => running,
            Err(err) => {
                self.logger.warn(
                    "remote command failed to start",
                    Some(&serde_json::json!({ "error": err.to_string() })),
                );
                return EXEC_START_FAILURE_STATUS;
            }
        };

        // Requests arriving on this channel while the command runs are refused.
        let wait = running.wait();
        tokio::pin!(wait);
        let mut channel_open = true;
        let waited = loop {
            tokio::select! {
                result = &mut wait => break result,
                request = inbox.next_request(self.channel), if channel_open => match request {
                    Some(request) => {
                        self.logger.warn(
                            "refused request on executing channel",
                            Some(&serde_json::json!({
                                "request": redact_text(&format!("{:?}", request), &[self.secret]),
                            })),
                        );
                        self.reply(false).await;
                    }
                    None => channel_open = false,
                },
            }
        };

        match waited {
            Ok(code) => {
                let status = truncate_exit_status(code);
                self.logger.debug(
                    "remote command finished",
                    Some(&serde_json::json!({ "reported": code, "status": status })),
                );
                status
            }
            Err(err) => {
                self.logger.warn(
                    "remote command did not report a status",
                    Some(&serde_json::json!({ "error": err.to_string() })),
                );
                EXEC_START_FAILURE_STATUS
            }
        }
    }

    async fn finish(&self, status: u8) {
        if self.handle.eof(self.channel).await.is_err() {
            self.logger.debug("failed to send eof", None);
        }
        if self
            .handle
            .exit_status_request(self.channel, u32::from(status))
            .await
            .is_err()
        {
            self.logger.debug("failed to send exit-status", None);
        }
        if self.handle.close(self.channel).await.is_err() {
            self.logger.debug("failed to close channel", None);
        }
    }
}
