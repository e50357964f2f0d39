use crate::errors::TunnelError;
use crate::services::credentials::Credentials;
use crate::services::logger::Logger;
use crate::ssh::events::{ChannelRequest, EventSender, SessionEvent};
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId};

pub type TunnelEvent = SessionEvent<ChannelId, Handle>;

/// Exec payloads are opaque bytes on the wire; invalid UTF-8 is replaced, not refused.
fn command_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

/// Protocol callbacks for the single tunnel connection.
///
/// Callbacks only forward requests to the dispatcher and never wait on it. Request
/// replies are sent by the dispatcher through `Handle` once the channel's turn comes,
/// so a channel queued behind a running command gets no acknowledgement until then.
pub struct TunnelHandler {
    logger: Logger,
    credentials: Credentials,
    events: EventSender<ChannelId, Handle>,
}

impl TunnelHandler {
    pub fn new(logger: Logger, credentials: Credentials, events: EventSender<ChannelId, Handle>) -> Self {
        Self {
            logger,
            credentials,
            events,
        }
    }

    fn emit(&self, event: TunnelEvent) {
        if self.events.send(event).is_err() {
            self.logger.debug("dispatcher is gone; dropping event", None);
        }
    }

    fn unsupported(&self, channel: ChannelId, kind: &str) -> Result<(), TunnelError> {
        self.emit(SessionEvent::Request {
            channel,
            request: ChannelRequest::Unsupported {
                kind: kind.to_string(),
            },
        });
        Ok(())
    }
}

impl Handler for TunnelHandler {
    type Error = TunnelError;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.credentials.matches(user, password) {
            self.logger.debug("client authenticated", None);
            self.emit(SessionEvent::Authenticated {
                user: user.to_string(),
            });
            return Ok(Auth::Accept);
        }
        self.logger.warn(
            "rejected password authentication",
            Some(&serde_json::json!({ "user": user })),
        );
        Ok(Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        self.logger.debug(
            "session channel opened",
            Some(&serde_json::json!({ "channel": format!("{:?}", id) })),
        );
        self.emit(SessionEvent::ChannelOpened {
            channel: id,
            handle: session.handle(),
        });
        Ok(true)
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.emit(SessionEvent::Request {
            channel,
            request: ChannelRequest::Env {
                name: variable_name.to_string(),
                value: variable_value.to_string(),
            },
        });
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.emit(SessionEvent::Request {
            channel,
            request: ChannelRequest::Exec {
                command: command_text(data),
            },
        });
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.unsupported(channel, "shell")
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.unsupported(channel, &format!("subsystem:{}", name))
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.unsupported(channel, "pty-req")
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.emit(SessionEvent::ChannelClosed { channel });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_bytes_that_are_not_utf8_still_yield_a_command() {
        assert_eq!(command_text(b"make all"), "make all");
        assert_eq!(command_text(b"echo \xff\xfe done"), "echo \u{fffd}\u{fffd} done");
    }
}
