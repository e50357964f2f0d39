use std::collections::VecDeque;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Channel-scoped requests the tunnel understands. Everything else collapses into
/// `Unsupported` so the dispatcher can refuse it on the channel's turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    Env { name: String, value: String },
    Exec { command: String },
    Unsupported { kind: String },
}

/// What the protocol callbacks report to the sequential dispatcher.
///
/// Generic over the channel id and session handle so the ordering logic can be
/// exercised without a live connection.
#[derive(Debug)]
pub enum SessionEvent<C, H> {
    Authenticated { user: String },
    ChannelOpened { channel: C, handle: H },
    Request { channel: C, request: ChannelRequest },
    ChannelClosed { channel: C },
}

impl<C: Copy, H> SessionEvent<C, H> {
    fn channel(&self) -> Option<C> {
        match self {
            SessionEvent::Authenticated { .. } => None,
            SessionEvent::ChannelOpened { channel, .. }
            | SessionEvent::Request { channel, .. }
            | SessionEvent::ChannelClosed { channel } => Some(*channel),
        }
    }
}

pub type EventSender<C, H> = UnboundedSender<SessionEvent<C, H>>;

/// Reorders the interleaved event stream into one-channel-at-a-time processing.
///
/// Events for a channel other than the one being drained are parked in a backlog and
/// replayed when that channel's turn comes.
pub struct Inbox<C, H> {
    rx: UnboundedReceiver<SessionEvent<C, H>>,
    backlog: VecDeque<SessionEvent<C, H>>,
    authenticated: Option<String>,
}

impl<C, H> Inbox<C, H>
where
    C: Copy + Eq,
{
    pub fn new(rx: UnboundedReceiver<SessionEvent<C, H>>) -> Self {
        Self {
            rx,
            backlog: VecDeque::new(),
            authenticated: None,
        }
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated.is_some()
    }

    pub fn authenticated_user(&self) -> Option<&str> {
        self.authenticated.as_deref()
    }

    async fn pull(&mut self) -> Option<SessionEvent<C, H>> {
        let event = self.rx.recv().await?;
        if let SessionEvent::Authenticated { user } = &event {
            self.authenticated = Some(user.clone());
        }
        Some(event)
    }

    /// Next opened channel, in open order. `None` once the connection is gone.
    /// Leftovers from channels that were already drained are discarded on the way.
    pub async fn next_channel(&mut self) -> Option<(C, H)> {
        loop {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => self.pull().await?,
            };
            if let SessionEvent::ChannelOpened { channel, handle } = event {
                return Some((channel, handle));
            }
        }
    }

    /// Next request on `channel`. `None` when the channel closed or the connection ended.
    pub async fn next_request(&mut self, channel: C) -> Option<ChannelRequest> {
        let parked = self.backlog.iter().position(|event| {
            event.channel() == Some(channel)
                && !matches!(event, SessionEvent::ChannelOpened { .. })
        });
        if let Some(index) = parked {
            return match self.backlog.remove(index)? {
                SessionEvent::Request { request, .. } => Some(request),
                _ => None,
            };
        }

        loop {
            let event = self.pull().await?;
            match event {
                SessionEvent::Request {
                    channel: id,
                    request,
                } if id == channel => return Some(request),
                SessionEvent::ChannelClosed { channel: id } if id == channel => return None,
                SessionEvent::Authenticated { .. } => {}
                other => self.backlog.push_back(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    type Event = SessionEvent<u32, ()>;

    fn env(channel: u32, name: &str) -> Event {
        SessionEvent::Request {
            channel,
            request: ChannelRequest::Env {
                name: name.to_string(),
                value: "1".to_string(),
            },
        }
    }

    fn opened(channel: u32) -> Event {
        SessionEvent::ChannelOpened { channel, handle: () }
    }

    #[tokio::test]
    async fn drains_one_channel_before_the_next() {
        let (tx, rx) = unbounded_channel();
        let mut inbox = Inbox::new(rx);
        tx.send(SessionEvent::Authenticated {
            user: "u".to_string(),
        })
        .unwrap();
        tx.send(opened(1)).unwrap();
        tx.send(opened(2)).unwrap();
        tx.send(env(2, "SECOND")).unwrap();
        tx.send(env(1, "FIRST")).unwrap();
        tx.send(SessionEvent::ChannelClosed { channel: 1 }).unwrap();
        drop(tx);

        let (first, _) = inbox.next_channel().await.unwrap();
        assert_eq!(first, 1);
        assert!(inbox.authenticated());
        assert_eq!(inbox.authenticated_user(), Some("u"));
        assert_eq!(
            inbox.next_request(1).await,
            Some(ChannelRequest::Env {
                name: "FIRST".to_string(),
                value: "1".to_string()
            })
        );
        assert_eq!(inbox.next_request(1).await, None);

        let (second, _) = inbox.next_channel().await.unwrap();
        assert_eq!(second, 2);
        assert!(matches!(
            inbox.next_request(2).await,
            Some(ChannelRequest::Env { ref name, .. }) if name == "SECOND"
        ));
        assert_eq!(inbox.next_request(2).await, None);
        assert!(inbox.next_channel().await.is_none());
    }

    #[tokio::test]
    async fn stale_events_of_finished_channels_are_skipped() {
        let (tx, rx) = unbounded_channel();
        let mut inbox = Inbox::<u32, ()>::new(rx);
        tx.send(env(7, "LATE")).unwrap();
        tx.send(SessionEvent::ChannelClosed { channel: 7 }).unwrap();
        tx.send(opened(8)).unwrap();
        drop(tx);

        let (channel, _) = inbox.next_channel().await.unwrap();
        assert_eq!(channel, 8);
        assert!(!inbox.authenticated());
    }
}
