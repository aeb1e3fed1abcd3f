//! Glob-addressed publish/subscribe bus (component J, Hook bus).
//!
//! Every fact the core produces — a stanza crossing the wire, a roster
//! change, a MUC status-code transition, a history readmark move — is
//! published as an [`Event`] on a dotted [`Channel`] name. Subscribers pick
//! a glob pattern (`"roster.**"`, `"muc.*.presence"`, `"**"`) and receive
//! every event whose channel matches.

use std::sync::{Arc, Mutex};

use globset::{Glob, GlobMatcher};
use thiserror::Error;
use tokio::sync::broadcast;

/// A dotted channel name, e.g. `"xmpp.stanza.received"` or `"muc.room.joined"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> Result<Self, EventBusError> {
        let name = name.into();
        if name.is_empty() {
            return Err(EventBusError::InvalidChannel(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who originated an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    /// The XMPP session controller, stream parser, or processors (A/D/E).
    Xmpp,
    /// The roster or MUC engine (F/G).
    Roster,
    /// The history buffer (H).
    History,
    /// A component driven directly by user input (the line editor, L).
    Ui(UiTarget),
    /// Process-level facts (startup, shutdown, config reload).
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiTarget {
    Editor,
    Cli,
}

/// The payload carried by an [`Event`]. Grouped roughly by originating
/// component; new variants are additive, never removed, so a subscriber
/// matching on an old pattern keeps compiling.
/// Roster subscription state, mirrored from `xmpp_parsers::roster::
/// Subscription` so `wisp-core` doesn't need an `xmpp-parsers` dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    None,
    From,
    To,
    Both,
    Remove,
}

/// Wire-shaped roster entry carried over the bus. `wisp-roster` owns the
/// richer in-memory contact/resource model and converts from this on
/// receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterItem {
    pub jid: String,
    pub name: Option<String>,
    pub subscription: Subscription,
    pub groups: Vec<String>,
}

/// XEP-0085 chat state, mirrored from `xmpp_parsers::chatstates::ChatState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Active,
    Composing,
    Paused,
    Inactive,
    Gone,
}

/// Message stanza subtype, mirrored from `xmpp_parsers::message::MessageType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Chat,
    Groupchat,
    Headline,
    Normal,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub message_type: MessageType,
    pub thread: Option<String>,
}

/// XEP-0045 occupant affiliation, mirrored from
/// `xmpp_parsers::muc::user::Affiliation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MucAffiliation {
    Owner,
    Admin,
    Member,
    Outcast,
    None,
}

/// XEP-0045 occupant role, mirrored from `xmpp_parsers::muc::user::Role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MucRole {
    Moderator,
    Participant,
    Visitor,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MucOccupant {
    pub nick: String,
    pub jid: Option<String>,
    pub affiliation: MucAffiliation,
    pub role: MucRole,
}

/// Why a MUC occupant's presence disappeared, classified per the status
/// codes in SPEC_FULL.md §4.G.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MucLeaveReason {
    Left,
    Kicked,
    Banned,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    // --- component E: session controller -----------------------------
    ConnectionEstablished { jid: String },
    ConnectionLost { reason: String },
    Reconnecting { attempt: u32 },
    AuthenticationFailed { reason: String },

    // --- component D/E: raw stanza traffic -----------------------------
    RawStanzaReceived { stanza: String },
    RawStanzaSent { stanza: String },

    // --- component F: roster ------------------------------------------
    RosterReceived { items: Vec<RosterItem> },
    RosterUpdated { item: RosterItem },
    RosterRemoved { jid: String },
    PresenceChanged { jid: String, resource: String, available: bool },

    // --- component E/F: messaging --------------------------------------
    MessageReceived { message: ChatMessage },
    MessageSent { to: String, body: String },
    MessageDelivered { to: String, receipt_id: String },
    ChatStateReceived { from: String, state: ChatState },

    // --- component G: MUC ----------------------------------------------
    MucJoined { room: String, nick: String },
    MucLeft { room: String, reason: Option<MucLeaveReason> },
    MucMessageReceived { room: String, message: ChatMessage },
    MucSubjectChanged { room: String, subject: String },
    MucOccupantChanged { room: String, occupant: MucOccupant },
    MucInviteReceived { room: String, from: String },

    // --- component H: history --------------------------------------------
    ReadmarkMoved { jid: String },
    HistoryBlockRecycled { jid: String },

    // --- component I: event queue ---------------------------------------
    DeferredEventFired { id: u64, action: String },

    // --- process lifecycle -----------------------------------------------
    ConfigReloaded,
    ShuttingDown,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub channel: Channel,
    pub source: EventSource,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(channel: Channel, source: EventSource, payload: EventPayload) -> Self {
        Self {
            channel,
            source,
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),
    #[error("invalid glob pattern: {0}")]
    InvalidPattern(String),
    #[error("event bus channel closed")]
    ChannelClosed,
    #[error("subscriber lagged, {0} events dropped")]
    Lagged(usize),
}

/// A live subscription to a glob pattern on an [`EventBus`].
pub struct Subscription {
    matcher: GlobMatcher,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Wait for the next event on this subscription whose channel matches
    /// the subscribed pattern, skipping events that don't match.
    pub async fn recv(&mut self) -> Result<Event, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(EventBusError::ChannelClosed),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Err(EventBusError::Lagged(n as usize));
                }
            }
        }
    }
}

/// Publish/subscribe contract every component in this workspace talks to,
/// rather than calling each other directly. See SPEC_FULL.md §4.J.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: Event) -> Result<(), EventBusError>;
    fn subscribe(&self, pattern: &str) -> Result<Subscription, EventBusError>;
}

/// Default [`EventBus`] implementation backed by `tokio::sync::broadcast`.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
    // Kept alive so the sender never observes "no receivers" as an error;
    // subscribers each get their own clone of the receiver side.
    _anchor: Mutex<broadcast::Receiver<Event>>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity);
        Self {
            sender,
            _anchor: Mutex::new(receiver),
        }
    }

    pub fn arc(capacity: usize) -> Arc<dyn EventBus> {
        Arc::new(Self::new(capacity))
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> Result<(), EventBusError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| EventBusError::ChannelClosed)
    }

    fn subscribe(&self, pattern: &str) -> Result<Subscription, EventBusError> {
        let matcher = Glob::new(pattern)
            .map_err(|e| EventBusError::InvalidPattern(e.to_string()))?
            .compile_matcher();
        Ok(Subscription {
            matcher,
            receiver: self.sender.subscribe(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(channel: &str) -> Event {
        Event::new(
            Channel::new(channel).unwrap(),
            EventSource::System,
            EventPayload::ConfigReloaded,
        )
    }

    #[tokio::test]
    async fn subscriber_receives_matching_event() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("roster.**").unwrap();
        bus.publish(sample_event("roster.item.updated")).unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.channel.as_str(), "roster.item.updated");
    }

    #[tokio::test]
    async fn subscriber_skips_non_matching_events() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("muc.**").unwrap();
        bus.publish(sample_event("roster.item.updated")).unwrap();
        bus.publish(sample_event("muc.room.joined")).unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.channel.as_str(), "muc.room.joined");
    }

    #[tokio::test]
    async fn wildcard_matches_everything() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("**").unwrap();
        bus.publish(sample_event("anything.at.all")).unwrap();
        assert!(sub.recv().await.is_ok());
    }

    #[test]
    fn empty_channel_name_rejected() {
        assert!(matches!(
            Channel::new(""),
            Err(EventBusError::InvalidChannel(_))
        ));
    }

    #[tokio::test]
    async fn lagged_subscriber_reports_drop_count() {
        let bus = BroadcastEventBus::new(2);
        let mut sub = bus.subscribe("**").unwrap();
        for i in 0..5 {
            bus.publish(sample_event(&format!("x.{i}"))).unwrap();
        }
        let err = sub.recv().await.unwrap_err();
        assert!(matches!(err, EventBusError::Lagged(_)));
    }
}
