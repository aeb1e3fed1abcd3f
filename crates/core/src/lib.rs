//! Shared ambient stack: event bus, process configuration, the guarded
//! settings store, and the deferred-event queue. Every other crate in this
//! workspace depends on `wisp-core` for these four concerns rather than
//! rolling its own.

pub mod config;
pub mod error;
pub mod event;
pub mod eventqueue;
pub mod settings;

pub use error::CoreError;
pub use event::{
    BroadcastEventBus, Channel, ChatMessage, ChatState, Event, EventBus, EventBusError,
    EventPayload, EventSource, MessageType, MucAffiliation, MucLeaveReason, MucOccupant, MucRole,
    RosterItem, Subscription,
};
pub use eventqueue::{Action, EventId, EventQueue, Firing};
pub use settings::{Registry, SettingsError, SettingsStore};
