use thiserror::Error;

use crate::{config::ConfigError, event::EventBusError, settings::SettingsError};

/// Umbrella error for failures that cross component boundaries inside
/// `wisp-core` itself (config, event bus, settings). Components further up
/// the stack (wisp-jid, wisp-stanza, wisp-xmpp, ...) define their own
/// narrower error enums rather than wrapping this one, so callers can match
/// on exactly what can go wrong at each boundary (SPEC_FULL.md §7).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    EventBus(#[from] EventBusError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
