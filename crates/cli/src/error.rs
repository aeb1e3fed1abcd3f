use thiserror::Error;

use wisp_core::config::ConfigError;
use wisp_core::event::EventBusError;
use wisp_xmpp::error::ConnectionError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("terminal error: {0}")]
    Io(#[from] std::io::Error),
}
