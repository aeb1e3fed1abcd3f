//! Transport, stream parsing, session control, and stanza pipeline for wisp.
//!
//! Byte transport (TCP/TLS/HTTP-CONNECT proxy) lives in [`connect`], the
//! incremental XML stream decoder in [`stream`], the XMPP session state
//! machine in [`session`], and the stanza processing chain the session
//! drives inbound and outbound stanzas through in [`pipeline`] and
//! [`processors`].

pub mod connect;
pub mod error;
pub mod pipeline;
pub mod processors;
pub mod session;
pub mod stanza;
pub mod stream;

pub use connect::{ConnectConfig, ConnectState, ProxyConfig, Transport};
pub use error::{ConnectionError, PipelineError};
pub use pipeline::{Pipeline, ProcessorContext, ProcessorResult, StanzaProcessor};
pub use session::{Session, SessionState};
pub use stanza::Stanza;
pub use stream::{ParsedStanza, StreamError, StreamEvent, StreamParser};
