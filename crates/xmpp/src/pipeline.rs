//! Stanza processing pipeline (component J).
//!
//! Inbound stanzas, once assembled by the stream parser (component D), and
//! outbound stanzas queued by the session controller (component E), both
//! pass through an ordered chain of [`StanzaProcessor`]s. Each processor
//! inspects or mutates the stanza in place and decides whether the chain
//! keeps running.

use std::sync::Arc;

use crate::stanza::Stanza;

/// Per-call context handed to every processor. Carries the bare JID of the
/// account the stanza belongs to; processors that need more (roster state,
/// MUC membership) look it up through the account's own crate rather than
/// through this struct, keeping the pipeline itself stateless.
#[derive(Debug, Clone, Default)]
pub struct ProcessorContext {
    pub account_jid: String,
}

impl ProcessorContext {
    pub fn new(account_jid: impl Into<String>) -> Self {
        Self {
            account_jid: account_jid.into(),
        }
    }
}

/// What a processor wants the pipeline to do after it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorResult {
    /// Keep running the remaining processors in priority order.
    Continue,
    /// Stop the chain here; no later processor sees this stanza.
    Stop,
}

/// One stage of the stanza pipeline. Processors are ordered by ascending
/// [`priority`](StanzaProcessor::priority) — lower numbers run first —
/// mirroring how mcabber chains its `hk_*` hook handlers.
pub trait StanzaProcessor: Send + Sync {
    fn name(&self) -> &str;

    fn process_inbound(&self, stanza: &mut Stanza, ctx: &ProcessorContext) -> ProcessorResult;

    fn process_outbound(&self, stanza: &mut Stanza, ctx: &ProcessorContext) -> ProcessorResult;

    /// Lower runs first. Debug logging defaults to 100 so it always observes
    /// the stanza last, after every other processor has had a chance to act.
    fn priority(&self) -> i32 {
        50
    }
}

/// Runs a fixed, priority-sorted set of processors over every stanza that
/// crosses the wire.
pub struct Pipeline {
    processors: Vec<Arc<dyn StanzaProcessor>>,
}

impl Pipeline {
    pub fn new(mut processors: Vec<Arc<dyn StanzaProcessor>>) -> Self {
        processors.sort_by_key(|p| p.priority());
        Self { processors }
    }

    pub fn run_inbound(&self, stanza: &mut Stanza, ctx: &ProcessorContext) {
        for processor in &self.processors {
            if processor.process_inbound(stanza, ctx) == ProcessorResult::Stop {
                break;
            }
        }
    }

    pub fn run_outbound(&self, stanza: &mut Stanza, ctx: &ProcessorContext) {
        for processor in &self.processors {
            if processor.process_outbound(stanza, ctx) == ProcessorResult::Stop {
                break;
            }
        }
    }
}
