//! Per-conversation history buffer (component H).
//!
//! Grounded on `original_source/mcabber/mcabber/hbuf.c`: a message is
//! split into display lines at an optional wrap width, an embedded `\n`
//! always forces a **persistent** break while a width-induced break does
//! not, and only the very first line produced by an [`add_line`] call
//! carries the caller's prefix metadata (timestamp/flags/nick width/
//! receipt token) — every other line, persistent or not, inherits it at
//! render time via [`HistoryBuffer::get_lines`]'s flag propagation, the
//! way `hbuf_get_lines()` walks `last_persist_prefixflags` backward.
//!
//! Unlike the original's in-place block recycling (an allocator reuse
//! trick over raw `char*` buffers), this is a bounded [`VecDeque<Block>`]
//! that drops its oldest line once [`HistoryBuffer::add_line`] would
//! exceed `max_blocks`, per the Design Notes resolution in SPEC_FULL.md
//! §9. A scroll lock ([`HistoryBuffer::set_scroll_lock`]) pins the buffer
//! and disables recycling, mirroring "this is only permitted when no top
//! pointer and no lock hold the head".

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[cfg(feature = "native")]
use std::sync::Arc;
#[cfg(feature = "native")]
use wisp_core::event::{Channel, Event, EventBus, EventPayload, EventSource};

/// Prefix flag bits carried on a line, mirroring `HBB_PREFIX_*` in
/// `hbuf.h`. Continuation lines borrow these from the message's first
/// line at render time rather than storing their own copy.
pub mod flags {
    pub const HIGHLIGHT_OUT: u32 = 1 << 0;
    pub const HIGHLIGHT: u32 = 1 << 1;
    pub const INFO: u32 = 1 << 2;
    pub const IN: u32 = 1 << 3;
    pub const READMARK: u32 = 1 << 4;
    pub const RECEIPT: u32 = 1 << 5;
    /// Set on output lines that are a wrapped/embedded continuation of an
    /// earlier persistent line, so the renderer knows to omit the prefix.
    pub const CONT: u32 = 1 << 6;

    /// The subset of flags that propagate from a message's first line to
    /// its continuations (`hbuf_get_lines`'s propagation mask), minus the
    /// readmark bit which migrates rather than copies.
    pub const PROPAGATED: u32 = HIGHLIGHT_OUT | HIGHLIGHT | INFO | IN | READMARK;
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("{0} already exists")]
    PathExists(std::path::PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

/// How [`HistoryBuffer::set_readmark`] should move the mark, per
/// SPEC_FULL.md §4.H (`action ∈ {set-on-last, clear, remove-if-trailing}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadmarkAction {
    SetOnLast,
    Clear,
    RemoveIfTrailing,
}

/// One display line. `persistent` lines are paragraph starts (the very
/// first line of a message, or the line right after an embedded `\n`);
/// everything else is a wrap-induced continuation and is dropped and
/// regenerated by [`HistoryBuffer::rebuild`].
#[derive(Debug, Clone)]
struct Block {
    text: String,
    persistent: bool,
    /// True only for the first block a given [`HistoryBuffer::add_line`]
    /// call produced; the sole carrier of real prefix metadata, matching
    /// `hbuf_add_line`'s one populated `prefix` struct versus the zeroed
    /// ones `do_wrap` allocates for every other piece.
    carries_metadata: bool,
    timestamp: DateTime<Utc>,
    prefix_flags: u32,
    mucnicklen: usize,
    receipt_token: Option<String>,
}

/// A fully resolved display line, ready for the renderer's own
/// strftime-style prefix formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct LineView {
    pub timestamp: DateTime<Utc>,
    pub flags: u32,
    pub mucnicklen: usize,
    pub text: String,
}

struct Paragraph {
    text: String,
    carries_metadata: bool,
    timestamp: DateTime<Utc>,
    prefix_flags: u32,
    mucnicklen: usize,
    receipt_token: Option<String>,
}

pub struct HistoryBuffer {
    jid: String,
    blocks: VecDeque<Block>,
    max_blocks: usize,
    wrap_width: usize,
    scroll_lock: bool,
    #[cfg(feature = "native")]
    event_bus: Option<Arc<dyn EventBus>>,
}

impl HistoryBuffer {
    pub fn new(jid: impl Into<String>, max_blocks: usize, wrap_width: usize) -> Self {
        Self {
            jid: jid.into(),
            blocks: VecDeque::new(),
            max_blocks,
            wrap_width,
            scroll_lock: false,
            #[cfg(feature = "native")]
            event_bus: None,
        }
    }

    #[cfg(feature = "native")]
    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn set_scroll_lock(&mut self, locked: bool) {
        self.scroll_lock = locked;
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Append one logical message, splitting it into display lines at the
    /// current wrap width. `prefix_flags` gets [`flags::RECEIPT`] folded in
    /// automatically when `receipt_token` is `Some`, matching
    /// `hbuf_add_line`'s `prefix_flags |= (xep184 ? HBB_PREFIX_RECEIPT : 0)`.
    pub fn add_line(
        &mut self,
        text: &str,
        timestamp: DateTime<Utc>,
        mut prefix_flags: u32,
        mucnicklen: usize,
        receipt_token: Option<String>,
    ) {
        if receipt_token.is_some() {
            prefix_flags |= flags::RECEIPT;
        }

        let mut first = true;
        for paragraph in text.split('\n') {
            for (i, line_text) in wrap_paragraph(paragraph, self.wrap_width).into_iter().enumerate() {
                let persistent = i == 0;
                let block = if first {
                    first = false;
                    Block {
                        text: line_text,
                        persistent: true,
                        carries_metadata: true,
                        timestamp,
                        prefix_flags,
                        mucnicklen,
                        receipt_token: receipt_token.clone(),
                    }
                } else {
                    Block {
                        text: line_text,
                        persistent,
                        carries_metadata: false,
                        timestamp,
                        prefix_flags: 0,
                        mucnicklen: 0,
                        receipt_token: None,
                    }
                };
                self.blocks.push_back(block);
            }
        }

        self.enforce_block_bound();
    }

    fn enforce_block_bound(&mut self) {
        if self.scroll_lock || self.max_blocks == 0 {
            return;
        }
        let bound = self.max_blocks.max(2);
        while self.blocks.len() > bound {
            self.blocks.pop_front();
            self.publish_recycled();
        }
    }

    #[cfg(feature = "native")]
    fn publish_recycled(&self) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(Event::new(
                Channel::new("history.block.recycled").unwrap(),
                EventSource::History,
                EventPayload::HistoryBlockRecycled {
                    jid: self.jid.clone(),
                },
            ));
        }
    }

    #[cfg(not(feature = "native"))]
    fn publish_recycled(&self) {}

    fn collect_paragraphs(&self) -> Vec<Paragraph> {
        let mut out: Vec<Paragraph> = Vec::new();
        for block in &self.blocks {
            if block.persistent {
                out.push(Paragraph {
                    text: block.text.clone(),
                    carries_metadata: block.carries_metadata,
                    timestamp: block.timestamp,
                    prefix_flags: block.prefix_flags,
                    mucnicklen: block.mucnicklen,
                    receipt_token: block.receipt_token.clone(),
                });
            } else if let Some(p) = out.last_mut() {
                p.text.push_str(&block.text);
            }
        }
        out
    }

    /// Drop every wrap-induced break and re-wrap at `width`. Persistent
    /// (paragraph-start) lines are unaffected in number or position;
    /// only the non-persistent continuations between them are rebuilt.
    pub fn rebuild(&mut self, width: usize) {
        self.wrap_width = width;
        let paragraphs = self.collect_paragraphs();
        self.blocks.clear();
        for p in paragraphs {
            for (i, line_text) in wrap_paragraph(&p.text, width).into_iter().enumerate() {
                let persistent = i == 0;
                let block = if p.carries_metadata && i == 0 {
                    Block {
                        text: line_text,
                        persistent: true,
                        carries_metadata: true,
                        timestamp: p.timestamp,
                        prefix_flags: p.prefix_flags,
                        mucnicklen: p.mucnicklen,
                        receipt_token: p.receipt_token.clone(),
                    }
                } else {
                    Block {
                        text: line_text,
                        persistent,
                        carries_metadata: false,
                        timestamp: p.timestamp,
                        prefix_flags: 0,
                        mucnicklen: 0,
                        receipt_token: None,
                    }
                };
                self.blocks.push_back(block);
            }
        }
        self.enforce_block_bound();
    }

    /// Resolve `n` lines starting at display index `top`, propagating
    /// highlight/receipt/readmark flags from each message's first line to
    /// its continuations the way `hbuf_get_lines` does.
    pub fn get_lines(&self, top: usize, n: usize) -> Vec<LineView> {
        let blocks: Vec<&Block> = self.blocks.iter().collect();
        let mut last_persist_prefixflags: u32 = 0;
        let mut out: Vec<LineView> = Vec::new();
        let end = (top + n).min(blocks.len());

        for (i, b) in blocks.iter().enumerate().take(end) {
            let mut view_flags = b.prefix_flags;
            let mut mucnicklen = b.mucnicklen;
            let is_message_start = b.persistent && (b.prefix_flags & !flags::READMARK != 0);

            if is_message_start {
                last_persist_prefixflags = b.prefix_flags;
            } else {
                view_flags |= last_persist_prefixflags & flags::PROPAGATED;
                view_flags |= flags::CONT;
                mucnicklen = 0;
                if b.persistent {
                    last_persist_prefixflags |= b.prefix_flags & flags::READMARK;
                }
                if last_persist_prefixflags & flags::READMARK != 0 {
                    if let Some(prev) = out.last_mut() {
                        prev.flags &= !flags::READMARK;
                    }
                }
            }

            if i >= top {
                out.push(LineView {
                    timestamp: b.timestamp,
                    flags: view_flags,
                    mucnicklen,
                    text: b.text.clone(),
                });
            }
        }

        out
    }

    pub fn search(&self, start: usize, direction: SearchDirection, needle: &str) -> Option<usize> {
        let needle = needle.to_lowercase();
        let len = self.blocks.len();
        if len == 0 {
            return None;
        }
        let mut i = start as isize;
        loop {
            i += if direction == SearchDirection::Forward { 1 } else { -1 };
            if i < 0 || i as usize >= len {
                return None;
            }
            if self.blocks[i as usize].text.to_lowercase().contains(&needle) {
                return Some(i as usize);
            }
        }
    }

    pub fn jump_date(&self, t: DateTime<Utc>) -> Option<usize> {
        self.blocks.iter().position(|b| b.timestamp >= t)
    }

    pub fn jump_percent(&self, pc: u32) -> Option<usize> {
        let len = self.blocks.len();
        if len == 0 {
            return None;
        }
        Some(((pc as usize * len) / 100).min(len - 1))
    }

    /// Index of the line right after the current readmark, or `None` if
    /// no line carries one.
    pub fn jump_readmark(&self) -> Option<usize> {
        let mut r = None;
        for (i, b) in self.blocks.iter().enumerate().rev() {
            if b.prefix_flags & flags::READMARK != 0 {
                return r;
            }
            if b.persistent && (b.prefix_flags & !flags::READMARK != 0) {
                r = Some(i);
            }
        }
        None
    }

    fn previous_persistent_inclusive(&self, from: usize) -> Option<usize> {
        (0..=from).rev().find(|&i| self.blocks[i].persistent)
    }

    /// At most one line carries the readmark at any time; every branch
    /// here either places it uniquely or removes it.
    pub fn set_readmark(&mut self, action: ReadmarkAction) {
        if self.blocks.is_empty() {
            return;
        }
        let last = self.blocks.len() - 1;

        match action {
            ReadmarkAction::SetOnLast => {
                let Some(target) = self.previous_persistent_inclusive(last) else {
                    return;
                };
                self.blocks[target].prefix_flags |= flags::READMARK;
                if target > 0 {
                    for i in (0..target).rev() {
                        if self.blocks[i].prefix_flags & flags::READMARK != 0 {
                            self.blocks[i].prefix_flags &= !flags::READMARK;
                            break;
                        }
                    }
                }
            }
            ReadmarkAction::Clear => {
                let Some(start) = self.previous_persistent_inclusive(last) else {
                    return;
                };
                for i in (0..=start).rev() {
                    if self.blocks[i].prefix_flags & flags::READMARK != 0 {
                        self.blocks[i].prefix_flags &= !flags::READMARK;
                        break;
                    }
                }
            }
            ReadmarkAction::RemoveIfTrailing => {
                self.blocks[last].prefix_flags &= !flags::READMARK;
            }
        }
    }

    /// Flip the receipt-pending flag when a delivery receipt arrives for
    /// `token`, searching from the most recent line backward.
    pub fn remove_receipt(&mut self, token: &str) -> bool {
        for b in self.blocks.iter_mut().rev() {
            if b.receipt_token.as_deref() == Some(token) {
                b.receipt_token = None;
                b.prefix_flags ^= flags::RECEIPT;
                return true;
            }
        }
        false
    }

    /// Dump the buffer as timestamped plain text, refusing to overwrite an
    /// existing file (`hbuf_dump_to_file`'s "The file already exists"
    /// check).
    pub fn dump_to_file(&self, path: &Path) -> Result<(), HistoryError> {
        if path.exists() {
            return Err(HistoryError::PathExists(path.to_path_buf()));
        }
        let lines = self.get_lines(0, self.blocks.len());
        let mut out = String::new();
        for line in &lines {
            if line.flags & flags::CONT == 0 {
                out.push_str(&line.timestamp.format("%H:%M:%S ").to_string());
            }
            out.push_str(&line.text);
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

/// Word-wrap one paragraph (no embedded `\n`) at `width`, breaking at the
/// last whitespace before the boundary when one exists, else hard-cutting
/// at the width boundary. `width == 0` disables wrapping entirely.
/// Mirrors `do_wrap`'s inner scan: every character is assigned to exactly
/// one output piece, so concatenating the result reproduces the input.
fn wrap_paragraph(text: &str, width: usize) -> Vec<String> {
    if width == 0 || text.is_empty() {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    let mut lines = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut cur_w = 0;
        let mut last_break: Option<usize> = None;
        let mut i = start;

        while i < chars.len() && cur_w <= width {
            if chars[i] == ' ' || chars[i] == '\t' {
                last_break = Some(i + 1);
            }
            cur_w += 1;
            i += 1;
        }

        if i >= chars.len() {
            lines.push(chars[start..].iter().collect());
            break;
        }

        let cut = last_break.filter(|&b| b > start).unwrap_or(i);
        lines.push(chars[start..cut].iter().collect());
        start = cut;
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
