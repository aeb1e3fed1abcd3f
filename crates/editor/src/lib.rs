//! Input line editor (component L).
//!
//! A fixed-capacity, UTF-8-aware line buffer plus the readline-style
//! editing operations the console surface dispatches keystrokes into.
//! Grounded on `crossterm::event::{KeyCode, KeyEvent, KeyModifiers}` for
//! the key representation (already a workspace dependency, used the same
//! way by the teacher's TUI key dispatch in `crates/tui/src/input.rs`'s
//! `handle_key`) and on `original_source/mcabber/mcabber/`'s readline
//! emulation (`INPUT_*` editing actions) for the operation set itself.
//! This crate stops at producing edits, completion requests, and
//! history/chat-state transitions — it never paints a cursor or owns a
//! terminal, per the console-rendering Non-goal.

use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use thiserror::Error;

#[cfg(feature = "native")]
use std::sync::Arc;
#[cfg(feature = "native")]
use wisp_core::event::{Channel, ChatState, Event, EventBus, EventSource};

/// Matches mcabber's `INPUTLINE_LENGTH`.
pub const MAX_BUFFER_BYTES: usize = 1024;
pub const MSAY_MAX_LINES: usize = 300;

/// Delay after a keystroke before the chat state is announced as
/// composing, and the inactivity delay before it falls back to paused —
/// both per XEP-0085, both rearmed (never polled) on every keystroke.
pub const CHAT_STATE_COMPOSING_DELAY: Duration = Duration::from_secs(1);
pub const CHAT_STATE_PAUSED_DELAY: Duration = Duration::from_secs(6);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EditorError {
    #[error("input line would exceed {MAX_BUFFER_BYTES} bytes")]
    BufferFull,
    #[error("msay buffer already holds {MSAY_MAX_LINES} lines")]
    MsayTooManyLines,
    #[error("msay line would exceed {MAX_BUFFER_BYTES} bytes")]
    MsayLineTooLong,
    #[error("not in msay mode")]
    NotInMsayMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryDirection {
    Previous,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Backward,
    Forward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOp {
    Upcase,
    Downcase,
    Capitalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStep {
    AdvanceForward,
    AdvanceBackward,
    Cancel,
}

/// Outcome of [`LineEditor::handle_key`]. The caller (the console surface,
/// out of scope here) decides what to do with it.
#[derive(Debug, Clone, PartialEq)]
pub enum EditAction {
    None,
    BufferChanged,
    CursorMoved,
    AcceptLine { text: String, advance_history: bool },
    CompletionRequested { position: usize, command: String, prefix: String },
    Refresh,
    ClearChatMode,
    MsayEntered,
    MsayAppended,
    MsaySent { text: String },
    MsayCancelled,
    Error(EditorError),
}

/// Supplies category-specific completion candidates keyed by word
/// position within the command line and the command name itself, e.g.
/// position 0 completes command names, position 1 of `/msg` completes
/// JIDs.
pub trait CompletionRegistry: Send + Sync {
    fn candidates(&self, position: usize, command: &str, prefix: &str) -> Vec<String>;
}

struct CompletionState {
    candidates: Vec<String>,
    index: usize,
    word_start: usize,
    word_end: usize,
}

/// Accumulates lines until an explicit `msay send`, rejecting any line
/// whose addition would overflow the byte or line caps. No commands are
/// processed while active.
#[derive(Default)]
pub struct MsayBuffer {
    lines: Vec<String>,
}

impl MsayBuffer {
    pub fn push_line(&mut self, line: &str) -> Result<(), EditorError> {
        if line.len() > MAX_BUFFER_BYTES {
            return Err(EditorError::MsayLineTooLong);
        }
        if self.lines.len() >= MSAY_MAX_LINES {
            return Err(EditorError::MsayTooManyLines);
        }
        self.lines.push(line.to_string());
        Ok(())
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.lines).join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

pub struct LineEditor {
    buffer: Vec<char>,
    cursor: usize,
    mark: Option<usize>,
    history: Vec<String>,
    history_cursor: Option<usize>,
    history_prefix: Option<String>,
    completion: Option<CompletionState>,
    msay: Option<MsayBuffer>,
    conversation_jid: String,
    #[cfg(feature = "native")]
    event_bus: Option<Arc<dyn EventBus>>,
    #[cfg(feature = "native")]
    chat_timer_generation: u64,
}

impl LineEditor {
    pub fn new(conversation_jid: impl Into<String>) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            mark: None,
            history: Vec::new(),
            history_cursor: None,
            history_prefix: None,
            completion: None,
            msay: None,
            conversation_jid: conversation_jid.into(),
            #[cfg(feature = "native")]
            event_bus: None,
            #[cfg(feature = "native")]
            chat_timer_generation: 0,
        }
    }

    #[cfg(feature = "native")]
    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn text(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn byte_len_with(&self, extra_chars: usize) -> usize {
        self.buffer.iter().collect::<String>().len() + extra_chars
    }

    // --- character/cursor editing --------------------------------------

    pub fn insert_char(&mut self, c: char) -> Result<(), EditorError> {
        if self.byte_len_with(c.len_utf8()) > MAX_BUFFER_BYTES {
            return Err(EditorError::BufferFull);
        }
        self.buffer.insert(self.cursor, c);
        self.cursor += 1;
        Ok(())
    }

    pub fn delete_char_backward(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            self.buffer.remove(self.cursor);
        }
    }

    pub fn delete_char_forward(&mut self) {
        if self.cursor < self.buffer.len() {
            self.buffer.remove(self.cursor);
        }
    }

    pub fn move_char_backward(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_char_forward(&mut self) {
        self.cursor = (self.cursor + 1).min(self.buffer.len());
    }

    fn word_boundary_forward(&self, from: usize) -> usize {
        let mut i = from;
        while i < self.buffer.len() && self.buffer[i].is_whitespace() {
            i += 1;
        }
        while i < self.buffer.len() && !self.buffer[i].is_whitespace() {
            i += 1;
        }
        i
    }

    fn word_boundary_backward(&self, from: usize) -> usize {
        let mut i = from;
        while i > 0 && self.buffer[i - 1].is_whitespace() {
            i -= 1;
        }
        while i > 0 && !self.buffer[i - 1].is_whitespace() {
            i -= 1;
        }
        i
    }

    pub fn move_word_forward(&mut self) {
        self.cursor = self.word_boundary_forward(self.cursor);
    }

    pub fn move_word_backward(&mut self) {
        self.cursor = self.word_boundary_backward(self.cursor);
    }

    pub fn kill_word_forward(&mut self) {
        let end = self.word_boundary_forward(self.cursor);
        self.buffer.drain(self.cursor..end);
    }

    pub fn kill_line(&mut self) {
        self.buffer.truncate(self.cursor);
    }

    pub fn set_mark(&mut self) {
        self.mark = Some(self.cursor);
    }

    /// Kill the text between the mark and the cursor, in either order.
    pub fn kill_region(&mut self) {
        let Some(mark) = self.mark.take() else {
            return;
        };
        let (start, end) = if mark < self.cursor {
            (mark, self.cursor)
        } else {
            (self.cursor, mark)
        };
        self.buffer.drain(start..end);
        self.cursor = start;
    }

    pub fn transpose_chars(&mut self) {
        if self.buffer.len() < 2 {
            return;
        }
        let pos = if self.cursor == 0 {
            1
        } else if self.cursor >= self.buffer.len() {
            self.buffer.len() - 1
        } else {
            self.cursor
        };
        self.buffer.swap(pos - 1, pos);
        self.cursor = (pos + 1).min(self.buffer.len());
    }

    pub fn apply_case(&mut self, op: CaseOp) {
        let end = self.word_boundary_forward(self.cursor);
        let mut first = true;
        for i in self.cursor..end {
            self.buffer[i] = match op {
                CaseOp::Upcase => self.buffer[i].to_ascii_uppercase(),
                CaseOp::Downcase => self.buffer[i].to_ascii_lowercase(),
                CaseOp::Capitalize => {
                    let c = if first {
                        self.buffer[i].to_ascii_uppercase()
                    } else {
                        self.buffer[i].to_ascii_lowercase()
                    };
                    first = false;
                    c
                }
            };
        }
        self.cursor = end;
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.mark = None;
    }

    // --- history ---------------------------------------------------------

    pub fn history_move(&mut self, direction: HistoryDirection) {
        if self.history.is_empty() {
            return;
        }
        let next = match (direction, self.history_cursor) {
            (HistoryDirection::Previous, None) => Some(self.history.len() - 1),
            (HistoryDirection::Previous, Some(i)) => i.checked_sub(1),
            (HistoryDirection::Next, Some(i)) if i + 1 < self.history.len() => Some(i + 1),
            (HistoryDirection::Next, _) => None,
        };
        self.history_cursor = next;
        self.buffer = next
            .and_then(|i| self.history.get(i))
            .map_or_else(Vec::new, |s| s.chars().collect());
        self.cursor = self.buffer.len();
    }

    /// Search history for the next/previous entry starting with the
    /// buffer's current prefix (up to the cursor), the way
    /// readline's `history-search-backward`/`-forward` work.
    pub fn history_prefix_search(&mut self, direction: SearchDirection) {
        let prefix = self
            .history_prefix
            .get_or_insert_with(|| self.buffer[..self.cursor].iter().collect())
            .clone();

        let indices: Box<dyn Iterator<Item = usize>> = match (direction, self.history_cursor) {
            (SearchDirection::Backward, None) => Box::new((0..self.history.len()).rev()),
            (SearchDirection::Backward, Some(i)) => Box::new((0..i).rev()),
            (SearchDirection::Forward, Some(i)) => Box::new((i + 1)..self.history.len()),
            (SearchDirection::Forward, None) => Box::new(std::iter::empty()),
        };

        for i in indices {
            if self.history[i].starts_with(&prefix) {
                self.history_cursor = Some(i);
                self.buffer = self.history[i].chars().collect();
                self.cursor = self.buffer.len();
                return;
            }
        }
    }

    // --- accept / completion --------------------------------------------

    pub fn accept_line(&mut self) -> String {
        let text = self.text();
        if !text.is_empty() {
            self.history.push(text.clone());
        }
        self.clear();
        self.history_cursor = None;
        self.history_prefix = None;
        text
    }

    pub fn accept_line_and_down_history(&mut self) -> String {
        let text = self.accept_line();
        self.history_move(HistoryDirection::Next);
        text
    }

    /// Split the buffer into whitespace-separated words up to the cursor
    /// and return `(word_index, word_start, prefix)` for the word the
    /// cursor sits in.
    fn current_word(&self) -> (usize, usize, String) {
        let text_upto_cursor: String = self.buffer[..self.cursor].iter().collect();
        let word_start = text_upto_cursor
            .rfind(char::is_whitespace)
            .map_or(0, |i| i + 1);
        let word_index = text_upto_cursor[..word_start].split_whitespace().count();
        (word_index, word_start, text_upto_cursor[word_start..].to_string())
    }

    pub fn completion_request(&mut self, registry: &dyn CompletionRegistry) -> EditAction {
        let (position, word_start, prefix) = self.current_word();
        let command: String = self.buffer.iter().take_while(|c| !c.is_whitespace()).collect();
        let candidates = registry.candidates(position, &command, &prefix);
        if candidates.is_empty() {
            return EditAction::None;
        }
        self.completion = Some(CompletionState {
            candidates,
            index: 0,
            word_start,
            word_end: self.cursor,
        });
        self.apply_completion_candidate();
        EditAction::CompletionRequested {
            position,
            command,
            prefix,
        }
    }

    fn apply_completion_candidate(&mut self) {
        let Some(state) = &self.completion else { return };
        let replacement: Vec<char> = state.candidates[state.index].chars().collect();
        let word_start = state.word_start;
        let word_end = state.word_end.min(self.buffer.len());
        self.buffer.splice(word_start..word_end, replacement.iter().copied());
        self.cursor = word_start + replacement.len();
        if let Some(state) = &mut self.completion {
            state.word_end = self.cursor;
        }
    }

    pub fn completion_step(&mut self, step: CompletionStep) {
        match step {
            CompletionStep::Cancel => {
                self.completion = None;
            }
            CompletionStep::AdvanceForward => {
                if let Some(state) = &mut self.completion {
                    state.index = (state.index + 1) % state.candidates.len();
                    self.apply_completion_candidate();
                }
            }
            CompletionStep::AdvanceBackward => {
                if let Some(state) = &mut self.completion {
                    state.index = if state.index == 0 {
                        state.candidates.len() - 1
                    } else {
                        state.index - 1
                    };
                    self.apply_completion_candidate();
                }
            }
        }
    }

    // --- msay verbatim multi-line mode -----------------------------------

    pub fn msay_start(&mut self) {
        self.msay = Some(MsayBuffer::default());
    }

    pub fn msay_append(&mut self, line: &str) -> Result<(), EditorError> {
        self.msay.as_mut().ok_or(EditorError::NotInMsayMode)?.push_line(line)
    }

    pub fn msay_send(&mut self) -> Result<String, EditorError> {
        let mut buf = self.msay.take().ok_or(EditorError::NotInMsayMode)?;
        Ok(buf.take())
    }

    pub fn msay_cancel(&mut self) {
        self.msay = None;
    }

    pub fn in_msay_mode(&self) -> bool {
        self.msay.is_some()
    }

    // --- chat state timer -------------------------------------------------

    /// Rearm the XEP-0085 chat-state timer. Per the Design Notes this is a
    /// one-shot task replaced (never polled) on every keystroke: spawning a
    /// fresh composing-delay task invalidates any earlier one by
    /// generation counter, so a stale task firing late is a silent no-op
    /// instead of a spurious state change.
    #[cfg(feature = "native")]
    pub fn rearm_chat_state_timer(&mut self) {
        self.chat_timer_generation += 1;
        let generation = self.chat_timer_generation;
        let Some(bus) = self.event_bus.clone() else {
            return;
        };
        let jid = self.conversation_jid.clone();
        let current = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(generation));
        let watch = current.clone();

        tokio::spawn(async move {
            tokio::time::sleep(CHAT_STATE_COMPOSING_DELAY).await;
            if watch.load(std::sync::atomic::Ordering::SeqCst) != generation {
                return;
            }
            publish_chat_state(&bus, &jid, ChatState::Composing);

            tokio::time::sleep(CHAT_STATE_PAUSED_DELAY - CHAT_STATE_COMPOSING_DELAY).await;
            if watch.load(std::sync::atomic::Ordering::SeqCst) != generation {
                return;
            }
            publish_chat_state(&bus, &jid, ChatState::Paused);
        });
    }

    // --- key dispatch ------------------------------------------------------

    /// Translate one key event into an [`EditAction`], the way
    /// `handle_key(state, key)` dispatched TUI input in the teacher repo,
    /// generalised from screen-rendering modes to this crate's editing
    /// primitives.
    pub fn handle_key(&mut self, key: KeyEvent) -> EditAction {
        #[cfg(feature = "native")]
        if !matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
            self.rearm_chat_state_timer();
        }

        if self.in_msay_mode() {
            return self.handle_key_msay(key);
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);

        match key.code {
            KeyCode::Char(c) if ctrl && c == 'a' => {
                self.cursor = 0;
                EditAction::CursorMoved
            }
            KeyCode::Char(c) if ctrl && c == 'e' => {
                self.cursor = self.buffer.len();
                EditAction::CursorMoved
            }
            KeyCode::Char(c) if ctrl && c == 'k' => {
                self.kill_line();
                EditAction::BufferChanged
            }
            KeyCode::Char(c) if ctrl && c == 'w' => {
                self.mark = Some(self.word_boundary_backward(self.cursor));
                self.kill_region();
                EditAction::BufferChanged
            }
            KeyCode::Char(c) if ctrl && c == 't' => {
                self.transpose_chars();
                EditAction::BufferChanged
            }
            KeyCode::Char(c) if ctrl && c == 'l' => EditAction::Refresh,
            KeyCode::Char(c) if ctrl && c == 'g' => {
                self.completion_step(CompletionStep::Cancel);
                EditAction::None
            }
            KeyCode::Char(c) if !ctrl && !alt => match self.insert_char(c) {
                Ok(()) => EditAction::BufferChanged,
                Err(e) => EditAction::Error(e),
            },
            KeyCode::Char('f') if alt => {
                self.move_word_forward();
                EditAction::CursorMoved
            }
            KeyCode::Char('b') if alt => {
                self.move_word_backward();
                EditAction::CursorMoved
            }
            KeyCode::Char('d') if alt => {
                self.kill_word_forward();
                EditAction::BufferChanged
            }
            KeyCode::Char('u') if alt => {
                self.apply_case(CaseOp::Upcase);
                EditAction::BufferChanged
            }
            KeyCode::Char('l') if alt => {
                self.apply_case(CaseOp::Downcase);
                EditAction::BufferChanged
            }
            KeyCode::Char('c') if alt => {
                self.apply_case(CaseOp::Capitalize);
                EditAction::BufferChanged
            }
            KeyCode::Backspace => {
                self.delete_char_backward();
                EditAction::BufferChanged
            }
            KeyCode::Delete => {
                self.delete_char_forward();
                EditAction::BufferChanged
            }
            KeyCode::Left => {
                self.move_char_backward();
                EditAction::CursorMoved
            }
            KeyCode::Right => {
                self.move_char_forward();
                EditAction::CursorMoved
            }
            KeyCode::Up => {
                self.history_move(HistoryDirection::Previous);
                EditAction::BufferChanged
            }
            KeyCode::Down => {
                self.history_move(HistoryDirection::Next);
                EditAction::BufferChanged
            }
            KeyCode::Tab => {
                self.completion_step(CompletionStep::AdvanceForward);
                EditAction::BufferChanged
            }
            KeyCode::BackTab => {
                self.completion_step(CompletionStep::AdvanceBackward);
                EditAction::BufferChanged
            }
            KeyCode::Enter if ctrl => {
                let text = self.accept_line_and_down_history();
                EditAction::AcceptLine {
                    text,
                    advance_history: true,
                }
            }
            KeyCode::Enter => {
                let text = self.accept_line();
                EditAction::AcceptLine {
                    text,
                    advance_history: false,
                }
            }
            KeyCode::Esc => {
                self.clear();
                EditAction::ClearChatMode
            }
            _ => EditAction::None,
        }
    }

    fn handle_key_msay(&mut self, key: KeyEvent) -> EditAction {
        match key.code {
            KeyCode::Enter => {
                let line = self.text();
                self.clear();
                match self.msay_append(&line) {
                    Ok(()) => EditAction::MsayAppended,
                    Err(e) => EditAction::Error(e),
                }
            }
            KeyCode::Esc => {
                self.msay_cancel();
                self.clear();
                EditAction::MsayCancelled
            }
            KeyCode::Backspace => {
                self.delete_char_backward();
                EditAction::BufferChanged
            }
            KeyCode::Char(c) => match self.insert_char(c) {
                Ok(()) => EditAction::BufferChanged,
                Err(e) => EditAction::Error(e),
            },
            _ => EditAction::None,
        }
    }

    /// Finish msay mode, returning the accumulated text joined by `\n`.
    pub fn msay_finish(&mut self) -> Result<EditAction, EditorError> {
        let text = self.msay_send()?;
        Ok(EditAction::MsaySent { text })
    }
}

#[cfg(feature = "native")]
fn publish_chat_state(bus: &Arc<dyn EventBus>, jid: &str, state: ChatState) {
    let _ = bus.publish(Event::new(
        Channel::new("editor.chatstate.local").unwrap(),
        EventSource::Ui(wisp_core::event::UiTarget::Editor),
        wisp_core::event::EventPayload::ChatStateReceived {
            from: jid.to_string(),
            state,
        },
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl_key(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn insert_and_delete_char() {
        let mut e = LineEditor::new("room@conference.example.com");
        e.insert_char('h').unwrap();
        e.insert_char('i').unwrap();
        assert_eq!(e.text(), "hi");
        e.delete_char_backward();
        assert_eq!(e.text(), "h");
    }

    #[test]
    fn buffer_rejects_overflow_past_1024_bytes() {
        let mut e = LineEditor::new("x@y");
        for _ in 0..MAX_BUFFER_BYTES {
            e.insert_char('a').unwrap();
        }
        assert!(matches!(e.insert_char('a'), Err(EditorError::BufferFull)));
    }

    #[test]
    fn word_motion_and_kill_word() {
        let mut e = LineEditor::new("x@y");
        for c in "hello world".chars() {
            e.insert_char(c).unwrap();
        }
        e.cursor = 0;
        e.kill_word_forward();
        assert_eq!(e.text(), " world");
    }

    #[test]
    fn transpose_swaps_preceding_pair() {
        let mut e = LineEditor::new("x@y");
        for c in "ab".chars() {
            e.insert_char(c).unwrap();
        }
        e.transpose_chars();
        assert_eq!(e.text(), "ba");
    }

    #[test]
    fn case_ops_affect_word_from_cursor() {
        let mut e = LineEditor::new("x@y");
        for c in "hello world".chars() {
            e.insert_char(c).unwrap();
        }
        e.cursor = 0;
        e.apply_case(CaseOp::Upcase);
        assert_eq!(e.text(), "HELLO world");
    }

    #[test]
    fn accept_line_pushes_to_history_and_clears() {
        let mut e = LineEditor::new("x@y");
        for c in "hi".chars() {
            e.insert_char(c).unwrap();
        }
        let text = e.accept_line();
        assert_eq!(text, "hi");
        assert_eq!(e.text(), "");
        e.history_move(HistoryDirection::Previous);
        assert_eq!(e.text(), "hi");
    }

    #[test]
    fn history_prefix_search_finds_matching_entry() {
        let mut e = LineEditor::new("x@y");
        for c in "/connect".chars() {
            e.insert_char(c).unwrap();
        }
        e.accept_line();
        for c in "/roster add bob".chars() {
            e.insert_char(c).unwrap();
        }
        e.accept_line();
        for c in "/c".chars() {
            e.insert_char(c).unwrap();
        }
        e.history_prefix_search(SearchDirection::Backward);
        assert_eq!(e.text(), "/connect");
    }

    struct FixedRegistry;
    impl CompletionRegistry for FixedRegistry {
        fn candidates(&self, position: usize, _command: &str, _prefix: &str) -> Vec<String> {
            if position == 0 {
                vec!["/roster".into(), "/room".into()]
            } else {
                vec![]
            }
        }
    }

    #[test]
    fn completion_cycles_through_candidates() {
        let mut e = LineEditor::new("x@y");
        for c in "/ro".chars() {
            e.insert_char(c).unwrap();
        }
        let registry = FixedRegistry;
        e.completion_request(&registry);
        assert_eq!(e.text(), "/roster");
        e.completion_step(CompletionStep::AdvanceForward);
        assert_eq!(e.text(), "/room");
        e.completion_step(CompletionStep::AdvanceForward);
        assert_eq!(e.text(), "/roster");
    }

    #[test]
    fn msay_mode_accumulates_lines_until_send() {
        let mut e = LineEditor::new("x@y");
        e.msay_start();
        e.msay_append("line one").unwrap();
        e.msay_append("line two").unwrap();
        let text = e.msay_send().unwrap();
        assert_eq!(text, "line one\nline two");
        assert!(!e.in_msay_mode());
    }

    #[test]
    fn msay_mode_rejects_over_300_lines() {
        let mut e = LineEditor::new("x@y");
        e.msay_start();
        for i in 0..MSAY_MAX_LINES {
            e.msay_append(&format!("{i}")).unwrap();
        }
        assert!(matches!(
            e.msay_append("one too many"),
            Err(EditorError::MsayTooManyLines)
        ));
    }

    #[test]
    fn handle_key_enter_accepts_line() {
        let mut e = LineEditor::new("x@y");
        e.insert_char('h').unwrap();
        let action = e.handle_key(key(KeyCode::Enter));
        assert_eq!(
            action,
            EditAction::AcceptLine {
                text: "h".into(),
                advance_history: false
            }
        );
    }

    #[test]
    fn handle_key_ctrl_a_moves_to_start() {
        let mut e = LineEditor::new("x@y");
        for c in "hi".chars() {
            e.insert_char(c).unwrap();
        }
        e.handle_key(ctrl_key('a'));
        assert_eq!(e.cursor(), 0);
    }
}
