//! Incremental XML stream parser (component D).
//!
//! Built directly on `rxml::FeedParser` the way `tokio-xmpp`'s own
//! `XmppCodec` and the `prosody-util-stanza` `XMPPStream` drive it (see
//! `examples/other_examples/…xmppstream-stream.rs.rs` for the
//! depth-tracking decode loop this module is modelled on), but assembling
//! into our own `wisp_stanza::StanzaArena` instead of `minidom::Element`.
//! Depth 0→1 on the parser's first `StartElement` is the stream header;
//! depth 1→2→1 on a child element's closing tag is a complete stanza.

use wisp_stanza::{NodeId, StanzaArena};

/// A stanza decoded from the wire: its own private arena plus the root
/// node, per the "every node belongs to exactly one arena" invariant.
#[derive(Debug)]
pub struct ParsedStanza {
    pub arena: StanzaArena,
    pub root: NodeId,
}

#[derive(Debug)]
pub enum StreamEvent {
    /// Stream header seen; carries the server-assigned stream id used for
    /// legacy digest authentication (XEP-0078).
    Opened { id: Option<String> },
    Stanza(ParsedStanza),
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("XML parse error: {0}")]
    Parse(String),
    #[error("non-whitespace text at stream level")]
    TextAtStreamLevel,
    #[error("stream header missing the 'stream:stream' element")]
    InvalidStreamHeader,
}

/// Tracks the in-progress element tree for the stanza currently being
/// assembled (depth ≥ 1 below the stream root).
struct StanzaBuilder {
    arena: StanzaArena,
    root: Option<NodeId>,
    stack: Vec<NodeId>,
}

impl StanzaBuilder {
    fn new() -> Self {
        Self {
            arena: StanzaArena::new(),
            root: None,
            stack: Vec::new(),
        }
    }

    fn push_element(&mut self, name: &str, attrs: &[(String, String)]) {
        let node = self.arena.new_element(name.to_string());
        for (key, value) in attrs {
            let _ = self.arena.put_attribute(node, key.clone(), value.clone());
        }
        if let Some(&parent) = self.stack.last() {
            let _ = self.arena.append_child(parent, node);
        } else {
            self.root = Some(node);
        }
        self.stack.push(node);
    }

    fn push_text(&mut self, text: &str) {
        if let Some(&parent) = self.stack.last() {
            let node = self.arena.new_char_data(text.to_string());
            let _ = self.arena.append_child(parent, node);
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        self.stack.pop()
    }
}

/// Owns one `rxml::FeedParser` and assembles complete stanzas from the
/// token stream it produces.
pub struct StreamParser {
    parser: rxml::FeedParser<'static>,
    opened: bool,
    builder: Option<StanzaBuilder>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            parser: rxml::FeedParser::new(),
            opened: false,
            builder: None,
        }
    }

    /// Feeds newly-read bytes into the parser. Call [`next_event`] in a
    /// loop afterwards until it returns `Ok(None)` (would-block: wait for
    /// more bytes from the transport).
    pub fn feed(&mut self, data: &[u8]) {
        self.parser.feed(data.to_vec());
    }

    pub fn feed_eof(&mut self) {
        self.parser.feed_eof();
    }

    /// Pulls the next fully-decoded [`StreamEvent`], if any bytes fed so
    /// far contain one. Returns `Ok(None)` on would-block (need more
    /// bytes); any other parser error or `</stream:stream>` ends the
    /// session per the state machine in component E.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>, StreamError> {
        loop {
            let token = match self.parser.read() {
                Ok(Some(token)) => token,
                Ok(None) => return Ok(None),
                Err(rxml::Error::IO(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(None);
                }
                Err(e) => return Err(StreamError::Parse(e.to_string())),
            };

            if let Some(event) = self.process_token(token)? {
                return Ok(Some(event));
            }
        }
    }

    fn process_token(&mut self, token: rxml::Event) -> Result<Option<StreamEvent>, StreamError> {
        match token {
            rxml::Event::XMLDeclaration(..) => Ok(None),

            rxml::Event::StartElement(_, (_, localname), attrs) if !self.opened => {
                if localname.as_str() != "stream" {
                    return Err(StreamError::InvalidStreamHeader);
                }
                let id = attrs
                    .iter()
                    .find(|((_, name), _)| name.as_str() == "id")
                    .map(|(_, value)| value.as_string());
                self.opened = true;
                Ok(Some(StreamEvent::Opened { id }))
            }

            rxml::Event::StartElement(_, (_, localname), attrs) => {
                let builder = self.builder.get_or_insert_with(StanzaBuilder::new);
                let attrs: Vec<(String, String)> = attrs
                    .iter()
                    .map(|((_, name), value)| (name.as_str().to_string(), value.as_string()))
                    .collect();
                builder.push_element(localname.as_str(), &attrs);
                Ok(None)
            }

            rxml::Event::Text(_, cdata) if self.builder.is_none() => {
                if cdata.as_str().split_ascii_whitespace().next().is_some() {
                    return Err(StreamError::TextAtStreamLevel);
                }
                Ok(None)
            }

            rxml::Event::Text(_, cdata) => {
                if let Some(builder) = self.builder.as_mut() {
                    builder.push_text(cdata.as_str());
                }
                Ok(None)
            }

            rxml::Event::EndElement(_) if self.builder.is_none() => Ok(Some(StreamEvent::Closed)),

            rxml::Event::EndElement(_) => {
                let builder = self.builder.as_mut().expect("checked above");
                builder.pop();
                if builder.stack.is_empty() {
                    let StanzaBuilder { arena, root, .. } =
                        self.builder.take().expect("checked above");
                    let root = root.expect("root set on first push_element");
                    Ok(Some(StreamEvent::Stanza(ParsedStanza { arena, root })))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM_HEADER: &[u8] = b"<?xml version='1.0'?><stream:stream \
        xmlns:stream='http://etherx.jabber.org/streams' xmlns='jabber:client' \
        id='abc123' version='1.0'>";

    #[test]
    fn reads_stream_header_and_captures_id() {
        let mut parser = StreamParser::new();
        parser.feed(STREAM_HEADER);
        let event = parser.next_event().unwrap().unwrap();
        match event {
            StreamEvent::Opened { id } => assert_eq!(id.as_deref(), Some("abc123")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn reads_complete_stanza_with_child_and_text() {
        let mut parser = StreamParser::new();
        parser.feed(STREAM_HEADER);
        parser.next_event().unwrap();

        parser.feed(b"<message id='m1'><body>hi</body></message>");
        let event = parser.next_event().unwrap().unwrap();
        match event {
            StreamEvent::Stanza(stanza) => {
                assert_eq!(stanza.arena.element_name(stanza.root), Some("message"));
                assert_eq!(stanza.arena.get_attribute(stanza.root, "id"), Some("m1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn incomplete_stanza_returns_none() {
        let mut parser = StreamParser::new();
        parser.feed(STREAM_HEADER);
        parser.next_event().unwrap();

        parser.feed(b"<message id='m1'><body>h");
        assert!(parser.next_event().unwrap().is_none());
    }

    #[test]
    fn stream_footer_yields_closed() {
        let mut parser = StreamParser::new();
        parser.feed(STREAM_HEADER);
        parser.next_event().unwrap();

        parser.feed(b"</stream:stream>");
        let event = parser.next_event().unwrap().unwrap();
        assert!(matches!(event, StreamEvent::Closed));
    }

    #[test]
    fn rejects_non_whitespace_text_at_stream_level() {
        let mut parser = StreamParser::new();
        parser.feed(STREAM_HEADER);
        parser.next_event().unwrap();

        parser.feed(b"not-whitespace");
        let error = parser.next_event().unwrap_err();
        assert!(matches!(error, StreamError::TextAtStreamLevel));
    }
}
