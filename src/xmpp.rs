//! Stanza text handling: entity escaping, a small incremental tokenizer,
//! and the push-parser state machine that assembles whole stanzas out
//! of a byte stream (§4B). This module knows nothing about sockets;
//! `transport.rs` owns the file descriptor and feeds bytes in here as
//! they arrive.

use super::message::TransportMessage;
use sha1::{Digest, Sha1};

/// Replace XML-special characters and non-ASCII code points with
/// escaped entities / numeric character references.
///
/// * is_attr - also escape single and double quotes, since the value
///   is destined for a quoted attribute rather than a text node.
///
/// ```
/// use opensrf_bus::xmpp::escape_xml;
/// assert_eq!(escape_xml("<'hi'>", false), "&lt;'hi'&gt;");
/// assert_eq!(escape_xml("<'hi'>", true), "&lt;&apos;hi&apos;&gt;");
/// ```
pub fn escape_xml(value: &str, is_attr: bool) -> String {
    let mut buf = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => buf.push_str("&amp;"),
            '\'' if is_attr => buf.push_str("&apos;"),
            '"' if is_attr => buf.push_str("&quot;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            c if (c as u32) > 0x7E => {
                let ord = c as u32;
                buf.push_str(&format!("&#x{ord:X};"));
            }
            c => buf.push(c),
        }
    }
    buf
}

/// Reverse of escape_xml's entity handling, for text/attribute content
/// read off the wire.
fn unescape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '&' {
            out.push(c);
            continue;
        }

        let mut entity = String::new();
        let mut closed = false;
        while let Some(&nc) = chars.peek() {
            chars.next();
            if nc == ';' {
                closed = true;
                break;
            }
            entity.push(nc);
        }

        if !closed {
            out.push('&');
            out.push_str(&entity);
            continue;
        }

        match entity.as_str() {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "apos" => out.push('\''),
            "quot" => out.push('"'),
            hex if hex.starts_with("#x") || hex.starts_with("#X") => {
                if let Ok(cp) = u32::from_str_radix(&hex[2..], 16) {
                    if let Some(ch) = char::from_u32(cp) {
                        out.push(ch);
                    }
                }
            }
            dec if dec.starts_with('#') => {
                if let Ok(cp) = dec[1..].parse::<u32>() {
                    if let Some(ch) = char::from_u32(cp) {
                        out.push(ch);
                    }
                }
            }
            other => {
                // Unknown entity: emit verbatim rather than losing data.
                out.push('&');
                out.push_str(other);
                out.push(';');
            }
        }
    }

    out
}

#[derive(Debug, Clone)]
enum Token {
    Open {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close {
        name: String,
    },
    Text(String),
}

/// A minimal non-validating incremental XML tokenizer. Resumable: if
/// the buffer ends mid-tag, `next()` returns `Ok(None)` and leaves the
/// partial bytes in place for the next `push()`.
struct Tokenizer {
    buf: String,
    pos: usize,
}

impl Tokenizer {
    fn new() -> Self {
        Tokenizer {
            buf: String::new(),
            pos: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Result<(), String> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| format!("stanza parser received invalid UTF-8: {e}"))?;
        self.buf.push_str(text);
        Ok(())
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(0..self.pos);
            self.pos = 0;
        }
    }

    /// Pull the next token out of the buffer, or None if more bytes
    /// are needed to complete it.
    fn next(&mut self) -> Result<Option<Token>, String> {
        let rest = &self.buf[self.pos..];

        if rest.is_empty() {
            self.compact();
            return Ok(None);
        }

        if rest.starts_with('<') {
            // An XML declaration or processing instruction: skip it.
            if rest.starts_with("<?") {
                return match rest.find("?>") {
                    Some(end) => {
                        self.pos += end + 2;
                        self.next()
                    }
                    None => Ok(None),
                };
            }

            let end = match rest.find('>') {
                Some(e) => e,
                None => return Ok(None), // incomplete tag, wait for more bytes
            };

            let tag_body = &rest[1..end];

            if let Some(name) = tag_body.strip_prefix('/') {
                self.pos += end + 1;
                return Ok(Some(Token::Close {
                    name: name.trim().to_string(),
                }));
            }

            let (tag_body, self_closing) = match tag_body.strip_suffix('/') {
                Some(b) => (b, true),
                None => (tag_body, false),
            };

            let mut parts = tag_body.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("").trim().to_string();
            let attr_str = parts.next().unwrap_or("");

            let attrs = parse_attrs(attr_str);

            self.pos += end + 1;
            Ok(Some(Token::Open {
                name,
                attrs,
                self_closing,
            }))
        } else {
            let end = rest.find('<').unwrap_or(rest.len());
            let text = &rest[..end];
            self.pos += end;
            if rest.find('<').is_none() {
                // Trailing text with no following tag yet; it might
                // continue on the next read, but plain text between
                // elements is safe to flush immediately since it
                // cannot itself be "incomplete" the way a tag can.
            }
            Ok(Some(Token::Text(unescape_xml(text))))
        }
    }
}

fn parse_attrs(attr_str: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut chars = attr_str.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }

        let name_start = i;
        let mut name_end = attr_str.len();
        while let Some(&(j, cj)) = chars.peek() {
            if cj == '=' || cj.is_whitespace() {
                name_end = j;
                break;
            }
            chars.next();
        }

        let name = attr_str[name_start..name_end].to_string();
        if name.is_empty() {
            continue;
        }

        // Skip whitespace and '='
        while let Some(&(_, cj)) = chars.peek() {
            if cj == '=' || cj.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }

        let quote = match chars.peek() {
            Some(&(_, q)) if q == '"' || q == '\'' => {
                chars.next();
                q
            }
            _ => continue, // malformed; skip this attribute
        };

        let value_start = match chars.peek() {
            Some(&(j, _)) => j,
            None => attr_str.len(),
        };
        let mut value_end = attr_str.len();

        for (j, cj) in chars.by_ref() {
            if cj == quote {
                value_end = j;
                break;
            }
        }

        let raw = attr_str.get(value_start..value_end).unwrap_or("");
        attrs.push((name, unescape_xml(raw)));
    }

    attrs
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// One parsed top-level stanza handed back to the Transport Session.
#[derive(Debug, Clone)]
pub enum ParsedStanza {
    Message(TransportMessage),
    Presence { from: String, status: String },
    IqResult { id: Option<String>, typ: String },
    StreamOpen { id: Option<String> },
    StreamClose,
    /// Component handshake success (empty `<handshake/>`).
    Handshake,
    Error { code: i64, err_type: String, text: String },
}

/// Parser states named after §4B: Begin, InMessage{InBody|InSubject|InThread},
/// InPresence{InStatus}, InIq, InError, InMessageError.
#[derive(Debug, Clone, PartialEq)]
enum ParserState {
    Begin,
    InMessage(MessageField),
    InPresence(PresenceField),
    InIq,
    InError,
    InMessageError,
}

#[derive(Debug, Clone, PartialEq)]
enum MessageField {
    None,
    InBody,
    InSubject,
    InThread,
}

#[derive(Debug, Clone, PartialEq)]
enum PresenceField {
    None,
    InStatus,
}

#[derive(Default)]
struct MessageBuilder {
    to: String,
    from: String,
    thread: String,
    subject: String,
    body: String,
    osrf_xid: String,
    router_from: Option<String>,
    router_to: Option<String>,
    router_class: Option<String>,
    router_command: Option<String>,
    broadcast: bool,
}

/// The streaming stanza parser owned by one Transport Session.
pub struct StanzaParser {
    tok: Tokenizer,
    state: ParserState,
    msg: MessageBuilder,
    error_code: i64,
    error_type: String,
    error_text: String,
}

impl StanzaParser {
    pub fn new() -> Self {
        StanzaParser {
            tok: Tokenizer::new(),
            state: ParserState::Begin,
            msg: MessageBuilder::default(),
            error_code: 0,
            error_type: String::new(),
            error_text: String::new(),
        }
    }

    /// Feed one chunk of socket bytes in and drain however many
    /// complete stanzas it produced. A return from `feed` with zero
    /// results does not imply nothing was received -- partial stanzas
    /// simply wait in the tokenizer's buffer for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ParsedStanza>, String> {
        self.tok.push(bytes)?;

        let mut out = Vec::new();
        while let Some(tok) = self.tok.next()? {
            if let Some(stanza) = self.handle_token(tok)? {
                out.push(stanza);
            }
        }
        Ok(out)
    }

    fn handle_token(&mut self, tok: Token) -> Result<Option<ParsedStanza>, String> {
        match tok {
            Token::Open {
                name,
                attrs,
                self_closing,
            } => self.handle_open(&name, &attrs, self_closing),
            Token::Close { name } => self.handle_close(&name),
            Token::Text(text) => {
                self.handle_text(&text);
                Ok(None)
            }
        }
    }

    fn handle_open(
        &mut self,
        name: &str,
        attrs: &[(String, String)],
        self_closing: bool,
    ) -> Result<Option<ParsedStanza>, String> {
        match (&self.state, name) {
            (ParserState::Begin, "stream:stream") | (ParserState::Begin, "stream") => {
                return Ok(Some(ParsedStanza::StreamOpen {
                    id: attr(attrs, "id").map(str::to_string),
                }));
            }
            (ParserState::Begin, "handshake") if self_closing => {
                return Ok(Some(ParsedStanza::Handshake));
            }
            (ParserState::Begin, "message") => {
                self.msg = MessageBuilder::default();
                self.msg.to = attr(attrs, "to").unwrap_or("").to_string();
                self.msg.from = attr(attrs, "from").unwrap_or("").to_string();
                self.state = ParserState::InMessage(MessageField::None);
            }
            (ParserState::Begin, "presence") => {
                self.msg.from = attr(attrs, "from").unwrap_or("").to_string();
                self.state = ParserState::InPresence(PresenceField::None);
            }
            (ParserState::Begin, "iq") => {
                if self_closing || attr(attrs, "type").is_some() {
                    return Ok(Some(ParsedStanza::IqResult {
                        id: attr(attrs, "id").map(str::to_string),
                        typ: attr(attrs, "type").unwrap_or("").to_string(),
                    }));
                }
                self.state = ParserState::InIq;
            }
            (ParserState::Begin, "error") => {
                self.error_code = attr(attrs, "code")
                    .and_then(|c| c.parse::<i64>().ok())
                    .unwrap_or(0);
                self.error_type = attr(attrs, "type").unwrap_or("").to_string();
                self.error_text.clear();
                self.state = ParserState::InError;
            }
            (ParserState::InMessage(_), "body") => {
                self.state = ParserState::InMessage(MessageField::InBody);
            }
            (ParserState::InMessage(_), "subject") => {
                self.state = ParserState::InMessage(MessageField::InSubject);
            }
            (ParserState::InMessage(_), "thread") => {
                self.state = ParserState::InMessage(MessageField::InThread);
            }
            (ParserState::InMessage(_), "opensrf") => {
                self.msg.router_from = attr(attrs, "router_from").map(str::to_string);
                self.msg.router_to = attr(attrs, "router_to").map(str::to_string);
                self.msg.router_class = attr(attrs, "router_class").map(str::to_string);
                self.msg.router_command = attr(attrs, "router_command").map(str::to_string);
                self.msg.broadcast = attr(attrs, "broadcast").is_some();
                if let Some(xid) = attr(attrs, "osrf_xid") {
                    self.msg.osrf_xid = xid.to_string();
                }
            }
            (ParserState::InMessage(_), "error") => {
                self.state = ParserState::InMessageError;
            }
            (ParserState::InPresence(_), "status") => {
                self.state = ParserState::InPresence(PresenceField::InStatus);
            }
            _ => {
                // Unknown/irrelevant element for this narrow stanza
                // vocabulary; a parse warning, not a parse error.
                log::warn!("stanza parser ignoring unexpected element <{name}>");
            }
        }

        Ok(None)
    }

    fn handle_text(&mut self, text: &str) {
        match &self.state {
            ParserState::InMessage(MessageField::InBody) => self.msg.body.push_str(text),
            ParserState::InMessage(MessageField::InSubject) => self.msg.subject.push_str(text),
            ParserState::InMessage(MessageField::InThread) => self.msg.thread.push_str(text),
            ParserState::InPresence(PresenceField::InStatus) => self.msg.body.push_str(text),
            ParserState::InError | ParserState::InMessageError => self.error_text.push_str(text),
            _ => {}
        }
    }

    fn handle_close(&mut self, name: &str) -> Result<Option<ParsedStanza>, String> {
        match (&self.state, name) {
            (ParserState::InMessage(MessageField::InBody), "body")
            | (ParserState::InMessage(MessageField::InSubject), "subject")
            | (ParserState::InMessage(MessageField::InThread), "thread") => {
                self.state = ParserState::InMessage(MessageField::None);
                Ok(None)
            }
            (ParserState::InMessage(_), "message") => {
                let mut tmsg = TransportMessage::new(
                    &self.msg.to,
                    &self.msg.from,
                    &self.msg.thread,
                    &self.msg.subject,
                    &self.msg.body,
                );
                if !self.msg.osrf_xid.is_empty() {
                    tmsg.set_osrf_xid(&self.msg.osrf_xid);
                }
                if let Some(v) = &self.msg.router_from {
                    tmsg.set_router_from(v);
                }
                if let Some(v) = &self.msg.router_to {
                    tmsg.set_router_to(v);
                }
                if let Some(v) = &self.msg.router_class {
                    tmsg.set_router_class(v);
                }
                if let Some(v) = &self.msg.router_command {
                    tmsg.set_router_command(v);
                }
                tmsg.set_broadcast(self.msg.broadcast);

                self.state = ParserState::Begin;
                Ok(Some(ParsedStanza::Message(tmsg)))
            }
            (ParserState::InPresence(PresenceField::InStatus), "status") => {
                self.state = ParserState::InPresence(PresenceField::None);
                Ok(None)
            }
            (ParserState::InPresence(_), "presence") => {
                let status = std::mem::take(&mut self.msg.body);
                let from = self.msg.from.clone();
                self.state = ParserState::Begin;
                Ok(Some(ParsedStanza::Presence { from, status }))
            }
            (ParserState::InIq, "iq") => {
                self.state = ParserState::Begin;
                Ok(Some(ParsedStanza::IqResult {
                    id: None,
                    typ: String::new(),
                }))
            }
            (ParserState::InMessageError, "error") => {
                self.state = ParserState::InMessage(MessageField::None);
                Ok(None)
            }
            (ParserState::InError, "error") => {
                self.state = ParserState::Begin;
                Ok(Some(ParsedStanza::Error {
                    code: self.error_code,
                    err_type: std::mem::take(&mut self.error_type),
                    text: std::mem::take(&mut self.error_text),
                }))
            }
            (ParserState::Begin, "stream:stream") | (ParserState::Begin, "stream") => {
                Ok(Some(ParsedStanza::StreamClose))
            }
            _ => Ok(None),
        }
    }
}

impl Default for StanzaParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Authentication style for `TransportSession::connect` (§4B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Plain,
    Digest,
}

/// `SHA1(stream_id || password)`, hex-encoded, as used by DIGEST auth
/// and the component handshake variant.
pub fn digest_password(stream_id: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the opening stream element sent at connect step 2.
pub fn opening_stream_element(domain: &str) -> String {
    format!(
        "<stream:stream xmlns:stream=\"http://etherx.jabber.org/streams\" to=\"{}\">",
        escape_xml(domain, true)
    )
}

/// Build the closing stream element sent at disconnect.
pub fn closing_stream_element() -> &'static str {
    "</stream:stream>"
}

/// Build the login `<iq/>` for a normal (non-component) client.
pub fn login_iq(username: &str, resource: &str, auth_mode: AuthMode, stream_id: &str, password: &str) -> String {
    let pass_el = match auth_mode {
        AuthMode::Plain => format!("<password>{}</password>", escape_xml(password, false)),
        AuthMode::Digest => format!(
            "<digest>{}</digest>",
            digest_password(stream_id, password)
        ),
    };

    format!(
        "<iq type=\"set\" id=\"auth\"><query xmlns=\"jabber:iq:auth\"><username>{}</username>{}<resource>{}</resource></query></iq>",
        escape_xml(username, false),
        pass_el,
        escape_xml(resource, false),
    )
}

/// Build the handshake stanza for a "component" connection (hash only,
/// no username/resource).
pub fn component_handshake(stream_id: &str, password: &str) -> String {
    format!(
        "<handshake>{}</handshake>",
        digest_password(stream_id, password)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_roundtrips_through_unescape() {
        let s = "<tag>&'quote'\"dquote\"Ã©";
        let escaped = escape_xml(s, true);
        assert_eq!(unescape_xml(&escaped), s);
    }

    #[test]
    fn tokenizer_handles_split_feed() {
        let mut parser = StanzaParser::new();
        let whole = "<message to=\"a@b\" from=\"c@d\"><thread>t1</thread><body>hi</body></message>";
        let (first, second) = whole.split_at(20);

        let r1 = parser.feed(first.as_bytes()).unwrap();
        assert!(r1.is_empty());

        let r2 = parser.feed(second.as_bytes()).unwrap();
        assert_eq!(r2.len(), 1);
        match &r2[0] {
            ParsedStanza::Message(tmsg) => {
                assert_eq!(tmsg.recipient(), "a@b");
                assert_eq!(tmsg.thread(), "t1");
                assert_eq!(tmsg.body(), "hi");
            }
            _ => panic!("expected a message stanza"),
        }
    }

    #[test]
    fn parses_stream_open_with_id() {
        let mut parser = StanzaParser::new();
        let out = parser
            .feed(b"<stream:stream id=\"abc123\" from=\"localhost\">")
            .unwrap();
        assert_eq!(out.len(), 1);
        match &out[0] {
            ParsedStanza::StreamOpen { id } => assert_eq!(id.as_deref(), Some("abc123")),
            _ => panic!("expected stream open"),
        }
    }

    #[test]
    fn parses_handshake() {
        let mut parser = StanzaParser::new();
        let out = parser.feed(b"<handshake/>").unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], ParsedStanza::Handshake));
    }

    #[test]
    fn parses_error_stanza() {
        let mut parser = StanzaParser::new();
        let out = parser
            .feed(b"<error code=\"401\" type=\"auth\">Not authorized</error>")
            .unwrap();
        assert_eq!(out.len(), 1);
        match &out[0] {
            ParsedStanza::Error {
                code,
                err_type,
                text,
            } => {
                assert_eq!(*code, 401);
                assert_eq!(err_type, "auth");
                assert_eq!(text, "Not authorized");
            }
            _ => panic!("expected error stanza"),
        }
    }

    #[test]
    fn digest_password_is_sha1_of_stream_id_and_password() {
        let d = digest_password("abc", "secret");
        assert_eq!(d.len(), 40);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
