use super::util;
use super::xmpp;
use log::warn;
use std::fmt;

const DEFAULT_LOCALE: &str = "en-US";
const DEFAULT_TIMEZONE: &str = "America/New_York";
const DEFAULT_API_LEVEL: u8 = 1;
const DEFAULT_INGRESS: &str = "opensrf";

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum MessageType {
    Connect,
    Request,
    Result,
    Status,
    Disconnect,
    Unknown,
}

/// Create a MessageType from the string that would be found in a message.
///
/// ```
/// let mt: opensrf_bus::message::MessageType = "REQUEST".into();
/// assert_eq!(mt, opensrf_bus::message::MessageType::Request);
/// ```
impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s {
            "CONNECT" => MessageType::Connect,
            "REQUEST" => MessageType::Request,
            "RESULT" => MessageType::Result,
            "STATUS" => MessageType::Status,
            "DISCONNECT" => MessageType::Disconnect,
            _ => MessageType::Unknown,
        }
    }
}

/// Create the string that will be used within the serialized message
/// for a given MessageType
///
/// ```
/// let s: &str = opensrf_bus::message::MessageType::Request.into();
/// assert_eq!(s, "REQUEST");
/// ```
impl Into<&'static str> for MessageType {
    fn into(self) -> &'static str {
        match self {
            MessageType::Connect => "CONNECT",
            MessageType::Request => "REQUEST",
            MessageType::Result => "RESULT",
            MessageType::Status => "STATUS",
            MessageType::Disconnect => "DISCONNECT",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s: &str = (*self).into();
        write!(f, "{}", s)
    }
}

/// Status codes a STATUS message may carry. CONTINUE is a keepalive
/// reset; OK/COMPLETE are success (COMPLETE terminates a request); the
/// rest are failures.
// Derive is needed to do things like: let i = self.mtype as isize;
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum MessageStatus {
    Continue = 100,
    Ok = 200,
    Accepted = 202,
    PartialComplete = 204,
    Complete = 205,
    Partial = 206,
    Redirected = 307,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    MethodNotFound = 404,
    NotAllowed = 405,
    ServiceNotFound = 406,
    Timeout = 408,
    Expfailed = 417,
    InternalServerError = 500,
    NotImplemented = 501,
    ServiceUnavailable = 503,
    VersionNotSupported = 505,
    Unknown,
}

impl MessageStatus {
    /// True for NOTFOUND/TIMEOUT/NOTALLOWED/SERVICEUNAVAILABLE/INTERNALSERVERERROR
    /// and any other non-success code; false for CONTINUE/OK/COMPLETE.
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            MessageStatus::Continue
                | MessageStatus::Ok
                | MessageStatus::Accepted
                | MessageStatus::PartialComplete
                | MessageStatus::Complete
                | MessageStatus::Partial
        )
    }
}

/// Translate a code number into a MessageStatus
///
/// ```
/// let ms: opensrf_bus::message::MessageStatus = 205.into();
/// assert_eq!(ms, opensrf_bus::message::MessageStatus::Complete);
/// ```
impl From<isize> for MessageStatus {
    fn from(num: isize) -> Self {
        match num {
            100 => MessageStatus::Continue,
            200 => MessageStatus::Ok,
            202 => MessageStatus::Accepted,
            204 => MessageStatus::PartialComplete,
            205 => MessageStatus::Complete,
            206 => MessageStatus::Partial,
            307 => MessageStatus::Redirected,
            400 => MessageStatus::BadRequest,
            401 => MessageStatus::Unauthorized,
            403 => MessageStatus::Forbidden,
            404 => MessageStatus::MethodNotFound,
            405 => MessageStatus::NotAllowed,
            406 => MessageStatus::ServiceNotFound,
            408 => MessageStatus::Timeout,
            417 => MessageStatus::Expfailed,
            500 => MessageStatus::InternalServerError,
            501 => MessageStatus::NotImplemented,
            503 => MessageStatus::ServiceUnavailable,
            505 => MessageStatus::VersionNotSupported,
            _ => MessageStatus::Unknown,
        }
    }
}

/// Translate a MessageStatus into its serialized display label
///
/// ```
/// let s: &str = opensrf_bus::message::MessageStatus::Continue.into();
/// assert_eq!(s, "Continue");
/// ```
impl Into<&'static str> for MessageStatus {
    fn into(self) -> &'static str {
        match self {
            MessageStatus::Ok => "OK",
            MessageStatus::Continue => "Continue",
            MessageStatus::Complete => "Request Complete",
            MessageStatus::BadRequest => "Bad Request",
            MessageStatus::Timeout => "Timeout",
            MessageStatus::MethodNotFound => "Method Not Found",
            MessageStatus::NotAllowed => "Not Allowed",
            MessageStatus::ServiceNotFound => "Service Not Found",
            MessageStatus::ServiceUnavailable => "Service Unavailable",
            MessageStatus::InternalServerError => "Internal Server Error",
            _ => "See Status Code",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}) {:?}", *self as isize, self)
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Method(Method),
    Result(Result),
    Status(Status),
    NoPayload,
}

impl Payload {
    pub fn to_json_value(&self) -> json::JsonValue {
        match self {
            Payload::Method(pl) => pl.to_json_value(),
            Payload::Result(pl) => pl.to_json_value(),
            Payload::Status(pl) => pl.to_json_value(),
            Payload::NoPayload => json::JsonValue::Null,
        }
    }
}

/// One wire-level stanza: the immutable value type for component A.
///
/// `body` is the raw text carried inside the stanza's `<body/>` child —
/// for OpenSRF traffic this is a JSON-encoded Method Message batch (see
/// `encode_batch`/`decode_batch` below), but `TransportMessage` itself
/// knows nothing about that structure.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    sender: String,
    recipient: String,
    thread: String,
    subject: String,
    body: String,
    osrf_xid: String,
    router_from: Option<String>,
    router_to: Option<String>,
    router_class: Option<String>,
    router_command: Option<String>,
    broadcast: bool,
    error: Option<StanzaError>,
}

/// An XMPP-level `<error/>` carried by a stanza, e.g. a 401 auth failure.
#[derive(Debug, Clone)]
pub struct StanzaError {
    pub err_type: String,
    pub code: i64,
}

impl TransportMessage {
    /// Build a Transport Message. Any field may legitimately be empty.
    pub fn new(recipient: &str, sender: &str, thread: &str, subject: &str, body: &str) -> Self {
        TransportMessage {
            recipient: recipient.to_string(),
            sender: sender.to_string(),
            thread: thread.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            osrf_xid: String::new(),
            router_from: None,
            router_to: None,
            router_class: None,
            router_command: None,
            broadcast: false,
            error: None,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }
    pub fn set_recipient(&mut self, to: &str) {
        self.recipient = to.to_string();
    }
    pub fn sender(&self) -> &str {
        &self.sender
    }
    pub fn set_sender(&mut self, from: &str) {
        self.sender = from.to_string();
    }
    pub fn thread(&self) -> &str {
        &self.thread
    }
    pub fn subject(&self) -> &str {
        &self.subject
    }
    pub fn set_subject(&mut self, subject: &str) {
        self.subject = subject.to_string();
    }
    pub fn body(&self) -> &str {
        &self.body
    }
    pub fn set_body(&mut self, body: &str) {
        self.body = body.to_string();
    }

    pub fn osrf_xid(&self) -> &str {
        &self.osrf_xid
    }
    pub fn set_osrf_xid(&mut self, xid: &str) {
        self.osrf_xid = xid.to_string();
    }

    pub fn router_from(&self) -> Option<&str> {
        self.router_from.as_deref()
    }
    pub fn set_router_from(&mut self, from: &str) {
        self.router_from = Some(from.to_string());
    }
    pub fn router_to(&self) -> Option<&str> {
        self.router_to.as_deref()
    }
    pub fn set_router_to(&mut self, to: &str) {
        self.router_to = Some(to.to_string());
    }
    pub fn router_class(&self) -> Option<&str> {
        self.router_class.as_deref()
    }
    pub fn set_router_class(&mut self, class: &str) {
        self.router_class = Some(class.to_string());
    }
    pub fn router_command(&self) -> Option<&str> {
        self.router_command.as_deref()
    }
    pub fn set_router_command(&mut self, command: &str) {
        self.router_command = Some(command.to_string());
    }
    pub fn broadcast(&self) -> bool {
        self.broadcast
    }
    pub fn set_broadcast(&mut self, broadcast: bool) {
        self.broadcast = broadcast;
    }
    pub fn error(&self) -> Option<&StanzaError> {
        self.error.as_ref()
    }
    pub fn set_error(&mut self, err_type: &str, code: i64) {
        self.error = Some(StanzaError {
            err_type: err_type.to_string(),
            code,
        });
    }

    /// Serialize to one `<message/>` stanza. Router/xid extensions ride
    /// in a nested `<opensrf/>` element; thread/subject/body are text
    /// child elements. See xmpp::escape_xml for the entity-escaping
    /// contract.
    pub fn to_wire(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!(
            "<message to=\"{}\" from=\"{}\">",
            xmpp::escape_xml(&self.recipient, true),
            xmpp::escape_xml(&self.sender, true)
        ));

        if self.router_from.is_some()
            || self.router_to.is_some()
            || self.router_class.is_some()
            || self.router_command.is_some()
            || self.broadcast
            || !self.osrf_xid.is_empty()
        {
            s.push_str("<opensrf");
            if let Some(v) = &self.router_from {
                s.push_str(&format!(" router_from=\"{}\"", xmpp::escape_xml(v, true)));
            }
            if let Some(v) = &self.router_to {
                s.push_str(&format!(" router_to=\"{}\"", xmpp::escape_xml(v, true)));
            }
            if let Some(v) = &self.router_class {
                s.push_str(&format!(" router_class=\"{}\"", xmpp::escape_xml(v, true)));
            }
            if let Some(v) = &self.router_command {
                s.push_str(&format!(
                    " router_command=\"{}\"",
                    xmpp::escape_xml(v, true)
                ));
            }
            if self.broadcast {
                s.push_str(" broadcast=\"1\"");
            }
            if !self.osrf_xid.is_empty() {
                s.push_str(&format!(
                    " osrf_xid=\"{}\"",
                    xmpp::escape_xml(&self.osrf_xid, true)
                ));
            }
            s.push_str("/>");
        }

        s.push_str(&format!(
            "<thread>{}</thread>",
            xmpp::escape_xml(&self.thread, false)
        ));

        if !self.subject.is_empty() {
            s.push_str(&format!(
                "<subject>{}</subject>",
                xmpp::escape_xml(&self.subject, false)
            ));
        }

        s.push_str(&format!(
            "<body>{}</body>",
            xmpp::escape_xml(&self.body, false)
        ));

        s.push_str("</message>");

        s
    }

    /// Parse exactly one stanza back into a Transport Message. Uses the
    /// same push-parser that drives the live socket loop (§4B), fed
    /// with the whole buffer at once. If `router_from` is present it
    /// overrides the effective sender, since that is what the router
    /// rewrote the message to look like it came from.
    pub fn from_wire(text: &str) -> std::result::Result<Self, String> {
        let mut parser = xmpp::StanzaParser::new();
        let mut out = None;

        for msg in parser.feed(text.as_bytes())? {
            out = Some(msg);
        }

        let mut tmsg = match out {
            Some(xmpp::ParsedStanza::Message(tmsg)) => tmsg,
            Some(_) => return Err("from_wire() received a non-message stanza".to_string()),
            None => return Err("from_wire() found no complete stanza".to_string()),
        };

        if let Some(router_from) = tmsg.router_from.clone() {
            tmsg.sender = router_from;
        }

        Ok(tmsg)
    }

    /// Build a Transport Message whose body is a single Method
    /// Message batch of one element. Convenience wrapper for the
    /// common case of sending exactly one Method Message.
    pub fn with_body(recipient: &str, sender: &str, thread: &str, msg: Message) -> Self {
        let body = TransportMessage::encode_batch(&[msg]);
        TransportMessage::new(recipient, sender, thread, "", &body)
    }

    /// Decode this message's body into its Method Message batch.
    pub fn body_messages(&self) -> Vec<Message> {
        TransportMessage::decode_batch(&self.body)
    }

    /// Encode a Method Message batch as the wire body of a
    /// to-be-sent TransportMessage (component C, §4C).
    pub fn encode_batch(messages: &[Message]) -> String {
        let arr: Vec<json::JsonValue> = messages.iter().map(|m| m.to_json_value()).collect();
        json::JsonValue::Array(arr).dump()
    }

    /// Decode the body of a received TransportMessage into a Method
    /// Message batch. Decoding is permissive: malformed elements are
    /// logged and skipped rather than failing the whole batch.
    pub fn decode_batch(body: &str) -> Vec<Message> {
        let parsed = match json::parse(body) {
            Ok(p) => p,
            Err(e) => {
                warn!("decode_batch() received unparseable body: {e} body={body}");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        match parsed {
            json::JsonValue::Array(arr) => {
                for elm in arr {
                    if let Some(m) = Message::from_json_value(&elm) {
                        out.push(m);
                    } else {
                        warn!("decode_batch() could not decode element: {}", elm.dump());
                    }
                }
            }
            other => {
                if let Some(m) = Message::from_json_value(&other) {
                    out.push(m);
                }
            }
        }

        out
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    mtype: MessageType,
    thread_trace: usize,
    locale: String,
    timezone: String,
    api_level: u8,
    ingress: String,
    payload: Payload,
    msg_class: String,
}

impl Message {
    pub fn new(mtype: MessageType, thread_trace: usize, payload: Payload) -> Self {
        Message {
            mtype,
            thread_trace,
            payload,
            api_level: DEFAULT_API_LEVEL,
            locale: DEFAULT_LOCALE.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            ingress: DEFAULT_INGRESS.to_string(),
            msg_class: String::from("osrfMessage"), // Only supported value
        }
    }

    pub fn mtype(&self) -> &MessageType {
        &self.mtype
    }

    pub fn thread_trace(&self) -> usize {
        self.thread_trace
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    /// Take ownership of the payload, consuming the message. Handy
    /// when the enclosing Message is about to be dropped anyway.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn api_level(&self) -> u8 {
        self.api_level
    }

    pub fn set_api_level(&mut self, level: u8) {
        self.api_level = level;
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn set_locale(&mut self, locale: &str) {
        self.locale = locale.to_string()
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn set_timezone(&mut self, timezone: &str) {
        self.timezone = timezone.to_string()
    }

    pub fn ingress(&self) -> &str {
        &self.ingress
    }

    pub fn set_ingress(&mut self, ingress: &str) {
        self.ingress = ingress.to_string()
    }

    /// Creates a Message from a JSON value.
    ///
    /// Returns None if the JSON value cannot be coerced into a Message.
    pub fn from_json_value(json_obj: &json::JsonValue) -> Option<Self> {
        let msg_wrapper: super::classified::ClassifiedJson =
            match super::classified::ClassifiedJson::declassify(json_obj) {
                Some(sm) => sm,
                None => {
                    return None;
                }
            };

        let msg_class = msg_wrapper.class();

        if msg_class != "osrfMessage" {
            warn!("Message::from_json_value() unknown class {}", msg_class);
            return None;
        }

        let msg_hash = msg_wrapper.json();

        let thread_trace = match util::json_usize(&msg_hash["threadTrace"]) {
            Some(tt) => tt,
            None => {
                warn!("Message contains invalid threadTrace: {}", msg_hash.dump());
                return None;
            }
        };

        let mtype_str = match msg_hash["type"].as_str() {
            Some(s) => s,
            None => {
                return None;
            }
        };

        let mtype: MessageType = mtype_str.into();

        let payload = match Message::payload_from_json_value(mtype, &msg_hash["payload"]) {
            Some(p) => p,
            None => {
                return None;
            }
        };

        let mut msg = Message::new(mtype, thread_trace, payload);

        if let Some(tz) = msg_hash["tz"].as_str() {
            msg.set_timezone(tz);
        }

        if let Some(lc) = msg_hash["locale"].as_str() {
            msg.set_locale(lc);
        }

        if let Some(ing) = msg_hash["ingress"].as_str() {
            msg.set_ingress(ing);
        }

        if let Some(al) = msg_hash["api_level"].as_u8() {
            msg.set_api_level(al);
        }

        Some(msg)
    }

    fn payload_from_json_value(
        mtype: MessageType,
        payload_obj: &json::JsonValue,
    ) -> Option<Payload> {
        match mtype {
            MessageType::Request => {
                Method::from_json_value(payload_obj).map(Payload::Method)
            }

            MessageType::Result => Result::from_json_value(payload_obj).map(Payload::Result),

            MessageType::Status => Status::from_json_value(payload_obj).map(Payload::Status),

            _ => Some(Payload::NoPayload),
        }
    }

    pub fn to_json_value(&self) -> json::JsonValue {
        let mtype: &str = self.mtype.into();

        let mut obj = json::object! {
            threadTrace: json::from(self.thread_trace),
            type: json::from(mtype),
            locale: json::from(self.locale.clone()),
            timezone: json::from(self.timezone.clone()),
            api_level: json::from(self.api_level),
            ingress: json::from(self.ingress.clone()),
        };

        match self.payload {
            // Avoid adding the "payload" key for non-payload messages.
            Payload::NoPayload => {}
            _ => obj["payload"] = self.payload.to_json_value(),
        }

        super::classified::ClassifiedJson::classify(&obj, &self.msg_class)
    }
}

/// Delivers a single API response.
///
/// Each Request will have zero or more associated Result messages.
#[derive(Debug, Clone)]
pub struct Result {
    status: MessageStatus,
    status_label: String,
    msg_class: String,
    /// API response value.
    content: json::JsonValue,
}

impl Result {
    pub fn new(
        status: MessageStatus,
        status_label: &str,
        msg_class: &str,
        content: json::JsonValue,
    ) -> Self {
        Result {
            status,
            content,
            msg_class: msg_class.to_string(),
            status_label: status_label.to_string(),
        }
    }

    pub fn content(&self) -> &json::JsonValue {
        &self.content
    }

    /// Take ownership of the response content, leaving `JsonValue::Null`
    /// behind. For use when the Result is about to be dropped anyway.
    pub fn take_content(&mut self) -> json::JsonValue {
        self.content.take()
    }

    pub fn status(&self) -> &MessageStatus {
        &self.status
    }

    pub fn status_label(&self) -> &str {
        &self.status_label
    }

    pub fn from_json_value(json_obj: &json::JsonValue) -> Option<Self> {
        let msg_wrapper: super::classified::ClassifiedJson =
            match super::classified::ClassifiedJson::declassify(json_obj) {
                Some(sm) => sm,
                None => {
                    return None;
                }
            };

        let msg_class = msg_wrapper.class();
        let msg_hash = msg_wrapper.json();

        let code = match util::json_isize(&msg_hash["statusCode"]) {
            Some(tt) => tt,
            None => {
                warn!("Result has invalid status code {}", json_obj.dump());
                return None;
            }
        };

        let stat: MessageStatus = code.into();

        let stat_str: &str = match msg_hash["status"].as_str() {
            Some(s) => s,
            None => stat.into(),
        };

        Some(Result::new(
            stat,
            stat_str,
            msg_class,
            msg_hash["content"].clone(),
        ))
    }

    pub fn to_json_value(&self) -> json::JsonValue {
        let obj = json::object! {
            status: json::from(self.status_label.clone()),
            statusCode: json::from(self.status as isize),
            content: self.content.clone(),
        };

        super::classified::ClassifiedJson::classify(&obj, &self.msg_class)
    }
}

#[derive(Debug, Clone)]
pub struct Status {
    status: MessageStatus,
    status_label: String,
    msg_class: String,
}

impl Status {
    pub fn new(status: MessageStatus, status_label: &str, msg_class: &str) -> Self {
        Status {
            status,
            status_label: status_label.to_string(),
            msg_class: msg_class.to_string(),
        }
    }

    pub fn status(&self) -> &MessageStatus {
        &self.status
    }

    pub fn status_label(&self) -> &str {
        &self.status_label
    }

    pub fn from_json_value(json_obj: &json::JsonValue) -> Option<Self> {
        let msg_wrapper: super::classified::ClassifiedJson =
            match super::classified::ClassifiedJson::declassify(json_obj) {
                Some(sm) => sm,
                None => {
                    return None;
                }
            };

        let msg_class = msg_wrapper.class();
        let msg_hash = msg_wrapper.json();

        let code = match util::json_isize(&msg_hash["statusCode"]) {
            Some(tt) => tt,
            None => {
                warn!("Status has invalid status code {}", json_obj.dump());
                return None;
            }
        };

        let stat: MessageStatus = code.into();

        let stat_str: &str = match msg_hash["status"].as_str() {
            Some(s) => s,
            None => stat.into(),
        };

        Some(Status::new(stat, stat_str, msg_class))
    }

    pub fn to_json_value(&self) -> json::JsonValue {
        let obj = json::object! {
            status: json::from(self.status_label.clone()),
            statusCode: json::from(self.status as isize),
        };

        super::classified::ClassifiedJson::classify(&obj, &self.msg_class)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "stat={} class={} label={}",
            self.status, self.msg_class, self.status_label
        )
    }
}

/// A single API request with method name and parameters.
#[derive(Debug, Clone)]
pub struct Method {
    method: String,
    params: Vec<json::JsonValue>,
    msg_class: String,
}

impl Method {
    pub fn new(method: &str, params: Vec<json::JsonValue>) -> Self {
        Method {
            params,
            method: String::from(method),
            msg_class: String::from("osrfMethod"), // only supported value
        }
    }

    /// Create a Method from a JsonValue.
    pub fn from_json_value(json_obj: &json::JsonValue) -> Option<Self> {
        let msg_wrapper: super::classified::ClassifiedJson =
            match super::classified::ClassifiedJson::declassify(json_obj) {
                Some(mw) => mw,
                None => {
                    return None;
                }
            };

        let msg_class = msg_wrapper.class();
        let msg_hash = msg_wrapper.json();

        let method = match msg_hash["method"].as_str() {
            Some(m) => m.to_string(),
            None => {
                return None;
            }
        };

        let mut params = Vec::new();

        if let json::JsonValue::Array(arr) = &msg_hash["params"] {
            params = arr.iter().map(|p| p.clone()).collect();
        }

        Some(Method {
            method,
            params,
            msg_class: msg_class.to_string(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &Vec<json::JsonValue> {
        &self.params
    }

    /// Take ownership of the params, leaving an empty Vec behind.
    pub fn take_params(&mut self) -> Vec<json::JsonValue> {
        std::mem::take(&mut self.params)
    }

    pub fn set_params(&mut self, params: Vec<json::JsonValue>) {
        self.params = params;
    }

    /// Create a JsonValue from a Method
    pub fn to_json_value(&self) -> json::JsonValue {
        let params: Vec<json::JsonValue> = self.params.iter().map(|v| v.clone()).collect();

        let obj = json::object! {
            method: json::from(self.method()),
            params: json::from(params),
        };

        super::classified::ClassifiedJson::classify(&obj, &self.msg_class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_message_round_trips() {
        let mut tmsg = TransportMessage::new(
            "opensrf.settings@private.localhost",
            "client@private.localhost/abc",
            "t-123",
            "",
            "<>&'\"hello\"",
        );
        tmsg.set_osrf_xid("xid-1");
        tmsg.set_router_command("add");
        tmsg.set_router_class("opensrf.settings");

        let wire = tmsg.to_wire();
        let parsed = TransportMessage::from_wire(&wire).expect("parses");

        assert_eq!(parsed.recipient(), tmsg.recipient());
        assert_eq!(parsed.sender(), tmsg.sender());
        assert_eq!(parsed.thread(), tmsg.thread());
        assert_eq!(parsed.body(), tmsg.body());
        assert_eq!(parsed.osrf_xid(), "xid-1");
        assert_eq!(parsed.router_command(), Some("add"));
    }

    #[test]
    fn router_from_overrides_sender() {
        let mut tmsg = TransportMessage::new("a@b", "router@b", "t-1", "", "body");
        tmsg.set_router_from("opensrf.settings@b");
        let wire = tmsg.to_wire();
        let parsed = TransportMessage::from_wire(&wire).unwrap();
        assert_eq!(parsed.sender(), "opensrf.settings@b");
    }

    #[test]
    fn method_message_batch_round_trips() {
        let req = Message::new(
            MessageType::Request,
            1,
            Payload::Method(Method::new("opensrf.system.echo", vec![json::from("hi")])),
        );
        let status = Message::new(
            MessageType::Status,
            1,
            Payload::Status(Status::new(
                MessageStatus::Complete,
                "Request Complete",
                "osrfConnectStatus",
            )),
        );

        let encoded = TransportMessage::encode_batch(&[req, status]);
        let decoded = TransportMessage::decode_batch(&encoded);

        assert_eq!(decoded.len(), 2);
        assert_eq!(*decoded[0].mtype(), MessageType::Request);
        assert_eq!(*decoded[1].mtype(), MessageType::Status);
    }

    #[test]
    fn status_codes_partition_into_success_and_failure() {
        assert!(!MessageStatus::Continue.is_failure());
        assert!(!MessageStatus::Ok.is_failure());
        assert!(!MessageStatus::Complete.is_failure());
        assert!(MessageStatus::MethodNotFound.is_failure());
        assert!(MessageStatus::Timeout.is_failure());
        assert!(MessageStatus::NotAllowed.is_failure());
        assert!(MessageStatus::ServiceUnavailable.is_failure());
        assert!(MessageStatus::InternalServerError.is_failure());
    }
}
