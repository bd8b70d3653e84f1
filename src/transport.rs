//! Transport Session (§4B): one long-lived connection to the message
//! bus, the SASL-style handshake, and the incremental stanza read
//! loop built on top of `xmpp::StanzaParser`.

use super::conf::BusDomain;
use super::xmpp::{self, AuthMode, ParsedStanza};
use nix::poll::{poll, PollFd, PollFlags};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::collections::VecDeque;
use std::os::unix::net::UnixStream;
use std::time::Instant;

const READ_BUF_SIZE: usize = 16 * 1024;

enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Socket {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Socket::Tcp(s) => s.as_raw_fd(),
            Socket::Unix(s) => s.as_raw_fd(),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.read(buf),
            Socket::Unix(s) => s.read(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Socket::Tcp(s) => s.write_all(buf),
            Socket::Unix(s) => s.write_all(buf),
        }
    }
}

/// Outcome of one `wait()` call.
pub enum WaitResult {
    /// A stanza was fully parsed and is ready for the caller.
    Stanza(ParsedStanza),
    /// No data arrived within the requested timeout.
    Timeout,
    /// The peer closed the connection.
    Closed,
}

/// Owns one socket plus the push-parser driven from it. Mirrors
/// `Session::new`/`connect`/`wait`/`send`/`disconnect` from the
/// pack's bus-based client, but speaks the stanza wire format rather
/// than pushing/popping Redis lists.
pub struct TransportSession {
    socket: Socket,
    parser: xmpp::StanzaParser,
    domain: String,
    connected: bool,
    transport_error: bool,
    /// Stanzas parsed out of a read that produced more than one, held
    /// until the caller asks for the next one.
    pending: VecDeque<ParsedStanza>,
}

impl TransportSession {
    /// Open a TCP connection to the given domain/port. Does not
    /// perform the handshake; call `connect()` next.
    pub fn open_tcp(domain: &BusDomain) -> Result<Self, String> {
        let addr = format!("{}:{}", domain.name(), domain.port());
        let socket = TcpStream::connect(&addr)
            .map_err(|e| format!("cannot connect to {addr}: {e}"))?;
        socket
            .set_nonblocking(false)
            .map_err(|e| format!("cannot configure socket: {e}"))?;

        Ok(TransportSession {
            socket: Socket::Tcp(socket),
            parser: xmpp::StanzaParser::new(),
            domain: domain.name().to_string(),
            connected: false,
            transport_error: false,
            pending: VecDeque::new(),
        })
    }

    /// Open a Unix domain socket connection, e.g. for same-host
    /// router traffic.
    pub fn open_unix(path: &str, domain_label: &str) -> Result<Self, String> {
        let socket = UnixStream::connect(path)
            .map_err(|e| format!("cannot connect to {path}: {e}"))?;

        Ok(TransportSession {
            socket: Socket::Unix(socket),
            parser: xmpp::StanzaParser::new(),
            domain: domain_label.to_string(),
            connected: false,
            transport_error: false,
            pending: VecDeque::new(),
        })
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn transport_error(&self) -> bool {
        self.transport_error
    }

    fn send_raw(&mut self, text: &str) -> Result<(), String> {
        self.socket.write_all(text.as_bytes()).map_err(|e| {
            self.transport_error = true;
            format!("write failed: {e}")
        })
    }

    /// Run the five-step handshake described in §4B.
    pub fn connect(
        &mut self,
        username: &str,
        password: &str,
        resource: &str,
        timeout: i32,
        auth_mode: AuthMode,
        component: bool,
    ) -> Result<(), String> {
        self.send_raw(&xmpp::opening_stream_element(&self.domain))?;

        let stream_id = match self.wait(timeout)? {
            WaitResult::Stanza(ParsedStanza::StreamOpen { id }) => id.unwrap_or_default(),
            WaitResult::Stanza(_) => {
                return Err("expected stream open, got something else".to_string())
            }
            WaitResult::Timeout => {
                self.connected = false;
                return Err("timed out waiting for stream open".to_string());
            }
            WaitResult::Closed => {
                self.connected = false;
                return Err("connection closed during handshake".to_string());
            }
        };

        let login = if component {
            xmpp::component_handshake(&stream_id, password)
        } else {
            xmpp::login_iq(username, resource, auth_mode, &stream_id, password)
        };

        self.send_raw(&login)?;

        match self.wait(timeout)? {
            WaitResult::Stanza(ParsedStanza::Handshake) => {}
            WaitResult::Stanza(ParsedStanza::IqResult { typ, .. }) if typ != "error" => {}
            WaitResult::Stanza(ParsedStanza::Error { code, err_type, text }) => {
                self.connected = false;
                return Err(format!("auth failed ({code} {err_type}): {text}"));
            }
            WaitResult::Stanza(_) => {
                self.connected = false;
                return Err("unexpected reply during auth".to_string());
            }
            WaitResult::Timeout => {
                self.connected = false;
                return Err("timed out waiting for auth reply".to_string());
            }
            WaitResult::Closed => {
                self.connected = false;
                return Err("connection closed during auth".to_string());
            }
        }

        self.connected = true;
        Ok(())
    }

    /// Block for up to `timeout` seconds (0 = poll, -1 = forever) for
    /// the next fully parsed stanza.
    pub fn wait(&mut self, timeout: i32) -> Result<WaitResult, String> {
        if let Some(stanza) = self.pending.pop_front() {
            return Ok(WaitResult::Stanza(stanza));
        }

        let deadline = if timeout > 0 {
            Some(Instant::now() + std::time::Duration::from_secs(timeout as u64))
        } else {
            None
        };

        loop {
            let poll_ms: i32 = if timeout < 0 {
                -1
            } else if let Some(dl) = deadline {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(WaitResult::Timeout);
                }
                remaining.as_millis().min(i32::MAX as u128) as i32
            } else {
                0
            };

            let fd = self.socket.as_raw_fd();
            let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

            let nready = poll(&mut fds, poll_ms).map_err(|e| {
                self.transport_error = true;
                format!("poll() failed: {e}")
            })?;

            if nready == 0 {
                return Ok(WaitResult::Timeout);
            }

            let mut buf = [0u8; READ_BUF_SIZE];
            let n = self.socket.read(&mut buf).map_err(|e| {
                self.transport_error = true;
                format!("read() failed: {e}")
            })?;

            if n == 0 {
                self.connected = false;
                return Ok(WaitResult::Closed);
            }

            let stanzas = self.parser.feed(&buf[..n]).map_err(|e| {
                log::warn!("stanza parser error, dropping connection: {e}");
                self.transport_error = true;
                e
            })?;

            self.pending.extend(stanzas);
            if let Some(first) = self.pending.pop_front() {
                return Ok(WaitResult::Stanza(first));
            }

            // Got bytes but no complete stanza yet (partial read);
            // keep looping until the deadline.
        }
    }

    pub fn send_message(&mut self, tmsg: &super::message::TransportMessage) -> Result<(), String> {
        if self.transport_error {
            return Err("cannot send on a session with a transport error".to_string());
        }
        self.send_raw(&tmsg.to_wire())
    }

    /// Graceful disconnect: close the stream properly.
    pub fn disconnect(&mut self) {
        let _ = self.send_raw(xmpp::closing_stream_element());
        self.connected = false;
    }

    /// Drop the connection without announcing it, for use by a
    /// freshly forked drone that inherited the parent's file
    /// descriptor and must not disturb the parent's peer.
    pub fn discard(self) {
        // Dropping `self` closes the underlying fd.
    }
}
