use super::addr::ClientAddress;
use super::conf;
use super::message::TransportMessage;
use super::transport::{TransportSession, WaitResult};
use super::xmpp::{AuthMode, ParsedStanza};
use std::fmt;

/// One logical connection to the message bus: a Transport Session
/// plus the client-level address it was assigned on connect.
pub struct Bus {
    transport: TransportSession,
    address: ClientAddress,
    router_name: String,
}

impl Bus {
    pub fn new(config: &conf::BusClient) -> Result<Self, String> {
        let mut transport = TransportSession::open_tcp(config.domain())?;

        let address = ClientAddress::new(config.domain().name());
        let resource = address.addr().resource().unwrap_or("client").to_string();

        transport.connect(
            config.username(),
            config.password(),
            &resource,
            10,
            AuthMode::Digest,
            false,
        )?;

        log::trace!("Bus::new() connected as {}", address.as_str());

        Ok(Bus {
            transport,
            address,
            router_name: config.router_name().to_string(),
        })
    }

    pub fn address(&self) -> &ClientAddress {
        &self.address
    }

    pub fn set_address(&mut self, addr: &ClientAddress) {
        self.address = addr.clone();
    }

    /// Assign a fresh address on the current domain, e.g. after a
    /// drone rebootstraps its own connection post-fork.
    pub fn generate_address(&mut self) {
        self.address = ClientAddress::new(self.domain());
    }

    pub fn router_name(&self) -> &str {
        &self.router_name
    }

    pub fn domain(&self) -> &str {
        self.address.addr().domain()
    }

    /// Wait up to `timeout` seconds for the next inbound Transport
    /// Message. `recipient` is accepted for API symmetry with the
    /// pack's list-based bus but is unused here: delivery to this
    /// socket already implies addressing to us.
    pub fn recv(
        &mut self,
        timeout: i32,
        _recipient: Option<&str>,
    ) -> Result<Option<TransportMessage>, String> {
        match self.transport.wait(timeout)? {
            WaitResult::Stanza(ParsedStanza::Message(tmsg)) => Ok(Some(tmsg)),
            WaitResult::Stanza(ParsedStanza::Error { code, err_type, text }) => {
                if code == 401 {
                    log::error!("bus auth failure: {err_type} {text}");
                } else {
                    log::warn!("bus received error stanza {code}: {text}");
                }
                Ok(None)
            }
            WaitResult::Stanza(_) => Ok(None),
            WaitResult::Timeout => Ok(None),
            WaitResult::Closed => Err("bus connection closed by peer".to_string()),
        }
    }

    /// Send a Transport Message to the address already set in `to`.
    pub fn send(&mut self, msg: &TransportMessage) -> Result<(), String> {
        self.transport.send_message(msg)
    }

    /// Send a Transport Message, overriding its recipient field.
    pub fn send_to(&mut self, msg: &TransportMessage, recipient: &str) -> Result<(), String> {
        let mut msg = msg.clone();
        msg.set_recipient(recipient);
        self.transport.send_message(&msg)
    }

    /// No persistent server-side queue exists to drain in the stanza
    /// transport model; present for API symmetry with callers that
    /// clear stale backlog state between requests.
    pub fn clear_stream(&mut self) -> Result<(), String> {
        Ok(())
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Bus {}", self.address().as_str())
    }
}
