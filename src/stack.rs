//! Stack (§4F): inbound dispatch. Decodes Transport Messages pulled
//! off a drone's Transport Session into Method Message batches, finds
//! or creates the Application Session the batch belongs to, and
//! drives each Method Message through to the registry dispatcher or
//! the client-side Request queue.

use super::app;
use super::client::Client;
use super::message::{self, MessageStatus, MessageType, Payload};
use super::method::Method;
use super::registry;
use super::session::ServerSession;
use std::collections::HashMap;
use std::sync::Arc;

/// Drives inbound dispatch for one drone: owns the table of
/// in-progress server sessions (by thread) and the registered methods.
pub struct Stack {
    service: String,
    client: Client,
    methods: Arc<HashMap<String, Method>>,
    log_protect: Vec<String>,
    sessions: HashMap<String, ServerSession>,
}

impl Stack {
    pub fn new(
        service: &str,
        client: Client,
        methods: Arc<HashMap<String, Method>>,
        log_protect: Vec<String>,
    ) -> Self {
        Stack {
            service: service.to_string(),
            client,
            methods,
            log_protect,
            sessions: HashMap::new(),
        }
    }

    /// True if any tracked session is mid-conversation (CONNECTED).
    pub fn has_active_session(&self) -> bool {
        self.sessions.values().any(|s| s.connected_hint())
    }

    /// Drop a finished session so it stops being tracked.
    pub fn drop_session(&mut self, thread: &str) {
        self.sessions.remove(thread);
    }

    /// Emit a terminal STATUS/TIMEOUT on a session whose keepalive wait
    /// expired, then stop tracking it. No-op if the thread is unknown.
    pub fn send_timeout(&mut self, thread: &str) -> Result<(), String> {
        if let Some(session) = self.sessions.get_mut(thread) {
            session.reply_timeout("Timeout waiting for client request")?;
        }
        self.sessions.remove(thread);
        Ok(())
    }

    /// Process one already-received Transport Message. Returns the
    /// number of Method Messages consumed from its body.
    pub fn process_message(
        &mut self,
        appworker: &mut Box<dyn app::ApplicationWorker>,
        tmsg: message::TransportMessage,
    ) -> Result<usize, String> {
        if let Some(err) = tmsg.error() {
            log::warn!(
                "{} received a wire-level error {} {}: discarding",
                self.service,
                err.code,
                err.err_type
            );
            return Ok(0);
        }

        let thread = tmsg.thread().to_string();
        let sender = super::addr::BusAddress::from_str(tmsg.sender())?;
        let batch = tmsg.body_messages();

        if batch.is_empty() {
            log::debug!("{} received an empty-body stanza, discarding", self.service);
            return Ok(0);
        }

        let mut consumed = 0;

        for msg in batch {
            self.dispatch_one(appworker, &thread, &sender, msg)?;
            consumed += 1;
        }

        Ok(consumed)
    }

    fn dispatch_one(
        &mut self,
        appworker: &mut Box<dyn app::ApplicationWorker>,
        thread: &str,
        sender: &super::addr::BusAddress,
        msg: message::Message,
    ) -> Result<(), String> {
        if !self.sessions.contains_key(thread) {
            // A server session may only be created by an inbound CONNECT
            // (stateful) or the first REQUEST (stateless one-off); any
            // other message type on an unknown thread is dropped.
            match msg.mtype() {
                MessageType::Connect | MessageType::Request => {
                    let session = ServerSession::new(
                        self.client.clone(),
                        &self.service,
                        thread,
                        0,
                        sender.clone(),
                    );
                    self.sessions.insert(thread.to_string(), session);
                }
                _ => {
                    log::warn!(
                        "{} dropping {:?} for unknown session thread {thread}",
                        self.service,
                        msg.mtype()
                    );
                    return Ok(());
                }
            }
        }

        let session = self.sessions.get_mut(thread).unwrap();
        session.set_last_thread_trace(msg.thread_trace());
        session.clear_responded_complete();

        match msg.mtype() {
            MessageType::Connect => {
                log::trace!("{session} received a CONNECT");
                session.mark_connected();
                session.reply_status_ok("OK")
            }
            MessageType::Disconnect => {
                log::trace!("{session} received a DISCONNECT");
                session.mark_disconnected();
                self.sessions.remove(thread);
                Ok(())
            }
            MessageType::Request => {
                let call = match msg.payload() {
                    Payload::Method(_) => {
                        if let Payload::Method(m) = msg.into_payload() {
                            m
                        } else {
                            unreachable!()
                        }
                    }
                    _ => {
                        return session
                            .reply_bad_request("Request sent without a Method payload");
                    }
                };

                registry::run_method(
                    &self.methods,
                    &self.log_protect,
                    appworker,
                    session,
                    call,
                )
            }
            other => {
                log::warn!("{session} unexpected inbound message type {other:?}");
                session.reply_bad_request("Unexpected message type")
            }
        }
    }
}
