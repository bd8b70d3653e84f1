//! Prefork Supervisor (§4G): a process-based parent/drone pool.
//!
//! The parent holds the one bus connection registered with the
//! configured routers and never runs application code itself. Each
//! drone is a forked child with its own freshly-connected Client; the
//! parent hands a drone its first Transport Message over a pipe, and
//! from then on (for a stateful conversation) the client addresses the
//! drone directly, bypassing the parent entirely until DISCONNECT or
//! a keepalive timeout.

use super::addr::BusAddress;
use super::app;
use super::client::Client;
use super::conf::{self, AppConfig};
use super::init;
use super::message::{Message, MessageStatus, MessageType, Payload, Status, TransportMessage};
use super::method::Method;
use super::registry::Registry;
use super::sclient::{HostSettings, SettingsClient};
use super::stack::Stack;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, fork, pipe, read, write, ForkResult, Pid};
use signal_hook;
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How long the parent blocks on its bus recv when there's nothing
/// else to do -- just long enough to notice signals promptly.
const SUPERVISOR_WAKE_TIME: i32 = 2;
/// A drone writes this byte to its status pipe once it's free to
/// take another dispatch.
const STATUS_AVAILABLE: u8 = b'A';

/// One forked child, as seen by the parent.
struct DroneHandle {
    pid: Pid,
    data_write_fd: RawFd,
    status_read_fd: RawFd,
}

impl Drop for DroneHandle {
    fn drop(&mut self) {
        let _ = close(self.data_write_fd);
        let _ = close(self.status_read_fd);
    }
}

/// Write `text` to `fd` followed by a NUL frame terminator.
fn write_framed(fd: RawFd, text: &str) -> Result<(), String> {
    let mut data = text.as_bytes().to_vec();
    data.push(0);

    let mut written = 0;
    while written < data.len() {
        match write(fd, &data[written..]) {
            Ok(n) => written += n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(format!("pipe write failed: {e}")),
        }
    }

    Ok(())
}

/// Read one NUL-terminated frame from `fd`. Returns `Ok(None)` on EOF
/// (the peer closed its write end).
fn read_framed(fd: RawFd) -> Result<Option<Vec<u8>>, String> {
    let mut acc: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        if let Some(pos) = acc.iter().position(|&b| b == 0) {
            return Ok(Some(acc[..pos].to_vec()));
        }

        match read(fd, &mut buf) {
            Ok(0) => return Ok(None),
            Ok(n) => acc.extend_from_slice(&buf[..n]),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(format!("pipe read failed: {e}")),
        }
    }
}

/// A drone runs unrelated application code; it shouldn't inherit the
/// parent's dispositions for signals the parent uses to manage it.
fn reset_inherited_signal_handlers() {
    use nix::sys::signal::{sigaction, SigAction, SigHandler, SaFlags, SigSet, Signal};

    let default = unsafe {
        SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty())
    };

    for sig in [
        Signal::SIGCHLD,
        Signal::SIGUSR1,
        Signal::SIGUSR2,
        Signal::SIGHUP,
        Signal::SIGTERM,
        Signal::SIGINT,
        Signal::SIGQUIT,
    ] {
        if let Err(e) = unsafe { sigaction(sig, &default) } {
            log::warn!("drone could not reset {sig:?} to default: {e}");
        }
    }
}

fn write_status_byte(fd: RawFd) -> Result<(), String> {
    let buf = [STATUS_AVAILABLE];
    loop {
        match write(fd, &buf) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(format!("status pipe write failed: {e}")),
        }
    }
}

pub struct Supervisor {
    service: String,
    application: Box<dyn app::Application>,
    config: Arc<conf::Config>,
    app_config: AppConfig,
    client: Client,
    host_settings: Arc<HostSettings>,
    methods: Arc<HashMap<String, Method>>,

    /// Idle drones, most-recently-used at the front so a warm process
    /// (hot caches, pooled connections) is preferred over a cold one.
    idle: VecDeque<DroneHandle>,
    /// Drones currently working a request; polled for availability.
    active: Vec<DroneHandle>,
    /// Inbound messages waiting for a free drone.
    backlog: VecDeque<TransportMessage>,

    /// Set by SIGTERM: drain active drones, then kill everyone.
    stopping: Arc<AtomicBool>,
    /// Set by SIGINT/SIGQUIT: kill everyone immediately.
    stopping_now: Arc<AtomicBool>,
    child_dead: Arc<AtomicBool>,
    unregister_requested: Arc<AtomicBool>,
    register_requested: Arc<AtomicBool>,
    hangup_requested: Arc<AtomicBool>,

    /// Active drones that were mid-request when SIGHUP arrived; killed
    /// instead of recycled the next time they report available.
    sighup_pending: std::collections::HashSet<Pid>,
}

impl Supervisor {
    pub fn start(application: Box<dyn app::Application>) -> Result<(), String> {
        let service = application.name().to_string();

        let config = init::init()?.into_shared();

        let client = Client::connect(config.clone())
            .map_err(|e| format!("Supervisor cannot connect to bus: {e}"))?;

        let host_settings = SettingsClient::get_host_settings(&client, false)
            .map_err(|e| format!("Cannot fetch host settings: {e}"))?
            .into_shared();

        let app_config = config.app_config(&service);

        let mut registry = Registry::new(&service);
        registry.register_application(
            &mut *application,
            client.clone(),
            config.clone(),
            host_settings.clone(),
        )?;

        let methods = registry.into_shared();

        let mut supervisor = Supervisor {
            service,
            application,
            config,
            app_config,
            client,
            host_settings,
            methods,
            idle: VecDeque::new(),
            active: Vec::new(),
            backlog: VecDeque::new(),
            stopping: Arc::new(AtomicBool::new(false)),
            stopping_now: Arc::new(AtomicBool::new(false)),
            child_dead: Arc::new(AtomicBool::new(false)),
            unregister_requested: Arc::new(AtomicBool::new(false)),
            register_requested: Arc::new(AtomicBool::new(false)),
            hangup_requested: Arc::new(AtomicBool::new(false)),
            sighup_pending: std::collections::HashSet::new(),
        };

        supervisor.listen()
    }

    fn hosting_domains(&self) -> Vec<String> {
        self.config
            .routers()
            .iter()
            .map(|r| r.client().domain().name().to_string())
            .collect()
    }

    fn register_routers(&mut self) -> Result<(), String> {
        for domain in self.hosting_domains() {
            log::info!("prefork: registering {} with router at {domain}", self.service);
            self.client
                .send_router_command(&domain, "register", Some(&self.service), false)?;
        }
        Ok(())
    }

    fn unregister_routers(&mut self) -> Result<(), String> {
        for domain in self.hosting_domains() {
            log::info!("prefork: un-registering {} with router at {domain}", self.service);
            self.client
                .send_router_command(&domain, "unregister", Some(&self.service), false)?;
        }
        Ok(())
    }

    fn setup_signal_handlers(&self) -> Result<(), String> {
        for (sig, flag) in [
            (signal_hook::consts::SIGTERM, &self.stopping),
            (signal_hook::consts::SIGINT, &self.stopping_now),
            (signal_hook::consts::SIGQUIT, &self.stopping_now),
            (signal_hook::consts::SIGCHLD, &self.child_dead),
            (signal_hook::consts::SIGUSR1, &self.unregister_requested),
            (signal_hook::consts::SIGUSR2, &self.register_requested),
            (signal_hook::consts::SIGHUP, &self.hangup_requested),
        ] {
            signal_hook::flag::register(sig, flag.clone())
                .map_err(|e| format!("Cannot register signal handler: {e}"))?;
        }
        Ok(())
    }

    pub fn listen(&mut self) -> Result<(), String> {
        self.setup_signal_handlers()?;
        self.register_routers()?;

        while self.idle.len() < self.app_config.min_children() {
            self.spawn_drone()?;
        }

        loop {
            if self.stopping_now.load(Ordering::Relaxed) {
                log::info!("prefork supervisor received SIGINT/SIGQUIT, exiting immediately");
                break;
            }

            if self.stopping.load(Ordering::Relaxed) && self.active.is_empty() {
                log::info!("prefork supervisor drained, exiting on SIGTERM");
                break;
            }

            if self.child_dead.swap(false, Ordering::Relaxed) {
                self.reap_children()?;
            }

            if self.unregister_requested.swap(false, Ordering::Relaxed) {
                log::info!("prefork supervisor un-registering on SIGUSR1");
                self.unregister_routers().ok();
            }

            if self.register_requested.swap(false, Ordering::Relaxed) {
                log::info!("prefork supervisor re-registering on SIGUSR2");
                self.register_routers()?;
            }

            if self.hangup_requested.swap(false, Ordering::Relaxed) {
                log::info!("prefork supervisor recycling drones on SIGHUP");
                self.sighup_pending
                    .extend(self.active.iter().map(|d| d.pid));
                for drone in self.idle.drain(..) {
                    let _ = nix::sys::signal::kill(drone.pid, nix::sys::signal::Signal::SIGKILL);
                }
            }

            if self.stopping.load(Ordering::Relaxed) {
                // Draining: stop taking on new work, just wait (with a
                // real timeout, so this doesn't busy-spin) for the
                // drones we already dispatched to finish.
                self.poll_active_drones(200)?;
                continue;
            }

            self.poll_active_drones(0)?;

            let timeout = if self.backlog.is_empty() {
                SUPERVISOR_WAKE_TIME
            } else {
                0
            };

            let recv = self
                .client
                .singleton()
                .borrow_mut()
                .bus_mut()
                .recv(timeout, None);

            match recv {
                Ok(Some(tmsg)) => self.accept(tmsg)?,
                Ok(None) => {}
                Err(e) => {
                    log::error!("prefork supervisor bus error: {e}");
                }
            }

            self.dispatch_backlog()?;
        }

        self.unregister_routers().ok();
        self.shutdown();

        Ok(())
    }

    /// Queue an inbound message, or reject it immediately if the
    /// backlog is already at its configured maximum.
    fn accept(&mut self, tmsg: TransportMessage) -> Result<(), String> {
        if tmsg.error().is_some() {
            log::warn!("prefork supervisor received a wire-level error, discarding");
            return Ok(());
        }

        if self.backlog.len() >= self.app_config.max_backlog_queue() {
            log::warn!(
                "{} backlog queue full ({}); rejecting request",
                self.service,
                self.backlog.len()
            );
            return self.reply_service_unavailable(&tmsg);
        }

        self.backlog.push_back(tmsg);
        Ok(())
    }

    fn reply_service_unavailable(&mut self, tmsg: &TransportMessage) -> Result<(), String> {
        let msg = Message::new(
            MessageType::Status,
            0,
            Payload::Status(Status::new(
                MessageStatus::ServiceUnavailable,
                "Service Unavailable",
                "osrfStatus",
            )),
        );

        let reply = TransportMessage::with_body(
            tmsg.sender(),
            self.client.address().as_str(),
            tmsg.thread(),
            msg,
        );

        let domain = BusAddress::from_str(tmsg.sender())?.domain().to_string();

        self.client
            .singleton()
            .borrow_mut()
            .get_domain_bus(&domain)?
            .send(&reply)
    }

    /// Hand off as much of the backlog as we have capacity for: to an
    /// idle drone if one is free, otherwise by forking a new one (up
    /// to `max_children`).
    fn dispatch_backlog(&mut self) -> Result<(), String> {
        while let Some(tmsg) = self.backlog.front() {
            if let Some(mut drone) = self.idle.pop_front() {
                let tmsg = self.backlog.pop_front().unwrap();
                write_framed(drone.data_write_fd, &tmsg.to_wire())?;
                self.active.push(drone);
                continue;
            }

            let total = self.idle.len() + self.active.len();
            if total < self.app_config.max_children() {
                self.spawn_drone()?;
                continue;
            }

            log::trace!(
                "{} at max_children ({}) with {} queued; waiting for capacity",
                self.service,
                self.app_config.max_children(),
                self.backlog.len()
            );
            let _ = tmsg;
            break;
        }

        Ok(())
    }

    /// Check every busy drone's status pipe for up to `timeout_ms`; any
    /// that report available move back to the front of the idle list.
    fn poll_active_drones(&mut self, timeout_ms: i32) -> Result<(), String> {
        if self.active.is_empty() {
            return Ok(());
        }

        let mut fds: Vec<PollFd> = self
            .active
            .iter()
            .map(|d| PollFd::new(d.status_read_fd, PollFlags::POLLIN))
            .collect();

        match poll(&mut fds, timeout_ms) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(format!("poll() on drone status pipes failed: {e}")),
        }

        let mut ready_idx = Vec::new();
        for (i, pfd) in fds.iter().enumerate() {
            if let Some(revents) = pfd.revents() {
                if revents.contains(PollFlags::POLLIN) {
                    ready_idx.push(i);
                }
            }
        }

        // Remove from the back forward so earlier indices stay valid.
        for i in ready_idx.into_iter().rev() {
            let drone = self.active.remove(i);

            let mut buf = [0u8; 1];
            match read(drone.status_read_fd, &mut buf) {
                Ok(0) => {
                    // Drone closed its status pipe -- it's exiting on
                    // its own; let SIGCHLD handling clean it up.
                    self.active.push(drone);
                    continue;
                }
                Ok(_) => {}
                Err(Errno::EINTR) => {}
                Err(e) => {
                    log::warn!("error reading drone status pipe: {e}");
                }
            }

            if self.sighup_pending.remove(&drone.pid) {
                let _ = nix::sys::signal::kill(drone.pid, nix::sys::signal::Signal::SIGKILL);
                continue;
            }

            self.idle.push_front(drone);
        }

        Ok(())
    }

    fn reap_children(&mut self) -> Result<(), String> {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                    log::debug!("{} reaped drone {pid}", self.service);
                    self.idle.retain(|d| d.pid != pid);
                    self.active.retain(|d| d.pid != pid);
                    self.sighup_pending.remove(&pid);
                }
                Ok(_) => continue,
                Err(e) => {
                    log::error!("waitpid() error: {e}");
                    break;
                }
            }
        }

        let shutting_down =
            self.stopping.load(Ordering::Relaxed) || self.stopping_now.load(Ordering::Relaxed);

        while !shutting_down
            && self.idle.len() + self.active.len() < self.app_config.min_children()
        {
            self.spawn_drone()?;
        }

        Ok(())
    }

    /// Fork a new drone. The parent gets back a handle in the idle
    /// list; the child runs its dedicated loop and never returns.
    fn spawn_drone(&mut self) -> Result<(), String> {
        let (data_read, data_write) =
            pipe().map_err(|e| format!("cannot create data pipe: {e}"))?;
        let (status_read, status_write) =
            pipe().map_err(|e| format!("cannot create status pipe: {e}"))?;

        // Safety: the parent process is single-threaded at this point
        // in its lifecycle (signal handling aside), so fork() is sound.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child, .. }) => {
                close(data_read).ok();
                close(status_write).ok();

                self.idle.push_front(DroneHandle {
                    pid: child,
                    data_write_fd: data_write,
                    status_read_fd: status_read,
                });

                Ok(())
            }
            Ok(ForkResult::Child) => {
                close(data_write).ok();
                close(status_read).ok();
                self.run_drone(data_read, status_write);
                unreachable!("run_drone() always exits the process");
            }
            Err(e) => Err(format!("fork() failed: {e}")),
        }
    }

    /// Drone body. Runs entirely in the forked child and exits the
    /// process when it's done (after `max_requests` or on error).
    ///
    /// Note: the child inherits the parent's primary bus connection as
    /// an open file descriptor, but never touches it -- it connects
    /// its own Client below. That socket closes along with the rest
    /// of the inherited state when this process exits.
    fn run_drone(&mut self, data_read: RawFd, status_write: RawFd) -> ! {
        reset_inherited_signal_handlers();

        let client = match Client::connect(self.config.clone()) {
            Ok(c) => c,
            Err(e) => {
                log::error!("drone cannot connect to bus: {e}. Exiting");
                process::exit(1);
            }
        };

        let mut appworker = (self.application.worker_factory())();

        if let Err(e) = appworker.absorb_env(
            client.clone(),
            self.config.clone(),
            self.host_settings.clone(),
            self.methods.clone(),
            self.application.env(),
        ) {
            log::error!("drone cannot absorb environment: {e}. Exiting");
            process::exit(1);
        }

        if let Err(e) = appworker.worker_start() {
            log::error!("drone worker_start() failed: {e}. Exiting");
            process::exit(1);
        }

        let mut stack = Stack::new(
            &self.service,
            client.clone(),
            self.methods.clone(),
            self.config.log_protect().clone(),
        );

        let max_requests = self.app_config.max_requests();
        let keepalive = self.app_config.keepalive();
        let mut requests_handled = 0usize;

        while requests_handled < max_requests {
            let body = match read_framed(data_read) {
                Ok(Some(b)) => b,
                Ok(None) => {
                    log::debug!("drone data pipe closed by parent, exiting");
                    break;
                }
                Err(e) => {
                    log::error!("drone pipe read error: {e}. Exiting");
                    break;
                }
            };

            let text = String::from_utf8_lossy(&body).into_owned();

            let tmsg = match TransportMessage::from_wire(&text) {
                Ok(m) => m,
                Err(e) => {
                    log::error!("drone received an unparseable dispatch: {e}");
                    continue;
                }
            };

            let thread = tmsg.thread().to_string();

            if let Err(e) = stack.process_message(&mut appworker, tmsg) {
                log::error!("drone dispatch error: {e}");
            }

            while stack.has_active_session() {
                match client.singleton().borrow_mut().bus_mut().recv(keepalive, None) {
                    Ok(Some(next)) => {
                        if let Err(e) = stack.process_message(&mut appworker, next) {
                            log::error!("drone dispatch error: {e}");
                        }
                    }
                    Ok(None) => {
                        log::warn!("drone keepalive timeout on thread {thread}, closing");
                        if let Err(e) = appworker.keepalive_timeout() {
                            log::error!("keepalive_timeout() hook failed: {e}");
                        }
                        if let Err(e) = stack.send_timeout(&thread) {
                            log::error!("failed to send STATUS/TIMEOUT on thread {thread}: {e}");
                        }
                        break;
                    }
                    Err(e) => {
                        log::error!("drone bus error during keepalive: {e}. Exiting");
                        appworker.worker_end().ok();
                        process::exit(1);
                    }
                }
            }

            requests_handled += 1;

            if write_status_byte(status_write).is_err() {
                log::debug!("drone status pipe closed by parent, exiting");
                break;
            }
        }

        appworker.worker_end().ok();
        process::exit(0);
    }

    /// Wait for active drones to wind down, then SIGTERM anything
    /// still outstanding and reap everyone before the process exits.
    fn shutdown(&mut self) {
        for drone in self.idle.iter().chain(self.active.iter()) {
            let _ = nix::sys::signal::kill(drone.pid, nix::sys::signal::Signal::SIGTERM);
        }

        for drone in self.idle.drain(..).chain(self.active.drain(..)) {
            let _ = waitpid(drone.pid, None);
        }
    }
}
