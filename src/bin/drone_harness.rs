//! Minimal demo application wired up to the Prefork Supervisor.
//!
//! Registers a single echo-style method and starts the supervisor
//! loop. Useful for exercising the drone pool end-to-end against a
//! running bus and router.

use opensrf::app::{Application, ApplicationEnv, ApplicationWorker};
use opensrf::client::Client;
use opensrf::conf;
use opensrf::message;
use opensrf::method::{Method, ParamCount};
use opensrf::sclient::HostSettings;
use opensrf::session::ServerSession;
use opensrf::Supervisor;
use std::any::Any;
use std::sync::Arc;

const APPNAME: &str = "opensrf.drone-harness";

#[derive(Clone)]
struct HarnessEnv;

impl ApplicationEnv for HarnessEnv {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct HarnessApplication;

impl Application for HarnessApplication {
    fn name(&self) -> &str {
        APPNAME
    }

    fn init(
        &mut self,
        _client: Client,
        _config: Arc<conf::Config>,
        _host_settings: Arc<HostSettings>,
    ) -> Result<(), String> {
        Ok(())
    }

    fn register_methods(
        &self,
        _client: Client,
        _config: Arc<conf::Config>,
        _host_settings: Arc<HostSettings>,
    ) -> Result<Vec<Method>, String> {
        Ok(vec![Method::new(
            "opensrf.drone-harness.reverse",
            ParamCount::Exactly(1),
            harness_reverse,
        )])
    }

    fn worker_factory(&self) -> fn() -> Box<dyn ApplicationWorker> {
        || Box::new(HarnessWorker::default())
    }

    fn env(&self) -> Box<dyn ApplicationEnv> {
        Box::new(HarnessEnv)
    }
}

#[derive(Default)]
struct HarnessWorker {
    methods: Arc<std::collections::HashMap<String, Method>>,
}

impl ApplicationWorker for HarnessWorker {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn absorb_env(
        &mut self,
        _client: Client,
        _config: Arc<conf::Config>,
        _host_settings: Arc<HostSettings>,
        methods: Arc<std::collections::HashMap<String, Method>>,
        _env: Box<dyn ApplicationEnv>,
    ) -> Result<(), String> {
        self.methods = methods;
        Ok(())
    }

    fn methods(&self) -> &Arc<std::collections::HashMap<String, Method>> {
        &self.methods
    }

    fn worker_start(&mut self) -> Result<(), String> {
        log::info!("{APPNAME} drone starting");
        Ok(())
    }

    fn worker_idle_wake(&mut self, _connected: bool) -> Result<(), String> {
        Ok(())
    }

    fn worker_end(&mut self) -> Result<(), String> {
        log::info!("{APPNAME} drone exiting");
        Ok(())
    }

    fn start_session(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn keepalive_timeout(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn api_call_error(&mut self, request: &message::Method, error: &str) {
        log::error!("{} failed: {error}", request.method());
    }
}

fn harness_reverse(
    _worker: &mut Box<dyn ApplicationWorker>,
    session: &mut ServerSession,
    call: &message::Method,
) -> i32 {
    let text = match call.params().first().and_then(|p| p.as_str()) {
        Some(t) => t,
        None => return -1,
    };

    let reversed: String = text.chars().rev().collect();

    if let Err(e) = session.respond(json::from(reversed)) {
        log::error!("{session} harness_reverse failed to respond: {e}");
        return -1;
    }

    1
}

fn main() -> Result<(), String> {
    Supervisor::start(Box::new(HarnessApplication))
}
