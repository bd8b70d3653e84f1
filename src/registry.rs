//! Application Registry & Method Framing (§4E): loading an
//! application's methods, the six built-in system methods, and the
//! dispatch entry point that drives a method's handler.

use super::app;
use super::client::Client;
use super::conf;
use super::message;
use super::method::{Method, MethodOptions, ParamCount};
use super::sclient;
use super::session::ServerSession;
use super::util;
use std::collections::HashMap;
use std::sync::Arc;

/// Owns the set of methods a service exposes, including the
/// automatically-registered system methods and streaming/atomic twins.
pub struct Registry {
    service: String,
    methods: HashMap<String, Method>,
}

impl Registry {
    pub fn new(service: &str) -> Self {
        let mut reg = Registry {
            service: service.to_string(),
            methods: HashMap::new(),
        };
        reg.register_system_methods();
        reg
    }

    /// Run the application's init() hook, pull its methods, and fold
    /// them into the registry alongside the system methods.
    pub fn register_application(
        &mut self,
        application: &mut dyn app::Application,
        client: Client,
        config: Arc<conf::Config>,
        host_settings: Arc<sclient::HostSettings>,
    ) -> Result<(), String> {
        application.init(client.clone(), config.clone(), host_settings.clone())?;

        let methods = application.register_methods(client, config, host_settings)?;

        for method in methods {
            self.register_method(method);
        }

        Ok(())
    }

    /// Install one method, plus its ATOMIC twin if it's STREAMING.
    pub fn register_method(&mut self, method: Method) {
        if method.options().streaming && !method.options().atomic {
            let mut atomic = method.clone();
            atomic.name = method.atomic_name();
            atomic.options.atomic = true;
            log::debug!("registering atomic twin {}", atomic.name());
            self.methods.insert(atomic.name().to_string(), atomic);
        }

        log::debug!("registering method {}", method.name());
        self.methods.insert(method.name().to_string(), method);
    }

    fn register_system_methods(&mut self) {
        let sys_opts = MethodOptions {
            system: true,
            streaming: true,
            ..Default::default()
        };

        self.register_method(
            Method::new(
                "opensrf.system.echo",
                ParamCount::Any,
                sys_echo,
            )
            .with_options(sys_opts),
        );

        self.register_method(
            Method::new(
                "opensrf.system.method",
                ParamCount::Range(0, 1),
                sys_introspect,
            )
            .with_options(sys_opts),
        );

        self.register_method(
            Method::new(
                "opensrf.system.method.all",
                ParamCount::Zero,
                sys_introspect_all,
            )
            .with_options(sys_opts),
        );
    }

    pub fn methods(&self) -> &HashMap<String, Method> {
        &self.methods
    }

    pub fn into_shared(self) -> Arc<HashMap<String, Method>> {
        Arc::new(self.methods)
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

/// Resolve a method by name, falling back to the root of an `.atomic`
/// twin and flagging the session to buffer responses atomically.
pub fn find_method<'a>(
    methods: &'a HashMap<String, Method>,
    api_name: &str,
    session: &mut ServerSession,
) -> Option<&'a Method> {
    if let Some(m) = methods.get(api_name) {
        if m.options().atomic {
            session.new_atomic_resp_queue();
        }
        return Some(m);
    }
    None
}

/// Run one method call through to completion: validates param count,
/// logs the call (honoring the redaction deny-list), invokes the
/// handler, and translates its integer return into the terminal
/// STATUS per §4E.
pub fn run_method(
    methods: &HashMap<String, Method>,
    log_protect: &[String],
    appworker: &mut Box<dyn app::ApplicationWorker>,
    session: &mut ServerSession,
    mut call: message::Method,
) -> Result<(), String> {
    let api_name = call.method().to_string();

    let method = match find_method(methods, &api_name, session) {
        Some(m) => m.clone(),
        None => {
            return session.reply_not_found(&api_name);
        }
    };

    let params = call.params();
    let param_count = params.len() as u8;

    if !ParamCount::matches(method.param_count(), param_count) {
        return session.reply_not_allowed(&format!(
            "Invalid param count sent: method={} sent={} needed={}",
            api_name,
            param_count,
            method.param_count()
        ));
    }

    let params_json = json::from(call.params().clone());
    let log_params = util::stringify_params(&api_name, &params_json, log_protect);
    log::info!("CALL: {} {}", api_name, log_params);

    if method.bufsize() > 0 {
        session.set_bufsize(method.bufsize());
    }

    let unpacked: Vec<json::JsonValue> = call
        .take_params()
        .into_iter()
        .map(|p| session.client().unpack(p))
        .collect();
    call.set_params(unpacked);

    let result = (method.handler())(appworker, session, &call);

    if result < 0 {
        let msg = format!("{} method {} failed", session, api_name);
        log::error!("{msg}");
        appworker.api_call_error(&call, &msg);
        return session.reply_server_error(&msg);
    }

    if result > 0 && !session.responded_complete() {
        return session.send_complete();
    }

    Ok(())
}

fn sys_echo(
    _worker: &mut Box<dyn app::ApplicationWorker>,
    session: &mut ServerSession,
    call: &message::Method,
) -> i32 {
    for p in call.params() {
        if let Err(e) = session.respond(p.clone()) {
            log::error!("{session} echo failed to respond: {e}");
            return -1;
        }
    }
    1
}

fn sys_introspect(
    worker: &mut Box<dyn app::ApplicationWorker>,
    session: &mut ServerSession,
    call: &message::Method,
) -> i32 {
    let prefix = call.params().first().and_then(|p| p.as_str()).map(String::from);
    introspect(worker, session, prefix.as_deref())
}

fn sys_introspect_all(
    worker: &mut Box<dyn app::ApplicationWorker>,
    session: &mut ServerSession,
    _call: &message::Method,
) -> i32 {
    introspect(worker, session, None)
}

fn introspect(
    worker: &mut Box<dyn app::ApplicationWorker>,
    session: &mut ServerSession,
    prefix: Option<&str>,
) -> i32 {
    let methods = worker.methods().clone();
    let mut names: Vec<&String> = methods.keys().collect();
    names.sort();

    let service = session.service().to_string();

    for name in names {
        if let Some(p) = prefix {
            if !p.is_empty() && !name.starts_with(p) {
                continue;
            }
        }

        let m = &methods[name];

        let obj = json::object! {
            api_name: json::from(m.name()),
            method: json::from(m.name()),
            service: json::from(service.clone()),
            notes: json::from(""),
            argc: json::from(format!("{}", m.param_count())),
            sysmethod: json::from(m.options().system),
            atomic: json::from(m.options().atomic),
            cachable: json::from(m.options().cachable),
        };

        if let Err(e) = session.respond(obj) {
            log::error!("{session} introspect failed to respond: {e}");
            return -1;
        }
    }

    1
}
