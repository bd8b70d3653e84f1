use super::app;
use super::message;
use super::session;
use std::fmt;

/// A registered method's handler returns an integer per the dispatch
/// discipline: negative means an unhandled exception (the dispatcher
/// emits STATUS/INTERNALSERVERERROR), zero means the handler already
/// emitted its own terminal STATUS, and positive tells the dispatcher
/// to emit the terminal STATUS/COMPLETE itself.
pub type MethodHandler = fn(
    &mut Box<dyn app::ApplicationWorker>,
    &mut session::ServerSession,
    &message::Method,
) -> i32;

#[derive(Debug, Copy, Clone)]
pub enum ParamCount {
    Any,
    Zero,
    Exactly(u8),
    AtLeast(u8),
    Range(u8, u8), // Inclusive
}

impl ParamCount {
    /// Returns true if the number of params provided matches the
    /// number specified by the ParamCount enum.
    ///
    /// ```
    /// use opensrf::method::ParamCount;
    /// assert!(ParamCount::matches(&ParamCount::Any, 0));
    /// assert!(!ParamCount::matches(&ParamCount::Exactly(1), 10));
    /// assert!(ParamCount::matches(&ParamCount::AtLeast(10), 20));
    /// assert!(!ParamCount::matches(&ParamCount::AtLeast(20), 10));
    /// assert!(ParamCount::matches(&ParamCount::Range(4, 6), 5));
    /// ```
    pub fn matches(pc: &ParamCount, count: u8) -> bool {
        match *pc {
            ParamCount::Any => true,
            ParamCount::Zero => count == 0,
            ParamCount::Exactly(c) => count == c,
            ParamCount::AtLeast(c) => count >= c,
            ParamCount::Range(s, e) => s <= count && e >= count,
        }
    }
}

impl fmt::Display for ParamCount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ParamCount::Any => write!(f, "Any"),
            ParamCount::Zero => write!(f, "Zero"),
            ParamCount::Exactly(c) => write!(f, "Exactly {}", c),
            ParamCount::AtLeast(c) => write!(f, "AtLeast {}", c),
            ParamCount::Range(s, e) => write!(f, "Between {}..{}", s, e),
        }
    }
}

/// Per-method option bits from the registration call.
#[derive(Debug, Copy, Clone, Default)]
pub struct MethodOptions {
    /// May emit more than one RESULT; registering a STREAMING method
    /// also installs an ATOMIC twin named `<method>.atomic`.
    pub streaming: bool,
    /// This *is* the atomic twin of a streaming method: responses are
    /// buffered and delivered as one RESULT array at completion.
    pub atomic: bool,
    /// Implemented in-process by the registry rather than via the
    /// loaded application module.
    pub system: bool,
    /// Advisory hint for an external caching layer.
    pub cachable: bool,
}

pub const DEFAULT_BUFSIZE: usize = 10;

/// A variation of a Method that can be used when creating static
/// method definitions.
#[derive(Clone)]
pub struct MethodDef {
    pub name: &'static str,
    pub param_count: ParamCount,
    pub handler: MethodHandler,
    pub options: MethodOptions,
}

impl MethodDef {
    pub fn name(&self) -> &str {
        self.name
    }
    pub fn param_count(&self) -> &ParamCount {
        &self.param_count
    }
    pub fn handler(&self) -> &MethodHandler {
        &self.handler
    }
    pub fn options(&self) -> &MethodOptions {
        &self.options
    }
}

#[derive(Clone)]
pub struct Method {
    pub name: String,
    pub param_count: ParamCount,
    pub handler: MethodHandler,
    pub options: MethodOptions,
    /// Non-atomic response batch size for this method; 0 means use
    /// the session default.
    pub bufsize: usize,
}

impl Method {
    pub fn new(name: &str, param_count: ParamCount, handler: MethodHandler) -> Method {
        Method {
            handler,
            param_count,
            name: name.to_string(),
            options: MethodOptions::default(),
            bufsize: DEFAULT_BUFSIZE,
        }
    }

    pub fn from_def(def: &MethodDef) -> Method {
        Method {
            handler: def.handler,
            param_count: def.param_count,
            name: def.name.to_string(),
            options: def.options,
            bufsize: DEFAULT_BUFSIZE,
        }
    }

    pub fn with_options(mut self, options: MethodOptions) -> Method {
        self.options = options;
        self
    }

    pub fn with_bufsize(mut self, bufsize: usize) -> Method {
        self.bufsize = bufsize;
        self
    }

    /// The name of this method's streaming twin, e.g. "foo.atomic".
    pub fn atomic_name(&self) -> String {
        format!("{}.atomic", self.name)
    }

    pub fn param_count(&self) -> &ParamCount {
        &self.param_count
    }

    pub fn handler(&self) -> MethodHandler {
        self.handler
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &MethodOptions {
        &self.options
    }

    pub fn bufsize(&self) -> usize {
        self.bufsize
    }
}
