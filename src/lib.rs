pub use client::Client;
pub use conf::Config;
pub use logging::Logger;
pub use prefork::Supervisor;
pub use sclient::SettingsClient;
pub use session::SessionHandle;

pub mod addr;
pub mod app;
pub mod bus;
pub mod classified;
pub mod client;
pub mod conf;
pub mod init;
pub mod logging;
pub mod message;
pub mod method;
pub mod params;
pub mod prefork;
pub mod registry;
pub mod sclient;
pub mod session;
pub mod stack;
pub mod transport;
pub mod util;
pub mod xmpp;
