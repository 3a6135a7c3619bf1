//! Mailscan helper: CommuniGate Pro content-filter helper backed by an
//! Rspamd-compatible scan daemon.

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod inject;
pub mod listener;
pub mod logging;
pub mod protocol;
pub mod scan;
pub mod worker;

pub use config::HelperConfig;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use listener::{Listener, ListenerExit};
