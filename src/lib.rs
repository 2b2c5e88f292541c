//! Share one directory over FTP and HTTP at the same time.
//!
//! The FTP and HTTP servers are started and stopped as a pair by
//! [`lifecycle::LifecycleManager`]; the last working configuration is saved
//! so it can be restored at boot through [`autostart::Autostart`].

pub mod autostart;
pub mod config;
pub mod controller;
pub mod lifecycle;
pub mod listener;
pub mod logging;
pub mod preflight;
pub mod prompt;
