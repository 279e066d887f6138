//! Distributed agent dispatcher: fans a query out to one or more remote
//! search-agent mirrors, tracks per-host health, and retries against
//! alternate replicas under a wall-clock deadline.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;
extern crate mio;
extern crate rand;

pub mod agent;
pub mod config;
pub mod connection;
pub mod dashboard;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod mirror;
pub mod pool;
pub mod poller;
pub mod protocol;
pub mod worker;

pub use crate::connection::AgentConnection;
pub use crate::config::GlobalConfig;
pub use crate::dispatch::Dispatcher;
pub use crate::error::{Error, Result};
pub use crate::mirror::MirrorGroup;
