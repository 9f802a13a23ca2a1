// redraft-daemon library entry point.

pub mod agent;
pub mod config;
pub mod history;
pub mod rpc;
pub mod runtime;
pub mod security;
pub mod session;
pub mod startup;
pub mod watcher;
