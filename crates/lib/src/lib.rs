//! postern core library: command allowlist, execution, the Unix-socket
//! gateway, and the client used by the CLI.

pub mod allowlist;
pub mod client;
pub mod config;
pub mod exec;
pub mod gateway;
pub mod init;
pub mod socket;
