//! Gateway: the Unix-socket control plane for allowlisted command execution.
//!
//! Newline-delimited JSON over a mode-0600 socket. Requests are
//! `{ "type": "req", "id", "method", "params" }`; a connection may carry any
//! number of sequential request/response pairs.

mod protocol;
mod server;

pub use protocol::{RpcRequest, RpcResponse, RunParams, RunResult};
pub use server::{run_gateway, DENIED_EXIT_CODE, DENIED_OUTPUT};
