// Local socket protocol: Content-Length framing + JSON-RPC 2.0 envelopes.

pub mod framing;
pub mod jsonrpc;
pub mod rpc_methods;
