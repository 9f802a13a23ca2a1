// Consistent exit codes for the redraft CLI.
//
//   0  = success (including a waited session that closed or was superseded)
//   1  = general error, or `open --wait` timed out
//   2  = usage/argument error
//   10 = daemon not reachable
//   12 = conflict: disk changed under unsaved edits
//   13 = rewrite agent failed

use std::process;

use redraft_common::protocol::jsonrpc::{INVALID_PARAMS, SESSION_MISMATCH};

use crate::client::{DaemonRpcError, DaemonUnavailable};

/// Agent failures occupy this band of server-error codes.
const AGENT_CODES: std::ops::RangeInclusive<i32> = -32015..=-32010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    DaemonDown = 10,
    Conflict = 12,
    Agent = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<DaemonUnavailable>().is_some() {
                return Self::DaemonDown;
            }
            if let Some(rpc_err) = cause.downcast_ref::<DaemonRpcError>() {
                return Self::from_rpc_code(rpc_err.code);
            }
        }
        Self::Error
    }

    pub fn from_rpc_code(code: i32) -> Self {
        match code {
            INVALID_PARAMS | SESSION_MISMATCH => Self::Usage,
            code if AGENT_CODES.contains(&code) => Self::Agent,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
