//! Extension-facing command handlers
//!
//! The extension talks to the host over native messaging. `protocol` holds
//! the message shapes, `native_host` the framing, and `recording` the
//! handlers behind each action.

pub mod native_host;
pub mod protocol;
pub mod recording;

pub use protocol::{HostEvent, HostRequest, HostResponse, ProtocolError, RequestEnvelope};
pub use recording::{dispatch, run_host};
