//! Host process protocol: JSON lines over stdin/stdout or the control socket.

pub mod contract;
pub mod control;
pub mod router;
pub mod stdio;
