mod config;
mod machine;
mod service;

pub use config::{Mode, TickStrategy, TimerConfig};
pub use machine::{now_ms, ResetScope, SessionMachine, SessionState};
pub use service::{SessionHandle, SessionService, StartOutcome};
