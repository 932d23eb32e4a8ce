//! # Practimer Core Library
//!
//! Core business logic for the Practimer practice/pomodoro timer. It
//! implements a CLI-first philosophy where all operations are available via
//! a standalone CLI binary, with any GUI being a thin layer over the same
//! core library.
//!
//! ## Architecture
//!
//! - **Session State Machine**: a wall-clock-based state machine owning
//!   mode, remaining time and iteration count; drift-corrected against the
//!   segment deadline so late or missed ticks never lose time
//! - **Background Tick Engine**: a dedicated tokio task delivering
//!   1-second, epoch-tagged ticks independent of the driving context
//! - **Session Service**: a serialized command queue — a single task owns
//!   the machine and is its only writer
//! - **Storage**: SQLite-based session history and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`SessionMachine`]: core timer state machine
//! - [`SessionService`]: serialized async front for the machine
//! - [`Ticker`]: background tick engine
//! - [`Database`]: session history and statistics persistence
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod notify;
pub mod session;
pub mod storage;
pub mod ticker;

pub use error::{AudioResumeError, ConfigError, CoreError, DatabaseError};
pub use events::{Event, SessionRecord};
pub use notify::{Notifier, NullNotifier};
pub use session::{
    now_ms, Mode, ResetScope, SessionHandle, SessionMachine, SessionService, SessionState,
    StartOutcome, TickStrategy, TimerConfig,
};
pub use storage::{Config, Database, NullSink, SessionLog, SessionSink, Stats};
pub use ticker::{Ticker, TickerControl, TickerSignal};
