//! `wick-core`: action orchestration for the wick command-line client.
//!
//! # Architecture
//!
//! ```text
//! CLI input
//!     │  value::coerce / auth::select_auth_method
//!     ▼
//! Action  ──► schedule::run (delay, repeat, concurrency)
//!     │
//!     ▼
//! dyn Session   ← transport::UrlConnector: local::LocalSession or wamp::WampSession
//!     │
//!     ▼
//! render::Printer
//! ```
//!
//! `register` and `subscribe` are long-running: they hand their handler to
//! the session and wait for shutdown, the end of the session, or their own
//! completion condition.

pub mod action;
pub mod auth;
pub mod call;
pub mod config;
pub mod error;
pub mod keygen;
pub mod local;
pub mod publish;
pub mod register;
pub mod render;
pub mod schedule;
pub mod session;
pub mod shell;
pub mod subscribe;
pub mod transport;
pub mod value;
pub mod wamp;

pub use action::Action;
pub use error::{Result, WickError};
pub use session::{Connector, Session};
