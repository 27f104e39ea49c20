//! Reactor-driven engine for many concurrent outbound HTTP(S) transfers.
//!
//! Requests are handed to a libcurl multi driver; a single-threaded
//! readiness loop (mio) feeds it socket and timer events. The caller owns
//! the loop: each [`Engine::poll_once`] runs one non-blocking pass, and
//! [`Engine::drain_completed`] returns requests that finished without a
//! 200/201 response. Successful ones are released as soon as they finish.
//!
//! ```no_run
//! use httpc_engine::{Engine, Request};
//!
//! let mut engine = Engine::new();
//! engine.initialize("epoll")?;
//! engine.submit(Request::get("http://example.com/missing"))?;
//! while engine.active_transfers()? > 0 {
//!     engine.poll_timeout(std::time::Duration::from_millis(10))?;
//! }
//! for done in engine.drain_completed()? {
//!     println!("{} {} {}", done.index, done.response_code, done.error);
//! }
//! engine.shutdown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Unix only: sockets are watched by raw descriptor.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod global;
pub mod reactor;

pub use api::engine::{CompletedRequest, Engine};
pub use api::telemetry::init_tracing;
pub use config::EngineConfig;
pub use engine::form::FormField;
pub use engine::registry::TransferId;
pub use engine::request::Request;
pub use engine::stats::StatsSnapshot;
pub use error::{InitError, NotInitialized, PollError, SubmitError};
