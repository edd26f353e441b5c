//! PostgreSQL wire protocol engine.
//!
//! The default [`Engine`](crate::engine::Engine) implementation. Speaks
//! protocol v3 directly over TCP with text-format parameters and results.
//!
//! Architecture:
//! - `protocol`: Low-level wire protocol encoding/decoding
//! - `session`: Startup, authentication and the query loops
//! - `config`: Connection URL parsing
//! - `scram`: SCRAM-SHA-256 authentication

pub mod config;
pub mod error;
pub mod protocol;
pub mod scram;
pub mod session;

pub use config::PgConfig;
pub use error::{PgError, PgResult};
pub use session::{PgEngine, PgSession};
