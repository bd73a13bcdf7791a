//! Shared types and contracts for cirrus crates
//!
//! Holds the pieces every component agrees on:
//! - `ApiError`: the cloneable failure of a remote call
//! - `Priority`: scheduling bands used by the request queue
//! - `OptimizationStrategy`: the tunable-parameter bundle
//! - `Tunable`: the contract components implement to receive new strategies
//! - `ResourceEvent`: signals broadcast by the optimizer
//!
//! This crate depends on no other cirrus crate, so every crate can depend on it.

pub mod error;
pub mod event;
pub mod logging;
pub mod priority;
pub mod strategy;
pub mod tunable;

pub use error::{ApiError, ApiErrorKind, TuneError};
pub use event::ResourceEvent;
pub use priority::Priority;
pub use strategy::OptimizationStrategy;
pub use tunable::Tunable;
