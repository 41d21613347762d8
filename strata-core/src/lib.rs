//! Strata Core
//!
//! This crate provides a synchronous, glitch-free reactive runtime. It
//! implements:
//!
//! - Value cells and derived computations with automatic dependency tracking
//! - Ownership trees with deterministic disposal and cleanup callbacks
//! - Batched writes that commit atomically
//! - Nested scheduling domains ("sub-clocks") with hierarchical time
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - `graph`: arena-backed dependency graph, clocks and pools
//! - `reactive`: the propagation engine and the public construction API
//! - `error`: the error taxonomy shared by both
//!
//! # Example
//!
//! ```rust
//! use strata_core::reactive::{computation, freeze, root, value_cell};
//!
//! root(|| {
//!     let first = value_cell("Ada".to_string());
//!     let last = value_cell("Lovelace".to_string());
//!     let full = computation(move || format!("{} {}", first.get(), last.get()));
//!     assert_eq!(full.get(), "Ada Lovelace");
//!
//!     // Both writes land in one propagation.
//!     freeze(|| {
//!         first.set("Grace".to_string());
//!         last.set("Hopper".to_string());
//!     });
//!     assert_eq!(full.get(), "Grace Hopper");
//! });
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::{ReactiveError, Result};
pub use reactive::{computation, root, value_cell, Computation, Signal};
