//! # Shiftfill Testing Utils
//!
//! Shared testing utilities for the shift backfill dispatcher.
//! This crate provides in-memory doubles for every external collaborator,
//! builders for test data and a few async helpers.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! shiftfill-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the mocks in your tests:
//!
//! ```rust
//! use shiftfill_testing_utils::mocks::*;
//! use shiftfill_testing_utils::builders::*;
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
