//! # refute
//!
//! A property-based testing engine that searches for inputs falsifying a
//! property and reduces what it finds to a locally minimal counterexample.
//!
//! The engine's distinguishing trait is *where* it shrinks: not on typed
//! values but on the finite stream of 64-bit blocks the values were
//! generated from. Generators annotate the recorded stream with nested,
//! labelled groups marking which spans are structural and which are
//! removable; a single type-agnostic reducer then alternates deleting
//! removable spans with minimizing individual blocks, replaying the
//! property against each candidate buffer to check the original failure
//! still reproduces. One reducer serves every generator, however
//! composite, in exchange for a small layout discipline on generator
//! authors.
//!
//! ## Usage
//!
//! ```no_run
//! use refute::{check, ints, slices_of};
//!
//! // inside a #[test] function:
//! check(|t| {
//!     let v = t.draw(&slices_of(ints()), "v");
//!     let mut r = v.clone();
//!     r.reverse();
//!     if r.len() != v.len() {
//!         t.fatal(format!("length changed: {} vs {}", r.len(), v.len()));
//!     }
//! });
//! ```
//!
//! On failure the check panics with the failure message, the seed that
//! produced it, and the minimized block buffer. Configuration comes from
//! a [`Config`] record (or `REFUTE_*` environment variables for the
//! plain [`check`] entry point).

pub mod collections;
pub mod data;
pub mod distributions;
pub mod engine;
pub mod generator;
pub mod ints;
pub mod shrinking;
mod vis;

pub use collections::{
    arrays_of, maps_of, maps_of_n, maps_of_n_values, maps_of_values, slices_of,
    slices_of_distinct, slices_of_distinct_by, slices_of_n, slices_of_n_distinct,
    slices_of_n_distinct_by,
};
pub use data::{compare_data, BitStream, Group, PanicError, RecordedBits, T};
pub use engine::{
    assume, check, check_with, make_check, run_checks, CheckError, Config, DefaultHarness,
    Harness,
};
pub use generator::{from_fn, Gen};
pub use ints::{booleans, ints, ints_range, uints, uints_range};
