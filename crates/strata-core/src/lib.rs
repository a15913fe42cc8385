//! Shared error type and collaborator traits for the strata caching engine.
//!
//! This crate provides the foundations `strata-cache` builds on:
//! - The error taxonomy shared by every tier.
//! - `Clock`, the substitutable source of "now" expiration is checked
//!   against.
//! - `Hasher`, the substitutable digest used to derive disk filenames.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod error;
pub mod hash;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{Error, Result};
pub use hash::{Blake3Hasher, Hasher};

/// Global allocator using mimalloc for high performance.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
