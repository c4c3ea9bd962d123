//! Common test utilities shared across integration tests

#![allow(dead_code)]

pub mod fixture;
pub mod helpers;

pub use fixture::GitFixture;
pub use helpers::ref_exists;
