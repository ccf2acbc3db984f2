#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Small helpers shared by the opsctl crates.

pub mod duration;
mod secret_string;

pub use secret_string::SecretString;
