//! Shared harness for Plant Assistant integration tests

#![allow(dead_code)]

mod test_host;
mod wait;

pub use test_host::*;
pub use wait::*;
