#![allow(dead_code, reason = "Shared helpers are reused across multiple test suites.")]

pub mod clock;
pub mod fixtures;
pub mod shared_store;
