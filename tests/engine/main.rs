//! Engine tests over in-memory ports
//!
//! Run with: cargo test --test engine

mod forwarding;
mod harness;
mod startup;
