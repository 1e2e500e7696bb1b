//! Monte-Carlo option valuation for an interactive explainer.
//!
//! Simulates geometric random-walk price paths, bins their terminal values,
//! and estimates call/put values from the sample. A discrete die demo runs
//! the same sample -> bin -> weight -> average pipeline on a closed-form
//! sample space. The `server` module hosts all of it behind HTTP + WebSocket.

pub mod config;
pub mod demo;
pub mod engine;
pub mod errors;
pub mod server;
pub mod sim;
pub mod state;
pub mod valuation;
