//! # ipid-relay — bump-in-the-wire relay
//!
//! Sits between two network segments on the packet bus. Every frame
//! arriving from one segment is (optionally) mitigated, scored by the
//! sliding-window detector and forwarded to the other segment after a
//! uniform random delay. Detector metrics are written to a per-run CSV
//! or JSONL file.

pub mod config;
pub mod service;
