//! Triode core: the tube-coloration signal path and its configuration
//!
//! Everything in this crate is host-agnostic. The real-time plumbing that
//! feeds it (ring buffers, callbacks, device streams) lives in `triode-infra`.

pub mod domain;
