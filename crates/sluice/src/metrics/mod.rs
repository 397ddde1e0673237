//! Metrics for the ingestion pipeline.
//!
//! Events are emitted with `sluice_core::emit!`; the recorder and HTTP
//! endpoint are set up by `sluice_core::metrics`.

pub mod events;
