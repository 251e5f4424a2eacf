//! # Xport I/O - Row Source and Byte Sink Implementations
//!
//! This crate provides the concrete edges of the export pipeline: the
//! server-side-cursor Postgres row source on one end, and the byte sinks
//! (HTTP channel, file, gzip wrapper) on the other.
//!
//! The coercion module is the single place in the workspace that interprets
//! database driver types; everything past it works on the core value model.

/// Driver-type coercion and column projection
pub mod coerce;

/// HTTP channel sink and file sink
pub mod sink;

/// Gzip compression adapter over any sink
pub mod sink_gzip;

/// Server-side cursor row source
pub mod source_cursor;
