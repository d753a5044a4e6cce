//! Core data models for the object store.
//!
//! These are plain value types: backends build them fresh for every
//! operation and the projector turns them into XML documents. Records that
//! are persisted in the metadata store (object records and tombstones)
//! serialize as JSON via `serde`.

pub mod bucket;
pub mod listing;
pub mod object;
pub mod tombstone;
