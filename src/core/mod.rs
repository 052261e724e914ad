//! core
//!
//! Core domain types, configuration, and operations for snapwarden.
//!
//! # Modules
//!
//! - [`types`] - Strong types: DatasetId, SnapshotRef, Retention
//! - [`config`] - Configuration schema, loading and validation
//! - [`ops`] - Cross-process resource locking
//! - [`paths`] - Locations of the retention store and lock files
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid dataset names from reaching a backend
//! - Schemas are strict and reject unknown keys

pub mod config;
pub mod ops;
pub mod paths;
pub mod types;
