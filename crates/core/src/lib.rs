//! `peerboot-core` -- building blocks for bootstrapping a `peerd` data node.
//!
//! The bootstrap sequence is orchestrated by the `peerboot` binary; this
//! crate provides the pieces it is built from:
//!
//! - [`ctl`] -- thin wrappers around the `peerctl` admin binary (key
//!   generation, admin-user creation).
//! - [`daemon`] -- spawns `peerd`, detects readiness from its output
//!   streams, and shuts it down with escalating signals.
//! - [`json_scan`] -- incremental brace-depth scanner that extracts the
//!   JSON startup payload embedded in free-form log text.
//! - [`capture`] -- owned stream buffers plus the readiness predicate.
//! - [`headless`] -- headless session/document operations against a
//!   running node.
//! - [`envfile`] -- line-preserving `KEY=VALUE` file merging.
//! - [`error`] -- the shared error surface.

pub mod capture;
pub mod ctl;
pub mod daemon;
pub mod envfile;
pub mod error;
pub mod headless;
pub mod json_scan;

pub use error::BootstrapError;
