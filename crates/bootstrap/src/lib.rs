//! `peerboot` -- one-shot bootstrap for a fresh `peerd` data node.
//!
//! Generates the admin and client peer identities, runs the daemon for the
//! first time, provisions the admin user and (optionally) the mappings user
//! and document, stops the daemon, and merges the resulting secrets and
//! identifiers into the shared env file.

pub mod config;
pub mod workflow;
