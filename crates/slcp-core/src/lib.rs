//! Core types for the Simple Local Chat Protocol (SLCP).
//!
//! Provides the wire codec ([`protocol::Message`]), the peer table with sender
//! resolution ([`peers::PeerTable`]), a sans-IO session state machine shared by
//! chat clients and discovery services ([`session::Session`]), TOML
//! configuration, and helpers for storing received images.

pub mod config;
pub mod media;
pub mod peers;
pub mod protocol;
pub mod session;
pub mod storage;
