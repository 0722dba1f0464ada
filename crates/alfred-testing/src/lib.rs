//! Testing infrastructure for alfred integration tests.
//!
//! This crate provides utilities for writing robust integration tests
//! against the whiteboard event fabric:
//! - `TestWorld`: fluent interface over an isolated `Bus`/`ChannelBus`/
//!   `Database` triple
//! - `assertions`: custom assertions over tailed event batches and
//!   checkpoints
//! - `fixtures`: sample `ScalarMap` payload builders, one per whiteboard
//!   event type
//! - `process`: background process management for driving `alfred serve`
//!   end-to-end

pub mod assertions;
pub mod fixtures;
pub mod process;
pub mod world;

pub use world::TestWorld;
