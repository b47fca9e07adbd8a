//! Domain rules for the fanout hub.
//!
//! This module contains pure decision logic with no infrastructure
//! dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is the **domain**.  Domain code:
//!
//! - Contains the core rules of the system.
//! - Has **no** imports from sockets, timers, async runtimes or WebRTC stacks.
//! - Can be compiled and tested anywhere without setup.
//!
//! For the hub those rules are: how many shards to create, which shard takes
//! the next connection, and whether a WebRTC request may create or join a
//! negotiation session.  The task-based machinery in `fanout-hub` asks these
//! functions and then acts on the answer.

/// Least-loaded shard selection.
pub mod balance;

/// Runtime configuration types with their defaults.
pub mod config;

/// Negotiation session kinds and the admission table.
pub mod session;
