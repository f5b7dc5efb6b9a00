// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Concoin Protocol — Core Library
//!
//! The distributed-systems heart of a concoin node: peer discovery,
//! epidemic message dissemination, and the consensus rules that decide
//! which transactions and blocks are allowed to extend the ledger.
//!
//! ## Architecture
//!
//! The library is split into modules that mirror the moving parts of a
//! running node:
//!
//! - **model** — Wire types: peers, gossip envelopes, transactions, blocks.
//! - **config** — Node configuration, defaults, and the on-disk layout.
//! - **storage** — File-backed, content-addressed persistence of peers
//!   and messages.
//! - **crypto** — Canonical byte forms, ECDSA P-256 signatures, block hashing.
//! - **hooks** — The pluggable validation/processing pipeline keyed by
//!   message type.
//! - **validator** — Stateless transaction and block validity over a
//!   ledger snapshot.
//! - **gossip** — Bounded-TTL epidemic spread with a deduplication history.
//! - **pex** — Peer exchange: bootstrap, liveness, table churn, and
//!   pairwise anti-entropy message sync.
//!
//! ## Design Philosophy
//!
//! 1. Peer-induced conditions never panic; only startup errors are fatal.
//! 2. Validation outcomes are `Result`s with diagnostic reasons, never
//!    process aborts.
//! 3. Everything on the wire is plain JSON — debuggable with `curl`.

pub mod config;
pub mod crypto;
pub mod gossip;
pub mod hooks;
pub mod model;
pub mod pex;
pub mod storage;
pub mod validator;
