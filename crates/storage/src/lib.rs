// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mw-storage: the persistence plane.
//!
//! Two halves: the write-ahead log that makes in-flight messages
//! recoverable across crashes, and the durable message store recording
//! one header row per leg with content-addressed bodies.

pub mod file;
pub mod memory;
pub mod store;
pub mod wal;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{
    BodyRecord, HeaderId, HeaderRecord, MessageQuery, MessageStore, StoreError,
};
pub use wal::{SyncMode, Wal, WalConfig, WalEntry, WalEntryId, WalError, WalState};
