//! # Ordo Sync Engine
//!
//! Deterministic conflict resolution for Ordo's local-first task store.
//!
//! This crate holds the pure half of the sync engine: the record model,
//! operations, the resolver that decides which version of a row survives a
//! collision, and the aggregate state that counts what happened. Everything
//! that touches a database or the network lives in `ordo-sync-client`.
//!
//! ## Design Principles
//!
//! - **No IO**: the resolver sees a local row and an operation, nothing else
//! - **Deterministic**: same inputs always produce the same resolution
//! - **Typed**: each synced table has its own record and patch types
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A synced row implements [`SyncRecord`]; its partial form from the remote
//! log implements [`RecordPatch`]. [`Task`] and [`TaskPatch`] cover the
//! `tasks` table.
//!
//! ### Operations
//!
//! Changes arrive as an [`Operation`]: a [`Change`] (insert, update or
//! delete) tagged with its [`Origin`].
//!
//! ### Resolution
//!
//! The [`Resolver`] applies one of three strategies when a remote change
//! meets an existing local row:
//! - [`ConflictStrategy::LatestWins`] - greater `updated_at` wins, ties go to remote (default)
//! - [`ConflictStrategy::Merge`] - field-level merge guided by the record timestamps
//! - [`ConflictStrategy::Manual`] - queue a [`SyncConflict`] for the caller
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use ordo_sync_engine::{Operation, Resolver, SyncState, Task, TaskPatch};
//!
//! let local = Task::new("t1", "Draft", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
//! let remote = TaskPatch::new("t1", Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
//!     .title("Final");
//!
//! let resolution = Resolver::default()
//!     .resolve("tasks", Some(&local), &Operation::remote_update(remote), Utc::now())
//!     .unwrap();
//! assert_eq!(resolution.action.record().unwrap().title, "Final");
//!
//! let mut state = SyncState::new();
//! state.record(&resolution);
//! assert_eq!(state.conflict_count, 1);
//! assert_eq!(state.synced_records, 1);
//! ```

pub mod error;
pub mod operation;
pub mod record;
pub mod resolve;
pub mod state;
pub mod task;
pub mod wire;

// Re-export main types at crate root
pub use error::Error;
pub use operation::{Change, Operation, Tombstone};
pub use record::{merge_field, FieldRule, Origin, RecordPatch, SyncRecord};
pub use resolve::{
    Action, ApplyAction, ConflictKind, ConflictStrategy, Resolution, Resolver, SyncConflict,
};
pub use state::SyncState;
pub use task::{Task, TaskPatch};

/// Type aliases for clarity
pub type RecordId = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
