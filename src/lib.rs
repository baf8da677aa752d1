//! quicktodo - file-backed task tracking
//!
//! Each registered project directory owns one JSON document holding its
//! tasks. Independent processes (people, scripts, AI agents) coordinate
//! through a per-project lock file; every change follows
//! lock → load → mutate → save → unlock → notify.
//!
//! # Module Organization
//!
//! - `storage`: on-disk layout and the project store codec
//! - `lock`: per-project lock files with stale and orphan recovery
//! - `registry`: project name ↔ directory registry
//! - `store`: the project store aggregate (`task`, `project` hold its parts)
//! - `notify`: best-effort change notifications for a live viewer
//! - `ops`: the `Session` that composes the pieces above
//! - `sync`: optional mirror of tasks into an AI TODO list file
//! - `viewer`: the live viewer server (axum + WebSocket)
//! - `config`, `error`, `output`, `cli`: the usual

pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod notify;
pub mod ops;
pub mod output;
pub mod project;
pub mod registry;
pub mod storage;
pub mod store;
pub mod sync;
pub mod task;
pub mod viewer;

pub use error::{Error, Result};
