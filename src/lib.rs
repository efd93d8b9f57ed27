// src/lib.rs

//! hyperpkg package database and dependency solver
//!
//! Package metadata is compiled from textual feeds into memory-mapped binary
//! tables and resolved with a hypergraph solver that stops at every choice
//! the caller has to make.
//!
//! # Architecture
//!
//! - Feeds: package, translation and file-list text, optionally compressed and checksummed
//! - Database: one fixed-layout table file per concern, rebuilt atomically, read through `mmap`
//! - Interning: every string stored once, with an inverted name index for provides and replaces
//! - Solver: `(package, action)` nodes, alternatives for OR-dependencies, resumable traversal

pub mod config;
pub mod db;
mod error;
pub mod repository;
pub mod resolver;
pub mod version;

pub use error::{Error, Result};
