//! # memento-dash
//!
//! Pulls Memento Database libraries into a local SQLite file and derives
//! the tables a personal dashboard reads from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Memento API │──▶│   Import    │──▶│  SQLite  │
//! │  (paged)    │   │ plan+dedup  │   │ raw rows │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │  Expand  │       │ Calendar │
//!                 │ fields[] │       │  index   │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mdash init --plan config/batch.ini   # create database and tables
//! mdash import                         # fetch every active source
//! mdash expand sex umore               # lift payload fields into columns
//! mdash calendar                       # rebuild calendar + calendar_range
//! mdash verify
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`settings`] | Token / API URL resolution chain |
//! | [`models`] | Core data types |
//! | [`error`] | Remote fetch errors |
//! | [`http`] | Transport seam and retry with backoff |
//! | [`envelope`] | Entry list extraction from response bodies |
//! | [`fetcher`] | Paged entry fetching |
//! | [`timestamp`] | Timestamp detection and normalization |
//! | [`ident`] | SQL identifier validation and quoting |
//! | [`schema`] | Table introspection and base schema |
//! | [`plan`] | Import plan (INI / YAML) |
//! | [`import`] | Batch import with deduplication |
//! | [`progress`] | Import progress reporting |
//! | [`expand`] | Field expander |
//! | [`calendar`] | Calendar table and range view |
//! | [`libraries`] | Remote library browsing |
//! | [`verify`] | Database health check |
//! | [`db`] | Database connection |
//! | [`migrate`] | `init` command |

pub mod calendar;
pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod expand;
pub mod fetcher;
pub mod http;
pub mod ident;
pub mod import;
pub mod libraries;
pub mod migrate;
pub mod models;
pub mod plan;
pub mod progress;
pub mod schema;
pub mod settings;
pub mod timestamp;
pub mod verify;
