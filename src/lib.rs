//! # dealdesk
//!
//! Contract intake and analysis. Files are uploaded for a company and deal,
//! stored in an object store, recorded in SQLite, and run through a
//! document pipeline that detects the file type, extracts and chunks the
//! text, classifies the agreement and proposes redlines and common ground.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────────────┐   ┌──────────┐
//! │ Object store │──▶│ Pipeline                       │──▶│  SQLite  │
//! │ local / GCS  │   │ detect → extract → chunk →     │   │ FTS5     │
//! └──────────────┘   │ analyze                        │   └────┬─────┘
//!                    └───────────────────────────────┘        │
//!                        ┌───────────────────────────────────┤
//!                        ▼                                   ▼
//!                   ┌──────────┐                        ┌──────────┐
//!                   │   CLI    │                        │   HTTP   │
//!                   │(dealdesk)│◀── client / session ──▶│  (axum)  │
//!                   └──────────┘                        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dealdesk init
//! dealdesk upload ./mutual_nda.pdf --company "Acme Corp" --deal "Q3 Supply"
//! dealdesk analyze <file_upload_id>
//! dealdesk process client-context acme_corp_123
//! dealdesk search "limitation of liability"
//! dealdesk serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Status enums and the results payload |
//! | [`db`] / [`migrate`] | Connection pool and schema |
//! | [`storage`] | Object stores (local filesystem, GCS) |
//! | [`detect`] / [`extract`] | File type detection and text extraction |
//! | [`chunk`] | Section-aware chunking |
//! | [`analysis`] | Classification, summaries, redlines |
//! | [`pipeline`] | Folder runs and single-upload processing |
//! | [`results`] | Persisting and reloading analysis results |
//! | [`upload`] | Upload intake, status and listing |
//! | [`search`] | Full-text search |
//! | [`server`] | HTTP API |
//! | [`client`] / [`session`] | API client and the upload session model |

pub mod analysis;
pub mod chunk;
pub mod client;
pub mod config;
pub mod db;
pub mod detect;
pub mod extract;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod records;
pub mod results;
pub mod search;
pub mod server;
pub mod session;
pub mod storage;
pub mod upload;
