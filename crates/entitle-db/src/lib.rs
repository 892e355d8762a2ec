//! # entitle-db: Database Layer for the Entitlement Engine
//!
//! SQLite storage for the rule catalog, the order feed, the entitlement
//! store and reconciliation watermarks, using sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Entitlement Data Flow                              │
//! │                                                                         │
//! │  entitle-engine (reconcile / reset / gate)                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   entitle-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐ │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │ │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │ │   │
//! │  │   │               │    │ RuleRepo       │    │              │ │   │
//! │  │   │ SqlitePool    │◄───│ OrderRepo      │    │ 001_init.sql │ │   │
//! │  │   │ Connection    │    │ EntitlementRepo│    │              │ │   │
//! │  │   │ Management    │    │ WatermarkRepo  │    │              │ │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘ │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Query Style
//! Queries use the runtime-checked `sqlx::query`/`sqlx::query_as` API with
//! `FromRow` types from entitle-core, so the workspace builds without a
//! `DATABASE_URL` or offline query cache.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entitle_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/entitle.db")).await?;
//! let rule = db.rules().get_by_course("C1").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::entitlement::{CreateOutcome, EntitlementRepository};
pub use repository::order::OrderRepository;
pub use repository::rule::RuleRepository;
pub use repository::watermark::WatermarkRepository;
