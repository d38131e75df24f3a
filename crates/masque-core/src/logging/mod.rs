//! Redacting JSONL audit log.
//!
//! Every tracing event is appended as one JSON object to a per-instance,
//! per-day file. Fields that could tie a persona back to its owner or leak
//! key material are replaced before anything reaches disk.
//!
//! ## Layout
//!
//! ```text
//! logs/
//! └── raw/
//!     ├── 2026-10-18_api-1.jsonl
//!     └── 2026-10-18_cli.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use masque_core::logging::AuditLayer;
//! use tracing_subscriber::prelude::*;
//!
//! let audit = AuditLayer::new("./logs", "api-1")?;
//! tracing_subscriber::registry()
//!     .with(audit)
//!     .with(tracing_subscriber::fmt::layer())
//!     .init();
//! ```
//!
//! ## Querying
//!
//! ```bash
//! jq 'select(.level == "warn")' logs/raw/*.jsonl
//! jq 'select(.fields.persona_id == "7Hq...")' logs/raw/*.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::{AuditEntry, REDACTED, REDACTED_FIELDS};
pub use layer::AuditLayer;
pub use writer::{read_all_entries, AuditLogWriter};
