//! Where analyzed headlines end up.
//!
//! # Submodules
//!
//! - [`store`]: the news REST API, used both for dedup lookups and for
//!   persisting one row per term
//! - [`telegram`]: chat alerts for non-neutral records
//!
//! ```text
//! AnalysisRecord
//! ├── store::Persister   -> POST {api_url}  (short row, then long row)
//! └── telegram::Notifier -> sendMessage     (0, 1 or 2 messages)
//! ```

pub mod store;
pub mod telegram;
