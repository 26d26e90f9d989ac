//! File outputs read by the downstream application.
//!
//! - [`json`]: atomic temp-file-then-rename JSON writer
//! - [`snapshot`]: canonical article snapshot (load, merge, save)
//! - [`digest`]: daily digest plus dated archive copy
//!
//! # Output Structure
//!
//! ```text
//! data/
//! ├── newsdata_dump.json       # canonical snapshot (fetch / rss runs)
//! ├── rss_openai_daily.json    # latest digest
//! └── history/
//!     └── rss_openai_daily_2025-05-06.json
//! ```

pub mod digest;
pub mod json;
pub mod snapshot;
