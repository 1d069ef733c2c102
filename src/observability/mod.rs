//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Builder, handle and engine produce:
//!     → tracing events (logging.rs installs the subscriber)
//!     → metrics facade counters (metrics.rs installs the exporter)
//!
//! Consumers:
//!     → stdout, pretty or JSON
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - The library only emits; the binary decides what is installed
//! - `RUST_LOG` overrides the configured filter

pub mod logging;
pub mod metrics;
