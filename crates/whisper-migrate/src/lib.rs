//! Whisper Migrate - bulk conversion of whisper files into a time series engine
//!
//! This crate moves a tree of whisper round-robin files into a destination
//! engine, either by writing its native block files shard by shard or by
//! streaming points to its HTTP write endpoint.
//!
//! # Components
//!
//! - [`identity`]: file path → series identity via placeholder patterns, and key encoding
//! - [`shard`]: shard windows, clipping and the shard catalog
//! - [`whisper`]: whisper file reader and discovery
//! - [`mapper`]: legacy file → [`PointBatch`]
//! - [`writer`]: file-write and remote-write strategies
//! - [`tsm`] / [`remote`]: destination block files and HTTP client
//! - [`migration`]: preview and write-phase orchestration
//!
//! # Example
//!
//! ```rust,ignore
//! use whisper_migrate::identity::{IdentityResolver, NoPatternSource, TagPattern};
//!
//! let pattern = TagPattern::new("carbon.#HOST.load", "load", "value").with_tag("host", "#HOST");
//! let mut resolver = IdentityResolver::new(vec![pattern]);
//!
//! let identity = resolver.identity_for(Path::new("carbon/host1/load.wsp"), &mut NoPatternSource)?;
//! assert_eq!(identity.key(), "load,host=host1#!~#value");
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod counters;
pub mod error;
pub mod identity;
pub mod mapper;
pub mod migration;
pub mod prompt;
pub mod remote;
pub mod shard;
pub mod telemetry;
pub mod tsm;
pub mod whisper;
pub mod writer;

pub use config::{MigrationConfig, PatternConfig};
pub use counters::{format_size, MigrationCounters, Summary};
pub use error::{MigrateError, Result};
pub use identity::{IdentityResolver, PatternSource, SeriesIdentity, TagPattern};
pub use mapper::PointBatch;
pub use migration::MigrationContext;
pub use shard::{Shard, ShardCatalog, TimeWindow};
pub use whisper::{LegacyReader, WhisperReader};
pub use writer::{ErrorPolicy, OutputMode};
