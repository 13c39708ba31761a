//! Layered block/allow policy: rule documents, merging, the active snapshot and
//! the domain index queries are classified against.

pub mod error;
pub mod index;
pub mod layer;
pub mod lists;
pub mod ruleset;
pub mod store;

pub use error::{ClassifyError, LayerError, RuleLoadError};
pub use index::{BlocklistIndex, Classification};
pub use layer::RuleLayer;
pub use lists::parse_list;
pub use ruleset::{Loaded, RuleSet, SkippedLayer, load};
pub use store::{RuleSnapshot, RuleStore};

/// Default ceiling on the number of domains a single document or list may carry.
pub const DEFAULT_MAX_DOMAINS: usize = 1_000_000;
