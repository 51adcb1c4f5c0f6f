pub mod catalog;
pub mod config;
pub mod executor;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod traits;

// Re-export common types for convenience
pub use catalog::MetadataCatalog;
pub use config::{ConfigError, HarvestConfig};
pub use executor::*;
pub use harvest::*;
pub use model::*;
pub use traits::*;
