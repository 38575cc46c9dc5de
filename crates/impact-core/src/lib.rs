pub mod config;
pub mod merge;
pub mod types;

pub use config::ImpactConfig;
pub use merge::merge;
pub use types::*;
