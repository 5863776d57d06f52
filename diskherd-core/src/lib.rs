pub mod config;
pub mod error;
pub mod spec;
pub mod types;
pub mod units;

pub use config::*;
pub use error::*;
pub use spec::*;
pub use types::*;
pub use units::parse_size;
