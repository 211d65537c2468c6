pub mod config;
pub mod error;
pub mod types;

pub use error::{DecryptionFailure, RecordParseError, ShadeError, ShadeResult};
pub use types::{Address, Direction, ADDRESS_SIZE};
