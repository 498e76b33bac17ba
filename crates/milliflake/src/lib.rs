mod clock;
pub mod error;
mod flake_id;
mod milliflake;
pub mod process;

pub use clock::Clock;
pub use error::Error;
pub use flake_id::{FlakeId, MAX_TIMESTAMP_MS};
pub use milliflake::{Milliflake, MilliflakeSettings, BASELINE_EPOCH_MS};
