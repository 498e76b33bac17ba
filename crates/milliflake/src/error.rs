use jiff::Timestamp;
use thiserror::Error;

/// Errors returned by Milliflake initialization and ID generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("instance id {instance_id} is out of range; expected 0..={max_instance_id}")]
    InvalidInstanceId {
        instance_id: u16,
        max_instance_id: u16,
    },
    #[error("id generator has not been initialized")]
    Uninitialized,
    #[error("clock moved backwards; refusing to generate ids for {behind_ms} milliseconds")]
    ClockMovedBackwards { behind_ms: i64 },
    #[error("epoch is ahead of current clock time: epoch={epoch}, now={now}")]
    EpochAhead { epoch: Timestamp, now: Timestamp },
    #[error("elapsed {elapsed_ms} ms since the epoch overflows the 42-bit timestamp field")]
    TimestampOverflow { elapsed_ms: i64 },
    #[error("generator state lock is poisoned")]
    StatePoisoned,
}
