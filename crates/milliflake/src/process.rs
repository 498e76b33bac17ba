//! Process-wide generator surface.
//!
//! Mirrors the classic one-generator-per-process deployment: call
//! [`initialize`] once at startup with the externally assigned instance id,
//! then issue ids from anywhere with [`next_id`]. Callers that want
//! explicit ownership, a custom epoch, or several independent generators in
//! one process should use [`Milliflake`](crate::Milliflake) instead.

use crate::{
    clock::SystemClock,
    error::Error,
    milliflake::{SequenceState, BASELINE_EPOCH_MS, MAX_INSTANCE_ID},
    FlakeId,
};
use std::sync::Mutex;

#[derive(Debug)]
struct ProcessState {
    instance_id: Option<u16>,
    sequence: SequenceState,
}

static PROCESS: Mutex<ProcessState> = Mutex::new(ProcessState {
    instance_id: None,
    sequence: SequenceState::new(),
});

/// Stores the process-wide instance id and marks the generator initialized.
///
/// Calling this again replaces the instance id embedded in subsequently
/// issued ids without resetting the sequencing state; serializing startup
/// (and not re-initializing mid-traffic) is the caller's responsibility.
pub fn initialize(instance_id: u16) -> Result<(), Error> {
    if instance_id > MAX_INSTANCE_ID {
        return Err(Error::InvalidInstanceId {
            instance_id,
            max_instance_id: MAX_INSTANCE_ID,
        });
    }
    let mut process = PROCESS.lock().map_err(|_| Error::StatePoisoned)?;
    process.instance_id = Some(instance_id);
    Ok(())
}

/// Issues the next process-wide id in its base-10 string form, against the
/// system clock and the fixed 2010-01-01 baseline epoch.
pub fn next_id() -> Result<String, Error> {
    let mut process = PROCESS.lock().map_err(|_| Error::StatePoisoned)?;
    let instance_id = process.instance_id.ok_or(Error::Uninitialized)?;
    let (now, sequence) = process.sequence.advance(&SystemClock)?;
    let elapsed_ms = now.as_millisecond() - BASELINE_EPOCH_MS;
    let id = FlakeId::from_parts(elapsed_ms, instance_id, sequence)?;
    Ok(id.to_string())
}
