use crate::{
    clock::{Clock, SystemClock},
    error::Error,
    FlakeId,
};
use jiff::Timestamp;
use std::sync::Mutex;
use tracing::{trace, warn};
use typed_builder::TypedBuilder;

/// Baseline epoch for the timestamp field: 2010-01-01T00:00:00Z.
pub const BASELINE_EPOCH_MS: i64 = 1_262_275_200_000;

pub(crate) const MAX_INSTANCE_ID: u16 = (1 << 10) - 1;
const MAX_SEQUENCE: u16 = (1 << 12) - 1;

/// Configures a Milliflake generator instance.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct MilliflakeSettings {
    /// A unique instance index in the range `[0, 1023]`, assigned to this
    /// process by an external coordinator.
    #[builder]
    pub instance_id: u16,
    /// Epoch used as the zero point of the 42-bit millisecond timestamp
    /// field. Defaults to 2010-01-01T00:00:00Z; every generator sharing an
    /// id space must share the epoch.
    #[builder(default = baseline_epoch())]
    pub epoch: Timestamp,
}

pub(crate) fn baseline_epoch() -> Timestamp {
    Timestamp::from_millisecond(BASELINE_EPOCH_MS).expect("baseline epoch is a valid timestamp")
}

/// The sequencing core shared by [`Milliflake`] and the process-wide
/// surface: the last issuing millisecond and the counter within it.
#[derive(Debug)]
pub(crate) struct SequenceState {
    last_timestamp: Option<Timestamp>,
    sequence: u16,
}

impl SequenceState {
    pub(crate) const fn new() -> Self {
        Self {
            last_timestamp: None,
            sequence: 0,
        }
    }

    /// Runs one step of the sequencing algorithm: picks the issuing
    /// millisecond and sequence value, commits them, and returns them.
    ///
    /// A clock regression leaves the state untouched, so a later call under
    /// a recovered clock resumes exactly where this one refused.
    pub(crate) fn advance<C: Clock>(&mut self, clock: &C) -> Result<(Timestamp, u16), Error> {
        let mut now = clock.now();

        match self.last_timestamp {
            None => {
                // First issuance: sequence starts at 0.
                self.sequence = 0;
            }
            Some(last) => {
                // The algorithm runs at millisecond resolution, so the
                // regression check does too; sub-millisecond jitter within
                // the same millisecond is not a fault.
                if now.as_millisecond() < last.as_millisecond() {
                    let behind_ms = last.as_millisecond() - now.as_millisecond();
                    warn!(behind_ms, "clock moved backwards, refusing to generate an id");
                    return Err(Error::ClockMovedBackwards { behind_ms });
                }

                if now.as_millisecond() == last.as_millisecond() {
                    self.sequence = (self.sequence + 1) & MAX_SEQUENCE;
                    if self.sequence == 0 {
                        // 4096 ids already issued this millisecond; stall
                        // until the clock reads strictly later.
                        trace!(
                            millisecond = last.as_millisecond(),
                            "sequence exhausted, waiting for the next millisecond"
                        );
                        now = until_next_millisecond(clock, last);
                    }
                } else {
                    // Entered a new millisecond: the sequence counter resets.
                    self.sequence = 0;
                }
            }
        }

        self.last_timestamp = Some(now);
        Ok((now, self.sequence))
    }
}

/// Samples the clock until it reads strictly later than `last`.
fn until_next_millisecond<C: Clock>(clock: &C, last: Timestamp) -> Timestamp {
    let target = Timestamp::from_millisecond(last.as_millisecond() + 1)
        .expect("next millisecond is a valid timestamp");
    loop {
        clock.wait_until(target);
        let now = clock.now();
        if now.as_millisecond() > last.as_millisecond() {
            return now;
        }
    }
}

/// Snowflake-style ID generator: 42 bits of millisecond timestamp, 10 bits
/// of instance id, 12 bits of per-millisecond sequence.
///
/// Ids from one generator are strictly increasing as long as the system
/// clock never steps backward; generators with distinct instance ids never
/// collide regardless of timing.
pub struct Milliflake<C: Clock> {
    epoch: Timestamp,
    instance_id: u16,
    clock: C,
    state: Mutex<SequenceState>,
}

impl Milliflake<SystemClock> {
    /// Creates a generator backed by the real system clock.
    pub fn new(settings: MilliflakeSettings) -> Result<Self, Error> {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C: Clock> Milliflake<C> {
    fn with_clock(settings: MilliflakeSettings, clock: C) -> Result<Self, Error> {
        if settings.instance_id > MAX_INSTANCE_ID {
            return Err(Error::InvalidInstanceId {
                instance_id: settings.instance_id,
                max_instance_id: MAX_INSTANCE_ID,
            });
        }

        let now = clock.now();
        if settings.epoch > now {
            return Err(Error::EpochAhead {
                epoch: settings.epoch,
                now,
            });
        }

        Ok(Self {
            epoch: settings.epoch,
            instance_id: settings.instance_id,
            clock,
            state: Mutex::new(SequenceState::new()),
        })
    }

    /// The instance id embedded in every id this generator issues.
    pub fn instance_id(&self) -> u16 {
        self.instance_id
    }

    /// Generates the next unique FlakeId.
    ///
    /// The full decision sequence runs under the state lock, including the
    /// wait loop on sequence exhaustion, so concurrent callers observe
    /// unique, strictly increasing ids. The wait yields between clock
    /// samples and is never interrupted mid-sequence.
    pub fn next_id(&self) -> Result<FlakeId, Error> {
        let mut state = self.state.lock().map_err(|_| Error::StatePoisoned)?;
        let (now, sequence) = state.advance(&self.clock)?;
        let elapsed_ms = now.as_millisecond() - self.epoch.as_millisecond();
        FlakeId::from_parts(elapsed_ms, self.instance_id, sequence)
    }

    /// The next id in its base-10 string boundary form (see [`FlakeId`]'s
    /// `Display` impl for why the string form exists).
    pub fn next_id_string(&self) -> Result<String, Error> {
        self.next_id().map(|id| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock::TestClock;

    fn at_ms(ms: i64) -> Timestamp {
        Timestamp::from_millisecond(ms).unwrap()
    }

    fn make_generator(instance_id: u16, clock_ms: i64) -> Milliflake<TestClock> {
        let settings = MilliflakeSettings::builder()
            .instance_id(instance_id)
            .epoch(at_ms(0))
            .build();
        let clock = TestClock::new(at_ms(clock_ms));
        Milliflake::with_clock(settings, clock).unwrap()
    }

    #[test]
    fn first_id_has_sequence_zero() {
        let gen = make_generator(0, 100);
        let id = gen.next_id().unwrap();
        assert_eq!(id.sequence(), 0);
    }

    #[test]
    fn same_millisecond_increments_sequence() {
        let gen = make_generator(0, 100);
        let id0 = gen.next_id().unwrap();
        let id1 = gen.next_id().unwrap();
        let id2 = gen.next_id().unwrap();
        assert_eq!(id0.sequence(), 0);
        assert_eq!(id1.sequence(), 1);
        assert_eq!(id2.sequence(), 2);
    }

    #[test]
    fn new_millisecond_resets_sequence() {
        let gen = make_generator(0, 100);
        gen.next_id().unwrap();
        gen.next_id().unwrap();
        gen.clock.set(at_ms(101));
        let id = gen.next_id().unwrap();
        assert_eq!(id.sequence(), 0);
        assert_eq!(id.timestamp(), 101);
    }

    #[test]
    fn sequence_exhaustion_covers_the_full_range_then_waits() {
        let gen = make_generator(0, 100);
        // All 4096 ids allocated to millisecond 100, sequences 0..=4095.
        for expected in 0..=4095u16 {
            let id = gen.next_id().unwrap();
            assert_eq!(id.sequence(), expected);
            assert_eq!(id.timestamp(), 100);
        }
        // The 4097th call must wait out millisecond 100; sequence restarts.
        let id = gen.next_id().unwrap();
        assert_eq!(id.sequence(), 0);
        assert_eq!(id.timestamp(), 101);
    }

    #[test]
    fn instance_id_out_of_range_is_rejected() {
        let settings = MilliflakeSettings::builder()
            .instance_id(1024)
            .epoch(at_ms(0))
            .build();
        let clock = TestClock::new(at_ms(100));
        assert!(matches!(
            Milliflake::with_clock(settings, clock),
            Err(Error::InvalidInstanceId {
                instance_id: 1024,
                max_instance_id: 1023,
            })
        ));
        // the boundary value is still accepted
        let gen = make_generator(1023, 100);
        assert_eq!(gen.next_id().unwrap().instance_id(), 1023);
    }

    #[test]
    fn epoch_ahead_of_clock_is_rejected() {
        let settings = MilliflakeSettings::builder()
            .instance_id(0)
            .epoch(at_ms(200))
            .build();
        let clock = TestClock::new(at_ms(100));
        assert!(matches!(
            Milliflake::with_clock(settings, clock),
            Err(Error::EpochAhead { .. })
        ));
    }

    #[test]
    fn clock_regression_fails_and_leaves_state_untouched() {
        let gen = make_generator(0, 100);
        gen.next_id().unwrap();

        gen.clock.set(at_ms(90));
        assert_eq!(
            gen.next_id(),
            Err(Error::ClockMovedBackwards { behind_ms: 10 })
        );

        // Once the clock recovers, issuance resumes within the same
        // millisecond: sequence 1 proves the failed call mutated nothing.
        gen.clock.set(at_ms(100));
        let id = gen.next_id().unwrap();
        assert_eq!(id.timestamp(), 100);
        assert_eq!(id.sequence(), 1);
    }

    #[test]
    fn instance_id_distinguishes_generators_at_the_same_instant() {
        let a = make_generator(1, 100);
        let b = make_generator(2, 100);
        let id_a = a.next_id().unwrap();
        let id_b = b.next_id().unwrap();
        assert_eq!(id_a.timestamp(), id_b.timestamp());
        assert_eq!(id_a.sequence(), id_b.sequence());
        assert_ne!(id_a, id_b);
        assert_eq!(id_a.instance_id(), 1);
        assert_eq!(id_b.instance_id(), 2);
    }

    #[test]
    fn ids_strictly_increase() {
        let gen = make_generator(5, 100);
        let mut last = gen.next_id().unwrap().as_u64();
        for step in 0..100 {
            if step % 10 == 0 {
                gen.clock.set(at_ms(101 + step));
            }
            let id = gen.next_id().unwrap().as_u64();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn timestamp_field_round_trips_through_the_epoch() {
        // With the default 2010 baseline epoch, the timestamp field is the
        // millisecond delta back to the issuing instant.
        let settings = MilliflakeSettings::builder().instance_id(0).build();
        let issued_at = BASELINE_EPOCH_MS + 123_456;
        let clock = TestClock::new(at_ms(issued_at));
        let gen = Milliflake::with_clock(settings, clock).unwrap();
        let id = gen.next_id().unwrap();
        assert_eq!(id.timestamp() as i64 + BASELINE_EPOCH_MS, issued_at);
    }

    #[test]
    fn timestamp_overflow_surfaces_as_an_error() {
        // Place the clock one millisecond past what 42 bits can hold.
        let gen = make_generator(0, 1i64 << 42);
        assert_eq!(
            gen.next_id(),
            Err(Error::TimestampOverflow {
                elapsed_ms: 1 << 42
            })
        );
    }

    #[test]
    fn string_form_is_the_decimal_packed_value() {
        let gen = make_generator(3, 100);
        let text = gen.next_id_string().unwrap();
        assert_eq!(text, ((100u64 << 22) | (3 << 12)).to_string());
    }
}
