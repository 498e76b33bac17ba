use crate::error::Error;
use modular_bitfield::prelude::*;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Largest millisecond delta the timestamp field can hold.
pub const MAX_TIMESTAMP_MS: i64 = (1 << 42) - 1;

#[bitfield]
#[repr(u64)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlakeId {
    /// 12 bits for sequence number (resets every millisecond).
    pub sequence: B12,
    /// 10 bits for instance ID (allows up to 1024 instances).
    pub instance_id: B10,
    /// 42 bits for timestamp (milliseconds since the baseline epoch).
    pub timestamp: B42,
}

impl FlakeId {
    /// Packs an id from its three fields. `elapsed_ms` is the millisecond
    /// delta from the generator's epoch.
    ///
    /// Callers must have validated `instance_id` and `sequence` against
    /// their 10- and 12-bit ranges already; the timestamp is the one field
    /// that can outgrow its width during normal operation.
    pub(crate) fn from_parts(elapsed_ms: i64, instance_id: u16, sequence: u16) -> Result<Self, Error> {
        if !(0..=MAX_TIMESTAMP_MS).contains(&elapsed_ms) {
            return Err(Error::TimestampOverflow { elapsed_ms });
        }
        Ok(Self::new()
            .with_timestamp(elapsed_ms as u64)
            .with_instance_id(instance_id)
            .with_sequence(sequence))
    }

    /// The packed 64-bit value.
    pub fn as_u64(self) -> u64 {
        self.into()
    }
}

impl fmt::Debug for FlakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlakeId")
            .field("timestamp", &self.timestamp())
            .field("instance_id", &self.instance_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}

/// Base-10 form of the packed value. This is the boundary representation:
/// ids can exceed 2^53, so environments with IEEE-754 doubles (JSON
/// consumers amongst them) need the string form to stay lossless.
impl fmt::Display for FlakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u64())
    }
}

impl FromStr for FlakeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self::from)
    }
}

impl Serialize for FlakeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FlakeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FlakeIdVisitor;

        impl Visitor<'_> for FlakeIdVisitor {
            type Value = FlakeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 64-bit id as a base-10 string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FlakeId, E> {
                v.parse().map_err(de::Error::custom)
            }

            // Accept plain integers from producers with full 64-bit support.
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<FlakeId, E> {
                Ok(FlakeId::from(v))
            }
        }

        deserializer.deserialize_str(FlakeIdVisitor)
    }
}
