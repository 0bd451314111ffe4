// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hybrid Logical Clock: a `(timestamp_ms, counter, node_id)` tuple that totally orders events
//! produced by multiple nodes with skewed wall clocks.

use std::{
    cmp::Ordering,
    fmt::{self, Display},
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use super::aio_protocol_error::{AIOProtocolError, Value};

/// Default maximum allowed drift between an HLC timestamp and local wall time.
pub const DEFAULT_MAX_CLOCK_DRIFT: Duration = Duration::from_secs(60);

fn floor_to_millis(t: SystemTime) -> SystemTime {
    let since_epoch = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    UNIX_EPOCH + Duration::from_millis(since_epoch.as_millis() as u64)
}

/// Hybrid Logical Clock. See module docs and spec §3/§4.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HybridLogicalClock {
    /// UTC timestamp, floored to millisecond precision.
    pub timestamp: SystemTime,
    /// Monotonic counter, bounded by `i32::MAX` (spec: "counter never overflows `INT32_MAX`").
    pub counter: u32,
    /// Non-empty identifier unique to the process that owns this clock.
    pub node_id: String,
}

impl HybridLogicalClock {
    /// Creates a new clock at the current wall time, counter 0, for the given node.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            timestamp: floor_to_millis(SystemTime::now()),
            counter: 0,
            node_id: node_id.into(),
        }
    }

    /// Total order over `(timestamp, counter, node_id)`. Two clocks from the same node_id
    /// with equal timestamp and counter are considered identical.
    #[must_use]
    pub fn compare(&self, other: &HybridLogicalClock) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.counter.cmp(&other.counter))
            .then(self.node_id.cmp(&other.node_id))
    }

    /// Merges `other` into `self` per spec §4.1. Applies uniformly whether or not
    /// `other.node_id == self.node_id` — see `DESIGN.md` for why the node-id gate present in
    /// some reference implementations is wrong and is not reproduced here.
    ///
    /// # Errors
    /// `InternalLogicError` on counter overflow; `StateInvalid` if the resulting timestamp
    /// would exceed `max_clock_drift` ahead of wall time.
    pub fn update(
        &mut self,
        other: &HybridLogicalClock,
        max_clock_drift: Duration,
    ) -> Result<(), AIOProtocolError> {
        let wall = floor_to_millis(SystemTime::now());

        if wall > self.timestamp && wall > other.timestamp {
            self.timestamp = wall;
            self.counter = 0;
        } else if self.timestamp == other.timestamp {
            let merged = self.counter.max(other.counter);
            self.counter = checked_increment(merged)?;
        } else if self.timestamp > other.timestamp {
            self.counter = checked_increment(self.counter)?;
        } else {
            self.timestamp = other.timestamp;
            self.counter = checked_increment(other.counter)?;
        }

        self.validate(wall, max_clock_drift)
    }

    /// Merges a purely local event (e.g. a pre-publish stamp) with no peer clock.
    ///
    /// # Errors
    /// Same as [`HybridLogicalClock::update`].
    pub fn update_now(&mut self, max_clock_drift: Duration) -> Result<(), AIOProtocolError> {
        let wall = floor_to_millis(SystemTime::now());
        if wall > self.timestamp {
            self.timestamp = wall;
            self.counter = 0;
        } else {
            self.counter = checked_increment(self.counter)?;
        }
        self.validate(wall, max_clock_drift)
    }

    /// Validates that the clock's timestamp is not further than `max_clock_drift` ahead of
    /// `now`, and that the counter has not overflowed `i32::MAX`.
    ///
    /// # Errors
    /// `InternalLogicError` on counter overflow; `StateInvalid` on excess drift.
    pub fn validate(&self, now: SystemTime, max_clock_drift: Duration) -> Result<(), AIOProtocolError> {
        if self.counter > i32::MAX as u32 {
            return Err(AIOProtocolError::new_internal_logic_error(
                "counter",
                Some(Value::Integer(self.counter as i32)),
                Some("HybridLogicalClock counter overflowed INT32_MAX".to_string()),
                None,
            ));
        }
        if let Ok(diff) = self.timestamp.duration_since(now) {
            if diff > max_clock_drift {
                return Err(AIOProtocolError::new_state_invalid_error(
                    "max_clock_drift",
                    None,
                    Some(
                        "HybridLogicalClock timestamp is further ahead of wall time than the \
                         configured maximum clock drift allows"
                            .to_string(),
                    ),
                    None,
                ));
            }
        }
        Ok(())
    }
}

fn checked_increment(counter: u32) -> Result<u32, AIOProtocolError> {
    counter.checked_add(1).ok_or_else(|| {
        AIOProtocolError::new_internal_logic_error(
            "counter",
            Some(Value::Integer(i32::MAX)),
            Some("HybridLogicalClock counter overflowed".to_string()),
            None,
        )
    })
}

impl Display for HybridLogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms_since_epoch = self.timestamp.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        write!(f, "{ms_since_epoch:0>15}:{:0>5}:{}", self.counter, self.node_id)
    }
}

impl FromStr for HybridLogicalClock {
    type Err = AIOProtocolError;

    fn from_str(s: &str) -> Result<Self, AIOProtocolError> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(AIOProtocolError::new_header_invalid_error(
                "__ts",
                s,
                false,
                Some(format!(
                    "Malformed HLC '{s}': expected 3 colon-separated segments, found {}",
                    parts.len()
                )),
                None,
            ));
        }

        let ms_since_epoch = parts[0].parse::<u64>().map_err(|e| {
            AIOProtocolError::new_header_invalid_error(
                "__ts",
                s,
                false,
                Some(format!("Malformed HLC '{s}': timestamp segment is not base-10: {e}")),
                None,
            )
        })?;
        let timestamp = UNIX_EPOCH.checked_add(Duration::from_millis(ms_since_epoch)).ok_or_else(|| {
            AIOProtocolError::new_header_invalid_error(
                "__ts",
                s,
                false,
                Some(format!("Malformed HLC '{s}': timestamp is out of range")),
                None,
            )
        })?;

        let counter = parts[1].parse::<u32>().map_err(|e| {
            AIOProtocolError::new_header_invalid_error(
                "__ts",
                s,
                false,
                Some(format!("Malformed HLC '{s}': counter segment is not base-10: {e}")),
                None,
            )
        })?;

        if parts[2].is_empty() {
            return Err(AIOProtocolError::new_header_invalid_error(
                "__ts",
                s,
                false,
                Some(format!("Malformed HLC '{s}': node_id segment is empty")),
                None,
            ));
        }

        Ok(Self {
            timestamp,
            counter,
            node_id: parts[2].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;
    use test_case::test_case;

    #[test]
    fn new_defaults_to_zero_counter() {
        let hlc = HybridLogicalClock::new("node-a");
        assert_eq!(hlc.counter, 0);
        assert_eq!(hlc.node_id, "node-a");
    }

    #[test]
    fn display_formats_fixed_width_segments() {
        let hlc = HybridLogicalClock {
            timestamp: UNIX_EPOCH,
            counter: 0,
            node_id: "node-a".to_string(),
        };
        assert_eq!(hlc.to_string(), "000000000000000:00000:node-a");
    }

    #[test]
    fn encode_decode_round_trips() {
        let hlc = HybridLogicalClock::new("node-a");
        let round_tripped: HybridLogicalClock = hlc.to_string().parse().unwrap();
        assert_eq!(hlc, round_tripped);
    }

    #[test_case("not-three-parts"; "too_few_segments")]
    #[test_case("1:2:3:4"; "too_many_segments")]
    #[test_case("abc:00000:node"; "non_numeric_timestamp")]
    #[test_case("000000000000000:abc:node"; "non_numeric_counter")]
    #[test_case("000000000000000:00000:"; "empty_node_id")]
    fn decode_rejects_malformed_strings(s: &str) {
        let err = s.parse::<HybridLogicalClock>().unwrap_err();
        assert_eq!(err.kind, crate::common::aio_protocol_error::AIOProtocolErrorKind::HeaderInvalid);
    }

    #[test]
    fn merge_across_different_node_ids_s4() {
        // S4: local = (1000, 0, A); incoming __ts = (1000, 3, B) => merged (1000, 4, A).
        let mut local = HybridLogicalClock {
            timestamp: UNIX_EPOCH + Duration::from_millis(1000),
            counter: 0,
            node_id: "A".to_string(),
        };
        let incoming = HybridLogicalClock {
            timestamp: UNIX_EPOCH + Duration::from_millis(1000),
            counter: 3,
            node_id: "B".to_string(),
        };
        // Freeze wall clock expectations: both timestamps are in the past relative to "now", so
        // branch 2 (`self.ts == other.ts`) governs regardless of the real wall clock.
        local.update(&incoming, Duration::from_secs(3600)).unwrap();
        assert_eq!(local.counter, 4);
        assert_eq!(local.node_id, "A");
    }

    #[test]
    fn compare_orders_lexicographically() {
        let a = HybridLogicalClock { timestamp: UNIX_EPOCH, counter: 0, node_id: "A".into() };
        let b = HybridLogicalClock {
            timestamp: UNIX_EPOCH + Duration::from_millis(1),
            counter: 0,
            node_id: "A".into(),
        };
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
        assert_eq!(a.compare(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn drift_exceeded_fails_state_invalid_s5() {
        // S5: local wall is effectively "now"; an incoming timestamp 120s ahead of wall with a
        // 60s max drift must be rejected.
        let mut local = HybridLogicalClock::new("A");
        let far_future = HybridLogicalClock {
            timestamp: SystemTime::now() + Duration::from_secs(120),
            counter: 0,
            node_id: "B".to_string(),
        };
        let err = local.update(&far_future, Duration::from_secs(60)).unwrap_err();
        assert_eq!(err.kind, crate::common::aio_protocol_error::AIOProtocolErrorKind::StateInvalid);
    }

    #[test]
    fn counter_overflow_is_internal_logic_error() {
        let mut local = HybridLogicalClock {
            timestamp: UNIX_EPOCH + Duration::from_millis(1000),
            counter: u32::MAX,
            node_id: "A".to_string(),
        };
        let other = HybridLogicalClock {
            timestamp: UNIX_EPOCH + Duration::from_millis(1000),
            counter: 0,
            node_id: "A".to_string(),
        };
        let err = local.update(&other, Duration::from_secs(3600)).unwrap_err();
        assert_eq!(err.kind, crate::common::aio_protocol_error::AIOProtocolErrorKind::InternalLogicError);
    }
}
