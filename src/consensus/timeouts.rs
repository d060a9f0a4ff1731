/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Round timer durations.

use std::time::Duration;

use crate::types::data_types::Round;

/// Parameters of the exponential round timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundTimeouts {
    pub base: Duration,
    pub max: Duration,
}

impl RoundTimeouts {
    pub fn new(base: Duration, max: Duration) -> RoundTimeouts {
        RoundTimeouts { base, max }
    }

    pub fn timeout(&self, round: Round) -> Duration {
        round_timeout(round, self.base, self.max)
    }
}

/// How long a replica waits in `round` before asking for a round change: `min(base * 2^round, max)`.
///
/// Saturates at `max` instead of overflowing for very large rounds.
pub fn round_timeout(round: Round, base: Duration, max: Duration) -> Duration {
    let factor = u32::try_from(round.int())
        .ok()
        .and_then(|exp| 2u32.checked_pow(exp));
    match factor.and_then(|factor| base.checked_mul(factor)) {
        Some(timeout) if timeout < max => timeout,
        _ => max,
    }
}

#[test]
fn round_timeout_test() {
    let base = Duration::from_millis(500);
    let max = Duration::from_secs(10);

    assert_eq!(round_timeout(Round::new(0), base, max), base);
    assert_eq!(round_timeout(Round::new(1), base, max), Duration::from_secs(1));
    assert_eq!(round_timeout(Round::new(4), base, max), Duration::from_secs(8));
    assert_eq!(round_timeout(Round::new(5), base, max), max);
    assert_eq!(round_timeout(Round::new(40), base, max), max);
    assert_eq!(round_timeout(Round::new(u64::MAX), base, max), max);
}
