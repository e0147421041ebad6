use raincheck_weather::ForecastSnapshot;

/// Next-hour rain probability that makes a location eligible by default.
pub const DEFAULT_RAIN_THRESHOLD_PCT: u8 = 60;

/// Outcome of the threshold check for one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertDecision {
    pub eligible: bool,
    /// Forced probability if one was supplied, else the snapshot's next-hour value
    pub probability_used: u8,
}

/// Decide whether `snapshot` warrants a rain alert.
///
/// Eligible iff the probability used is at least `threshold_pct`.
pub fn decide(
    snapshot: &ForecastSnapshot,
    threshold_pct: u8,
    forced_probability_pct: Option<u8>,
) -> AlertDecision {
    let probability_used =
        forced_probability_pct.unwrap_or(snapshot.next_hour_rain_probability_pct);

    AlertDecision {
        eligible: probability_used >= threshold_pct,
        probability_used,
    }
}
