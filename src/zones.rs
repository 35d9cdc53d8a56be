//! Heart rate zone calculations (Karvonen)

use chrono::{Datelike, NaiveDate};

/// Lower bound of the training zone as a fraction of heart rate reserve
const ZONE_LOWER_FRACTION: f64 = 0.5;
/// Upper bound of the training zone as a fraction of heart rate reserve
const ZONE_UPPER_FRACTION: f64 = 0.7;
/// Age-predicted maximum: 220 - age
const MAX_HR_BASE: f64 = 220.0;

/// Target heart rate zone in bpm, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ZoneBounds {
    pub fn contains(&self, bpm: f64) -> bool {
        self.lower <= bpm && bpm <= self.upper
    }
}

/// Zone bounds from resting and maximum heart rate.
///
/// When `max_hr <= resting_hr` there is no reserve and both bounds collapse
/// to `resting_hr`.
pub fn zone_bounds(resting_hr: f64, max_hr: f64) -> ZoneBounds {
    if max_hr <= resting_hr {
        return ZoneBounds {
            lower: resting_hr,
            upper: resting_hr,
        };
    }

    let reserve = max_hr - resting_hr;
    ZoneBounds {
        lower: reserve * ZONE_LOWER_FRACTION + resting_hr,
        upper: reserve * ZONE_UPPER_FRACTION + resting_hr,
    }
}

/// Fraction of samples inside the zone, 0 for an empty sample
pub fn percent_in_zone(samples: &[f64], bounds: ZoneBounds) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let in_zone = samples.iter().filter(|bpm| bounds.contains(**bpm)).count();
    in_zone as f64 / samples.len() as f64
}

/// Age as a plain difference of calendar years.
///
/// Birthdays later in the year are ignored, so someone born in December is
/// already a year older in January.
pub fn age_in_years(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
    today.year() - date_of_birth.year()
}

/// Age-predicted maximum heart rate
pub fn max_heart_rate(date_of_birth: NaiveDate, today: NaiveDate) -> f64 {
    MAX_HR_BASE - age_in_years(date_of_birth, today) as f64
}
