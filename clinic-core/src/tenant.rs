use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::money::{Currency, Rate};

/// Per-clinic settings that shape scheduling and billing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    pub currency: Currency,
    pub default_tax_rate: Rate,
    pub slot_minutes: u32,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            currency: Currency::usd(),
            default_tax_rate: Rate::ZERO,
            slot_minutes: 15,
            opening_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            closing_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
        }
    }
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.num_seconds_from_midnight() / 60
}

impl TenantSettings {
    /// Minutes between opening and closing
    pub fn open_minutes(&self) -> u32 {
        minute_of_day(self.closing_time).saturating_sub(minute_of_day(self.opening_time))
    }

    /// Whether `[start, start + minutes)` falls inside opening hours
    ///
    /// Works in whole minutes of the day, so a slot never wraps past midnight.
    pub fn within_hours(&self, start: NaiveTime, minutes: u32) -> bool {
        let start = minute_of_day(start);
        let Some(end) = start.checked_add(minutes) else {
            return false;
        };
        minutes > 0
            && start >= minute_of_day(self.opening_time)
            && end <= minute_of_day(self.closing_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_within_hours() {
        let settings = TenantSettings::default();
        assert!(settings.within_hours(t(9, 0), 15));
        assert!(settings.within_hours(t(16, 45), 15));
        assert!(!settings.within_hours(t(16, 50), 15));
        assert!(!settings.within_hours(t(8, 45), 30));
        assert!(!settings.within_hours(t(9, 0), 0));
    }

    #[test]
    fn test_long_slots_do_not_wrap_past_midnight() {
        let settings = TenantSettings::default();
        assert_eq!(settings.open_minutes(), 480);
        assert!(settings.within_hours(t(9, 0), 480));
        assert!(!settings.within_hours(t(9, 0), 481));
        // 16:00 + 24h30m lands on 16:30 the next day
        assert!(!settings.within_hours(t(16, 0), 1470));
        assert!(!settings.within_hours(t(16, 0), u32::MAX));

        let late = TenantSettings {
            opening_time: t(18, 0),
            closing_time: t(23, 59),
            ..TenantSettings::default()
        };
        assert!(!late.within_hours(t(23, 30), 60));
    }
}
