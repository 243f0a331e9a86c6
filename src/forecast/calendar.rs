//! Holiday and promotion calendar.
//!
//! Every event carries an impact window `[lower_window, upper_window]` in days
//! around its date. The design matrix gets one indicator column per
//! (event name, offset), so a pre-holiday dip and a post-promotion tail are
//! estimated separately.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};

pub const NATIONAL_HOLIDAYS: &str = "vn_national_holidays";
pub const PROMOTIONS: &str = "vn_promotions";

const NATIONAL_HOLIDAY_DATES: [(i32, u32, u32); 15] = [
    // Tết 2024, Hùng Kings, Reunification, Labour Day, National Day
    (2024, 2, 8),
    (2024, 4, 18),
    (2024, 4, 30),
    (2024, 5, 1),
    (2024, 9, 2),
    (2025, 1, 28),
    (2025, 4, 7),
    (2025, 4, 30),
    (2025, 5, 1),
    (2025, 9, 2),
    (2026, 2, 16),
    (2026, 4, 26),
    (2026, 4, 30),
    (2026, 5, 1),
    (2026, 9, 2),
];

// Black Friday and 12.12
const PROMOTION_DATES: [(i32, u32, u32); 6] = [
    (2024, 11, 29),
    (2024, 12, 12),
    (2025, 11, 28),
    (2025, 12, 12),
    (2026, 11, 27),
    (2026, 12, 12),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub name: String,
    pub date: NaiveDate,
    pub lower_window: i64,
    pub upper_window: i64,
}

/// One design-matrix column: every date where `name` is `offset` days from an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolidayFeature {
    pub name: String,
    pub offset: i64,
    pub dates: BTreeSet<NaiveDate>,
}

impl HolidayFeature {
    pub fn label(&self) -> String {
        format!("{}_{:+}", self.name, self.offset)
    }

    pub fn is_active(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolidayCalendar {
    events: Vec<CalendarEvent>,
}

impl HolidayCalendar {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Vietnamese national holidays (±2 days) and shopping promotions (-3..+7 days).
    pub fn vietnam() -> Self {
        let mut calendar = Self::empty();
        for (y, m, d) in NATIONAL_HOLIDAY_DATES {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                calendar.push(NATIONAL_HOLIDAYS, date, -2, 2);
            }
        }
        for (y, m, d) in PROMOTION_DATES {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                calendar.push(PROMOTIONS, date, -3, 7);
            }
        }
        calendar
    }

    pub fn push(&mut self, name: &str, date: NaiveDate, lower_window: i64, upper_window: i64) {
        self.events.push(CalendarEvent {
            name: name.to_string(),
            date,
            lower_window: lower_window.min(upper_window),
            upper_window: lower_window.max(upper_window),
        });
    }

    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Indicator columns, ordered by event name (first appearance) then offset.
    pub fn features(&self) -> Vec<HolidayFeature> {
        let mut features: Vec<HolidayFeature> = Vec::new();
        for event in &self.events {
            for offset in event.lower_window..=event.upper_window {
                let date = event.date + Duration::days(offset);
                match features
                    .iter_mut()
                    .find(|f| f.name == event.name && f.offset == offset)
                {
                    Some(f) => {
                        f.dates.insert(date);
                    }
                    None => features.push(HolidayFeature {
                        name: event.name.clone(),
                        offset,
                        dates: BTreeSet::from([date]),
                    }),
                }
            }
        }
        let mut names: Vec<&str> = Vec::new();
        for event in &self.events {
            if !names.contains(&event.name.as_str()) {
                names.push(&event.name);
            }
        }
        features.sort_by_key(|f| (names.iter().position(|n| *n == f.name), f.offset));
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn vietnam_calendar_has_one_column_per_offset() {
        let cal = HolidayCalendar::vietnam();
        assert_eq!(cal.events().len(), 21);

        let features = cal.features();
        // 5 holiday offsets (-2..=2) + 11 promotion offsets (-3..=7)
        assert_eq!(features.len(), 16);
        assert_eq!(features[0].label(), "vn_national_holidays_-2");
        assert_eq!(features[5].label(), "vn_promotions_-3");
        assert_eq!(features[15].label(), "vn_promotions_+7");
    }

    #[test]
    fn promotion_window_is_asymmetric() {
        let features = HolidayCalendar::vietnam().features();
        let active: Vec<i64> = features
            .iter()
            .filter(|f| f.name == PROMOTIONS && f.is_active(d(2025, 12, 15)))
            .map(|f| f.offset)
            .collect();
        // 2025-12-15 is +3 after 12.12 and +17 after Black Friday (outside).
        assert_eq!(active, vec![3]);

        let before: Vec<i64> = features
            .iter()
            .filter(|f| f.name == PROMOTIONS && f.is_active(d(2025, 11, 25)))
            .map(|f| f.offset)
            .collect();
        assert_eq!(before, vec![-3]);
    }

    #[test]
    fn holiday_window_is_two_days_each_side() {
        let features = HolidayCalendar::vietnam().features();
        let hits = |date| {
            features
                .iter()
                .filter(|f| f.name == NATIONAL_HOLIDAYS && f.is_active(date))
                .count()
        };
        assert_eq!(hits(d(2025, 9, 4)), 1);
        assert_eq!(hits(d(2025, 9, 5)), 0);
        // 2025-04-30 and 2025-05-01 overlap: the 30th is +0 and -1.
        assert_eq!(hits(d(2025, 4, 30)), 2);
    }
}
