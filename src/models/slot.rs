use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(SlotStatus::Available),
            "booked" => Some(SlotStatus::Booked),
            _ => None,
        }
    }
}

/// One fixed cell of a barber's bookable grid. Cells are never resized or
/// re-timed; only the booking lifecycle flips them between states.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    pub barber_id: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub is_booked: bool,
    pub status: SlotStatus,
    pub booked_by_customer_id: Option<String>,
    pub booked_at: Option<NaiveDateTime>,
}

impl Slot {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// Half-open `[start, end)` span within one date. An `end` at or before
/// `start` runs past midnight and is clamped to 24:00 for grid sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn start_minute(&self) -> u32 {
        minute_of_day(self.start)
    }

    pub fn end_minute(&self) -> u32 {
        let end = minute_of_day(self.end);
        if end <= self.start_minute() {
            end + MINUTES_PER_DAY
        } else {
            end
        }
    }

    pub fn crosses_midnight(&self) -> bool {
        minute_of_day(self.end) <= self.start_minute()
    }

    pub fn duration_minutes(&self) -> u32 {
        self.end_minute() - self.start_minute()
    }

    /// `(from, until)` keys for a `start_time >= from AND start_time < until`
    /// filter over `HH:MM` text columns.
    pub fn sweep_bounds(&self) -> (String, String) {
        let until = if self.end_minute() >= MINUTES_PER_DAY {
            "24:00".to_string()
        } else {
            format_time(self.end)
        };
        (format_time(self.start), until)
    }
}

pub fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

pub fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| anyhow::anyhow!("invalid time (expected HH:MM): {s}"))
}

pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("invalid date (expected YYYY-MM-DD): {s}"))
}

pub(crate) mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_time(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => s.serialize_str(&super::super::format_time(*t)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|r| super::super::parse_time(&r).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    #[test]
    fn test_status_parse_is_strict() {
        assert_eq!(SlotStatus::parse("booked"), Some(SlotStatus::Booked));
        assert_eq!(SlotStatus::parse("available"), Some(SlotStatus::Available));
        assert_eq!(SlotStatus::parse("Booked"), None);
        assert_eq!(SlotStatus::parse(""), None);
    }

    #[test]
    fn test_range_within_day() {
        let range = TimeRange::new(t("09:00"), t("10:00"));
        assert_eq!(range.duration_minutes(), 60);
        assert!(!range.crosses_midnight());
        assert_eq!(range.sweep_bounds(), ("09:00".to_string(), "10:00".to_string()));
    }

    #[test]
    fn test_range_past_midnight_clamps_sweep() {
        let range = TimeRange::new(t("23:30"), t("00:30"));
        assert_eq!(range.duration_minutes(), 60);
        assert!(range.crosses_midnight());
        assert_eq!(range.sweep_bounds(), ("23:30".to_string(), "24:00".to_string()));
    }

    #[test]
    fn test_range_ending_at_midnight() {
        let range = TimeRange::new(t("23:30"), t("00:00"));
        assert_eq!(range.duration_minutes(), 30);
        assert_eq!(range.end_minute(), MINUTES_PER_DAY);
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("9am").is_err());
        assert!(parse_date("2025-13-01").is_err());
    }

    #[test]
    fn test_slot_serializes_camel_case_hhmm() {
        let slot = Slot {
            id: "s1".to_string(),
            barber_id: "b1".to_string(),
            date: parse_date("2025-06-01").unwrap(),
            start_time: t("09:00"),
            end_time: t("09:30"),
            is_booked: false,
            status: SlotStatus::Available,
            booked_by_customer_id: None,
            booked_at: None,
        };
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json["startTime"], "09:00");
        assert_eq!(json["date"], "2025-06-01");
        assert_eq!(json["isBooked"], false);
        assert_eq!(json["status"], "available");
    }
}
