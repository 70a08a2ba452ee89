use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::slot::{hhmm, TimeRange};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Booked,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Booked => "booked",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "booked" => Some(BookingStatus::Booked),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingSource {
    Online,
    Manual,
    Guest,
}

impl BookingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingSource::Online => "online",
            BookingSource::Manual => "manual",
            BookingSource::Guest => "guest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(BookingSource::Online),
            "manual" => Some(BookingSource::Manual),
            "guest" => Some(BookingSource::Guest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub booking_code: String,
    pub customer_id: Option<String>,
    pub barber_id: String,
    pub slot_id: String,
    pub service_id: Option<String>,
    pub service_type: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub duration: i32,
    pub price: i64,
    pub status: BookingStatus,
    pub source: BookingSource,
    pub manual_customer_name: Option<String>,
    pub manual_customer_phone: Option<String>,
    pub notes: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub cancelled_at: Option<NaiveDateTime>,
    // Display-only trail of the last reschedule.
    pub previous_date: Option<NaiveDate>,
    #[serde(with = "hhmm::option")]
    pub previous_start_time: Option<NaiveTime>,
    #[serde(with = "hhmm::option")]
    pub previous_end_time: Option<NaiveTime>,
}

impl Booking {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Booked
    }
}
