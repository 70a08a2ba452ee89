use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::slot::{minute_of_day, MINUTES_PER_DAY};
use crate::models::{Booking, BookingSource, BookingStatus, Role, Slot, SlotStatus, TimeRange};

const SLOT_TAKEN: &str = "one or more slots in the requested time are already booked";
const DEFAULT_SERVICE_TYPE: &str = "haircut";
const MIN_INTERVAL_MINUTES: u32 = 5;
const MAX_INTERVAL_MINUTES: u32 = 240;

/// Who is acting on a booking, as established by their session.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

/// Who a new booking is made for.
#[derive(Debug, Clone)]
pub enum Booker {
    Guest { name: String, phone: String },
    Customer { customer_id: String },
    Barber {
        barber_id: String,
        customer_name: String,
        customer_phone: String,
    },
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub barber_id: String,
    pub slot_id: String,
    pub date: NaiveDate,
    pub range: TimeRange,
    pub service_id: Option<String>,
    pub service_type: Option<String>,
    pub duration: Option<i32>,
    pub price: Option<i64>,
    pub notes: Option<String>,
    pub booker: Booker,
}

#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub slot_id: String,
    pub date: NaiveDate,
    pub range: TimeRange,
}

fn booking_code() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("BK-{suffix}")
}

fn require_nonempty_range(range: &TimeRange) -> Result<(), AppError> {
    if range.start == range.end {
        return Err(AppError::Validation(
            "end time must differ from start time".to_string(),
        ));
    }
    Ok(())
}

/// The cells must chain without gaps from `range.start` to at least
/// `range.end`, clamped to midnight. `cells` are ordered by start time.
fn ensure_covered(cells: &[Slot], range: &TimeRange) -> Result<(), AppError> {
    let target = range.end_minute().min(MINUTES_PER_DAY);
    let mut cursor = range.start_minute();
    for cell in cells {
        if minute_of_day(cell.start_time) > cursor {
            break;
        }
        cursor = cursor.max(cell.range().end_minute());
        if cursor >= target {
            return Ok(());
        }
    }
    Err(AppError::Validation(
        "the requested time is not fully covered by the barber's slots".to_string(),
    ))
}

/// Loads the cell a booking anchors on and checks it lines up with the
/// requested barber, date and start.
fn anchor_slot(
    conn: &Connection,
    slot_id: &str,
    barber_id: &str,
    date: &NaiveDate,
    range: &TimeRange,
) -> Result<Slot, AppError> {
    let slot = queries::get_slot(conn, slot_id)?
        .filter(|s| s.barber_id == barber_id)
        .ok_or_else(|| AppError::NotFound("slot not found".to_string()))?;

    if slot.date != *date || slot.start_time != range.start {
        return Err(AppError::Validation(
            "requested date and start time do not match the slot".to_string(),
        ));
    }
    Ok(slot)
}

/// Flips every cell of `range` to booked, or fails without side effects
/// visible after rollback when any of them is gone or taken.
fn claim_range(
    conn: &Connection,
    barber_id: &str,
    date: &NaiveDate,
    range: &TimeRange,
    customer_id: Option<&str>,
    now: &NaiveDateTime,
    taken_message: &str,
) -> Result<usize, AppError> {
    let cells = queries::slots_in_range(conn, barber_id, date, range)?;
    ensure_covered(&cells, range)?;
    if cells.iter().any(|c| c.is_booked) {
        return Err(AppError::Conflict(taken_message.to_string()));
    }

    let claimed = queries::book_slots_in_range(conn, barber_id, date, range, customer_id, now)?;
    if claimed != cells.len() {
        return Err(AppError::Conflict(taken_message.to_string()));
    }
    Ok(claimed)
}

fn can_modify(booking: &Booking, actor: &Actor) -> bool {
    match actor.role {
        Role::Customer => booking.customer_id.as_deref() == Some(actor.user_id.as_str()),
        Role::Barber => booking.barber_id == actor.user_id,
    }
}

fn load_for_update(conn: &Connection, booking_id: &str, actor: &Actor) -> Result<Booking, AppError> {
    let booking = queries::get_active_booking(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound("booking not found".to_string()))?;
    if !can_modify(&booking, actor) {
        return Err(AppError::Forbidden(
            "you are not allowed to modify this booking".to_string(),
        ));
    }
    Ok(booking)
}

// ── Slot grid ──

/// Creates one grid cell. Asking again for the same barber, date and start
/// returns the cell already there.
pub fn create_slot(
    conn: &Connection,
    barber_id: &str,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    now: NaiveDateTime,
) -> Result<Slot, AppError> {
    if end == start {
        return Err(AppError::Validation(
            "slot end time must be after its start time".to_string(),
        ));
    }

    let slot = Slot {
        id: Uuid::new_v4().to_string(),
        barber_id: barber_id.to_string(),
        date,
        start_time: start,
        end_time: end,
        is_booked: false,
        status: SlotStatus::Available,
        booked_by_customer_id: None,
        booked_at: None,
    };

    if queries::insert_slot(conn, &slot, &now)? {
        tracing::info!(barber_id = %barber_id, slot_id = %slot.id, date = %date, "slot created");
        return Ok(slot);
    }

    queries::find_slot_by_start(conn, barber_id, &date, &start)?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("slot vanished after conflicting insert")))
}

/// Cuts `[window_start, window_end)` into back-to-back cells of
/// `interval_minutes`. A trailing remainder shorter than the interval is
/// left out, and so is anything past midnight.
pub fn create_slots(
    conn: &mut Connection,
    barber_id: &str,
    date: NaiveDate,
    window: TimeRange,
    interval_minutes: u32,
    now: NaiveDateTime,
) -> Result<Vec<Slot>, AppError> {
    require_nonempty_range(&window)?;
    if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&interval_minutes) {
        return Err(AppError::Validation(format!(
            "interval must be between {MIN_INTERVAL_MINUTES} and {MAX_INTERVAL_MINUTES} minutes"
        )));
    }

    let usable = window.end_minute().min(MINUTES_PER_DAY) - window.start_minute();
    let cell_count = usable / interval_minutes;
    if cell_count == 0 {
        return Err(AppError::Validation(
            "window is shorter than one interval".to_string(),
        ));
    }

    let step = Duration::minutes(i64::from(interval_minutes));
    let tx = conn.transaction()?;
    let mut slots = Vec::with_capacity(cell_count as usize);
    let mut start = window.start;
    for _ in 0..cell_count {
        let (end, _) = start.overflowing_add_signed(step);
        slots.push(create_slot(&tx, barber_id, date, start, end, now)?);
        start = end;
    }
    tx.commit()?;

    Ok(slots)
}

/// Removes an available cell owned by the barber. Unknown or foreign ids
/// are ignored.
pub fn delete_slot(conn: &Connection, barber_id: &str, slot_id: &str) -> Result<(), AppError> {
    let Some(slot) = queries::get_slot(conn, slot_id)?.filter(|s| s.barber_id == barber_id) else {
        return Ok(());
    };
    if slot.is_booked {
        return Err(AppError::Conflict(
            "cannot delete a slot that is booked".to_string(),
        ));
    }
    if queries::delete_slot(conn, barber_id, slot_id)? {
        tracing::info!(barber_id = %barber_id, slot_id = %slot_id, "slot deleted");
    }
    Ok(())
}

pub fn list_slots(
    conn: &Connection,
    barber_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<Slot>, AppError> {
    if let (Some(from), Some(to)) = (from, to) {
        if to < from {
            return Err(AppError::Validation(
                "date range end is before its start".to_string(),
            ));
        }
    }
    Ok(queries::list_slots(conn, barber_id, from.as_ref(), to.as_ref())?)
}

// ── Booking lifecycle ──

/// Books `range` on the barber's grid. Stale rows on the anchor slot are
/// archived, the booking row is written, then every cell whose start falls in
/// the range is flipped to booked. Any failure rolls the whole call back.
pub fn create_booking(
    conn: &mut Connection,
    request: NewBooking,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    require_nonempty_range(&request.range)?;
    let duration = request.range.duration_minutes() as i32;
    if request.duration.is_some_and(|d| d != duration) {
        return Err(AppError::Validation(format!(
            "duration must match the booked time ({duration} minutes)"
        )));
    }

    let (customer_id, source, manual_name, manual_phone) = match request.booker {
        Booker::Guest { name, phone } => (None, BookingSource::Guest, Some(name), Some(phone)),
        Booker::Customer { customer_id } => (Some(customer_id), BookingSource::Online, None, None),
        Booker::Barber {
            barber_id,
            customer_name,
            customer_phone,
        } => {
            if barber_id != request.barber_id {
                return Err(AppError::Forbidden(
                    "barbers can only add bookings to their own schedule".to_string(),
                ));
            }
            (None, BookingSource::Manual, Some(customer_name), Some(customer_phone))
        }
    };

    let tx = conn.transaction()?;

    anchor_slot(&tx, &request.slot_id, &request.barber_id, &request.date, &request.range)?;

    let archived = queries::archive_stale_bookings_on_slot(&tx, &request.slot_id, None, &now)?;
    if archived > 0 {
        tracing::warn!(slot_id = %request.slot_id, archived, "archived stale bookings on slot");
    }

    let booking = Booking {
        id: Uuid::new_v4().to_string(),
        booking_code: booking_code(),
        customer_id,
        barber_id: request.barber_id,
        slot_id: request.slot_id,
        service_id: request.service_id,
        service_type: request
            .service_type
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_TYPE.to_string()),
        date: request.date,
        start_time: request.range.start,
        end_time: request.range.end,
        duration,
        price: request.price.unwrap_or(0),
        status: BookingStatus::Booked,
        source,
        manual_customer_name: manual_name,
        manual_customer_phone: manual_phone,
        notes: request.notes.unwrap_or_default(),
        created_at: now,
        updated_at: now,
        cancelled_at: None,
        previous_date: None,
        previous_start_time: None,
        previous_end_time: None,
    };

    queries::insert_booking(&tx, &booking)
        .map_err(|e| AppError::conflict_on_unique(e, SLOT_TAKEN))?;

    let claimed = claim_range(
        &tx,
        &booking.barber_id,
        &booking.date,
        &booking.range(),
        booking.customer_id.as_deref(),
        &now,
        SLOT_TAKEN,
    )?;

    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        barber_id = %booking.barber_id,
        source = booking.source.as_str(),
        cells = claimed,
        "booking created"
    );
    Ok(booking)
}

pub fn list_bookings(conn: &Connection, actor: &Actor) -> Result<Vec<Booking>, AppError> {
    let bookings = match actor.role {
        Role::Customer => queries::list_active_bookings_for_customer(conn, &actor.user_id)?,
        Role::Barber => queries::list_active_bookings_for_barber(conn, &actor.user_id)?,
    };
    Ok(bookings)
}

/// Frees every cell of the booking's range and archives the booking, so the
/// anchor slot can be booked again straight away.
pub fn cancel_booking(
    conn: &mut Connection,
    booking_id: &str,
    actor: &Actor,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let tx = conn.transaction()?;
    let mut booking = load_for_update(&tx, booking_id, actor)?;

    let freed = queries::free_slots_in_range(&tx, &booking.barber_id, &booking.date, &booking.range())?;
    if !queries::cancel_booking(&tx, &booking.id, &now)? {
        return Err(AppError::NotFound("booking not found".to_string()));
    }
    tx.commit()?;

    booking.status = BookingStatus::Cancelled;
    booking.cancelled_at = Some(now);
    booking.updated_at = now;

    tracing::info!(
        booking_id = %booking.id,
        actor = %actor.user_id,
        cells = freed,
        "booking cancelled"
    );
    Ok(booking)
}

/// Moves a booking to a new range. The old range is released first so the
/// two may overlap; if the new range cannot be claimed or the row cannot be
/// rewritten, dropping the transaction puts the old range back as it was.
pub fn reschedule_booking(
    conn: &mut Connection,
    booking_id: &str,
    actor: &Actor,
    target: NewSchedule,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    require_nonempty_range(&target.range)?;

    let tx = conn.transaction()?;
    let mut booking = load_for_update(&tx, booking_id, actor)?;
    anchor_slot(&tx, &target.slot_id, &booking.barber_id, &target.date, &target.range)?;

    queries::free_slots_in_range(&tx, &booking.barber_id, &booking.date, &booking.range())?;

    let archived =
        queries::archive_stale_bookings_on_slot(&tx, &target.slot_id, Some(&booking.id), &now)?;
    if archived > 0 {
        tracing::warn!(slot_id = %target.slot_id, archived, "archived stale bookings on slot");
    }

    if let Err(e) = claim_range(
        &tx,
        &booking.barber_id,
        &target.date,
        &target.range,
        booking.customer_id.as_deref(),
        &now,
        "the new time is no longer available",
    ) {
        tracing::info!(booking_id = %booking.id, error = %e, "reschedule rolled back");
        return Err(e);
    }

    booking.previous_date = Some(booking.date);
    booking.previous_start_time = Some(booking.start_time);
    booking.previous_end_time = Some(booking.end_time);
    booking.slot_id = target.slot_id;
    booking.date = target.date;
    booking.start_time = target.range.start;
    booking.end_time = target.range.end;
    booking.duration = target.range.duration_minutes() as i32;
    booking.updated_at = now;

    let updated = queries::update_booking_schedule(&tx, &booking)
        .map_err(|e| AppError::conflict_on_unique(e, "the new time is no longer available"))?;
    if !updated {
        return Err(AppError::NotFound("booking not found".to_string()));
    }
    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        date = %booking.date,
        "booking rescheduled"
    );
    Ok(booking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::slot::{parse_date, parse_time};

    const BARBER: &str = "barber-1";
    const CUSTOMER: &str = "customer-1";

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-05-30 12:00", "%Y-%m-%d %H:%M").unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange::new(t(start), t(end))
    }

    fn customer() -> Actor {
        Actor {
            user_id: CUSTOMER.to_string(),
            role: Role::Customer,
        }
    }

    fn barber() -> Actor {
        Actor {
            user_id: BARBER.to_string(),
            role: Role::Barber,
        }
    }

    /// Half-hour grid from 09:00 to 12:00 on 2025-06-01.
    fn grid(conn: &mut Connection) -> Vec<Slot> {
        create_slots(conn, BARBER, d("2025-06-01"), range("09:00", "12:00"), 30, now()).unwrap()
    }

    fn slot_at<'a>(slots: &'a [Slot], start: &str) -> &'a Slot {
        slots.iter().find(|s| s.start_time == t(start)).unwrap()
    }

    fn book(conn: &mut Connection, slot: &Slot, start: &str, end: &str) -> Result<Booking, AppError> {
        create_booking(
            conn,
            NewBooking {
                barber_id: BARBER.to_string(),
                slot_id: slot.id.clone(),
                date: slot.date,
                range: range(start, end),
                service_id: None,
                service_type: None,
                duration: None,
                price: Some(50_000),
                notes: None,
                booker: Booker::Customer {
                    customer_id: CUSTOMER.to_string(),
                },
            },
            now(),
        )
    }

    fn booked(conn: &Connection, id: &str) -> bool {
        queries::get_slot(conn, id).unwrap().unwrap().is_booked
    }

    #[test]
    fn test_create_slot_is_idempotent() {
        let conn = db::init_db(":memory:").unwrap();
        let first = create_slot(&conn, BARBER, d("2025-06-01"), t("09:00"), t("09:30"), now()).unwrap();
        let again = create_slot(&conn, BARBER, d("2025-06-01"), t("09:00"), t("09:30"), now()).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(list_slots(&conn, BARBER, None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_create_slot_time_rules() {
        let conn = db::init_db(":memory:").unwrap();
        let same = create_slot(&conn, BARBER, d("2025-06-01"), t("09:00"), t("09:00"), now());
        assert!(matches!(same, Err(AppError::Validation(_))));

        let overnight = create_slot(&conn, BARBER, d("2025-06-01"), t("23:30"), t("00:00"), now()).unwrap();
        assert_eq!(overnight.range().duration_minutes(), 30);
    }

    #[test]
    fn test_bulk_grid_and_ordering() {
        let mut conn = db::init_db(":memory:").unwrap();
        create_slot(&conn, BARBER, d("2025-06-02"), t("08:00"), t("08:30"), now()).unwrap();
        let slots = grid(&mut conn);
        assert_eq!(slots.len(), 6);
        assert_eq!(slots[5].end_time, t("12:00"));

        let listed = list_slots(&conn, BARBER, None, None).unwrap();
        assert_eq!(listed.len(), 7);
        assert_eq!(listed[0].start_time, t("09:00"));
        assert_eq!(listed[6].date, d("2025-06-02"));

        let one_day = list_slots(&conn, BARBER, Some(d("2025-06-02")), Some(d("2025-06-02"))).unwrap();
        assert_eq!(one_day.len(), 1);
    }

    #[test]
    fn test_bulk_rejects_bad_interval() {
        let mut conn = db::init_db(":memory:").unwrap();
        let err = create_slots(&mut conn, BARBER, d("2025-06-01"), range("09:00", "10:00"), 1, now());
        assert!(matches!(err, Err(AppError::Validation(_))));
        let err = create_slots(&mut conn, BARBER, d("2025-06-01"), range("09:00", "09:20"), 30, now());
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_booking_sweeps_every_cell_in_range() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let booking = book(&mut conn, slot_at(&slots, "09:00"), "09:00", "10:00").unwrap();

        assert_eq!(booking.duration, 60);
        assert_eq!(booking.source, BookingSource::Online);
        assert!(booking.booking_code.starts_with("BK-"));
        assert!(booked(&conn, &slot_at(&slots, "09:00").id));
        assert!(booked(&conn, &slot_at(&slots, "09:30").id));
        assert!(!booked(&conn, &slot_at(&slots, "10:00").id));

        let cell = queries::get_slot(&conn, &slot_at(&slots, "09:30").id).unwrap().unwrap();
        assert_eq!(cell.status, SlotStatus::Booked);
        assert_eq!(cell.booked_by_customer_id.as_deref(), Some(CUSTOMER));
    }

    #[test]
    fn test_overlapping_booking_conflicts_without_side_effects() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        book(&mut conn, slot_at(&slots, "09:30"), "09:30", "10:00").unwrap();

        let err = book(&mut conn, slot_at(&slots, "09:00"), "09:00", "10:00").unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(!booked(&conn, &slot_at(&slots, "09:00").id));
        assert_eq!(list_bookings(&conn, &customer()).unwrap().len(), 1);
    }

    #[test]
    fn test_same_slot_twice_conflicts() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        book(&mut conn, slot_at(&slots, "09:00"), "09:00", "09:30").unwrap();
        let err = book(&mut conn, slot_at(&slots, "09:00"), "09:00", "09:30").unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_uncovered_range_rejected() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        delete_slot(&conn, BARBER, &slot_at(&slots, "09:30").id).unwrap();

        let err = book(&mut conn, slot_at(&slots, "09:00"), "09:00", "10:00").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let past_grid = book(&mut conn, slot_at(&slots, "11:30"), "11:30", "12:30").unwrap_err();
        assert!(matches!(past_grid, AppError::Validation(_)));
    }

    #[test]
    fn test_duration_must_match_range() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let anchor = slot_at(&slots, "09:00");
        let request = |duration| NewBooking {
            barber_id: BARBER.to_string(),
            slot_id: anchor.id.clone(),
            date: anchor.date,
            range: range("09:00", "10:00"),
            service_id: None,
            service_type: None,
            duration,
            price: None,
            notes: None,
            booker: Booker::Customer {
                customer_id: CUSTOMER.to_string(),
            },
        };

        let err = create_booking(&mut conn, request(Some(15)), now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!booked(&conn, &anchor.id));

        let booking = create_booking(&mut conn, request(Some(60)), now()).unwrap();
        assert_eq!(booking.duration, 60);
    }

    #[test]
    fn test_booking_past_midnight_sweeps_until_midnight_only() {
        let mut conn = db::init_db(":memory:").unwrap();
        let date = d("2025-06-01");
        let late = create_slot(&conn, BARBER, date, t("23:30"), t("00:00"), now()).unwrap();
        let early = create_slot(&conn, BARBER, date, t("00:00"), t("00:30"), now()).unwrap();

        let booking = book(&mut conn, &late, "23:30", "00:30").unwrap();
        assert_eq!(booking.duration, 60);
        assert!(booked(&conn, &late.id));
        assert!(!booked(&conn, &early.id));

        cancel_booking(&mut conn, &booking.id, &customer(), now()).unwrap();
        assert!(!booked(&conn, &late.id));
    }

    #[test]
    fn test_start_must_match_slot() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let err = book(&mut conn, slot_at(&slots, "09:00"), "09:30", "10:00").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_cancel_frees_range_and_allows_rebooking() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let anchor = slot_at(&slots, "09:00").clone();
        let booking = book(&mut conn, &anchor, "09:00", "10:00").unwrap();

        let cancelled = cancel_booking(&mut conn, &booking.id, &customer(), now()).unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(!booked(&conn, &anchor.id));
        assert!(!booked(&conn, &slot_at(&slots, "09:30").id));
        assert!(queries::get_active_booking(&conn, &booking.id).unwrap().is_none());
        assert!(list_bookings(&conn, &customer()).unwrap().is_empty());

        let rebooked = book(&mut conn, &anchor, "09:00", "09:30").unwrap();
        assert_eq!(rebooked.slot_id, anchor.id);
        assert!(booked(&conn, &anchor.id));
    }

    #[test]
    fn test_cancel_authorization() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let booking = book(&mut conn, slot_at(&slots, "09:00"), "09:00", "09:30").unwrap();

        let stranger = Actor {
            user_id: "customer-2".to_string(),
            role: Role::Customer,
        };
        let other_barber = Actor {
            user_id: "barber-2".to_string(),
            role: Role::Barber,
        };
        assert!(matches!(
            cancel_booking(&mut conn, &booking.id, &stranger, now()),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            cancel_booking(&mut conn, &booking.id, &other_barber, now()),
            Err(AppError::Forbidden(_))
        ));

        cancel_booking(&mut conn, &booking.id, &barber(), now()).unwrap();
        assert!(matches!(
            cancel_booking(&mut conn, &booking.id, &barber(), now()),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_stale_active_row_is_archived_before_booking() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let anchor = slot_at(&slots, "10:00").clone();
        let stale = book(&mut conn, &anchor, "10:00", "10:30").unwrap();
        // Leave the row active while the cell reads as free.
        queries::free_slots_in_range(&conn, BARBER, &anchor.date, &anchor.range()).unwrap();

        let fresh = book(&mut conn, &anchor, "10:00", "10:30").unwrap();
        assert_ne!(fresh.id, stale.id);
        let archived = queries::get_booking(&conn, &stale.id).unwrap().unwrap();
        assert_eq!(archived.status, BookingStatus::Cancelled);
    }

    #[test]
    fn test_reschedule_moves_range() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let booking = book(&mut conn, slot_at(&slots, "09:00"), "09:00", "10:00").unwrap();

        let target = slot_at(&slots, "10:30");
        let moved = reschedule_booking(
            &mut conn,
            &booking.id,
            &customer(),
            NewSchedule {
                slot_id: target.id.clone(),
                date: target.date,
                range: range("10:30", "11:30"),
            },
            now(),
        )
        .unwrap();

        assert_eq!(moved.slot_id, target.id);
        assert_eq!(moved.previous_start_time, Some(t("09:00")));
        assert!(!booked(&conn, &slot_at(&slots, "09:00").id));
        assert!(!booked(&conn, &slot_at(&slots, "09:30").id));
        assert!(booked(&conn, &slot_at(&slots, "10:30").id));
        assert!(booked(&conn, &slot_at(&slots, "11:00").id));

        let stored = queries::get_active_booking(&conn, &booking.id).unwrap().unwrap();
        assert_eq!(stored.start_time, t("10:30"));
        assert_eq!(stored.previous_date, Some(d("2025-06-01")));
    }

    #[test]
    fn test_reschedule_into_overlapping_range() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let booking = book(&mut conn, slot_at(&slots, "09:00"), "09:00", "10:00").unwrap();

        let target = slot_at(&slots, "09:30");
        reschedule_booking(
            &mut conn,
            &booking.id,
            &customer(),
            NewSchedule {
                slot_id: target.id.clone(),
                date: target.date,
                range: range("09:30", "10:30"),
            },
            now(),
        )
        .unwrap();

        assert!(!booked(&conn, &slot_at(&slots, "09:00").id));
        assert!(booked(&conn, &slot_at(&slots, "09:30").id));
        assert!(booked(&conn, &slot_at(&slots, "10:00").id));
    }

    #[test]
    fn test_reschedule_conflict_keeps_old_range() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let mine = book(&mut conn, slot_at(&slots, "09:00"), "09:00", "10:00").unwrap();
        book(&mut conn, slot_at(&slots, "11:00"), "11:00", "11:30").unwrap();

        let target = slot_at(&slots, "10:30");
        let err = reschedule_booking(
            &mut conn,
            &mine.id,
            &customer(),
            NewSchedule {
                slot_id: target.id.clone(),
                date: target.date,
                range: range("10:30", "11:30"),
            },
            now(),
        )
        .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert!(booked(&conn, &slot_at(&slots, "09:00").id));
        assert!(booked(&conn, &slot_at(&slots, "09:30").id));
        assert!(!booked(&conn, &slot_at(&slots, "10:30").id));
        let stored = queries::get_active_booking(&conn, &mine.id).unwrap().unwrap();
        assert_eq!(stored.slot_id, slot_at(&slots, "09:00").id);
    }

    #[test]
    fn test_manual_booking_only_on_own_grid() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let anchor = slot_at(&slots, "09:00");
        let request = |barber_id: &str| NewBooking {
            barber_id: BARBER.to_string(),
            slot_id: anchor.id.clone(),
            date: anchor.date,
            range: range("09:00", "09:30"),
            service_id: Some("svc-fade".to_string()),
            service_type: Some("fade".to_string()),
            duration: Some(30),
            price: Some(80_000),
            notes: Some("walk-in".to_string()),
            booker: Booker::Barber {
                barber_id: barber_id.to_string(),
                customer_name: "Walk In".to_string(),
                customer_phone: "+998901112233".to_string(),
            },
        };

        let err = create_booking(&mut conn, request("barber-2"), now()).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let booking = create_booking(&mut conn, request(BARBER), now()).unwrap();
        assert_eq!(booking.source, BookingSource::Manual);
        assert!(booking.customer_id.is_none());
        assert_eq!(booking.manual_customer_name.as_deref(), Some("Walk In"));
        assert_eq!(list_bookings(&conn, &barber()).unwrap().len(), 1);
    }

    #[test]
    fn test_booked_slot_cannot_be_deleted_and_foreign_delete_is_noop() {
        let mut conn = db::init_db(":memory:").unwrap();
        let slots = grid(&mut conn);
        let anchor = slot_at(&slots, "09:00");
        book(&mut conn, anchor, "09:00", "09:30").unwrap();

        assert!(matches!(
            delete_slot(&conn, BARBER, &anchor.id),
            Err(AppError::Conflict(_))
        ));
        delete_slot(&conn, "barber-2", &slot_at(&slots, "10:00").id).unwrap();
        delete_slot(&conn, BARBER, "no-such-slot").unwrap();
        assert_eq!(list_slots(&conn, BARBER, None, None).unwrap().len(), 6);
    }
}
