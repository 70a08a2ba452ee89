use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};

use crate::models::slot::{format_time, parse_date, parse_time};
use crate::models::{
    Booking, BookingSource, BookingStatus, OtpPurpose, OtpRecord, RateLimitRecord, Role, Slot,
    SlotStatus, TimeRange, UserAccount, UserSession,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).with_context(|| format!("bad timestamp: {s}"))
}

fn fmt_date(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

// ── Slots ──

const SLOT_COLUMNS: &str =
    "id, barber_id, date, start_time, end_time, is_booked, status, booked_by_customer_id, booked_at";

/// Inserts the cell unless one already starts at the same time for this
/// barber and date. Returns whether a row was written.
pub fn insert_slot(conn: &Connection, slot: &Slot, created_at: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT INTO slots (id, barber_id, date, start_time, end_time, is_booked, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 'available', ?6)
         ON CONFLICT(barber_id, date, start_time) DO NOTHING",
        params![
            slot.id,
            slot.barber_id,
            fmt_date(&slot.date),
            format_time(slot.start_time),
            format_time(slot.end_time),
            fmt_ts(created_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_slot(conn: &Connection, id: &str) -> anyhow::Result<Option<Slot>> {
    let result = conn.query_row(
        &format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = ?1"),
        params![id],
        |row| Ok(parse_slot_row(row)),
    );

    match result {
        Ok(slot) => Ok(Some(slot?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn find_slot_by_start(
    conn: &Connection,
    barber_id: &str,
    date: &NaiveDate,
    start: &chrono::NaiveTime,
) -> anyhow::Result<Option<Slot>> {
    let result = conn.query_row(
        &format!(
            "SELECT {SLOT_COLUMNS} FROM slots WHERE barber_id = ?1 AND date = ?2 AND start_time = ?3"
        ),
        params![barber_id, fmt_date(date), format_time(*start)],
        |row| Ok(parse_slot_row(row)),
    );

    match result {
        Ok(slot) => Ok(Some(slot?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Every cell for the barber, booked or not, ordered by date then start time.
pub fn list_slots(
    conn: &Connection,
    barber_id: &str,
    from: Option<&NaiveDate>,
    to: Option<&NaiveDate>,
) -> anyhow::Result<Vec<Slot>> {
    let from = from.map(fmt_date).unwrap_or_else(|| "0000-01-01".to_string());
    let to = to.map(fmt_date).unwrap_or_else(|| "9999-12-31".to_string());

    let mut stmt = conn.prepare(&format!(
        "SELECT {SLOT_COLUMNS} FROM slots
         WHERE barber_id = ?1 AND date >= ?2 AND date <= ?3
         ORDER BY date ASC, start_time ASC"
    ))?;

    let rows = stmt.query_map(params![barber_id, from, to], |row| Ok(parse_slot_row(row)))?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

/// Cells whose start falls inside `range` on `date`, ordered by start time.
pub fn slots_in_range(
    conn: &Connection,
    barber_id: &str,
    date: &NaiveDate,
    range: &TimeRange,
) -> anyhow::Result<Vec<Slot>> {
    let (from, until) = range.sweep_bounds();
    let mut stmt = conn.prepare(&format!(
        "SELECT {SLOT_COLUMNS} FROM slots
         WHERE barber_id = ?1 AND date = ?2 AND start_time >= ?3 AND start_time < ?4
         ORDER BY start_time ASC"
    ))?;

    let rows = stmt.query_map(params![barber_id, fmt_date(date), from, until], |row| {
        Ok(parse_slot_row(row))
    })?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

/// Marks every still-available cell in `range` as booked. Returns the number
/// of cells flipped.
pub fn book_slots_in_range(
    conn: &Connection,
    barber_id: &str,
    date: &NaiveDate,
    range: &TimeRange,
    customer_id: Option<&str>,
    booked_at: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let (from, until) = range.sweep_bounds();
    let count = conn.execute(
        "UPDATE slots SET is_booked = 1, status = 'booked', booked_by_customer_id = ?5, booked_at = ?6
         WHERE barber_id = ?1 AND date = ?2 AND start_time >= ?3 AND start_time < ?4 AND is_booked = 0",
        params![barber_id, fmt_date(date), from, until, customer_id, fmt_ts(booked_at)],
    )?;
    Ok(count)
}

pub fn free_slots_in_range(
    conn: &Connection,
    barber_id: &str,
    date: &NaiveDate,
    range: &TimeRange,
) -> anyhow::Result<usize> {
    let (from, until) = range.sweep_bounds();
    let count = conn.execute(
        "UPDATE slots SET is_booked = 0, status = 'available', booked_by_customer_id = NULL, booked_at = NULL
         WHERE barber_id = ?1 AND date = ?2 AND start_time >= ?3 AND start_time < ?4",
        params![barber_id, fmt_date(date), from, until],
    )?;
    Ok(count)
}

pub fn delete_slot(conn: &Connection, barber_id: &str, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM slots WHERE id = ?1 AND barber_id = ?2",
        params![id, barber_id],
    )?;
    Ok(count > 0)
}

fn parse_slot_row(row: &rusqlite::Row) -> anyhow::Result<Slot> {
    let date: String = row.get(2)?;
    let start_time: String = row.get(3)?;
    let end_time: String = row.get(4)?;
    let is_booked: i64 = row.get(5)?;
    let status: String = row.get(6)?;
    let booked_at: Option<String> = row.get(8)?;

    Ok(Slot {
        id: row.get(0)?,
        barber_id: row.get(1)?,
        date: parse_date(&date)?,
        start_time: parse_time(&start_time)?,
        end_time: parse_time(&end_time)?,
        is_booked: is_booked != 0,
        status: SlotStatus::parse(&status)
            .with_context(|| format!("unknown slot status: {status}"))?,
        booked_by_customer_id: row.get(7)?,
        booked_at: booked_at.as_deref().map(parse_ts).transpose()?,
    })
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, booking_code, customer_id, barber_id, slot_id, service_id, service_type, \
     date, start_time, end_time, duration, price, status, source, manual_customer_name, \
     manual_customer_phone, notes, created_at, updated_at, cancelled_at, previous_date, \
     previous_start_time, previous_end_time";

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, booking_code, customer_id, barber_id, slot_id, service_id, service_type,
             date, start_time, end_time, duration, price, status, source, manual_customer_name,
             manual_customer_phone, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            booking.id,
            booking.booking_code,
            booking.customer_id,
            booking.barber_id,
            booking.slot_id,
            booking.service_id,
            booking.service_type,
            fmt_date(&booking.date),
            format_time(booking.start_time),
            format_time(booking.end_time),
            booking.duration,
            booking.price,
            booking.status.as_str(),
            booking.source.as_str(),
            booking.manual_customer_name,
            booking.manual_customer_phone,
            booking.notes,
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_active_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    Ok(get_booking(conn, id)?.filter(Booking::is_active))
}

pub fn list_active_bookings_for_customer(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE customer_id = ?1 AND status = 'booked'
         ORDER BY date ASC, start_time ASC"
    ))?;

    let rows = stmt.query_map(params![customer_id], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn list_active_bookings_for_barber(
    conn: &Connection,
    barber_id: &str,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE barber_id = ?1 AND status = 'booked'
         ORDER BY date ASC, start_time ASC"
    ))?;

    let rows = stmt.query_map(params![barber_id], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Archives active bookings pointing at `slot_id` whose cell is not actually
/// booked: leftovers from an earlier partial write. `keep` is never touched.
pub fn archive_stale_bookings_on_slot(
    conn: &Connection,
    slot_id: &str,
    keep: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE bookings SET status = 'cancelled', cancelled_at = ?2, updated_at = ?2
         WHERE slot_id = ?1 AND status = 'booked' AND id != COALESCE(?3, '')
           AND NOT EXISTS (SELECT 1 FROM slots s WHERE s.id = bookings.slot_id AND s.is_booked = 1)",
        params![slot_id, now, keep],
    )?;
    Ok(count)
}

pub fn cancel_booking(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE bookings SET status = 'cancelled', cancelled_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status = 'booked'",
        params![id, now],
    )?;
    Ok(count > 0)
}

/// Rewrites the slot, date and time fields of an active booking in place.
pub fn update_booking_schedule(conn: &Connection, booking: &Booking) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET slot_id = ?2, date = ?3, start_time = ?4, end_time = ?5, duration = ?6,
             previous_date = ?7, previous_start_time = ?8, previous_end_time = ?9, updated_at = ?10
         WHERE id = ?1 AND status = 'booked'",
        params![
            booking.id,
            booking.slot_id,
            fmt_date(&booking.date),
            format_time(booking.start_time),
            format_time(booking.end_time),
            booking.duration,
            booking.previous_date.as_ref().map(fmt_date),
            booking.previous_start_time.map(format_time),
            booking.previous_end_time.map(format_time),
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(count > 0)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let date: String = row.get(7)?;
    let start_time: String = row.get(8)?;
    let end_time: String = row.get(9)?;
    let status: String = row.get(12)?;
    let source: String = row.get(13)?;
    let created_at: String = row.get(17)?;
    let updated_at: String = row.get(18)?;
    let cancelled_at: Option<String> = row.get(19)?;
    let previous_date: Option<String> = row.get(20)?;
    let previous_start_time: Option<String> = row.get(21)?;
    let previous_end_time: Option<String> = row.get(22)?;

    Ok(Booking {
        id: row.get(0)?,
        booking_code: row.get(1)?,
        customer_id: row.get(2)?,
        barber_id: row.get(3)?,
        slot_id: row.get(4)?,
        service_id: row.get(5)?,
        service_type: row.get(6)?,
        date: parse_date(&date)?,
        start_time: parse_time(&start_time)?,
        end_time: parse_time(&end_time)?,
        duration: row.get(10)?,
        price: row.get(11)?,
        status: BookingStatus::parse(&status)
            .with_context(|| format!("unknown booking status: {status}"))?,
        source: BookingSource::parse(&source)
            .with_context(|| format!("unknown booking source: {source}"))?,
        manual_customer_name: row.get(14)?,
        manual_customer_phone: row.get(15)?,
        notes: row.get(16)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        cancelled_at: cancelled_at.as_deref().map(parse_ts).transpose()?,
        previous_date: previous_date.as_deref().map(parse_date).transpose()?,
        previous_start_time: previous_start_time.as_deref().map(parse_time).transpose()?,
        previous_end_time: previous_end_time.as_deref().map(parse_time).transpose()?,
    })
}

// ── Users ──

pub fn insert_user(conn: &Connection, user: &UserAccount) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, phone, password_hash, full_name, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.phone,
            user.password_hash,
            user.full_name,
            user.role.as_str(),
            fmt_ts(&user.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> anyhow::Result<Option<UserAccount>> {
    let result = conn.query_row(
        "SELECT id, phone, password_hash, full_name, role, created_at FROM users WHERE id = ?1",
        params![id],
        |row| Ok(parse_user_row(row)),
    );

    match result {
        Ok(user) => Ok(Some(user?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_user_by_phone(conn: &Connection, phone: &str) -> anyhow::Result<Option<UserAccount>> {
    let result = conn.query_row(
        "SELECT id, phone, password_hash, full_name, role, created_at FROM users WHERE phone = ?1",
        params![phone],
        |row| Ok(parse_user_row(row)),
    );

    match result {
        Ok(user) => Ok(Some(user?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn update_password_hash(conn: &Connection, user_id: &str, hash: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE users SET password_hash = ?2 WHERE id = ?1",
        params![user_id, hash],
    )?;
    Ok(count > 0)
}

fn parse_user_row(row: &rusqlite::Row) -> anyhow::Result<UserAccount> {
    let role: String = row.get(4)?;
    let created_at: String = row.get(5)?;

    Ok(UserAccount {
        id: row.get(0)?,
        phone: row.get(1)?,
        password_hash: row.get(2)?,
        full_name: row.get(3)?,
        role: Role::parse(&role).with_context(|| format!("unknown role: {role}"))?,
        created_at: parse_ts(&created_at)?,
    })
}

// ── Sessions ──

pub fn insert_session(conn: &Connection, session: &UserSession) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO sessions (token, user_id, phone, role, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            session.token,
            session.user_id,
            session.phone,
            session.role.as_str(),
            fmt_ts(&session.created_at),
            fmt_ts(&session.expires_at),
        ],
    )?;
    Ok(())
}

pub fn get_session(conn: &Connection, token: &str) -> anyhow::Result<Option<UserSession>> {
    let result = conn.query_row(
        "SELECT token, user_id, phone, role, created_at, expires_at FROM sessions WHERE token = ?1",
        params![token],
        |row| {
            let role: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            let expires_at: String = row.get(5)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                role,
                created_at,
                expires_at,
            ))
        },
    );

    match result {
        Ok((token, user_id, phone, role, created_at, expires_at)) => Ok(Some(UserSession {
            token,
            user_id,
            phone,
            role: Role::parse(&role).with_context(|| format!("unknown role: {role}"))?,
            created_at: parse_ts(&created_at)?,
            expires_at: parse_ts(&expires_at)?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_session(conn: &Connection, token: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(count > 0)
}

/// Revokes every session of the user except `keep`.
pub fn delete_sessions_for_user(
    conn: &Connection,
    user_id: &str,
    keep: Option<&str>,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM sessions WHERE user_id = ?1 AND token != COALESCE(?2, '')",
        params![user_id, keep],
    )?;
    Ok(count)
}

// ── OTP ──

pub fn upsert_otp(conn: &Connection, otp: &OtpRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO otp_records (phone, otp_hash, salt, attempts, expires_at, created_at, ip, purpose)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(phone) DO UPDATE SET
           otp_hash = excluded.otp_hash,
           salt = excluded.salt,
           attempts = excluded.attempts,
           expires_at = excluded.expires_at,
           created_at = excluded.created_at,
           ip = excluded.ip,
           purpose = excluded.purpose",
        params![
            otp.phone,
            otp.otp_hash,
            otp.salt,
            otp.attempts,
            fmt_ts(&otp.expires_at),
            fmt_ts(&otp.created_at),
            otp.ip,
            otp.purpose.as_str(),
        ],
    )?;
    Ok(())
}

pub fn get_otp(conn: &Connection, phone: &str) -> anyhow::Result<Option<OtpRecord>> {
    let result = conn.query_row(
        "SELECT phone, otp_hash, salt, attempts, expires_at, created_at, ip, purpose
         FROM otp_records WHERE phone = ?1",
        params![phone],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        },
    );

    match result {
        Ok((phone, otp_hash, salt, attempts, expires_at, created_at, ip, purpose)) => {
            Ok(Some(OtpRecord {
                phone,
                otp_hash,
                salt,
                attempts,
                expires_at: parse_ts(&expires_at)?,
                created_at: parse_ts(&created_at)?,
                ip,
                purpose: OtpPurpose::parse(&purpose)
                    .with_context(|| format!("unknown otp purpose: {purpose}"))?,
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Bumps the failed-attempt counter and returns the new value.
pub fn increment_otp_attempts(conn: &Connection, phone: &str) -> anyhow::Result<i64> {
    conn.execute(
        "UPDATE otp_records SET attempts = attempts + 1 WHERE phone = ?1",
        params![phone],
    )?;
    let attempts: i64 = conn.query_row(
        "SELECT attempts FROM otp_records WHERE phone = ?1",
        params![phone],
        |row| row.get(0),
    )?;
    Ok(attempts)
}

pub fn delete_otp(conn: &Connection, phone: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM otp_records WHERE phone = ?1", params![phone])?;
    Ok(count > 0)
}

// ── Rate Limits ──

pub fn get_rate_limit(
    conn: &Connection,
    scope: &str,
    key: &str,
) -> anyhow::Result<Option<RateLimitRecord>> {
    let result = conn.query_row(
        "SELECT count, reset_at FROM rate_limits WHERE scope = ?1 AND key = ?2",
        params![scope, key],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    );

    match result {
        Ok((count, reset_at)) => Ok(Some(RateLimitRecord {
            count,
            reset_at: parse_ts(&reset_at)?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_rate_limit(
    conn: &Connection,
    scope: &str,
    key: &str,
    record: &RateLimitRecord,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO rate_limits (scope, key, count, reset_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(scope, key) DO UPDATE SET count = excluded.count, reset_at = excluded.reset_at",
        params![scope, key, record.count, fmt_ts(&record.reset_at)],
    )?;
    Ok(())
}

// ── Maintenance ──

pub struct PurgeStats {
    pub sessions: usize,
    pub otp_records: usize,
    pub rate_limits: usize,
}

/// Drops expired sessions, OTP records and closed rate-limit windows.
pub fn purge_expired(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<PurgeStats> {
    let now = fmt_ts(now);
    let sessions = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
    let otp_records = conn.execute("DELETE FROM otp_records WHERE expires_at <= ?1", params![now])?;
    let rate_limits = conn.execute("DELETE FROM rate_limits WHERE reset_at <= ?1", params![now])?;
    Ok(PurgeStats {
        sessions,
        otp_records,
        rate_limits,
    })
}
