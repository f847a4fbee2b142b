use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection};

use crate::models::{Appointment, AppointmentStatus, ReferenceHint};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const APPOINTMENT_COLUMNS: &str =
    "id, subject, start_time, end_time, status, created_at, updated_at";

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

// ── Appointments ──

pub fn insert_appointment(conn: &Connection, appointment: &Appointment) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, subject, start_time, end_time, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            appointment.id,
            appointment.subject,
            format_ts(&appointment.start),
            format_ts(&appointment.end),
            appointment.status.as_str(),
            format_ts(&appointment.created_at),
            format_ts(&appointment.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_appointment(conn: &Connection, id: &str) -> rusqlite::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
        params![id],
        parse_appointment_row,
    );

    match result {
        Ok(appointment) => Ok(Some(appointment)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

// Half-open: touching intervals do not overlap
pub fn find_overlapping(
    conn: &Connection,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
    exclude_id: Option<&str>,
) -> rusqlite::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE status = 'confirmed' AND start_time < ?1 AND end_time > ?2 AND id != ?3
             ORDER BY start_time ASC LIMIT 1"
        ),
        params![format_ts(end), format_ts(start), exclude_id.unwrap_or("")],
        parse_appointment_row,
    );

    match result {
        Ok(appointment) => Ok(Some(appointment)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn appointments_in_range(
    conn: &Connection,
    from: &NaiveDateTime,
    to: &NaiveDateTime,
) -> rusqlite::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE status = 'confirmed' AND start_time < ?1 AND end_time > ?2
         ORDER BY start_time ASC"
    ))?;

    let rows = stmt.query_map(params![format_ts(to), format_ts(from)], parse_appointment_row)?;
    rows.collect()
}

pub fn confirmed_ids_on(
    conn: &Connection,
    date: &NaiveDate,
    exclude_id: Option<&str>,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM appointments
         WHERE status = 'confirmed' AND substr(start_time, 1, 10) = ?1 AND id != ?2
         ORDER BY start_time ASC",
    )?;

    let rows = stmt.query_map(
        params![date.format("%Y-%m-%d").to_string(), exclude_id.unwrap_or("")],
        |row| row.get(0),
    )?;
    rows.collect()
}

pub fn set_status(
    conn: &Connection,
    id: &str,
    status: AppointmentStatus,
) -> rusqlite::Result<bool> {
    let now = format_ts(&Utc::now().naive_utc());
    let count = conn.execute(
        "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now, id],
    )?;
    Ok(count > 0)
}

pub fn search_appointments(
    conn: &Connection,
    hint: &ReferenceHint,
) -> rusqlite::Result<Vec<Appointment>> {
    let mut sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE status = 'confirmed'");
    let mut params_vec: Vec<Box<dyn ToSql>> = vec![];

    if let Some(prefix) = &hint.id_prefix {
        params_vec.push(Box::new(prefix.to_lowercase()));
        sql.push_str(&format!(" AND instr(lower(id), ?{}) = 1", params_vec.len()));
    }
    if let Some(date) = hint.date {
        params_vec.push(Box::new(date.format("%Y-%m-%d").to_string()));
        sql.push_str(&format!(" AND substr(start_time, 1, 10) = ?{}", params_vec.len()));
    }
    if let Some(time) = hint.time {
        params_vec.push(Box::new(time.format("%H:%M").to_string()));
        sql.push_str(&format!(" AND substr(start_time, 12, 5) = ?{}", params_vec.len()));
    }
    if let Some(subject) = &hint.subject {
        params_vec.push(Box::new(subject.to_lowercase()));
        sql.push_str(&format!(" AND instr(lower(subject), ?{}) > 0", params_vec.len()));
    }
    if let Some(not_before) = &hint.not_before {
        params_vec.push(Box::new(format_ts(not_before)));
        sql.push_str(&format!(" AND start_time >= ?{}", params_vec.len()));
    }
    sql.push_str(" ORDER BY start_time ASC");

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), parse_appointment_row)?;
    rows.collect()
}

pub fn list_appointments(
    conn: &Connection,
    status_filter: Option<AppointmentStatus>,
    limit: i64,
) -> rusqlite::Result<Vec<Appointment>> {
    let (sql, params_vec): (String, Vec<Box<dyn ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE status = ?1 \
                 ORDER BY start_time ASC LIMIT ?2"
            ),
            vec![Box::new(status.as_str()) as Box<dyn ToSql>, Box::new(limit)],
        ),
        None => (
            format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments ORDER BY start_time ASC LIMIT ?1"),
            vec![Box::new(limit) as Box<dyn ToSql>],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), parse_appointment_row)?;
    rows.collect()
}

fn parse_appointment_row(row: &rusqlite::Row) -> rusqlite::Result<Appointment> {
    let status_str: String = row.get(4)?;
    let status = AppointmentStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown appointment status: {status_str}").into(),
        )
    })?;

    Ok(Appointment {
        id: row.get(0)?,
        subject: row.get(1)?,
        start: parse_ts(row, 2)?,
        end: parse_ts(row, 3)?,
        status,
        created_at: parse_ts(row, 5)?,
        updated_at: parse_ts(row, 6)?,
    })
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TS_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::{NaiveDate, NaiveTime};

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M").unwrap()
    }

    fn appointment(id: &str, subject: &str, start: NaiveDateTime) -> Appointment {
        let now = Utc::now().naive_utc();
        Appointment {
            id: id.to_string(),
            subject: subject.to_string(),
            start,
            end: start + chrono::Duration::minutes(30),
            status: AppointmentStatus::Confirmed,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_overlap_is_half_open() {
        let conn = db::init_db(":memory:").unwrap();
        insert_appointment(&conn, &appointment("a1", "Dentist", at("2025-06-18", "10:00"))).unwrap();

        // Touching intervals do not overlap
        assert!(find_overlapping(&conn, &at("2025-06-18", "10:30"), &at("2025-06-18", "11:00"), None)
            .unwrap()
            .is_none());
        assert!(find_overlapping(&conn, &at("2025-06-18", "09:30"), &at("2025-06-18", "10:00"), None)
            .unwrap()
            .is_none());

        let clash = find_overlapping(&conn, &at("2025-06-18", "10:15"), &at("2025-06-18", "10:45"), None)
            .unwrap()
            .unwrap();
        assert_eq!(clash.id, "a1");

        // Excluding the appointment being moved
        assert!(find_overlapping(&conn, &at("2025-06-18", "10:00"), &at("2025-06-18", "10:30"), Some("a1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_confirmed_ids_on_counts_one_day() {
        let conn = db::init_db(":memory:").unwrap();
        insert_appointment(&conn, &appointment("a1", "Dentist", at("2025-06-18", "10:00"))).unwrap();
        insert_appointment(&conn, &appointment("a2", "Dentist", at("2025-06-18", "15:00"))).unwrap();
        insert_appointment(&conn, &appointment("b1", "Dentist", at("2025-06-19", "10:00"))).unwrap();
        set_status(&conn, "a2", AppointmentStatus::Cancelled).unwrap();

        let day = NaiveDate::from_ymd_opt(2025, 6, 18).unwrap();
        assert_eq!(confirmed_ids_on(&conn, &day, None).unwrap(), vec!["a1".to_string()]);
        assert!(confirmed_ids_on(&conn, &day, Some("a1")).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_appointments_do_not_occupy() {
        let conn = db::init_db(":memory:").unwrap();
        insert_appointment(&conn, &appointment("a1", "Dentist", at("2025-06-18", "10:00"))).unwrap();
        assert!(set_status(&conn, "a1", AppointmentStatus::Cancelled).unwrap());

        let occupied =
            appointments_in_range(&conn, &at("2025-06-18", "00:00"), &at("2025-06-19", "00:00")).unwrap();
        assert!(occupied.is_empty());

        let kept = get_appointment(&conn, "a1").unwrap().unwrap();
        assert_eq!(kept.status, AppointmentStatus::Cancelled);
    }

    #[test]
    fn test_search_by_hint() {
        let conn = db::init_db(":memory:").unwrap();
        insert_appointment(&conn, &appointment("abc123", "Dentist", at("2025-06-18", "10:00"))).unwrap();
        insert_appointment(&conn, &appointment("abd456", "Haircut", at("2025-06-18", "14:00"))).unwrap();
        insert_appointment(&conn, &appointment("xyz789", "Dentist", at("2025-06-20", "10:00"))).unwrap();

        let by_prefix = search_appointments(
            &conn,
            &ReferenceHint {
                id_prefix: Some("AB".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_prefix.len(), 2);

        let by_date_and_subject = search_appointments(
            &conn,
            &ReferenceHint {
                date: NaiveDate::from_ymd_opt(2025, 6, 18),
                subject: Some("dent".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_date_and_subject.len(), 1);
        assert_eq!(by_date_and_subject[0].id, "abc123");

        let by_time = search_appointments(
            &conn,
            &ReferenceHint {
                time: NaiveTime::from_hms_opt(10, 0, 0),
                not_before: Some(at("2025-06-19", "00:00")),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_time.len(), 1);
        assert_eq!(by_time[0].id, "xyz789");
    }

    #[test]
    fn test_list_with_status_filter() {
        let conn = db::init_db(":memory:").unwrap();
        insert_appointment(&conn, &appointment("a1", "Dentist", at("2025-06-18", "10:00"))).unwrap();
        insert_appointment(&conn, &appointment("a2", "Dentist", at("2025-06-18", "11:00"))).unwrap();
        set_status(&conn, "a2", AppointmentStatus::Cancelled).unwrap();

        assert_eq!(list_appointments(&conn, None, 10).unwrap().len(), 2);
        let confirmed = list_appointments(&conn, Some(AppointmentStatus::Confirmed), 10).unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, "a1");
    }
}
