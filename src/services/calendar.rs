use crate::models::{Appointment, AppointmentStatus};

const ICS_TS: &str = "%Y%m%dT%H%M%S";

pub fn generate_ics(appointment: &Appointment, business_name: &str) -> String {
    let uid = format!("{}@schedulebot", appointment.id);
    let dtstart = appointment.start.format(ICS_TS);
    let dtend = appointment.end.format(ICS_TS);
    let dtstamp = appointment.updated_at.format(ICS_TS);
    let summary = escape_text(&format!("{} with {}", appointment.subject, business_name));
    let status = match appointment.status {
        AppointmentStatus::Confirmed => "CONFIRMED",
        AppointmentStatus::Cancelled => "CANCELLED",
    };
    let reference = short_reference(&appointment.id);

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Schedulebot//Appointments//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         DESCRIPTION:Reference #{reference}\r\n\
         STATUS:{status}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}

pub fn short_reference(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn escape_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}
