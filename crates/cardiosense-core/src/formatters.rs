//! es-CL display formatting.

use chrono::{DateTime, Locale, NaiveDate, NaiveTime, TimeZone, Utc};

const LOCALE: Locale = Locale::es_CL;

/// "18 de octubre de 2026"
pub fn format_date(date: NaiveDate) -> String {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
        .format_localized("%-d de %B de %Y", LOCALE)
        .to_string()
}

/// "18 de octubre de 2026, 09:05"
pub fn format_date_time(ts: DateTime<Utc>) -> String {
    ts.format_localized("%-d de %B de %Y, %H:%M", LOCALE).to_string()
}

/// "18-10-2026"
pub fn format_short_date(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// Fraction to percent: `0.452` -> "45.2%".
pub fn format_percentage(value: f64, decimals: usize) -> String {
    format!("{:.*}%", decimals, value * 100.0)
}

pub fn format_number(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value)
}
