use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use chrono::{
    DateTime, Datelike, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, SecondsFormat,
    TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use regex::Regex;

const TIMEZONE_ENV_VAR: &str = "PROREMINDER_TIMEZONE";

/// Offset-less layouts written by date pickers. Interpreted in the project zone.
const LOCAL_LAYOUTS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

static PROJECT_TZ: OnceLock<Option<Tz>> = OnceLock::new();

/// Pins the zone used for offset-less timestamps. The environment variable wins
/// over `configured`; the first call (or first lookup) fixes the value for the
/// rest of the process.
pub fn configure_project_timezone(configured: Option<&str>) {
    let resolved = resolve_project_timezone(configured);
    if PROJECT_TZ.set(resolved).is_err() {
        tracing::debug!("project timezone already resolved; ignoring reconfiguration");
    }
}

/// `None` means the system local zone.
pub fn project_timezone() -> Option<&'static Tz> {
    PROJECT_TZ
        .get_or_init(|| resolve_project_timezone(None))
        .as_ref()
}

fn resolve_project_timezone(configured: Option<&str>) -> Option<Tz> {
    if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR)
        && let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR)
    {
        return Some(tz);
    }

    configured.and_then(|raw| parse_timezone(raw, "rc:timezone"))
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured project timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(
                source,
                timezone = %trimmed,
                error = %err,
                "failed to parse timezone id"
            );
            None
        }
    }
}

/// Formats an instant in the project zone.
pub fn format_local(dt: DateTime<Utc>, fmt: &str) -> String {
    match project_timezone() {
        Some(tz) => dt.with_timezone(tz).format(fmt).to_string(),
        None => dt.with_timezone(&Local).format(fmt).to_string(),
    }
}

fn local_naive_now(now: DateTime<Utc>) -> NaiveDateTime {
    match project_timezone() {
        Some(tz) => now.with_timezone(tz).naive_local(),
        None => now.with_timezone(&Local).naive_local(),
    }
}

fn to_utc_from_project_local(
    local_naive: NaiveDateTime,
    context: &str,
) -> anyhow::Result<DateTime<Utc>> {
    match project_timezone() {
        Some(tz) => pick_local(tz.from_local_datetime(&local_naive), context),
        None => pick_local(Local.from_local_datetime(&local_naive), context),
    }
}

/// Lenient variant for stored values: a wall-clock time skipped by a DST
/// transition is moved forward by an hour instead of failing the load.
fn stored_from_project_local(
    local_naive: NaiveDateTime,
    context: &str,
) -> anyhow::Result<DateTime<Utc>> {
    match project_timezone() {
        Some(tz) => resolve_stored_local(tz, local_naive, context),
        None => resolve_stored_local(&Local, local_naive, context),
    }
}

fn resolve_stored_local<Z: TimeZone>(
    tz: &Z,
    local_naive: NaiveDateTime,
    context: &str,
) -> anyhow::Result<DateTime<Utc>> {
    match tz.from_local_datetime(&local_naive) {
        LocalResult::None => {
            tracing::warn!(
                context,
                local = %local_naive,
                "stored local datetime falls in a DST gap; shifting forward one hour"
            );
            pick_local(
                tz.from_local_datetime(&(local_naive + Duration::hours(1))),
                context,
            )
        }
        other => pick_local(other, context),
    }
}

fn pick_local<Z: TimeZone>(
    result: LocalResult<DateTime<Z>>,
    context: &str,
) -> anyhow::Result<DateTime<Utc>> {
    match result {
        LocalResult::Single(local_dt) => Ok(local_dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => {
            tracing::warn!(context, "ambiguous local datetime; using earliest");
            let chosen = if first <= second { first } else { second };
            Ok(chosen.with_timezone(&Utc))
        }
        LocalResult::None => Err(anyhow!(
            "local datetime does not exist in configured timezone: {context}"
        )),
    }
}

/// Parses a stored timestamp: RFC 3339, or one of the offset-less layouts in the
/// project zone.
pub fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let token = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in LOCAL_LAYOUTS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(token, fmt) {
            return stored_from_project_local(ndt, fmt);
        }
    }

    Err(anyhow!("unrecognized timestamp: {raw}"))
}

#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(input: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let token = input.trim();
    let lower = token.to_ascii_lowercase();

    match lower.as_str() {
        "now" => return Ok(now),
        "today" => {
            let midnight = local_naive_now(now)
                .date()
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| anyhow!("failed to construct midnight for today"))?;
            return to_utc_from_project_local(midnight, "today");
        }
        "tomorrow" => {
            let today = parse_date_expr("today", now)?;
            return Ok(today + Duration::days(1));
        }
        _ => {}
    }

    if let Some(target_weekday) = parse_weekday_name(&lower) {
        let target_date = next_weekday_date(local_naive_now(now).date(), target_weekday);
        let midnight = target_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("failed to construct weekday midnight"))?;
        return to_utc_from_project_local(midnight, "weekday-name");
    }

    if let Some((hour, minute)) = parse_clock_time(token) {
        let local_now = local_naive_now(now);
        let mut day = local_now.date();
        let candidate = day
            .and_hms_opt(hour, minute, 0)
            .ok_or_else(|| anyhow!("failed to construct clock time candidate"))?;
        if candidate <= local_now {
            day = day
                .checked_add_signed(Duration::days(1))
                .ok_or_else(|| anyhow!("failed to advance to next day"))?;
        }
        let next_candidate = day
            .and_hms_opt(hour, minute, 0)
            .ok_or_else(|| anyhow!("failed to construct next clock time candidate"))?;
        return to_utc_from_project_local(next_candidate, "clock-time");
    }

    if let Some(target_month) = parse_month_name(&lower) {
        let local_now = local_naive_now(now);
        let mut year = local_now.year();
        let this_year = month_start(year, target_month)?;
        if this_year <= local_now {
            year = year.saturating_add(1);
        }
        return to_utc_from_project_local(month_start(year, target_month)?, "month-name");
    }

    let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

    if let Some(caps) = rel_re.captures(token) {
        let sign = caps
            .name("sign")
            .map(|m| m.as_str())
            .ok_or_else(|| anyhow!("missing relative sign"))?;
        let num: i64 = caps
            .name("num")
            .map(|m| m.as_str())
            .ok_or_else(|| anyhow!("missing relative amount"))?
            .parse()
            .context("invalid relative number")?;
        let unit = caps
            .name("unit")
            .map(|m| m.as_str())
            .ok_or_else(|| anyhow!("missing relative unit"))?;

        let duration = match unit {
            "d" => Duration::days(num),
            "h" => Duration::hours(num),
            "m" => Duration::minutes(num),
            _ => return Err(anyhow!("unknown relative unit: {unit}")),
        };

        return Ok(if sign == "-" {
            now - duration
        } else {
            now + duration
        });
    }

    if let Ok(date) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("failed to construct midnight for date"))?;
        return to_utc_from_project_local(midnight, "date");
    }

    parse_timestamp(token).with_context(|| {
        "supported formats: now/today/tomorrow, weekday names (e.g. monday), \
         month names (e.g. march), clock times (e.g. 3:23pm or 15:23), \
         +Nd/+Nh/+Nm, RFC3339, YYYY-MM-DD, YYYY-MM-DDTHH:MM, YYYY-MM-DD HH:MM"
    })
}

fn month_start(year: i32, month: u32) -> anyhow::Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| anyhow!("invalid month/year candidate: {year}-{month}"))?
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("failed to construct month midnight"))
}

fn parse_weekday_name(token: &str) -> Option<Weekday> {
    match token.trim() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn next_weekday_date(from: NaiveDate, target: Weekday) -> NaiveDate {
    let from_idx = from.weekday().num_days_from_monday() as i64;
    let target_idx = target.num_days_from_monday() as i64;
    let mut delta = (7 + target_idx - from_idx) % 7;
    if delta == 0 {
        delta = 7;
    }
    from.checked_add_signed(Duration::days(delta))
        .unwrap_or(from)
}

fn parse_clock_time(token: &str) -> Option<(u32, u32)> {
    let clock_re =
        Regex::new(r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$").ok()?;
    let captures = clock_re.captures(token.trim())?;

    let raw_hour = captures.name("hour")?.as_str().parse::<u32>().ok()?;
    let minute = captures.name("minute")?.as_str().parse::<u32>().ok()?;
    if minute > 59 {
        return None;
    }

    let hour = if let Some(ampm) = captures.name("ampm") {
        if raw_hour == 0 || raw_hour > 12 {
            return None;
        }
        match ampm.as_str().to_ascii_lowercase().as_str() {
            "am" if raw_hour == 12 => 0,
            "am" => raw_hour,
            "pm" if raw_hour == 12 => 12,
            "pm" => raw_hour + 12,
            _ => return None,
        }
    } else {
        if raw_hour > 23 {
            return None;
        }
        raw_hour
    };

    Some((hour, minute))
}

fn parse_month_name(token: &str) -> Option<u32> {
    match token.trim() {
        "january" | "jan" => Some(1),
        "february" | "feb" => Some(2),
        "march" | "mar" => Some(3),
        "april" | "apr" => Some(4),
        "may" => Some(5),
        "june" | "jun" => Some(6),
        "july" | "jul" => Some(7),
        "august" | "aug" => Some(8),
        "september" | "sep" | "sept" => Some(9),
        "october" | "oct" => Some(10),
        "november" | "nov" => Some(11),
        "december" | "dec" => Some(12),
        _ => None,
    }
}

/// Serde adapter for stored timestamps: writes RFC 3339 with millisecond
/// precision and a `Z` suffix, reads anything [`parse_timestamp`] accepts.
pub mod iso_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{SecondsFormat, parse_timestamp};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }

    /// `null`, a missing field and `""` all read as `None`.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        use super::super::parse_timestamp;

        pub fn serialize<S>(dt: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match dt {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => parse_timestamp(&raw)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use chrono_tz::America::New_York;

    use super::{format_local, parse_date_expr, parse_timestamp, resolve_stored_local};

    #[test]
    fn relative_offsets_are_zone_independent() {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 17, 12, 0, 0)
            .single()
            .expect("valid now");
        assert_eq!(
            parse_date_expr("+2h", now).expect("parse relative"),
            now + Duration::hours(2)
        );
        assert_eq!(
            parse_date_expr("-1d", now).expect("parse relative"),
            now - Duration::days(1)
        );
        assert_eq!(parse_date_expr("now", now).expect("parse now"), now);
    }

    #[test]
    fn clock_time_lands_in_the_next_day_window() {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 17, 23, 0, 0)
            .single()
            .expect("valid now");
        let parsed = parse_date_expr("3:23pm", now).expect("parse clock time");
        assert!(parsed > now);
        assert!(parsed <= now + Duration::days(1));
        assert_eq!(format_local(parsed, "%H:%M"), "15:23");
    }

    #[test]
    fn tomorrow_is_after_now() {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 17, 12, 0, 0)
            .single()
            .expect("valid now");
        let parsed = parse_date_expr("tomorrow", now).expect("parse tomorrow");
        assert!(parsed > now);
        assert_eq!(format_local(parsed, "%H:%M"), "00:00");
    }

    #[test]
    fn stored_timestamps_accept_rfc3339_and_picker_output() {
        let exact = parse_timestamp("2026-03-01T09:30:00.000Z").expect("rfc3339");
        assert_eq!(
            exact,
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0)
                .single()
                .expect("valid")
        );

        let picker = parse_timestamp("2026-03-01T09:30:00").expect("picker layout");
        assert_eq!(format_local(picker, "%Y-%m-%d %H:%M"), "2026-03-01 09:30");

        assert!(parse_timestamp("next blue moon").is_err());
    }

    #[test]
    fn stored_time_in_a_dst_gap_moves_forward() {
        // 02:30 on 2026-03-08 never happens in New York.
        let skipped = NaiveDate::from_ymd_opt(2026, 3, 8)
            .and_then(|d| d.and_hms_opt(2, 30, 0))
            .expect("valid naive");
        let resolved = resolve_stored_local(&New_York, skipped, "test").expect("gap resolves");
        assert_eq!(
            resolved,
            Utc.with_ymd_and_hms(2026, 3, 8, 7, 30, 0)
                .single()
                .expect("valid")
        );

        let ordinary = NaiveDate::from_ymd_opt(2026, 3, 9)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .expect("valid naive");
        assert_eq!(
            resolve_stored_local(&New_York, ordinary, "test").expect("ordinary"),
            Utc.with_ymd_and_hms(2026, 3, 9, 13, 0, 0)
                .single()
                .expect("valid")
        );
    }

    #[test]
    fn unknown_expression_is_an_error() {
        let now = Utc::now();
        let err = parse_date_expr("someday maybe", now).expect_err("should fail");
        assert!(format!("{err:#}").contains("supported formats"));
    }
}
