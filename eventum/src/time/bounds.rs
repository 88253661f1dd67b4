//! Resolves a producer's configured `start`/`end` fields (§4.1) into concrete [`Timestamp`]s.
//!
//! Every producer accepts `start`/`end` as one of: an absolute datetime, a human expression
//! (`"in 2 hours"`, `"yesterday"`), a relative expression (`+1d12h`), or — for `end` only — the
//! literal keyword `never`. An empty/absent `start` defaults to "now" in live mode and to
//! `DateTime::MIN` in sample mode; `end <= start` is a configuration error.

use crate::model::Timestamp;
use crate::time::relative::parse_relative;
use crate::Error;
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};

/// Whether a producer is being resolved for sample or live generation. Affects the default for
/// an absent `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Generate a finite batch as fast as possible.
    Sample,
    /// Release timestamps in real time.
    Live,
}

/// A producer's resolved, concrete time range.
#[derive(Clone, Copy, Debug)]
pub struct Bounds {
    /// Resolved start instant.
    pub start: Timestamp,
    /// Resolved end instant, or `None` for the literal `never`.
    pub end: Option<Timestamp>,
}

impl Bounds {
    /// Resolves `start`/`end` strings into a validated [`Bounds`], rejecting `end <= start` and
    /// rejecting an open-ended (`never`) end in sample mode, since sample generation requires a
    /// finite range (§4.1).
    pub fn resolve(start: Option<&str>, end: Option<&str>, mode: Mode) -> Result<Bounds, Error> {
        let start = resolve_start(start, mode)?;
        let end = resolve_end(end, start, mode)?;
        if mode == Mode::Sample && end.is_none() {
            return Err(Error::Configuration(
                "sample mode requires a finite end; `never` is only valid in live mode".into(),
            ));
        }
        Ok(Bounds { start, end })
    }
}

/// Resolves a `start` field. An absent or empty value defaults to "now" in live mode, and to
/// the minimum representable datetime in sample mode (§4.1).
pub fn resolve_start(raw: Option<&str>, mode: Mode) -> Result<Timestamp, Error> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(match mode {
            Mode::Live => Timestamp::now(),
            Mode::Sample => Timestamp(i64::MIN / 2),
        }),
        Some(s) => parse_instant(s),
    }
}

/// Resolves an `end` field relative to an already-resolved `start`. Returns `None` for the
/// literal `never`. Rejects `end <= start`.
pub fn resolve_end(raw: Option<&str>, start: Timestamp, _mode: Mode) -> Result<Option<Timestamp>, Error> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("never") => Ok(None),
        Some(s) => {
            let end = parse_instant(s)?;
            if end <= start {
                return Err(Error::Configuration(format!(
                    "end ({end}) must be after start ({start})"
                )));
            }
            Ok(Some(end))
        }
    }
}

/// Parses a single instant: absolute datetime, relative expression, or a small set of human
/// expressions (`now`, `today`, `yesterday`, `tomorrow`, `in N <unit>`, `N <unit> ago`).
fn parse_instant(s: &str) -> Result<Timestamp, Error> {
    let now = Utc::now().naive_utc();

    if s.eq_ignore_ascii_case("now") {
        return Ok(Timestamp::from_naive(now));
    }
    if s.eq_ignore_ascii_case("today") {
        return Ok(Timestamp::from_naive(now.date().and_hms_opt(0, 0, 0).unwrap()));
    }
    if s.eq_ignore_ascii_case("yesterday") {
        return Ok(Timestamp::from_naive(
            (now.date() - Duration::days(1)).and_hms_opt(0, 0, 0).unwrap(),
        ));
    }
    if s.eq_ignore_ascii_case("tomorrow") {
        return Ok(Timestamp::from_naive(
            (now.date() + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap(),
        ));
    }

    if let Some(rest) = s.strip_prefix("in ") {
        let dur = parse_human_duration(rest)?;
        return Ok(Timestamp::from_naive(now + dur));
    }
    if let Some(rest) = s.strip_suffix(" ago") {
        let dur = parse_human_duration(rest)?;
        return Ok(Timestamp::from_naive(now - dur));
    }

    // Absolute datetime: RFC3339, then a couple of common naive formats.
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(Timestamp(dt.timestamp_micros()));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Timestamp::from_naive(dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(Timestamp::from_naive(d.and_hms_opt(0, 0, 0).unwrap()));
        }
    }

    // Relative expression, e.g. `-1d12h30m`.
    if let Ok(dur) = parse_relative(s) {
        return Ok(Timestamp::from_naive(now + dur));
    }

    Err(Error::Configuration(format!(
        "unable to parse time expression: {s}"
    )))
}

/// Parses `"2 hours"`, `"30 minutes"`, `"1 day"` style human duration phrases.
fn parse_human_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    let mut parts = s.splitn(2, char::is_whitespace);
    let n: i64 = parts
        .next()
        .ok_or_else(|| Error::Configuration(format!("invalid duration phrase: {s}")))?
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid duration phrase: {s}")))?;
    let unit = parts
        .next()
        .ok_or_else(|| Error::Configuration(format!("invalid duration phrase: {s}")))?
        .trim()
        .trim_end_matches('s');

    Ok(match unit {
        "second" | "sec" => Duration::seconds(n),
        "minute" | "min" => Duration::minutes(n),
        "hour" | "hr" => Duration::hours(n),
        "day" => Duration::days(n),
        "week" => Duration::weeks(n),
        _ => {
            return Err(Error::Configuration(format!(
                "unrecognised duration unit: {unit}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_start_sample_is_min() {
        let b = resolve_start(None, Mode::Sample).unwrap();
        assert!(b.as_micros() < 0);
    }

    #[test]
    fn default_start_live_is_now() {
        let before = Timestamp::now();
        let b = resolve_start(None, Mode::Live).unwrap();
        assert!(b.as_micros() >= before.as_micros());
    }

    #[test]
    fn never_end_only_resolvable_in_live() {
        let start = Timestamp::now();
        assert!(resolve_end(Some("never"), start, Mode::Live)
            .unwrap()
            .is_none());
        assert!(Bounds::resolve(None, Some("never"), Mode::Sample).is_err());
    }

    #[test]
    fn end_before_start_is_rejected() {
        let err = Bounds::resolve(
            Some("2024-01-02T00:00:00Z"),
            Some("2024-01-01T00:00:00Z"),
            Mode::Sample,
        );
        assert!(err.is_err());
    }

    #[test]
    fn absolute_range_resolves() {
        let b = Bounds::resolve(
            Some("2024-01-01T00:00:00Z"),
            Some("2024-01-01T23:59:59Z"),
            Mode::Sample,
        )
        .unwrap();
        assert!(b.end.unwrap() > b.start);
    }

    #[test]
    fn relative_expression_resolves() {
        let i = parse_instant("-1h").unwrap();
        assert!(i.as_micros() <= Timestamp::now().as_micros());
    }

    #[test]
    fn human_phrase_resolves() {
        assert!(parse_instant("yesterday").is_ok());
        assert!(parse_instant("in 2 hours").is_ok());
        assert!(parse_instant("2 hours ago").is_ok());
    }
}
