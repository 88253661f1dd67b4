//! Parser for the relative-time grammar: `[±]<int>(d|h|m|s){1,4}`.
//!
//! Components may appear in any order, at most one of each unit, and the sign (if present)
//! applies to the whole expression. `-1d12h30m` and `+30m1d` both parse; `1d1d` and the empty
//! string do not.

use crate::Error;
use chrono::Duration;

/// Parses a relative-time expression such as `-1d12h30m` into a signed [`chrono::Duration`].
pub fn parse_relative(expr: &str) -> Result<Duration, Error> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(Error::Configuration(
            "relative time expression must not be empty".into(),
        ));
    }

    let (sign, rest) = match expr.as_bytes()[0] {
        b'+' => (1i64, &expr[1..]),
        b'-' => (-1i64, &expr[1..]),
        _ => (1i64, expr),
    };

    if rest.is_empty() {
        return Err(Error::Configuration(format!(
            "invalid relative time expression: {expr}"
        )));
    }

    let mut seen = [false; 4]; // d, h, m, s
    let mut total = Duration::zero();
    let mut digits = String::new();

    for c in rest.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        if digits.is_empty() {
            return Err(Error::Configuration(format!(
                "invalid relative time expression: {expr}"
            )));
        }
        let n: i64 = digits.parse().map_err(|_| {
            Error::Configuration(format!("invalid relative time expression: {expr}"))
        })?;
        digits.clear();

        let (idx, unit) = match c {
            'd' => (0, Duration::days(n)),
            'h' => (1, Duration::hours(n)),
            'm' => (2, Duration::minutes(n)),
            's' => (3, Duration::seconds(n)),
            _ => {
                return Err(Error::Configuration(format!(
                    "invalid relative time expression: {expr}"
                )))
            }
        };
        if seen[idx] {
            return Err(Error::Configuration(format!(
                "duplicate unit in relative time expression: {expr}"
            )));
        }
        seen[idx] = true;
        total += unit;
    }

    if !digits.is_empty() {
        // trailing digits with no unit suffix
        return Err(Error::Configuration(format!(
            "invalid relative time expression: {expr}"
        )));
    }
    if !seen.iter().any(|b| *b) {
        return Err(Error::Configuration(format!(
            "invalid relative time expression: {expr}"
        )));
    }

    Ok(total * (sign as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_unit() {
        assert_eq!(parse_relative("1d").unwrap(), Duration::days(1));
    }

    #[test]
    fn parses_multiple_units_any_order() {
        let d = parse_relative("-1d12h30m").unwrap();
        assert_eq!(
            d,
            -(Duration::days(1) + Duration::hours(12) + Duration::minutes(30))
        );
        let d2 = parse_relative("30m1d").unwrap();
        assert_eq!(d2, Duration::minutes(30) + Duration::days(1));
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_relative("").is_err());
    }

    #[test]
    fn rejects_duplicate_unit() {
        assert!(parse_relative("1d1d").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_relative("abc").is_err());
        assert!(parse_relative("+").is_err());
    }

    #[test]
    fn plus_sign_is_explicit_positive() {
        assert_eq!(parse_relative("+2h").unwrap(), Duration::hours(2));
    }
}
