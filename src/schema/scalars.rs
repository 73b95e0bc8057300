/// Custom GraphQL scalar types
///
/// Input validation for the scalars PostgreSQL columns map to. Output values
/// are produced by SQL already in their wire format and pass through untouched.

use async_graphql::dynamic::Scalar;
use async_graphql::Value;
use chrono::{DateTime as ChronoDateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Register custom scalars in the schema builder
pub fn register_custom_scalars() -> Vec<Scalar> {
    vec![
        bigint_scalar(),
        bigfloat_scalar(),
        date_scalar(),
        datetime_scalar(),
        time_scalar(),
        uuid_scalar(),
        json_scalar(),
        cursor_scalar(),
    ]
}

/// 64 bit integer, serialized as a string
fn bigint_scalar() -> Scalar {
    Scalar::new("BigInt")
        .description("A signed eight-byte integer, serialized as a string")
        .validator(|value| match value {
            Value::String(s) => s.parse::<i64>().is_ok(),
            Value::Number(n) => n.is_i64(),
            _ => false,
        })
}

/// Arbitrary precision decimal, serialized as a string
fn bigfloat_scalar() -> Scalar {
    Scalar::new("BigFloat")
        .description("An arbitrary precision decimal, serialized as a string")
        .validator(|value| match value {
            Value::String(s) => is_decimal(s),
            Value::Number(_) => true,
            _ => false,
        })
}

/// ISO 8601 date scalar (YYYY-MM-DD)
fn date_scalar() -> Scalar {
    Scalar::new("Date")
        .description("ISO 8601 date format (YYYY-MM-DD)")
        .validator(|value| {
            if let Value::String(s) = value {
                NaiveDate::parse_from_str(s.as_str(), "%Y-%m-%d").is_ok()
            } else {
                false
            }
        })
}

/// ISO 8601 datetime, with or without a timezone
fn datetime_scalar() -> Scalar {
    Scalar::new("Datetime")
        .description("ISO 8601 datetime, with or without timezone")
        .validator(|value| {
            if let Value::String(s) = value {
                is_datetime(s)
            } else {
                false
            }
        })
}

fn time_scalar() -> Scalar {
    Scalar::new("Time")
        .description("Time of day (HH:MM:SS[.ffffff]), optionally with an offset")
        .validator(|value| {
            if let Value::String(s) = value {
                let local = s.split(['+', '-', 'Z']).next().unwrap_or_default();
                NaiveTime::parse_from_str(local, "%H:%M:%S%.f").is_ok()
                    || NaiveTime::parse_from_str(local, "%H:%M").is_ok()
            } else {
                false
            }
        })
}

fn uuid_scalar() -> Scalar {
    Scalar::new("UUID")
        .description("A universally unique identifier")
        .validator(|value| matches!(value, Value::String(s) if is_uuid(s)))
}

fn json_scalar() -> Scalar {
    Scalar::new("JSON").description("An arbitrary JSON value")
}

fn cursor_scalar() -> Scalar {
    Scalar::new("Cursor")
        .description("An opaque pagination cursor")
        .validator(|value| matches!(value, Value::String(_)))
}

fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    (!whole.is_empty() || !fraction.is_empty())
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit())
}

fn is_datetime(s: &str) -> bool {
    ChronoDateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}

fn is_uuid(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_registration() {
        let scalars = register_custom_scalars();
        assert_eq!(scalars.len(), 8);
    }

    #[test]
    fn test_decimal_validation() {
        assert!(is_decimal("12.50"));
        assert!(is_decimal("-3"));
        assert!(is_decimal(".5"));
        assert!(!is_decimal("1e5"));
        assert!(!is_decimal(""));
        assert!(!is_decimal("abc"));
    }

    #[test]
    fn test_datetime_validation() {
        assert!(is_datetime("2024-01-15T10:00:00Z"));
        assert!(is_datetime("2024-01-15T10:00:00+02:00"));
        assert!(is_datetime("2024-01-15T10:00:00.123"));
        assert!(is_datetime("2024-01-15 10:00:00"));
        assert!(!is_datetime("not-a-datetime"));
    }

    #[test]
    fn test_date_validation() {
        assert!(NaiveDate::parse_from_str("2024-01-15", "%Y-%m-%d").is_ok());
        assert!(NaiveDate::parse_from_str("invalid-date", "%Y-%m-%d").is_err());
    }

    #[test]
    fn test_uuid_validation() {
        assert!(is_uuid("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"));
        assert!(!is_uuid("a0eebc99-9c0b-4ef8-bb6d"));
        assert!(!is_uuid("g0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"));
    }
}
