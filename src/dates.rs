use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDateTime, ParseError};

/// Normalize an ISO-8601 timestamp into a form chrono's RFC 3339 parser
/// accepts:
/// - a trailing `Z` designator becomes an explicit `+00:00` offset
/// - a compact `±HHMM` offset (the format the TickTick API itself emits)
///   becomes `±HH:MM`
pub fn normalize_timestamp(value: &str) -> Cow<'_, str> {
    if let Some(stripped) = value.strip_suffix('Z') {
        return Cow::Owned(format!("{stripped}+00:00"));
    }

    let bytes = value.as_bytes();
    if bytes.len() > 5 {
        let offset = &bytes[bytes.len() - 5..];
        if (offset[0] == b'+' || offset[0] == b'-')
            && offset[1..].iter().all(u8::is_ascii_digit)
        {
            let (head, minutes) = value.split_at(value.len() - 2);
            return Cow::Owned(format!("{head}:{minutes}"));
        }
    }

    Cow::Borrowed(value)
}

/// Parse a user-supplied timestamp, strictly.
///
/// Accepted forms are RFC 3339 timestamps (with a `Z` designator, an
/// explicit offset or a compact `±HHMM` offset) and naive
/// `YYYY-MM-DDThh:mm:ss` timestamps, which are taken as UTC. Anything else
/// is rejected rather than guessed at.
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, ParseError> {
    let normalized = normalize_timestamp(value);

    if let Ok(datetime) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(datetime);
    }

    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc().fixed_offset())
}
