//! RFC 3339 parsing and the canonical text form used by `knit#timestamp`.

use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};

/// Parse an RFC 3339 instant. Accepts both `Z` and numeric offsets.
pub(crate) fn parse(value: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(value, &Rfc3339)
}

/// Canonical text form of an instant: UTC offset, microsecond resolution.
///
/// Two values naming the same instant always canonicalize to the same string,
/// which is what makes byte equality of tags coincide with instant equality.
pub(crate) fn canonical(at: OffsetDateTime) -> Result<String, time::error::Format> {
    let utc = at.to_offset(UtcOffset::UTC);
    let truncated = utc
        .replace_nanosecond(utc.nanosecond() / 1_000 * 1_000)
        .unwrap_or(utc);
    truncated.format(&Rfc3339)
}

/// Canonicalize an RFC 3339 string, or report that it does not parse.
pub(crate) fn canonicalize(value: &str) -> Option<String> {
    let at = parse(value).ok()?;
    canonical(at).ok()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    #[test]
    fn same_instant_in_different_offsets_canonicalize_identically() {
        let a = super::canonicalize("2022-07-15T12:34:56.888+00:00").unwrap();
        let b = super::canonicalize("2022-07-15T09:34:56.888-03:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_truncates_to_microseconds() {
        let a = super::canonical(datetime!(2022-07-15 12:34:56.123456789 UTC)).unwrap();
        let b = super::canonical(datetime!(2022-07-15 12:34:56.123456111 UTC)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unparseable_value_is_reported() {
        assert!(super::canonicalize("some day, surely").is_none());
    }
}
