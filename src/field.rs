//! Field decoding for the hub's status XML.
//!
//! Every interesting value in `wan_conn.xml` lives in a `value` attribute
//! that is percent-encoded, and most of them are pseudo-arrays of quoted,
//! `;`-separated integer rows:
//!
//! ```text
//! [['0%3B0%3B0%3B0'], ['18567000%3B65059000%3B0%3B0'], ['0%3B0%3B0%3B0'], null]
//! ```
//!
//! Only one row is expected to be "live" (non-zero); the others are zero
//! placeholders for the hub's inactive WAN interfaces.
//!
//! # Decoding Process
//!
//! 1. Percent-decode the attribute (query unescape semantics, `+` is a space)
//! 2. Strip embedded line breaks
//! 3. Split into candidate rows: maximal runs of characters other than `[` and `]`
//! 4. Skip separators, `null` and all-zero rows
//! 5. Parse the single remaining row as exactly `arity` integers
//!
//! # Example
//!
//! ```
//! use btsmarthub2_exporter::field::{decode_status_rate, Rates};
//!
//! let rates = decode_status_rate("[['0%3B0%3B0%3B0'], ['18567000%3B65059000%3B0%3B0'], null]").unwrap();
//! assert_eq!(rates, Rates { upload_bps: 18567000, download_bps: 65059000 });
//! ```

use serde::Serialize;

use crate::error::DecodeError;

/// Number of values in a `status_rate` row: up, down and two reserved slots.
pub const RATE_ARITY: usize = 4;

/// Number of values in a `wan_conn_volume_list` row: total, download, upload.
pub const VOLUME_ARITY: usize = 3;

/// One live row decoded from a bracketed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRow(Vec<u64>);

impl DecodedRow {
    /// The canonical all-zero row returned when a field has no live row.
    pub fn zero(arity: usize) -> Self {
        DecodedRow(vec![0; arity])
    }

    pub fn values(&self) -> &[u64] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0)
    }
}

/// Line throughput decoded from `status_rate`, in bits per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rates {
    pub upload_bps: u64,
    pub download_bps: u64,
}

/// Byte counters decoded from `wan_conn_volume_list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Volumes {
    pub total_bytes: u64,
    pub download_bytes: u64,
    pub upload_bytes: u64,
}

/// The decoded `link_status` value, split on its type prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// `connected;<medium>;<uptime>`. The uptime is left unscanned so a bad
    /// integer can be reported without losing the connected state.
    Connected { medium: String, uptime: String },

    /// `disconnected;<medium>;...`
    Disconnected { medium: String },

    /// Anything else, kept verbatim for logging.
    Unrecognized(String),
}

/// Percent-decodes a raw attribute value.
///
/// Follows query unescape semantics: `+` becomes a space and every `%` must
/// be followed by two hex digits. The decoded bytes must be valid UTF-8.
///
/// # Returns
/// - `Ok(String)` with the decoded text
/// - `Err(DecodeError::Encoding)` for a truncated or non-hex escape, or
///   when the decoded bytes are not UTF-8
pub fn query_unescape(raw: &str) -> Result<String, DecodeError> {
    let bytes = raw.as_bytes();
    let mut pos = 0;
    while let Some(offset) = raw[pos..].find('%') {
        let at = pos + offset;
        match bytes.get(at + 1..at + 3) {
            Some(hex) if hex.iter().all(u8::is_ascii_hexdigit) => pos = at + 3,
            _ => {
                return Err(DecodeError::Encoding(format!(
                    "invalid escape at byte {} in '{}'",
                    at, raw
                )));
            }
        }
    }

    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| DecodeError::Encoding(e.to_string()))
}

/// Percent-decodes a value and removes the line breaks the hub sprinkles
/// into long attributes.
pub fn normalize(raw: &str) -> Result<String, DecodeError> {
    let mut text = query_unescape(raw)?;
    text.retain(|c| c != '\n' && c != '\r');
    Ok(text)
}

/// Splits a decoded value into candidate rows.
///
/// Yields every maximal run of characters that contains neither `[` nor `]`,
/// so array nesting is flattened away and separators such as `, ` and
/// `, null` come out as candidates of their own.
///
/// ```
/// use btsmarthub2_exporter::field::bracket_segments;
///
/// let segments: Vec<&str> = bracket_segments("[['1;2'], null]").collect();
/// assert_eq!(segments, vec!["'1;2'", ", null"]);
/// ```
pub fn bracket_segments(text: &str) -> impl Iterator<Item = &str> {
    text.split(['[', ']']).filter(|segment| !segment.is_empty())
}

/// Scans a strict unsigned decimal integer (no sign, no whitespace).
pub fn parse_integer(text: &str) -> Result<u64, DecodeError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::Format(text.to_string()));
    }
    text.parse()
        .map_err(|_| DecodeError::Format(text.to_string()))
}

/// Decodes a bracketed pseudo-array field into its single live row.
///
/// # Arguments
/// * `raw` - The attribute value exactly as it appears in the XML
/// * `arity` - How many `;`-separated integers a row must hold
///
/// # Returns
/// - `Ok(DecodedRow)` with the live row, or the all-zero row when every
///   candidate is a placeholder
/// - `Err(DecodeError::Encoding)` if percent-decoding fails
/// - `Err(DecodeError::Arity)` if a live row has the wrong number of values
/// - `Err(DecodeError::Format)` if a live row is not `'<int>;<int>;...'`
/// - `Err(DecodeError::Ambiguous)` if more than one live row is present
pub fn decode_bracketed_field(raw: &str, arity: usize) -> Result<DecodedRow, DecodeError> {
    let text = normalize(raw)?;
    let zero_row = zero_row_text(arity);

    let mut live: Option<(DecodedRow, &str)> = None;
    for candidate in bracket_segments(&text) {
        let candidate = candidate.trim();
        if candidate == zero_row || is_separator(candidate) {
            continue;
        }

        let row = parse_row(candidate, arity)?;
        if row.is_zero() {
            continue;
        }

        if let Some((_, first)) = &live {
            return Err(DecodeError::Ambiguous {
                first: first.to_string(),
                second: candidate.to_string(),
            });
        }
        live = Some((row, candidate));
    }

    Ok(live
        .map(|(row, _)| row)
        .unwrap_or_else(|| DecodedRow::zero(arity)))
}

/// Decodes `status_rate`. Positions 3 and 4 of the row are reserved.
pub fn decode_status_rate(raw: &str) -> Result<Rates, DecodeError> {
    let row = decode_bracketed_field(raw, RATE_ARITY)?;
    let values = row.values();
    Ok(Rates {
        upload_bps: values[0],
        download_bps: values[1],
    })
}

/// Decodes `wan_conn_volume_list`.
///
/// The hub orders the row as total, download, upload.
pub fn decode_volume_list(raw: &str) -> Result<Volumes, DecodeError> {
    let row = decode_bracketed_field(raw, VOLUME_ARITY)?;
    let values = row.values();
    Ok(Volumes {
        total_bytes: values[0],
        download_bytes: values[1],
        upload_bytes: values[2],
    })
}

/// Decodes `link_status` and classifies it by its type prefix.
pub fn decode_link_status(raw: &str) -> Result<LinkStatus, DecodeError> {
    let text = normalize(raw)?;

    if let Some(rest) = text.strip_prefix("connected;") {
        let mut parts = rest.split(';');
        let medium = parts.next().unwrap_or_default();
        // Anything after the uptime is ignored.
        let uptime = parts.next().unwrap_or_default();
        return Ok(LinkStatus::Connected {
            medium: medium.to_string(),
            uptime: uptime.to_string(),
        });
    }

    if let Some(rest) = text.strip_prefix("disconnected;") {
        let medium = rest.split(';').next().unwrap_or_default();
        return Ok(LinkStatus::Disconnected {
            medium: medium.to_string(),
        });
    }

    Ok(LinkStatus::Unrecognized(text))
}

fn zero_row_text(arity: usize) -> String {
    format!("'{}'", vec!["0"; arity].join(";"))
}

/// Commas, whitespace and the trailing `null` between rows.
fn is_separator(candidate: &str) -> bool {
    let rest = candidate.trim().trim_matches(',').trim();
    rest.is_empty() || rest == "null"
}

fn parse_row(candidate: &str, arity: usize) -> Result<DecodedRow, DecodeError> {
    let inner = candidate
        .strip_prefix('\'')
        .and_then(|c| c.strip_suffix('\''))
        .ok_or_else(|| DecodeError::Format(candidate.to_string()))?;

    let parts: Vec<&str> = inner.split(';').collect();
    if parts.len() != arity {
        return Err(DecodeError::Arity {
            expected: arity,
            found: parts.len(),
            row: candidate.to_string(),
        });
    }

    let values = parts
        .into_iter()
        .map(parse_integer)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DecodedRow(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const RATE_FIELD: &str =
        "[['0%3B0%3B0%3B0'], ['18567000%3B65059000%3B0%3B0'], ['0%3B0%3B0%3B0'], null]";
    const VOLUME_FIELD: &str =
        "[['0%3B0%3B0'], ['81650478525%3B67192513981%3B14457964544'], ['0%3B0%3B0'], null]";

    #[test]
    fn unescape_decodes_semicolons() {
        assert_eq!(query_unescape("connected%3Bvdsl%3B462385").unwrap(), "connected;vdsl;462385");
    }

    #[test]
    fn unescape_treats_plus_as_space() {
        assert_eq!(query_unescape("Profile+17a").unwrap(), "Profile 17a");
        assert_eq!(query_unescape("Profile%2017a").unwrap(), "Profile 17a");
    }

    #[test_case("100%"; "trailing percent")]
    #[test_case("%3"; "truncated escape")]
    #[test_case("%zz"; "non hex escape")]
    #[test_case("%ff"; "invalid utf8")]
    fn unescape_rejects_bad_escapes(raw: &str) {
        assert!(matches!(query_unescape(raw), Err(DecodeError::Encoding(_))));
    }

    #[test]
    fn normalize_strips_line_breaks() {
        assert_eq!(normalize("[['1%3B2'],\n\r null]").unwrap(), "[['1;2'], null]");
    }

    #[test]
    fn segments_are_runs_between_brackets() {
        let segments: Vec<&str> = bracket_segments("[['0;0'], ['5;6'], null]").collect();
        assert_eq!(segments, vec!["'0;0'", ", ", "'5;6'", ", null"]);
    }

    #[test]
    fn segments_of_plain_text() {
        let segments: Vec<&str> = bracket_segments("'1;2'").collect();
        assert_eq!(segments, vec!["'1;2'"]);
        assert_eq!(bracket_segments("[[]]").count(), 0);
    }

    #[test]
    fn decodes_rate_row() {
        let row = decode_bracketed_field("'18567000;65059000;0;0'", RATE_ARITY).unwrap();
        assert_eq!(row.values(), &[18567000, 65059000, 0, 0]);

        let rates = decode_status_rate(RATE_FIELD).unwrap();
        assert_eq!(
            rates,
            Rates {
                upload_bps: 18567000,
                download_bps: 65059000
            }
        );
    }

    #[test]
    fn decodes_volume_row_in_hub_order() {
        let volumes = decode_volume_list("'81650478525;67192513981;14457964544'").unwrap();
        assert_eq!(volumes.download_bytes, 67192513981);
        assert_eq!(volumes.upload_bytes, 14457964544);

        assert_eq!(decode_volume_list(VOLUME_FIELD).unwrap(), volumes);
    }

    #[test_case("[['0%3B0%3B0%3B0'], null]"; "single zero row")]
    #[test_case("[['0;0;0;0'], ['0;0;0;0'], null]"; "zero rows already decoded")]
    #[test_case("[['00;0;0;0'], null]"; "non canonical zero row")]
    #[test_case("[null]"; "null only")]
    #[test_case(""; "empty")]
    fn no_live_row_is_zero(raw: &str) {
        let row = decode_bracketed_field(raw, RATE_ARITY).unwrap();
        assert_eq!(row, DecodedRow::zero(RATE_ARITY));
        assert_eq!(decode_status_rate(raw).unwrap(), Rates::default());
    }

    #[test]
    fn two_live_rows_are_ambiguous() {
        let raw = "[['1%3B2%3B0%3B0'], ['3%3B4%3B0%3B0'], null]";
        assert_eq!(
            decode_bracketed_field(raw, RATE_ARITY),
            Err(DecodeError::Ambiguous {
                first: "'1;2;0;0'".to_string(),
                second: "'3;4;0;0'".to_string(),
            })
        );
    }

    #[test_case("[['1;2;3'], null]", 4, 3; "too few")]
    #[test_case("[['1;2;3;4;5'], null]", 4, 5; "too many")]
    #[test_case("[['7;8;9;10'], null]", 3, 4; "rate row in volume field")]
    fn wrong_value_count_is_arity(raw: &str, arity: usize, found: usize) {
        match decode_bracketed_field(raw, arity) {
            Err(DecodeError::Arity { expected, found: got, .. }) => {
                assert_eq!(expected, arity);
                assert_eq!(got, found);
            }
            other => panic!("expected arity error, got {:?}", other),
        }
    }

    #[test_case("[['a;b;0;0'], null]"; "letters")]
    #[test_case("[['-1;2;0;0'], null]"; "negative")]
    #[test_case("[['1; 2;0;0'], null]"; "inner space")]
    #[test_case("[[1;2;0;0], null]"; "unquoted")]
    fn non_numeric_row_is_format(raw: &str) {
        assert!(matches!(
            decode_bracketed_field(raw, RATE_ARITY),
            Err(DecodeError::Format(_))
        ));
    }

    #[test]
    fn bad_escape_is_encoding() {
        assert!(matches!(
            decode_bracketed_field("[['1%3X2']]", 2),
            Err(DecodeError::Encoding(_))
        ));
    }

    #[test]
    fn decoding_is_repeatable() {
        let first = decode_bracketed_field(VOLUME_FIELD, VOLUME_ARITY);
        let second = decode_bracketed_field(VOLUME_FIELD, VOLUME_ARITY);
        assert_eq!(first, second);

        let bad = "[['1;2;0;0'], ['3;4;0;0']]";
        assert_eq!(
            decode_bracketed_field(bad, RATE_ARITY),
            decode_bracketed_field(bad, RATE_ARITY)
        );
    }

    #[test]
    fn link_status_prefixes() {
        assert_eq!(
            decode_link_status("connected%3Bvdsl%3B462385").unwrap(),
            LinkStatus::Connected {
                medium: "vdsl".to_string(),
                uptime: "462385".to_string()
            }
        );
        assert_eq!(
            decode_link_status("disconnected%3Badsl%3B0").unwrap(),
            LinkStatus::Disconnected {
                medium: "adsl".to_string()
            }
        );
        assert_eq!(
            decode_link_status("training%3Bvdsl").unwrap(),
            LinkStatus::Unrecognized("training;vdsl".to_string())
        );
    }

    #[test]
    fn trailing_link_status_parts_are_ignored() {
        assert_eq!(
            decode_link_status("connected%3Bvdsl%3B462385%3Bx").unwrap(),
            LinkStatus::Connected {
                medium: "vdsl".to_string(),
                uptime: "462385".to_string()
            }
        );
    }

    #[test]
    fn connected_without_uptime_keeps_empty_uptime() {
        assert_eq!(
            decode_link_status("connected%3Bvdsl").unwrap(),
            LinkStatus::Connected {
                medium: "vdsl".to_string(),
                uptime: String::new()
            }
        );
    }

    #[test_case("973412", Some(973412); "digits")]
    #[test_case("", None; "empty")]
    #[test_case(" 5", None; "leading space")]
    #[test_case("+5", None; "plus sign")]
    #[test_case("12x", None; "trailing garbage")]
    #[test_case("99999999999999999999999", None; "overflow")]
    fn integer_scan(text: &str, expected: Option<u64>) {
        assert_eq!(parse_integer(text).ok(), expected);
    }
}
