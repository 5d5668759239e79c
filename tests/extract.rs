use btsmarthub2_exporter::{extract, Connectivity, ErrorKind, Field, PollState};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::PathBuf;

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

#[test]
fn connected_fixture() {
    let result = extract(&fixture("connected.xml"), 200);

    assert!(result.is_good(), "{:?}", result.errors);
    assert_eq!(result.connectivity, Connectivity::Connected);
    assert_eq!(result.connection_uptime_seconds, 462385);
    assert_eq!(result.system_uptime_seconds, 973412);
    assert_eq!(
        (result.upload_rate_bps, result.download_rate_bps),
        (18567000, 65059000)
    );
    assert_eq!(
        (result.download_bytes_total, result.upload_bytes_total),
        (67192513981, 14457964544)
    );
}

#[test]
fn disconnected_fixture_ignores_remaining_nodes() {
    let result = extract(&fixture("disconnected.xml"), 200);

    assert_eq!(result.state, PollState::Disconnected);
    assert_eq!(result.connectivity, Connectivity::Disconnected);
    assert_eq!(result.connection_uptime_seconds, 0);
    // sysuptime is present in the document but never read.
    assert_eq!(result.system_uptime_seconds, 0);
    assert!(result.errors.is_empty());
}

#[test]
fn ambiguous_fixture_reports_rate_only() {
    let result = extract(&fixture("ambiguous.xml"), 200);

    assert_eq!(result.state, PollState::Connected);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].field(), Some(Field::StatusRate));
    assert_eq!(result.errors[0].kind(), ErrorKind::Ambiguous);
    assert_eq!(result.connection_uptime_seconds, 3600);
    assert_eq!(result.download_bytes_total, 200);
    assert_eq!(result.upload_bytes_total, 100);
}

#[test]
fn truncated_fixture_is_parse_failure() {
    let result = extract(&fixture("truncated.xml"), 200);

    assert_eq!(result.state, PollState::ParseFailed);
    assert_eq!(result.decode_error().map(|e| e.kind()), Some(ErrorKind::ParseFailure));
    assert_eq!(result.connectivity, Connectivity::Unknown);
}

#[test]
fn unclosed_fixture_is_parse_failure() {
    let result = extract(&fixture("unclosed.xml"), 200);

    assert_eq!(result.state, PollState::ParseFailed);
    assert!(!result.is_good());
    assert_eq!(result.decode_error().map(|e| e.kind()), Some(ErrorKind::ParseFailure));
    assert_eq!(result.download_bytes_total, 0);
}

#[test]
fn empty_body_is_structural() {
    let result = extract("", 404);

    assert_eq!(result.state, PollState::StructuralError);
    assert_eq!(result.status_code, Some(404));
    assert_eq!(result.decode_error().map(|e| e.kind()), Some(ErrorKind::Structural));
}

#[test]
fn extraction_is_repeatable() {
    let body = fixture("ambiguous.xml");
    assert_eq!(extract(&body, 200), extract(&body, 200));
}
