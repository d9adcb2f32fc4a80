//! Golden tests - fixture-based tests that lock the stored/remote wire format
//!
//! Staged payloads are persisted as JSON and replayed to the remote store
//! verbatim, so field names and null handling must not drift between
//! releases. Any change in behavior will cause these tests to fail.
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;

use fieldsync::types::{EntityKind, LogPayload, Stageable, StagedPayload};

#[derive(Debug, Deserialize)]
struct PayloadCase {
    name: String,
    kind: String,
    stored: serde_json::Value,
    #[serde(default)]
    canonical: Option<serde_json::Value>,
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NaturalKeyCase {
    name: String,
    log: serde_json::Value,
    existing_id: String,
    fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    payloads: Vec<PayloadCase>,
    natural_keys: Vec<NaturalKeyCase>,
}

fn load_fixture() -> Fixture {
    let fixture_path = concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/payload_wire_format.json"
    );
    let content = fs::read_to_string(fixture_path).expect("Failed to read fixture file");
    serde_json::from_str(&content).expect("Failed to parse fixture JSON")
}

#[test]
fn test_payload_wire_format_golden() {
    let fixture = load_fixture();

    for case in fixture.payloads {
        let kind: EntityKind = case
            .kind
            .parse()
            .unwrap_or_else(|e| panic!("Case '{}': {}", case.name, e));

        let payload = StagedPayload::decode(kind, case.stored.clone())
            .unwrap_or_else(|e| panic!("Case '{}': decode failed: {}", case.name, e));

        assert_eq!(
            payload.owner_id(),
            case.owner.as_deref(),
            "Case '{}': owner mismatch",
            case.name
        );

        let expected = case.canonical.unwrap_or(case.stored);
        assert_eq!(
            payload.to_value().unwrap(),
            expected,
            "Case '{}': re-encoded payload differs",
            case.name
        );
    }
}

#[test]
fn test_log_natural_key_golden() {
    let fixture = load_fixture();

    for case in fixture.natural_keys {
        let log: LogPayload = serde_json::from_value(case.log.clone())
            .unwrap_or_else(|e| panic!("Case '{}': {}", case.name, e));
        let key = log
            .natural_key()
            .unwrap_or_else(|| panic!("Case '{}': logs must have a natural key", case.name));

        assert_eq!(key.existing_id(), case.existing_id, "Case '{}'", case.name);
        assert_eq!(key.fields, case.fields, "Case '{}'", case.name);
        assert!(
            key.matches(&case.log),
            "Case '{}': key must match its own payload",
            case.name
        );
    }
}
