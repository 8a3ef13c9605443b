//! Bidirectional coercion between wire documents and store-native documents.
//!
//! Callers of the facade only ever see [`serde_json::Value`]. The store speaks
//! [`bson::Bson`], which additionally carries tagged dates, UUID binaries and object ids.
//! This module bridges the two with pure, allocating recursive walks:
//!
//! - [`to_native`] sniffs every string leaf and retags dates, UUIDs and object ids.
//! - [`to_wire`] renders the tagged scalars back into their textual conventions.
//!
//! Detection is an ordered decision list (see [`StringKind::ORDER`]). The first pattern
//! that matches *and* converts wins; a string that looks like a date but is not a real
//! calendar date keeps falling down the list and, if nothing else takes it, stays a string.
//!
//! # Example
//!
//! ```ignore
//! use labstore_core::coerce::{to_native, to_wire};
//! use serde_json::json;
//!
//! let wire = json!({ "id": "f47ac10b-58cc-4372-a567-0e02b2c3d479", "at": "2024-05-01T10:00:00.000Z" });
//! assert_eq!(to_wire(&to_native(&wire)), wire);
//! ```

use std::sync::LazyLock;

use bson::{Binary, Bson, DateTime, Document, oid::ObjectId, spec::BinarySubtype};
use chrono::{NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{Map, Number, Value};
use uuid::Uuid;

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2}(?:\.?\d*))(?:Z|([+-])([\d:]*))?$")
        .expect("valid ISO date pattern")
});

static SIMPLE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:19|20)\d\d)[- /.](0[1-9]|1[012])[- /.](0[1-9]|[12][0-9]|3[01])$")
        .expect("valid simple date pattern")
});

static AJAX_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/Date\(([+-]?\d+)(?:[+-]\d{4})?\)[/\\]$").expect("valid ajax date pattern")
});

static UUID_V4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-f0-9]{8}-[a-f0-9]{4}-4[a-f0-9]{3}-[89ab][a-f0-9]{3}-[a-f0-9]{12}$")
        .expect("valid uuid v4 pattern")
});

static UUID_SHAPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}$")
        .expect("valid uuid pattern")
});

static OBJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[0-9a-f]{24}$").expect("valid object id pattern"));

/// Lexical categories recognised in wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    /// `YYYY-MM-DDTHH:MM:SS[.fff][Z|±HH:MM]`
    IsoDate,
    /// `YYYY-MM-DD`, with `-`, `/`, `.` or a space as separator. Midnight UTC.
    SimpleDate,
    /// `/Date(±millis)/`, as emitted by old ASP.NET JSON serializers.
    AjaxDate,
    /// Canonical version 4 UUID.
    UuidV4,
    /// Any other 8-4-4-4-12 hex grouping. Persisted exactly like a v4 UUID.
    FakeUuid,
    /// 24 hex digits, the textual form of a store object id.
    ObjectId,
}

impl StringKind {
    /// Evaluation order of the detection list. First match wins.
    pub const ORDER: [StringKind; 6] = [
        StringKind::IsoDate,
        StringKind::SimpleDate,
        StringKind::AjaxDate,
        StringKind::UuidV4,
        StringKind::FakeUuid,
        StringKind::ObjectId,
    ];

    fn pattern(self) -> &'static Regex {
        match self {
            StringKind::IsoDate => &ISO_DATE,
            StringKind::SimpleDate => &SIMPLE_DATE,
            StringKind::AjaxDate => &AJAX_DATE,
            StringKind::UuidV4 => &UUID_V4,
            StringKind::FakeUuid => &UUID_SHAPED,
            StringKind::ObjectId => &OBJECT_ID,
        }
    }

    /// Returns `true` if `text` has the lexical shape of this category.
    pub fn matches(self, text: &str) -> bool {
        self.pattern().is_match(text)
    }

    /// Converts `text` into its native form, or `None` when the shape matched but the
    /// content does not denote a real value (e.g. February 30th).
    fn convert(self, text: &str) -> Option<Bson> {
        match self {
            StringKind::IsoDate => parse_iso_date(text),
            StringKind::SimpleDate => parse_simple_date(text),
            StringKind::AjaxDate => parse_ajax_date(text),
            StringKind::UuidV4 | StringKind::FakeUuid => Uuid::parse_str(text).ok().map(uuid_to_native),
            StringKind::ObjectId => ObjectId::parse_str(text).ok().map(Bson::ObjectId),
        }
    }
}

/// Returns the category a wire string is coerced as, or `None` if it stays a plain string.
pub fn classify(text: &str) -> Option<StringKind> {
    StringKind::ORDER
        .into_iter()
        .find(|kind| kind.matches(text) && kind.convert(text).is_some())
}

/// Coerces a wire value into its native representation.
///
/// Containers keep their shape; only string leaves are inspected.
pub fn to_native(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => number_to_native(n),
        Value::String(s) => string_to_native(s),
        Value::Array(items) => Bson::Array(items.iter().map(to_native).collect()),
        Value::Object(map) => Bson::Document(to_native_document(map)),
    }
}

/// Coerces a wire mapping into a native document.
pub fn to_native_document(map: &Map<String, Value>) -> Document {
    map.iter()
        .map(|(key, value)| (key.clone(), to_native(value)))
        .collect()
}

/// Renders a native value back into its wire representation.
///
/// Dates become RFC 3339 strings with millisecond precision, UUID binaries become
/// lowercase hyphenated strings and object ids become lowercase hex.
pub fn to_wire(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined | Bson::MaxKey | Bson::MinKey => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::from(*i),
        Bson::Int64(i) => Value::from(*i),
        Bson::Double(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(to_wire).collect()),
        Bson::Document(doc) => Value::Object(to_wire_document(doc)),
        Bson::DateTime(dt) => Value::String(date_to_wire(dt)),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Binary(binary) => binary_to_wire(binary),
        Bson::Timestamp(ts) => serde_json::json!({ "t": ts.time, "i": ts.increment }),
        Bson::JavaScriptCode(code) => Value::String(code.clone()),
        Bson::Symbol(symbol) => Value::String(symbol.clone()),
        other => Value::String(other.to_string()),
    }
}

/// Renders a native document back into a wire mapping.
pub fn to_wire_document(doc: &Document) -> Map<String, Value> {
    doc.iter()
        .map(|(key, value)| (key.clone(), to_wire(value)))
        .collect()
}

/// Wraps a UUID as UUID-tagged binary, the persisted form of every UUID field.
pub fn uuid_to_native(uuid: Uuid) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Uuid,
        bytes: uuid.as_bytes().to_vec(),
    })
}

fn string_to_native(text: &str) -> Bson {
    StringKind::ORDER
        .into_iter()
        .filter(|kind| kind.matches(text))
        .find_map(|kind| kind.convert(text))
        .unwrap_or_else(|| Bson::String(text.to_string()))
}

fn number_to_native(number: &Number) -> Bson {
    if let Some(i) = number.as_i64() {
        return i32::try_from(i).map(Bson::Int32).unwrap_or(Bson::Int64(i));
    }

    number.as_f64().map(Bson::Double).unwrap_or(Bson::Null)
}

fn parse_iso_date(text: &str) -> Option<Bson> {
    let parsed = chrono::DateTime::parse_from_rfc3339(text)
        .or_else(|_| chrono::DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc()))
        .ok()?;

    Some(Bson::DateTime(DateTime::from_chrono(parsed)))
}

fn parse_simple_date(text: &str) -> Option<Bson> {
    let captures = SIMPLE_DATE.captures(text)?;
    let date = NaiveDate::from_ymd_opt(
        captures[1].parse().ok()?,
        captures[2].parse().ok()?,
        captures[3].parse().ok()?,
    )?;

    Some(Bson::DateTime(DateTime::from_chrono(date.and_hms_opt(0, 0, 0)?.and_utc())))
}

fn parse_ajax_date(text: &str) -> Option<Bson> {
    let millis: i64 = AJAX_DATE.captures(text)?[1].parse().ok()?;
    // Instants chrono cannot represent would render back as a different date.
    chrono::DateTime::<Utc>::from_timestamp_millis(millis)?;

    Some(Bson::DateTime(DateTime::from_millis(millis)))
}

fn date_to_wire(dt: &DateTime) -> String {
    dt.to_chrono().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn binary_to_wire(binary: &Binary) -> Value {
    if binary.subtype == BinarySubtype::Uuid {
        if let Ok(uuid) = Uuid::from_slice(&binary.bytes) {
            return Value::String(uuid.hyphenated().to_string());
        }
    }

    Value::String(binary.bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn millis(value: &Bson) -> i64 {
        match value {
            Bson::DateTime(dt) => dt.timestamp_millis(),
            other => panic!("expected a date, got {other:?}"),
        }
    }

    #[test]
    fn iso_timestamp_becomes_that_instant() {
        let native = to_native(&json!("2024-05-01T10:00:00Z"));
        let expected = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z").unwrap();

        assert_eq!(millis(&native), expected.timestamp_millis());
    }

    #[test]
    fn iso_timestamp_with_offset_and_fraction() {
        let native = to_native(&json!("2024-05-01T12:30:00.250+02:00"));
        let expected = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:30:00.250Z").unwrap();

        assert_eq!(millis(&native), expected.timestamp_millis());
    }

    #[test]
    fn iso_timestamp_without_zone_is_utc() {
        let native = to_native(&json!("2024-05-01T10:00:00"));

        assert_eq!(to_wire(&native), json!("2024-05-01T10:00:00.000Z"));
    }

    #[test]
    fn simple_date_is_midnight() {
        for text in ["2024-05-01", "2024/05/01", "2024.05.01"] {
            assert_eq!(to_wire(&to_native(&json!(text))), json!("2024-05-01T00:00:00.000Z"), "{text}");
        }
    }

    #[test]
    fn impossible_calendar_date_stays_a_string() {
        assert_eq!(to_native(&json!("2023-02-30")), Bson::String("2023-02-30".into()));
        assert_eq!(classify("2023-02-30"), None);
    }

    #[test]
    fn ajax_dates_are_millis_since_epoch() {
        assert_eq!(millis(&to_native(&json!("/Date(1714557600000)/"))), 1_714_557_600_000);
        assert_eq!(millis(&to_native(&json!("/Date(-86400000)/"))), -86_400_000);
        assert_eq!(millis(&to_native(&json!("/Date(1714557600000+0300)\\"))), 1_714_557_600_000);
    }

    #[test]
    fn v4_uuid_round_trips_lowercase() {
        let text = "f47ac10b-58cc-4372-a567-0e02b2c3d479";
        let native = to_native(&json!(text));

        match &native {
            Bson::Binary(binary) => {
                assert_eq!(binary.subtype, BinarySubtype::Uuid);
                assert_eq!(binary.bytes.len(), 16);
            }
            other => panic!("expected binary, got {other:?}"),
        }
        assert_eq!(to_wire(&native), json!(text));
        assert_eq!(to_wire(&to_native(&json!(text.to_uppercase()))), json!(text));
    }

    #[test]
    fn v4_wins_over_generic_uuid_shape() {
        let text = "f47ac10b-58cc-4372-a567-0e02b2c3d479";

        assert!(StringKind::FakeUuid.matches(text));
        assert_eq!(classify(text), Some(StringKind::UuidV4));
    }

    #[test]
    fn non_v4_uuid_is_still_stored_as_uuid() {
        let text = "123e4567-e89b-12d3-a456-426614174000";

        assert_eq!(classify(text), Some(StringKind::FakeUuid));
        assert_eq!(to_wire(&to_native(&json!(text))), json!(text));
    }

    #[test]
    fn object_id_strings_become_object_ids() {
        let native = to_native(&json!("507F1F77BCF86CD799439011"));

        assert_eq!(native, Bson::ObjectId(ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap()));
        assert_eq!(to_wire(&native), json!("507f1f77bcf86cd799439011"));
    }

    #[test]
    fn plain_scalars_pass_through() {
        assert_eq!(to_native(&json!("")), Bson::String(String::new()));
        assert_eq!(to_native(&json!("milk")), Bson::String("milk".into()));
        assert_eq!(to_native(&json!(20240501)), Bson::Int32(20240501));
        assert_eq!(to_native(&json!(5_000_000_000i64)), Bson::Int64(5_000_000_000));
        assert_eq!(to_native(&json!(3.5)), Bson::Double(3.5));
        assert_eq!(to_native(&json!(true)), Bson::Boolean(true));
        assert_eq!(to_native(&json!(null)), Bson::Null);
    }

    #[test]
    fn nested_documents_round_trip() {
        let wire = json!({
            "_id": "9c5b94b1-35ad-49bb-b118-8e8fc24abf80",
            "user": "producer@farm.example",
            "createdAt": "2024-05-01T10:00:00.000Z",
            "owner": "507f1f77bcf86cd799439011",
            "samples": [
                { "fat": 3.9, "protein": 3, "tags": ["raw", "cooled"] },
                { "fat": 4.1, "protein": 3, "legacy": "123e4567-e89b-12d3-a456-426614174000" },
                []
            ],
            "flags": { "isDeleted": false, "note": null },
        });

        assert_eq!(to_wire(&to_native(&wire)), wire);
    }

    #[test]
    fn containers_keep_their_shape() {
        let native = to_native(&json!({ "a": [["2024-05-01"]], "b": {} }));
        let doc = native.as_document().unwrap();

        let inner = doc.get_array("a").unwrap()[0].as_array().unwrap();
        assert!(matches!(inner[0], Bson::DateTime(_)));
        assert!(doc.get_document("b").unwrap().is_empty());
    }

    #[test]
    fn foreign_binary_renders_as_hex() {
        let binary = Bson::Binary(Binary { subtype: BinarySubtype::Generic, bytes: vec![0xde, 0xad] });

        assert_eq!(to_wire(&binary), json!("dead"));
    }

    #[test]
    fn out_of_range_ajax_dates_stay_strings() {
        let wire = json!({ "d": "/Date(9000000000000000)/" });

        assert_eq!(classify("/Date(9000000000000000)/"), None);
        assert_eq!(to_native(&wire), Bson::Document(bson::doc! { "d": "/Date(9000000000000000)/" }));
        assert_eq!(to_wire(&to_native(&wire)), wire);
    }

    #[test]
    fn integers_beyond_i64_become_doubles() {
        let native = to_native(&json!(u64::MAX));

        assert_eq!(native, Bson::Double(u64::MAX as f64));
    }
}
