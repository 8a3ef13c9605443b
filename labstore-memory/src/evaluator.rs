//! Query filter evaluation for in-memory document matching.
//!
//! Filters use the store's own syntax (`{ field: value }`, `{ field: { $gt: … } }`,
//! `$and`/`$or`/`$nor`), so the same query documents run unchanged against this backend
//! and against MongoDB.

use std::{cmp::Ordering, collections::HashMap};
use bson::{Bson, DateTime, Document, oid::ObjectId};

use labstore_core::error::{DocumentStoreError, DocumentStoreResult};


/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `Int32(1)` equals `Double(1.0)`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null (also used for missing fields)
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// String value
    String(&'a str),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Binary payload, including UUIDs
    Binary(&'a [u8]),
    /// Store object id
    ObjectId(ObjectId),
    /// Timestamp
    DateTime(DateTime),
    /// Anything else; never equal to anything
    Other,
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::ObjectId(oid) => Comparable::ObjectId(*oid),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            _ => Comparable::Other,
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position of the value's type in the store's cross-type sort order.
    fn type_rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Binary(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Other => 10,
        }
    }

    /// Total order used for sorting: by type rank first, then by value.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.type_rank()
            .cmp(&other.type_rank())
            .then_with(|| self.partial_cmp(other).unwrap_or(Ordering::Equal))
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            _ => None,
        }
    }
}

/// Resolves a dotted path (`data.collection`, `samples.0.fat`) inside a document.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Returns `true` if `document` satisfies `filter`.
pub(crate) fn matches(document: &Document, filter: &Document) -> DocumentStoreResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(document, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(document, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in sub_filters(key, condition)? {
                    if matches(document, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            operator if operator.starts_with('$') => {
                return Err(DocumentStoreError::Backend(format!("unknown top level operator: {operator}")));
            }
            path => matches_field(lookup(document, path), condition)?,
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Returns `true` if `document` is an operator document such as `{ $gt: 3 }`.
pub(crate) fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

fn sub_filters<'a>(operator: &str, condition: &'a Bson) -> DocumentStoreResult<Vec<&'a Document>> {
    condition
        .as_array()
        .ok_or_else(|| DocumentStoreError::Backend(format!("{operator} must be an array")))?
        .iter()
        .map(|item| {
            item.as_document()
                .ok_or_else(|| DocumentStoreError::Backend(format!("{operator} entries must be documents")))
        })
        .collect()
}

fn matches_field(value: Option<&Bson>, condition: &Bson) -> DocumentStoreResult<bool> {
    let operators = match condition {
        Bson::Document(doc) if is_operator_document(doc) => doc,
        literal => return Ok(equals(value, literal)),
    };

    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => compare(value, operand, |o| o == Ordering::Greater),
            "$gte" => compare(value, operand, |o| o != Ordering::Less),
            "$lt" => compare(value, operand, |o| o == Ordering::Less),
            "$lte" => compare(value, operand, |o| o != Ordering::Greater),
            "$in" => candidates(operator, operand)?
                .iter()
                .any(|candidate| equals(value, candidate)),
            "$nin" => !candidates(operator, operand)?
                .iter()
                .any(|candidate| equals(value, candidate)),
            "$exists" => value.is_some() == truthy(operand),
            "$not" => !matches_field(value, operand)?,
            "$size" => match (value, operand.as_i64().or_else(|| operand.as_i32().map(i64::from))) {
                (Some(Bson::Array(items)), Some(size)) => items.len() as i64 == size,
                _ => false,
            },
            other => return Err(DocumentStoreError::Backend(format!("unknown operator: {other}"))),
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

fn candidates<'a>(operator: &str, operand: &'a Bson) -> DocumentStoreResult<&'a Vec<Bson>> {
    operand
        .as_array()
        .ok_or_else(|| DocumentStoreError::Backend(format!("{operator} needs an array")))
}

/// Equality with the store's array semantics: an array field equals a scalar it contains.
fn equals(value: Option<&Bson>, target: &Bson) -> bool {
    let target_cmp = Comparable::from(target);

    match value {
        None => target_cmp == Comparable::Null,
        Some(Bson::Array(items)) if !matches!(target, Bson::Array(_)) => items
            .iter()
            .any(|item| Comparable::from(item) == target_cmp),
        Some(value) => Comparable::from(value) == target_cmp,
    }
}

fn compare(value: Option<&Bson>, target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let target_cmp = Comparable::from(target);
    let check = |item: &Bson| {
        Comparable::from(item)
            .partial_cmp(&target_cmp)
            .is_some_and(&accept)
    };

    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(value) => check(value),
    }
}

pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn sample() -> Document {
        doc! {
            "_id": 1,
            "user": "ana",
            "age": 34,
            "roles": ["lab", "admin"],
            "data": { "collection": "users", "fat": 3.9 },
        }
    }

    #[test]
    fn literal_equality_and_numbers_across_types() {
        assert!(matches(&sample(), &doc! { "user": "ana" }).unwrap());
        assert!(matches(&sample(), &doc! { "age": 34.0 }).unwrap());
        assert!(!matches(&sample(), &doc! { "user": "bia" }).unwrap());
    }

    #[test]
    fn dotted_paths_and_array_membership() {
        assert!(matches(&sample(), &doc! { "data.collection": "users" }).unwrap());
        assert!(matches(&sample(), &doc! { "roles": "admin" }).unwrap());
        assert!(matches(&sample(), &doc! { "roles.0": "lab" }).unwrap());
    }

    #[test]
    fn missing_fields_are_not_equal_to_true() {
        assert!(matches(&sample(), &doc! { "isDeleted": { "$ne": true } }).unwrap());
        assert!(matches(&sample(), &doc! { "isDeleted": null }).unwrap());
        assert!(matches(&sample(), &doc! { "isDeleted": { "$exists": false } }).unwrap());
    }

    #[test]
    fn comparison_and_set_operators() {
        assert!(matches(&sample(), &doc! { "age": { "$gte": 30, "$lt": 40 } }).unwrap());
        assert!(matches(&sample(), &doc! { "user": { "$in": ["bia", "ana"] } }).unwrap());
        assert!(matches(&sample(), &doc! { "roles": { "$nin": ["guest"] } }).unwrap());
        assert!(matches(&sample(), &doc! { "roles": { "$size": 2 } }).unwrap());
        assert!(matches(&sample(), &doc! { "age": { "$not": { "$gt": 40 } } }).unwrap());
    }

    #[test]
    fn logical_operators() {
        let filter = doc! { "$or": [{ "user": "bia" }, { "$and": [{ "age": 34 }, { "roles": "lab" }] }] };

        assert!(matches(&sample(), &filter).unwrap());
        assert!(!matches(&sample(), &doc! { "$nor": [{ "user": "ana" }] }).unwrap());
    }

    #[test]
    fn unknown_operators_are_store_errors() {
        assert!(matches(&sample(), &doc! { "age": { "$near": 3 } }).is_err());
        assert!(matches(&sample(), &doc! { "$where": "1" }).is_err());
    }

    #[test]
    fn sort_order_ranks_types() {
        let null = Bson::Null;
        let number = Bson::Int32(5);
        let text = Bson::String("a".into());

        assert_eq!(Comparable::from(&null).sort_cmp(&Comparable::from(&number)), Ordering::Less);
        assert_eq!(Comparable::from(&text).sort_cmp(&Comparable::from(&number)), Ordering::Greater);
    }
}
