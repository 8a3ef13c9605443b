//! Update operators and upsert seeding.

use bson::{Bson, Document, oid::ObjectId};

use labstore_core::{
    backend::is_update_expression,
    collection::PRIMARY_KEY,
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::evaluator::is_operator_document;


/// Applies `update` to `document` in place.
///
/// A replacement swaps the whole body but keeps the primary key. An operator expression
/// applies `$set`, `$unset`, `$inc`, `$push` and, when `inserting`, `$setOnInsert`.
pub(crate) fn apply_update(document: &mut Document, update: &Document, inserting: bool) -> DocumentStoreResult<()> {
    if !is_update_expression(update) {
        return replace(document, update);
    }

    for (operator, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| DocumentStoreError::Backend(format!("modifier {operator} expects a document")))?;

        for (path, value) in fields {
            if path == PRIMARY_KEY && operator != "$setOnInsert" && !inserting {
                return Err(DocumentStoreError::Backend(format!(
                    "performing an update on the path '{PRIMARY_KEY}' would modify the immutable field '{PRIMARY_KEY}'"
                )));
            }

            match operator.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$setOnInsert" => {
                    if inserting {
                        set_path(document, path, value.clone())?;
                    }
                }
                "$unset" => remove_path(document, path),
                "$inc" => increment(document, path, value)?,
                "$push" => push(document, path, value)?,
                other => return Err(DocumentStoreError::Backend(format!("unknown modifier: {other}"))),
            }
        }
    }

    Ok(())
}

fn replace(document: &mut Document, replacement: &Document) -> DocumentStoreResult<()> {
    let id = document.get(PRIMARY_KEY).cloned();

    match (&id, replacement.get(PRIMARY_KEY)) {
        (Some(current), Some(new)) if current != new => {
            return Err(DocumentStoreError::Backend(format!(
                "the '{PRIMARY_KEY}' field cannot be changed from {current} to {new}"
            )));
        }
        _ => {}
    }

    let mut next = Document::new();
    if let Some(id) = id {
        next.insert(PRIMARY_KEY, id);
    }
    for (key, value) in replacement {
        next.insert(key.clone(), value.clone());
    }

    *document = next;
    Ok(())
}

/// Builds the starting point of an upserted document from the equality clauses of `filter`.
pub(crate) fn seed_from_filter(filter: &Document) -> DocumentStoreResult<Document> {
    let mut seed = Document::new();

    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }

        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                if let Some(value) = operators.get("$eq") {
                    set_path(&mut seed, key, value.clone())?;
                }
            }
            literal => set_path(&mut seed, key, literal.clone())?,
        }
    }

    Ok(seed)
}

/// Gives `document` a fresh ObjectId primary key if it has none, and returns the key.
pub(crate) fn ensure_primary_key(document: &mut Document) -> Bson {
    if let Some(id) = document.get(PRIMARY_KEY) {
        return id.clone();
    }

    let id = Bson::ObjectId(ObjectId::new());
    let mut keyed = Document::new();
    keyed.insert(PRIMARY_KEY, id.clone());
    for (key, value) in std::mem::take(document) {
        keyed.insert(key, value);
    }
    *document = keyed;

    id
}

/// Sets a dotted path, creating intermediate documents as needed.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }

            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                other => Err(DocumentStoreError::Backend(format!(
                    "cannot create field '{rest}' in element {{{head}: {}}}",
                    other.map(|child| child.to_string()).unwrap_or_default()
                ))),
            }
        }
    }
}

pub(crate) fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

fn get_path_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    match path.split_once('.') {
        None => document.get_mut(path),
        Some((head, rest)) => match document.get_mut(head)? {
            Bson::Document(inner) => get_path_mut(inner, rest),
            _ => None,
        },
    }
}

fn increment(document: &mut Document, path: &str, amount: &Bson) -> DocumentStoreResult<()> {
    let non_numeric = || DocumentStoreError::Backend(format!("cannot increment '{path}' with a non-numeric value"));

    let Some(current) = get_path_mut(document, path) else {
        if !is_number(amount) {
            return Err(non_numeric());
        }
        return set_path(document, path, amount.clone());
    };

    let sum = match (&*current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(*a as i64 + *b as i64)),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(*a as i64 + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + *b as i64),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (a, b) => match (as_f64(a), as_f64(b)) {
            (Some(a), Some(b)) => Bson::Double(a + b),
            _ => return Err(non_numeric()),
        },
    };

    *current = sum;
    Ok(())
}

fn push(document: &mut Document, path: &str, value: &Bson) -> DocumentStoreResult<()> {
    match get_path_mut(document, path) {
        None => set_path(document, path, Bson::Array(vec![value.clone()])),
        Some(Bson::Array(items)) => {
            items.push(value.clone());
            Ok(())
        }
        Some(_) => Err(DocumentStoreError::Backend(format!("the field '{path}' must be an array"))),
    }
}

fn is_number(value: &Bson) -> bool {
    as_f64(value).is_some()
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_unset_and_nested_paths() {
        let mut document = doc! { "_id": 1, "name": "a", "meta": { "old": true } };
        let update = doc! { "$set": { "name": "b", "meta.tag": "x" }, "$unset": { "meta.old": "" } };

        apply_update(&mut document, &update, false).unwrap();

        assert_eq!(document, doc! { "_id": 1, "name": "b", "meta": { "tag": "x" } });
    }

    #[test]
    fn increments_promote_on_overflow_and_mix_types() {
        let mut document = doc! { "count": i32::MAX, "ratio": 1 };

        apply_update(&mut document, &doc! { "$inc": { "count": 1, "ratio": 0.5, "fresh": 2 } }, false).unwrap();

        assert_eq!(document.get("count"), Some(&Bson::Int64(i32::MAX as i64 + 1)));
        assert_eq!(document.get("ratio"), Some(&Bson::Double(1.5)));
        assert_eq!(document.get("fresh"), Some(&Bson::Int32(2)));
    }

    #[test]
    fn push_creates_and_appends() {
        let mut document = doc! {};

        apply_update(&mut document, &doc! { "$push": { "tags": "a" } }, false).unwrap();
        apply_update(&mut document, &doc! { "$push": { "tags": "b" } }, false).unwrap();

        assert_eq!(document, doc! { "tags": ["a", "b"] });
    }

    #[test]
    fn set_on_insert_only_applies_when_inserting() {
        let mut existing = doc! { "_id": 1 };
        let mut fresh = doc! { "_id": 2 };
        let update = doc! { "$setOnInsert": { "createdBy": "system" } };

        apply_update(&mut existing, &update, false).unwrap();
        apply_update(&mut fresh, &update, true).unwrap();

        assert!(existing.get("createdBy").is_none());
        assert_eq!(fresh.get_str("createdBy").unwrap(), "system");
    }

    #[test]
    fn replacement_keeps_primary_key() {
        let mut document = doc! { "_id": 7, "a": 1, "b": 2 };

        apply_update(&mut document, &doc! { "c": 3 }, false).unwrap();

        assert_eq!(document, doc! { "_id": 7, "c": 3 });
        assert!(apply_update(&mut document, &doc! { "_id": 8 }, false).is_err());
    }

    #[test]
    fn unknown_modifiers_fail() {
        let mut document = doc! {};

        assert!(apply_update(&mut document, &doc! { "$rename": { "a": "b" } }, false).is_err());
    }

    #[test]
    fn seeds_take_equality_clauses_only() {
        let filter = doc! { "user": "ana", "age": { "$gt": 3 }, "kind": { "$eq": "lab" }, "$or": [] };

        assert_eq!(seed_from_filter(&filter).unwrap(), doc! { "user": "ana", "kind": "lab" });
    }

    #[test]
    fn primary_key_is_generated_first() {
        let mut document = doc! { "name": "a" };
        let id = ensure_primary_key(&mut document);

        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(document.keys().next().map(String::as_str), Some("_id"));
    }
}
