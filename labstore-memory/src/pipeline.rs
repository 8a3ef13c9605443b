//! Sorting, projection and the aggregation stages the in-memory store understands.
//!
//! Supported stages: `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$addFields` (alias
//! `$set`), `$unwind`, `$group` and `$count`. Any other stage fails with a backend error
//! rather than being silently ignored.

use std::cmp::Ordering;
use bson::{Bson, Document};

use labstore_core::{
    collection::PRIMARY_KEY,
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::{
    evaluator::{Comparable, is_operator_document, lookup, matches, truthy},
    update::{as_f64, remove_path, set_path},
};


/// Sorts documents in place by a store-syntax sort specification (`{ field: 1 | -1 }`).
pub(crate) fn sort_documents(documents: &mut [Document], spec: &Document) -> DocumentStoreResult<()> {
    let keys = spec
        .iter()
        .map(|(field, direction)| match as_f64(direction) {
            Some(d) if d == 1.0 => Ok((field.as_str(), false)),
            Some(d) if d == -1.0 => Ok((field.as_str(), true)),
            _ => Err(DocumentStoreError::Backend(format!("invalid sort direction for '{field}': {direction}"))),
        })
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    documents.sort_by(|a, b| {
        for (field, descending) in &keys {
            let left = lookup(a, field).map(Comparable::from).unwrap_or(Comparable::Null);
            let right = lookup(b, field).map(Comparable::from).unwrap_or(Comparable::Null);

            let ordering = if *descending { right.sort_cmp(&left) } else { left.sort_cmp(&right) };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    });

    Ok(())
}

/// Applies a projection. Inclusion and exclusion cannot be mixed, except for `_id`.
pub(crate) fn project(document: &Document, spec: &Document) -> DocumentStoreResult<Document> {
    let mut include_id = true;
    let mut inclusions = Vec::new();
    let mut exclusions = Vec::new();
    let mut computed = Vec::new();

    for (field, value) in spec {
        match value {
            Bson::String(s) if s.starts_with('$') => computed.push((field, value)),
            Bson::Document(_) => computed.push((field, value)),
            flag if field == PRIMARY_KEY => include_id = truthy(flag),
            flag if truthy(flag) => inclusions.push(field),
            _ => exclusions.push(field),
        }
    }

    if !exclusions.is_empty() && !(inclusions.is_empty() && computed.is_empty()) {
        return Err(DocumentStoreError::Backend(format!(
            "cannot do exclusion on field {} in inclusion projection",
            exclusions[0]
        )));
    }

    if inclusions.is_empty() && computed.is_empty() {
        let mut projected = document.clone();
        for field in exclusions {
            remove_path(&mut projected, field);
        }
        if !include_id {
            projected.remove(PRIMARY_KEY);
        }
        return Ok(projected);
    }

    let mut projected = Document::new();
    if include_id {
        if let Some(id) = document.get(PRIMARY_KEY) {
            projected.insert(PRIMARY_KEY, id.clone());
        }
    }
    for field in inclusions {
        if let Some(value) = lookup(document, field) {
            set_path(&mut projected, field, value.clone())?;
        }
    }
    for (field, expression) in computed {
        set_path(&mut projected, field, evaluate(document, expression)?)?;
    }

    Ok(projected)
}

/// Runs `pipeline` over `documents`.
pub(crate) fn run(mut documents: Vec<Document>, pipeline: &[Document]) -> DocumentStoreResult<Vec<Document>> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (name, argument) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(DocumentStoreError::Backend(
                    "a pipeline stage specification object must contain exactly one field".to_string(),
                ));
            }
        };

        documents = match name.as_str() {
            "$match" => {
                let filter = stage_document(name, argument)?;
                let mut kept = Vec::with_capacity(documents.len());
                for document in documents {
                    if matches(&document, filter)? {
                        kept.push(document);
                    }
                }
                kept
            }
            "$sort" => {
                sort_documents(&mut documents, stage_document(name, argument)?)?;
                documents
            }
            "$skip" => {
                let skip = stage_count(name, argument)?;
                documents.into_iter().skip(skip).collect()
            }
            "$limit" => {
                let limit = stage_count(name, argument)?;
                documents.into_iter().take(limit).collect()
            }
            "$project" => {
                let spec = stage_document(name, argument)?;
                documents
                    .iter()
                    .map(|document| project(document, spec))
                    .collect::<DocumentStoreResult<_>>()?
            }
            "$addFields" | "$set" => {
                let fields = stage_document(name, argument)?;
                let mut extended = Vec::with_capacity(documents.len());
                for mut document in documents {
                    for (field, expression) in fields {
                        let value = evaluate(&document, expression)?;
                        set_path(&mut document, field, value)?;
                    }
                    extended.push(document);
                }
                extended
            }
            "$unwind" => unwind(documents, argument)?,
            "$group" => group(documents, stage_document(name, argument)?)?,
            "$count" => {
                let field = argument
                    .as_str()
                    .filter(|field| !field.is_empty() && !field.starts_with('$'))
                    .ok_or_else(|| DocumentStoreError::Backend("$count needs a field name".to_string()))?;

                match documents.len() {
                    0 => Vec::new(),
                    n => {
                        let mut counted = Document::new();
                        counted.insert(field, count_value(n as f64));
                        vec![counted]
                    }
                }
            }
            other => {
                return Err(DocumentStoreError::Backend(format!(
                    "unrecognized pipeline stage name: '{other}'"
                )));
            }
        };
    }

    Ok(documents)
}

fn stage_document<'a>(name: &str, argument: &'a Bson) -> DocumentStoreResult<&'a Document> {
    argument
        .as_document()
        .ok_or_else(|| DocumentStoreError::Backend(format!("the {name} stage expects a document")))
}

fn stage_count(name: &str, argument: &Bson) -> DocumentStoreResult<usize> {
    match as_f64(argument) {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(DocumentStoreError::Backend(format!("the {name} stage expects a non-negative integer"))),
    }
}

/// Evaluates an expression: `"$path"` references, nested documents of expressions, or literals.
fn evaluate(document: &Document, expression: &Bson) -> DocumentStoreResult<Bson> {
    match expression {
        Bson::String(reference) if reference.starts_with('$') => Ok(
            lookup(document, &reference[1..])
                .cloned()
                .unwrap_or(Bson::Null)
        ),
        Bson::Document(operators) if is_operator_document(operators) => Err(DocumentStoreError::Backend(
            format!("unsupported expression operator: {}", operators.keys().next().map(String::as_str).unwrap_or_default()),
        )),
        Bson::Document(fields) => {
            let mut evaluated = Document::new();
            for (field, inner) in fields {
                evaluated.insert(field.clone(), evaluate(document, inner)?);
            }
            Ok(Bson::Document(evaluated))
        }
        literal => Ok(literal.clone()),
    }
}

fn unwind(documents: Vec<Document>, argument: &Bson) -> DocumentStoreResult<Vec<Document>> {
    let (path, preserve) = match argument {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(spec) => (
            spec.get_str("path").unwrap_or_default(),
            spec.get("preserveNullAndEmptyArrays").is_some_and(truthy),
        ),
        _ => ("", false),
    };

    let path = path
        .strip_prefix('$')
        .ok_or_else(|| DocumentStoreError::Backend("$unwind path must be prefixed by '$'".to_string()))?;

    let mut unwound = Vec::new();
    for document in documents {
        match lookup(&document, path).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = document.clone();
                    set_path(&mut copy, path, item)?;
                    unwound.push(copy);
                }
            }
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    unwound.push(document);
                }
            }
            Some(_) => unwound.push(document),
        }
    }

    Ok(unwound)
}

#[derive(Debug)]
enum Accumulator {
    Sum { total: f64, integral: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    Last(Option<Bson>),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
}

impl Accumulator {
    fn new(operator: &str) -> DocumentStoreResult<Self> {
        Ok(match operator {
            "$sum" => Accumulator::Sum { total: 0.0, integral: true },
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(None),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            other => return Err(DocumentStoreError::Backend(format!("unknown group operator '{other}'"))),
        })
    }

    fn feed(&mut self, value: Bson) {
        match self {
            Accumulator::Sum { total, integral } => {
                if let Some(n) = as_f64(&value) {
                    *total += n;
                    *integral &= !matches!(value, Bson::Double(_));
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(n) = as_f64(&value) {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => {
                if !matches!(value, Bson::Null) && current.as_ref().is_none_or(|c| {
                    Comparable::from(&value).sort_cmp(&Comparable::from(c)) == Ordering::Less
                }) {
                    *current = Some(value);
                }
            }
            Accumulator::Max(current) => {
                if !matches!(value, Bson::Null) && current.as_ref().is_none_or(|c| {
                    Comparable::from(&value).sort_cmp(&Comparable::from(c)) == Ordering::Greater
                }) {
                    *current = Some(value);
                }
            }
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            Accumulator::Last(current) => *current = Some(value),
            Accumulator::Push(items) => items.push(value),
            Accumulator::AddToSet(items) => {
                let candidate = Comparable::from(&value);
                if !items.iter().any(|item| Comparable::from(item) == candidate) {
                    items.push(value);
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum { total, integral: true } => count_value(total),
            Accumulator::Sum { total, integral: false } => Bson::Double(total),
            Accumulator::Avg { count: 0, .. } => Bson::Null,
            Accumulator::Avg { total, count } => Bson::Double(total / count as f64),
            Accumulator::Min(value)
            | Accumulator::Max(value)
            | Accumulator::First(value)
            | Accumulator::Last(value) => value.unwrap_or(Bson::Null),
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Bson::Array(items),
        }
    }
}

fn count_value(n: f64) -> Bson {
    if n >= i32::MIN as f64 && n <= i32::MAX as f64 {
        Bson::Int32(n as i32)
    } else {
        Bson::Int64(n as i64)
    }
}

fn group(documents: Vec<Document>, spec: &Document) -> DocumentStoreResult<Vec<Document>> {
    let key_expression = spec
        .get(PRIMARY_KEY)
        .ok_or_else(|| DocumentStoreError::Backend("a group specification must include an _id".to_string()))?;

    let mut fields = Vec::new();
    for (field, accumulator) in spec.iter().filter(|(field, _)| field.as_str() != PRIMARY_KEY) {
        let (operator, operand) = accumulator
            .as_document()
            .and_then(|doc| doc.iter().next())
            .ok_or_else(|| DocumentStoreError::Backend(format!("the field '{field}' must be an accumulator object")))?;
        Accumulator::new(operator)?;
        fields.push((field.clone(), operator.clone(), operand.clone()));
    }

    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for document in &documents {
        let key = evaluate(document, key_expression)?;
        let position = match groups
            .iter()
            .position(|(existing, _)| Comparable::from(existing) == Comparable::from(&key))
        {
            Some(position) => position,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(_, operator, _)| Accumulator::new(operator))
                    .collect::<DocumentStoreResult<Vec<_>>>()?;
                groups.push((key, accumulators));
                groups.len() - 1
            }
        };

        for ((_, _, operand), accumulator) in fields.iter().zip(groups[position].1.iter_mut()) {
            accumulator.feed(evaluate(document, operand)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut grouped = Document::new();
            grouped.insert(PRIMARY_KEY, key);
            for ((field, _, _), accumulator) in fields.iter().zip(accumulators) {
                grouped.insert(field.clone(), accumulator.finish());
            }
            grouped
        })
        .collect())
}
