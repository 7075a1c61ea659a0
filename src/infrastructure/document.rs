// Document-store vocabulary: documents, filtered queries and write operations.
// Both store implementations evaluate writes through `apply_write` so they agree
// on set semantics, missing-document behaviour and tie ordering.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{AppError, AppResult};
use crate::models::Collection;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Deserialize into a model, exposing the document id as the model's `id` field
    pub fn decode<T: DeserializeOwned>(&self) -> AppResult<T> {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(map)).map_err(|e| {
            AppError::Serialization(format!("failed to decode document {}: {}", self.id, e))
        })
    }
}

/// Serialize a model into document fields. The `id` field is dropped because
/// the store owns document identity.
pub fn encode_fields<T: Serialize>(value: &T) -> AppResult<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        other => Err(AppError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    Eq { field: String, value: Value },
    /// "value is one of {set}"; bounded by the store's declared limit
    In { field: String, values: Vec<Value> },
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn one_of<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        FieldFilter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            FieldFilter::Eq { field, .. } | FieldFilter::In { field, .. } => field,
        }
    }

    pub fn contains_value(&self, value: &Value) -> bool {
        match self {
            FieldFilter::Eq { value: v, .. } => v == value,
            FieldFilter::In { values, .. } => values.contains(value),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match doc.get(self.field()) {
            Some(actual) => self.contains_value(actual),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub collection: Collection,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl DocumentQuery {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction: SortDirection::Descending,
        });
        self
    }

    pub fn order_by_asc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction: SortDirection::Ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject queries the backend would refuse: empty or oversized `In` sets,
    /// or more than one `In` filter.
    pub fn validate(&self, max_in_filter: usize) -> AppResult<()> {
        let mut in_filters = 0;
        for filter in &self.filters {
            if let FieldFilter::In { field, values } = filter {
                in_filters += 1;
                if values.is_empty() {
                    return Err(AppError::InvalidQuery(format!(
                        "'in' filter on {} has no values",
                        field
                    )));
                }
                if values.len() > max_in_filter {
                    return Err(AppError::InvalidQuery(format!(
                        "'in' filter on {} has {} values, limit is {}",
                        field,
                        values.len(),
                        max_in_filter
                    )));
                }
            }
        }
        if in_filters > 1 {
            return Err(AppError::InvalidQuery(
                "at most one 'in' filter per query".to_string(),
            ));
        }
        Ok(())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Result ordering. Ties on the order field fall back to the document id in
    /// the same direction so every store returns the same sequence.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        match &self.order_by {
            Some(order) => {
                let by_field = compare_values(
                    a.get(&order.field).unwrap_or(&Value::Null),
                    b.get(&order.field).unwrap_or(&Value::Null),
                )
                .then_with(|| a.id.cmp(&b.id));
                match order.direction {
                    SortDirection::Ascending => by_field,
                    SortDirection::Descending => by_field.reverse(),
                }
            }
            None => a.id.cmp(&b.id),
        }
    }

    /// Evaluate the query over an in-memory document set
    pub fn evaluate<'a, I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut matched: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.matches(doc))
            .cloned()
            .collect();
        matched.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total ordering over JSON values: first by type, then by value.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&y.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Storage write operations. `batch` executes a list of these all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: Collection,
        id: String,
        fields: Fields,
        merge: bool,
    },
    ArrayAdd {
        collection: Collection,
        id: String,
        field: String,
        value: Value,
    },
    ArrayRemove {
        collection: Collection,
        id: String,
        field: String,
        value: Value,
    },
    Increment {
        collection: Collection,
        id: String,
        field: String,
        delta: i64,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

impl WriteOp {
    pub fn operation_type(&self) -> &'static str {
        match self {
            WriteOp::Set { .. } => "set",
            WriteOp::ArrayAdd { .. } => "array_add",
            WriteOp::ArrayRemove { .. } => "array_remove",
            WriteOp::Increment { .. } => "increment",
            WriteOp::Delete { .. } => "delete",
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Set { collection, .. }
            | WriteOp::ArrayAdd { collection, .. }
            | WriteOp::ArrayRemove { collection, .. }
            | WriteOp::Increment { collection, .. }
            | WriteOp::Delete { collection, .. } => *collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Set { id, .. }
            | WriteOp::ArrayAdd { id, .. }
            | WriteOp::ArrayRemove { id, .. }
            | WriteOp::Increment { id, .. }
            | WriteOp::Delete { id, .. } => id,
        }
    }
}

fn require_existing<'a>(op: &WriteOp, existing: Option<&'a Fields>) -> AppResult<Fields> {
    existing.cloned().ok_or_else(|| {
        AppError::EntityNotFound(format!("{}/{} does not exist", op.collection(), op.id()))
    })
}

/// Compute the document state after `op`. `Ok(None)` means the document is gone.
///
/// Array operations have set semantics: adding a present value or removing an
/// absent one leaves the document unchanged. Updates against a missing
/// document fail with `EntityNotFound`; deleting a missing document succeeds.
pub fn apply_write(op: &WriteOp, existing: Option<&Fields>) -> AppResult<Option<Fields>> {
    match op {
        WriteOp::Set { fields, merge, .. } => {
            let mut next = match (merge, existing) {
                (true, Some(current)) => current.clone(),
                _ => Fields::new(),
            };
            for (key, value) in fields {
                next.insert(key.clone(), value.clone());
            }
            Ok(Some(next))
        }
        WriteOp::ArrayAdd { field, value, .. } => {
            let mut next = require_existing(op, existing)?;
            let entry = next
                .entry(field.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            match entry {
                Value::Array(items) => {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                _ => {
                    return Err(AppError::InvalidQuery(format!(
                        "field {} of {}/{} is not an array",
                        field,
                        op.collection(),
                        op.id()
                    )))
                }
            }
            Ok(Some(next))
        }
        WriteOp::ArrayRemove { field, value, .. } => {
            let mut next = require_existing(op, existing)?;
            match next.get_mut(field) {
                Some(Value::Array(items)) => items.retain(|item| item != value),
                None | Some(Value::Null) => {}
                Some(_) => {
                    return Err(AppError::InvalidQuery(format!(
                        "field {} of {}/{} is not an array",
                        field,
                        op.collection(),
                        op.id()
                    )))
                }
            }
            Ok(Some(next))
        }
        WriteOp::Increment { field, delta, .. } => {
            let mut next = require_existing(op, existing)?;
            let current = match next.get(field) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                    AppError::InvalidQuery(format!("field {} is not an integer", field))
                })?,
                Some(_) => {
                    return Err(AppError::InvalidQuery(format!(
                        "field {} is not numeric",
                        field
                    )))
                }
            };
            next.insert(field.clone(), Value::from(current + delta));
            Ok(Some(next))
        }
        WriteOp::Delete { .. } => Ok(None),
    }
}
