use std::cmp::Ordering;

use anyhow::bail;
use serde_json::Value;

use super::{lookup_field, Document};

/// Upper bound on the ids accepted by a document-id `in` filter.
pub const MAX_IN_FILTER_IDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
    IdIn(Vec<String>),
}

impl Filter {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq(field, value) => doc.field(field) == Some(value),
            Filter::ArrayContains(field, value) => doc
                .field(field)
                .and_then(Value::as_array)
                .map(|items| items.contains(value))
                .unwrap_or(false),
            Filter::IdIn(ids) => ids.iter().any(|id| *id == doc.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn array_contains<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.filters.push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn id_in<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.push(Filter::IdIn(ids.into_iter().map(Into::into).collect()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        for filter in &self.filters {
            if let Filter::IdIn(ids) = filter {
                if ids.is_empty() {
                    bail!("document id 'in' filter needs at least one id");
                }
                if ids.len() > MAX_IN_FILTER_IDS {
                    bail!("document id 'in' filter accepts at most {} ids, got {}", MAX_IN_FILTER_IDS, ids.len());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.filters.iter().all(|f| f.matches(doc)))
            .collect();
        if let Some((field, direction)) = &self.order_by {
            docs.sort_by(|a, b| {
                let ord = compare_values(a.field(field), b.field(field));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

/// Missing values sort first, then numbers, strings and booleans within their own kind.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use serde_json::json;

    #[tokio::test]
    async fn filters_orders_and_limits() {
        let store = DocumentStore::in_memory().await.unwrap();
        store.set("users/u1/friends/a", json!({"status": "accepted", "focusHours": 3})).await.unwrap();
        store.set("users/u1/friends/b", json!({"status": "pending", "focusHours": 9})).await.unwrap();
        store.set("users/u1/friends/c", json!({"status": "accepted", "focusHours": 7.5})).await.unwrap();

        let query = Query::collection("users/u1/friends")
            .where_eq("status", "accepted")
            .order_by("focusHours", Direction::Descending);
        let ids: Vec<String> = store.query(&query).await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["c", "a"]);

        let limited = store.query(&query.limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn id_in_filter_is_capped() {
        let store = DocumentStore::in_memory().await.unwrap();
        store.set("users/u1", json!({})).await.unwrap();
        store.set("users/u2", json!({})).await.unwrap();

        let found = store.query(&Query::collection("users").id_in(["u2", "u9"])).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "u2");

        let too_many: Vec<String> = (0..11).map(|i| format!("u{}", i)).collect();
        assert!(store.query(&Query::collection("users").id_in(too_many)).await.is_err());
    }

    #[tokio::test]
    async fn array_contains_matches_membership() {
        let store = DocumentStore::in_memory().await.unwrap();
        store.set("groups/g1", json!({"memberIds": ["a", "b"]})).await.unwrap();
        store.set("groups/g2", json!({"memberIds": ["c"]})).await.unwrap();

        let found = store.query(&Query::collection("groups").array_contains("memberIds", "b")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "g1");
    }
}
