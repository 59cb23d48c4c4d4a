/// Query and read-option builders
use crate::error::Result;
use kindstore_core::{wire, Error, Schema, Value};
use serde_json::{json, Map, Value as Json};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConsistency {
    #[default]
    Strong,
    Eventual,
}

/// Read options for lookup and runQuery
///
/// A transaction id pins the read to that transaction and overrides the
/// consistency setting.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub consistency: ReadConsistency,
    pub transaction: Option<String>,
}

impl ReadOptions {
    pub fn strong() -> Self {
        Self::default()
    }

    pub fn eventual() -> Self {
        Self {
            consistency: ReadConsistency::Eventual,
            transaction: None,
        }
    }

    pub fn in_transaction(id: impl Into<String>) -> Self {
        Self {
            consistency: ReadConsistency::Strong,
            transaction: Some(id.into()),
        }
    }

    pub fn to_json(&self) -> Json {
        match &self.transaction {
            Some(id) => json!({ "transaction": id }),
            None => match self.consistency {
                ReadConsistency::Strong => json!({ "readConsistency": "STRONG" }),
                ReadConsistency::Eventual => json!({ "readConsistency": "EVENTUAL" }),
            },
        }
    }
}

/// Query over one kind, decoded through its schema
#[derive(Debug, Clone)]
pub struct Query {
    schema: Arc<Schema>,
    namespace: Option<String>,
    limit: Option<i32>,
    filters: Vec<Json>,
    start_cursor: Option<String>,
}

impl Query {
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            namespace: None,
            limit: None,
            filters: Vec::new(),
            start_cursor: None,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = Some(cursor.into());
        self
    }

    /// Equality filter on a schema field; the value is molded by the field
    pub fn filter_eq(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        let field = self
            .schema
            .field(name)
            .ok_or_else(|| Error::UnknownField(format!("{} has no field {:?}", self.schema.name(), name)))?;
        let molded = field.mold(Some(value.into()))?;
        let encoded = match field.to_entity(molded.as_ref())? {
            Some(encoded) => encoded,
            None => wire::null_token(),
        };
        self.filters.push(json!({
            "propertyFilter": {
                "property": { "name": name },
                "op": "EQUAL",
                "value": encoded,
            }
        }));
        Ok(self)
    }

    /// Any filter expressed directly in the service's JSON filter format
    pub fn filter_json(mut self, filter: Json) -> Self {
        self.filters.push(filter);
        self
    }

    fn filter(&self) -> Option<Json> {
        match self.filters.len() {
            0 => None,
            1 => self.filters.first().cloned(),
            _ => Some(json!({
                "compositeFilter": { "op": "AND", "filters": self.filters }
            })),
        }
    }

    /// runQuery request body, with `cursor` overriding the configured start
    pub(crate) fn to_request(&self, project: &str, read: &ReadOptions, cursor: Option<&str>) -> Json {
        let mut partition = Map::new();
        partition.insert("projectId".to_string(), json!(project));
        if let Some(namespace) = &self.namespace {
            partition.insert("namespaceId".to_string(), json!(namespace));
        }

        let mut query = Map::new();
        query.insert("kind".to_string(), json!([{ "name": self.schema.kind() }]));
        if let Some(filter) = self.filter() {
            query.insert("filter".to_string(), filter);
        }
        if let Some(limit) = self.limit {
            query.insert("limit".to_string(), json!(limit));
        }
        if let Some(cursor) = cursor.or(self.start_cursor.as_deref()) {
            query.insert("startCursor".to_string(), json!(cursor));
        }

        json!({
            "partitionId": partition,
            "readOptions": read.to_json(),
            "query": query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindstore_core::Field;

    fn user() -> Arc<Schema> {
        Schema::builder("User")
            .field("email", Field::string().indexed())
            .field("age", Field::integer().indexed())
            .build()
            .unwrap()
    }

    #[test]
    fn test_read_options() {
        assert_eq!(ReadOptions::strong().to_json(), json!({"readConsistency": "STRONG"}));
        assert_eq!(ReadOptions::eventual().to_json(), json!({"readConsistency": "EVENTUAL"}));
        assert_eq!(ReadOptions::in_transaction("tx").to_json(), json!({"transaction": "tx"}));
    }

    #[test]
    fn test_single_equality_filter() {
        let query = Query::new(&user()).filter_eq("age", "42").unwrap().limit(10);
        let body = query.to_request("proj", &ReadOptions::default(), None);
        assert_eq!(body["query"]["kind"][0]["name"], "user");
        assert_eq!(body["query"]["limit"], 10);
        let filter = &body["query"]["filter"]["propertyFilter"];
        assert_eq!(filter["op"], "EQUAL");
        assert_eq!(filter["value"], json!({"integerValue": "42"}));
    }

    #[test]
    fn test_composite_filter_and_cursor() {
        let query = Query::new(&user())
            .namespace("tenant")
            .filter_eq("email", "a@b")
            .unwrap()
            .filter_eq("age", 3)
            .unwrap()
            .start_cursor("c0");
        let body = query.to_request("proj", &ReadOptions::eventual(), None);
        assert_eq!(body["partitionId"]["namespaceId"], "tenant");
        assert_eq!(body["query"]["filter"]["compositeFilter"]["filters"].as_array().unwrap().len(), 2);
        assert_eq!(body["query"]["startCursor"], "c0");

        let next = query.to_request("proj", &ReadOptions::eventual(), Some("c1"));
        assert_eq!(next["query"]["startCursor"], "c1");
    }

    #[test]
    fn test_filter_validates_field_and_value() {
        assert!(Query::new(&user()).filter_eq("missing", 1).is_err());
        assert!(Query::new(&user()).filter_eq("age", "old").is_err());
    }
}
