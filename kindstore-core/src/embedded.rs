use crate::schema::Schema;
use crate::{Result, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Nested record value carrying its own schema
///
/// Two records are equal when they share a schema and hold equal values.
#[derive(Clone)]
pub struct Embedded {
    schema: Arc<Schema>,
    values: BTreeMap<String, Value>,
}

impl Embedded {
    pub fn new(schema: &Arc<Schema>, values: BTreeMap<String, Value>) -> Result<Self> {
        let values = schema.instantiate(values)?;
        Ok(Self {
            schema: Arc::clone(schema),
            values,
        })
    }

    pub(crate) fn from_decoded(schema: &Arc<Schema>, values: BTreeMap<String, Value>) -> Self {
        Self {
            schema: Arc::clone(schema),
            values,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        self.schema.read(&self.values, name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.schema.write(&mut self.values, name, Some(value.into()))
    }

    pub fn clear(&mut self, name: &str) -> Result<()> {
        self.schema.write(&mut self.values, name, None)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }
}

impl PartialEq for Embedded {
    fn eq(&self, other: &Self) -> bool {
        Schema::same(&self.schema, &other.schema) && self.values == other.values
    }
}

impl fmt::Debug for Embedded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.schema.name())
            .field("values", &self.values)
            .finish()
    }
}
