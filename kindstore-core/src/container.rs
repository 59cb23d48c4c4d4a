/// Type-checked collections used as array and mapping field content
///
/// Every element goes through the content field's mold step on the way in,
/// so a raw dictionary inserted into an array of embedded records is promoted
/// into a typed record at insertion time.
use crate::field::Field;
use crate::{Error, Result, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Array {
    content: Arc<Field>,
    items: Vec<Value>,
}

impl Array {
    pub fn new(content: Arc<Field>) -> Self {
        Self {
            content,
            items: Vec::new(),
        }
    }

    /// Build from raw values, molding each one
    pub fn from_values(content: Arc<Field>, values: Vec<Value>) -> Result<Self> {
        let mut array = Self::new(content);
        array.extend(values)?;
        Ok(array)
    }

    /// Wrap values that came off the wire; they are already native.
    pub(crate) fn from_decoded(content: Arc<Field>, items: Vec<Value>) -> Self {
        Self { content, items }
    }

    pub fn content(&self) -> &Arc<Field> {
        &self.content
    }

    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = self.content.mold_present(value.into())?;
        self.items.push(value);
        Ok(())
    }

    pub fn insert(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        if index > self.items.len() {
            return Err(out_of_range(index, self.items.len()));
        }
        let value = self.content.mold_present(value.into())?;
        self.items.insert(index, value);
        Ok(())
    }

    /// Replace the element at `index`, re-validating the new value
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or_else(|| out_of_range(index, len))?;
        *slot = self.content.mold_present(value.into())?;
        Ok(())
    }

    pub fn extend<T: Into<Value>>(&mut self, values: impl IntoIterator<Item = T>) -> Result<()> {
        for value in values {
            self.push(value)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Value> {
        if index >= self.items.len() {
            return Err(out_of_range(index, self.items.len()));
        }
        Ok(self.items.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.items
    }
}

fn out_of_range(index: usize, len: usize) -> Error {
    Error::InvalidArgument(format!("index {} out of range for array of length {}", index, len))
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.items).finish()
    }
}

#[derive(Clone)]
pub struct Mapping {
    content: Arc<Field>,
    entries: BTreeMap<String, Value>,
}

impl Mapping {
    pub fn new(content: Arc<Field>) -> Self {
        Self {
            content,
            entries: BTreeMap::new(),
        }
    }

    pub fn from_entries(content: Arc<Field>, entries: BTreeMap<String, Value>) -> Result<Self> {
        let mut mapping = Self::new(content);
        for (name, value) in entries {
            mapping.insert(name, value)?;
        }
        Ok(mapping)
    }

    pub(crate) fn from_decoded(content: Arc<Field>, entries: BTreeMap<String, Value>) -> Self {
        Self { content, entries }
    }

    pub fn content(&self) -> &Arc<Field> {
        &self.content
    }

    /// Insert or replace, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<Option<Value>> {
        let value = self.content.mold_present(value.into())?;
        Ok(self.entries.insert(name.into(), value))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.remove(name)
    }

    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> BTreeMap<String, Value> {
        self.entries
    }
}

impl PartialEq for Mapping {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(&self.entries).finish()
    }
}
