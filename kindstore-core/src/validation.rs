/// Value constraints attached to fields
///
/// Constraints run after a value has been molded into the field's native
/// type, so they only ever see typed values.
use crate::{Error, Result, Value};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Predicate used by `Constraint::Predicate`
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Constraint {
    /// Minimum value (integers and doubles)
    MinValue(f64),
    /// Maximum value (integers and doubles)
    MaxValue(f64),
    /// Minimum length (strings, blobs, arrays, mappings)
    MinLength(usize),
    /// Maximum length (strings, blobs, arrays, mappings)
    MaxLength(usize),
    /// Must match regex pattern (strings)
    Pattern(Regex),
    /// Must be one of these values
    OneOf(Vec<Value>),
    /// Named custom check
    Predicate(String, Predicate),
}

impl Constraint {
    /// Compile a pattern constraint
    pub fn pattern(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| {
            Error::SchemaDefinition(format!("Invalid pattern {:?}: {}", pattern, e))
        })?;
        Ok(Constraint::Pattern(re))
    }

    pub fn predicate<F>(label: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Constraint::Predicate(label.into(), Arc::new(check))
    }

    /// Validate a value against this constraint
    pub fn check(&self, value: &Value) -> Result<()> {
        match self {
            Constraint::MinValue(min) => {
                if let Some(n) = numeric(value) {
                    if n < *min {
                        return Err(Error::validation(
                            value,
                            format!("{} is less than minimum {}", n, min),
                        ));
                    }
                }
                Ok(())
            }
            Constraint::MaxValue(max) => {
                if let Some(n) = numeric(value) {
                    if n > *max {
                        return Err(Error::validation(
                            value,
                            format!("{} exceeds maximum {}", n, max),
                        ));
                    }
                }
                Ok(())
            }
            Constraint::MinLength(min) => match length(value) {
                Some(len) if len < *min => Err(Error::validation(
                    value,
                    format!("length {} is less than minimum {}", len, min),
                )),
                _ => Ok(()),
            },
            Constraint::MaxLength(max) => match length(value) {
                Some(len) if len > *max => Err(Error::validation(
                    value,
                    format!("length {} exceeds maximum {}", len, max),
                )),
                _ => Ok(()),
            },
            Constraint::Pattern(re) => {
                if let Value::String(s) = value {
                    if !re.is_match(s) {
                        return Err(Error::validation(
                            value,
                            format!("does not match pattern {}", re.as_str()),
                        ));
                    }
                }
                Ok(())
            }
            Constraint::OneOf(allowed) => {
                if !allowed.contains(value) {
                    return Err(Error::validation(value, "not one of the allowed values"));
                }
                Ok(())
            }
            Constraint::Predicate(label, check) => {
                if !check(value) {
                    return Err(Error::validation(value, format!("failed check {}", label)));
                }
                Ok(())
            }
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Blob(b) => Some(b.len()),
        Value::Array(a) => Some(a.len()),
        Value::Mapping(m) => Some(m.len()),
        _ => None,
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::MinValue(v) => write!(f, "MinValue({})", v),
            Constraint::MaxValue(v) => write!(f, "MaxValue({})", v),
            Constraint::MinLength(v) => write!(f, "MinLength({})", v),
            Constraint::MaxLength(v) => write!(f, "MaxLength({})", v),
            Constraint::Pattern(re) => write!(f, "Pattern({})", re.as_str()),
            Constraint::OneOf(values) => write!(f, "OneOf({:?})", values),
            Constraint::Predicate(label, _) => write!(f, "Predicate({})", label),
        }
    }
}
