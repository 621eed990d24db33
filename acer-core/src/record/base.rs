//! Base implementation of records.
use crate::error::AcerError;
use std::{
    collections::{
        hash_map::{Iter, Keys},
        HashMap,
    },
    convert::Into,
};

/// Values stored in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A single floating-point value, typically used for losses and learning rates.
    Scalar(f32),
}

/// A container for storing key-value pairs of metrics.
///
/// # Examples
///
/// ```rust
/// use acer_core::record::{Record, RecordValue};
///
/// let mut record = Record::from_scalar("actor_loss", 0.5);
/// record.insert("bc_loss", RecordValue::Scalar(0.1));
///
/// let loss = record.get_scalar("actor_loss").unwrap();
/// assert_eq!(loss, 0.5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates an empty record.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Creates a record containing a single scalar value.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Creates a record from a slice of key-value pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, RecordValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    /// Returns an iterator over the keys in the record.
    pub fn keys(&self) -> Keys<String, RecordValue> {
        self.0.keys()
    }

    /// Inserts a key-value pair into the record.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Returns an iterator over the key-value pairs in the record.
    pub fn iter(&self) -> Iter<'_, String, RecordValue> {
        self.0.iter()
    }

    /// Gets a reference to the value associated with the given key.
    pub fn get(&self, k: &str) -> Option<&RecordValue> {
        self.0.get(k)
    }

    /// Gets a scalar value from the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not exist.
    pub fn get_scalar(&self, k: &str) -> Result<f32, AcerError> {
        match self.0.get(k) {
            Some(RecordValue::Scalar(v)) => Ok(*v),
            None => Err(AcerError::RecordKeyError(k.to_string())),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_scalar() {
        let mut record = Record::from_scalar("critic_loss", 1.5);
        record.insert("kl_div", RecordValue::Scalar(0.25));

        assert_eq!(record.len(), 2);
        assert_eq!(record.get_scalar("critic_loss"), Ok(1.5));
        assert_eq!(record.get_scalar("kl_div"), Ok(0.25));
        assert_eq!(
            record.get_scalar("bc_loss"),
            Err(AcerError::RecordKeyError("bc_loss".to_string()))
        );
    }

    #[test]
    fn test_insert_overwrites() {
        let mut record = Record::from_slice(&[
            ("actor_loss", RecordValue::Scalar(1.0)),
            ("bc_loss", RecordValue::Scalar(2.0)),
        ]);
        record.insert("bc_loss", RecordValue::Scalar(3.0));

        assert_eq!(record.len(), 2);
        assert_eq!(record.get_scalar("bc_loss").unwrap(), 3.0);
        assert_eq!(record.iter().count(), 2);
    }
}
