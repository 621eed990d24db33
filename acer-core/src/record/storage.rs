//! Record storage and aggregation.
use super::{Record, RecordValue};
use std::collections::HashSet;

/// Stores records of consecutive learning steps and aggregates them.
///
/// Each value is averaged over the records in which it appears.
#[derive(Debug, Default)]
pub struct RecordStorage {
    data: Vec<Record>,
}

impl RecordStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    /// Stores a record.
    pub fn store(&mut self, record: Record) {
        self.data.push(record);
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn get_keys(&self) -> HashSet<String> {
        self.data
            .iter()
            .flat_map(|record| record.keys().cloned())
            .collect()
    }

    fn scalars(&self, key: &str) -> Vec<f32> {
        self.data
            .iter()
            .filter_map(|record| match record.get(key) {
                Some(RecordValue::Scalar(v)) => Some(*v),
                None => None,
            })
            .collect()
    }

    /// Aggregates the stored records into a single record and clears the storage.
    pub fn aggregate(&mut self) -> Record {
        let mut record = Record::empty();

        for key in self.get_keys() {
            let vs = self.scalars(&key);
            let mean = vs.iter().sum::<f32>() / vs.len() as f32;
            record.insert(key, RecordValue::Scalar(mean));
        }

        self.data.clear();
        record
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_aggregate_scalars() {
        let mut storage = RecordStorage::new();
        storage.store(Record::from_scalar("critic_loss", 1.0));
        storage.store(Record::from_scalar("critic_loss", 3.0));
        storage.store(Record::from_slice(&[
            ("critic_loss", RecordValue::Scalar(5.0)),
            ("kl_div", RecordValue::Scalar(0.5)),
        ]));
        assert_eq!(storage.len(), 3);

        let record = storage.aggregate();
        assert_eq!(record.get_scalar("critic_loss").unwrap(), 3.0);
        assert_eq!(record.get_scalar("kl_div").unwrap(), 0.5);
        assert!(storage.is_empty());
    }
}
