//! Citation deduplication.
//!
//! Grounding records arrive piecemeal across chunks and repeat freely. The set
//! keeps one entry per URI in first-seen order; a repeated URI refreshes the
//! stored title in place.

use std::collections::HashMap;

use super::types::{Citation, CitationRecord};

/// Ordered set of citations, unique by URI.
#[derive(Debug, Clone, Default)]
pub struct CitationSet {
    entries: Vec<Citation>,
    positions: HashMap<String, usize>,
}

impl CitationSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a full record sequence.
    #[must_use]
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a CitationRecord>,
    {
        let mut set = Self::new();
        set.extend(records);
        set
    }

    /// Merge one record. Records without a usable URI are dropped and `false`
    /// is returned.
    pub fn insert(&mut self, record: &CitationRecord) -> bool {
        let Some(uri) = record.uri.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            return false;
        };

        let citation = Citation {
            uri: uri.to_string(),
            title: record.title.clone(),
        };

        if let Some(&pos) = self.positions.get(uri) {
            self.entries[pos] = citation;
        } else {
            self.positions.insert(citation.uri.clone(), self.entries.len());
            self.entries.push(citation);
        }
        true
    }

    /// Merge a batch of records in order.
    pub fn extend<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a CitationRecord>,
    {
        for record in records {
            self.insert(record);
        }
    }

    /// Citations in first-seen order.
    #[must_use]
    pub fn as_slice(&self) -> &[Citation] {
        &self.entries
    }

    /// Copy of the citations in first-seen order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Citation> {
        self.entries.clone()
    }

    /// Number of distinct URIs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no citation has been kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn uris(set: &CitationSet) -> Vec<&str> {
        set.as_slice().iter().map(|c| c.uri.as_str()).collect()
    }

    #[test]
    fn test_dedup_by_uri_first_seen_order() {
        let records = vec![
            CitationRecord::new("https://a.example", "A"),
            CitationRecord::new("https://b.example", "B"),
            CitationRecord::new("https://a.example", "A again"),
        ];
        let set = CitationSet::from_records(&records);

        assert_eq!(uris(&set), vec!["https://a.example", "https://b.example"]);
        assert_eq!(set.as_slice()[0].title.as_deref(), Some("A again"));
    }

    #[test]
    fn test_records_without_uri_dropped() {
        let mut set = CitationSet::new();
        assert!(!set.insert(&CitationRecord {
            uri: None,
            title: Some("orphan".to_string()),
        }));
        assert!(!set.insert(&CitationRecord {
            uri: Some("   ".to_string()),
            title: None,
        }));
        assert!(set.is_empty());
    }

    #[test]
    fn test_invariant_under_rechunking() {
        let records = vec![
            CitationRecord::new("https://a.example", "A"),
            CitationRecord::default(),
            CitationRecord::new("https://b.example", "B"),
            CitationRecord::new("https://a.example", "A"),
            CitationRecord::new("https://c.example", "C"),
        ];
        let whole = CitationSet::from_records(&records);

        for split in 0..=records.len() {
            let mut piecewise = CitationSet::new();
            piecewise.extend(&records[..split]);
            piecewise.extend(&records[split..]);
            assert_eq!(piecewise.as_slice(), whole.as_slice());
        }
        assert_eq!(whole.len(), 3);
    }

    #[test]
    fn test_recomputation_is_stable() {
        let records = vec![
            CitationRecord::new("https://a.example", "A"),
            CitationRecord::new("https://b.example", "B"),
        ];
        let first = CitationSet::from_records(&records);
        let second = CitationSet::from_records(&records);
        assert_eq!(first.to_vec(), second.to_vec());
    }
}
