//! Groups true-classification rows into per-norma label sets.

use std::collections::BTreeMap;

use crate::model::ClassificationRow;

/// Separator used when serializing a label set into `sistema_gestao`.
pub const LABEL_SEPARATOR: &str = ", ";

/// norma_id -> distinct labels in first-seen order.
///
/// Keys iterate in ascending id order so staging writes are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormaLabels {
    inner: BTreeMap<i64, Vec<String>>,
}

impl NormaLabels {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, norma_id: i64) -> Option<&[String]> {
        self.inner.get(&norma_id).map(Vec::as_slice)
    }

    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.inner.keys().copied()
    }

    /// `(norma_id, sistema_gestao)` pairs as written by the apply phase.
    pub fn assignments(&self) -> impl Iterator<Item = (i64, Option<String>)> + '_ {
        self.inner
            .iter()
            .map(|(id, labels)| (*id, join_labels(labels)))
    }
}

/// Aggregate classification rows by norma.
///
/// Null and blank labels are skipped, but the norma still gets an entry.
pub fn aggregate<I>(rows: I) -> NormaLabels
where
    I: IntoIterator<Item = ClassificationRow>,
{
    let mut inner: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for row in rows {
        let labels = inner.entry(row.norma_id).or_default();
        let Some(label) = row.management_system_label else {
            continue;
        };
        if label.trim().is_empty() || labels.contains(&label) {
            continue;
        }
        labels.push(label);
    }
    NormaLabels { inner }
}

/// Serialize a label set; an empty set is stored as NULL.
pub fn join_labels(labels: &[String]) -> Option<String> {
    if labels.is_empty() {
        None
    } else {
        Some(labels.join(LABEL_SEPARATOR))
    }
}
