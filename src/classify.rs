//! Operation allow-list filtering
//!
//! Records whose `operation` matches the allow-list (ASCII case-insensitive) are
//! stored; everything else is only counted. Distinct operation names are tracked
//! per bucket in an [`OperationSet`], which merges commutatively so partial
//! classifications can be combined in any order.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::EnrichedRecord;

const BUNDLED_OPERATIONS: &str = include_str!("../data/audit_operations.json");

/// Operations whose records are persisted
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    // lowercase name -> configured spelling
    names: HashMap<String, String>,
}

// Accepts a bare array or the `{"Operations": [...]}` wrapper
#[derive(Deserialize)]
#[serde(untagged)]
enum OperationsFile {
    List(Vec<String>),
    Wrapped {
        #[serde(rename = "Operations")]
        operations: Vec<String>,
    },
}

impl AllowList {
    /// Build from operation names; the first spelling of a name wins
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = HashMap::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            map.entry(name.to_ascii_lowercase())
                .or_insert_with(|| name.to_string());
        }
        Self { names: map }
    }

    /// Allow-list shipped with the crate
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_OPERATIONS)
    }

    /// Parse a JSON allow-list
    pub fn from_json(json: &str) -> Result<Self> {
        let names = match serde_json::from_str::<OperationsFile>(json)? {
            OperationsFile::List(names) => names,
            OperationsFile::Wrapped { operations } => operations,
        };
        let list = Self::new(names);
        if list.is_empty() {
            return Err(Error::config(
                "AuditLogOperationsFile",
                "operation allow-list is empty",
            ));
        }
        Ok(list)
    }

    /// Load from `path`, or the bundled list when no path is configured
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let json = tokio::fs::read_to_string(path).await?;
                Self::from_json(&json)
            }
            None => Self::bundled(),
        }
    }

    /// Configured spelling of `operation`, if it is allowed
    pub fn canonical(&self, operation: &str) -> Option<&str> {
        self.names
            .get(&operation.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether `operation` is allowed
    pub fn contains(&self, operation: &str) -> bool {
        self.canonical(operation).is_some()
    }

    /// Number of distinct allowed operations
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing is allowed
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Case-insensitive set of operation names
///
/// When several spellings of one name are inserted the lexicographically smallest
/// is kept, so the result does not depend on insertion or merge order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperationSet {
    names: BTreeMap<String, String>,
}

impl OperationSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a name
    pub fn insert(&mut self, name: &str) {
        let key = name.to_ascii_lowercase();
        match self.names.get_mut(&key) {
            Some(existing) if name < existing.as_str() => *existing = name.to_string(),
            Some(_) => {}
            None => {
                self.names.insert(key, name.to_string());
            }
        }
    }

    /// Union with another set
    pub fn merge(&mut self, other: OperationSet) {
        for name in other.names.into_values() {
            self.insert(&name);
        }
    }

    /// Case-insensitive membership
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in case-insensitive order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.values().map(String::as_str)
    }

    /// Owned, sorted copy of the names
    pub fn to_set(&self) -> BTreeSet<String> {
        self.names.values().cloned().collect()
    }
}

/// Result of filtering a record set
#[derive(Clone, Debug, Default)]
pub struct Classification {
    /// Records to persist
    pub included: Vec<EnrichedRecord>,
    /// Records filtered out
    pub excluded: Vec<EnrichedRecord>,
    /// Distinct operations among `included` (allow-list spelling)
    pub included_operations: OperationSet,
    /// Distinct operations among `excluded`
    pub excluded_operations: OperationSet,
}

impl Classification {
    /// Records processed
    pub fn total(&self) -> usize {
        self.included.len() + self.excluded.len()
    }

    /// Combine with another classification
    pub fn merge(&mut self, other: Classification) {
        self.included.extend(other.included);
        self.excluded.extend(other.excluded);
        self.included_operations.merge(other.included_operations);
        self.excluded_operations.merge(other.excluded_operations);
    }
}

/// Partition `records` by the allow-list
pub fn classify(records: Vec<EnrichedRecord>, allow_list: &AllowList) -> Classification {
    let mut out = Classification::default();
    for record in records {
        match allow_list.canonical(&record.record.operation) {
            Some(name) => {
                out.included_operations.insert(name);
                out.included.push(record);
            }
            None => {
                out.excluded_operations.insert(&record.record.operation);
                out.excluded.push(record);
            }
        }
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetailRecord;

    fn record(id: &str, operation: &str) -> EnrichedRecord {
        let detail: DetailRecord = serde_json::from_value(serde_json::json!({
            "Id": id,
            "CreationTime": "2024-03-10T11:15:42",
            "Operation": operation
        }))
        .unwrap();
        EnrichedRecord::bare(detail)
    }

    fn allow() -> AllowList {
        AllowList::new(["FileAccessed", "FileModified", "FileDeleted"])
    }

    #[test]
    fn six_of_ten_included() {
        let ops = [
            "FileAccessed",
            "fileaccessed",
            "FILEMODIFIED",
            "FileDeleted",
            "FileModified",
            "FileAccessed",
            "PageViewed",
            "SearchQueryPerformed",
            "pageviewed",
            "UserLoggedIn",
        ];
        let records: Vec<_> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| record(&i.to_string(), op))
            .collect();

        let c = classify(records, &allow());

        assert_eq!(c.included.len(), 6);
        assert_eq!(c.excluded.len(), 4);
        assert_eq!(c.total(), 10);

        let included_ids: BTreeSet<_> = c.included.iter().map(|r| r.record.id.clone()).collect();
        assert!(
            c.excluded
                .iter()
                .all(|r| !included_ids.contains(&r.record.id))
        );

        assert_eq!(
            c.included_operations.to_set(),
            BTreeSet::from([
                "FileAccessed".to_string(),
                "FileDeleted".to_string(),
                "FileModified".to_string()
            ])
        );
        assert_eq!(c.excluded_operations.len(), 3);
        assert!(c.excluded_operations.contains("PAGEVIEWED"));
    }

    #[test]
    fn operation_set_merge_is_order_independent() {
        let mut a = OperationSet::new();
        a.insert("pageViewed");
        a.insert("Search");
        let mut b = OperationSet::new();
        b.insert("PageViewed");
        b.insert("Other");

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 3);
        assert_eq!(
            ab.iter().collect::<Vec<_>>(),
            vec!["Other", "PageViewed", "Search"]
        );
    }

    #[test]
    fn classification_merge_matches_single_pass() {
        let records: Vec<_> = ["FileAccessed", "Other", "FileDeleted", "other"]
            .iter()
            .enumerate()
            .map(|(i, op)| record(&i.to_string(), op))
            .collect();

        let whole = classify(records.clone(), &allow());
        let mut left = classify(records[..2].to_vec(), &allow());
        let right = classify(records[2..].to_vec(), &allow());
        left.merge(right);

        assert_eq!(left.included.len(), whole.included.len());
        assert_eq!(left.excluded.len(), whole.excluded.len());
        assert_eq!(left.included_operations, whole.included_operations);
        assert_eq!(left.excluded_operations, whole.excluded_operations);
    }

    #[test]
    fn allow_list_accepts_both_file_shapes() {
        let list = AllowList::from_json(r#"["FileAccessed", "fileaccessed", " "]"#).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.canonical("FILEACCESSED"), Some("FileAccessed"));

        let wrapped = AllowList::from_json(r#"{"Operations": ["PageViewed"]}"#).unwrap();
        assert!(wrapped.contains("pageviewed"));
    }

    #[test]
    fn operation_match_ignores_case_but_not_whitespace() {
        let list = AllowList::new([" FileAccessed "]);
        assert_eq!(list.canonical("fileaccessed"), Some("FileAccessed"));
        assert!(!list.contains(" FileAccessed"));
        assert!(!list.contains("FileAccessed\t"));

        let c = classify(vec![record("1", "FileAccessed ")], &list);
        assert_eq!(c.included.len(), 0);
        assert_eq!(c.excluded.len(), 1);
    }

    #[test]
    fn empty_allow_list_is_rejected() {
        assert!(AllowList::from_json("[]").is_err());
    }

    #[test]
    fn bundled_allow_list_has_sharepoint_file_operations() {
        let list = AllowList::bundled().unwrap();
        assert!(list.contains("FileAccessed"));
        assert!(list.contains("filemodified"));
        assert!(!list.contains("UserLoggedIn"));
    }
}
