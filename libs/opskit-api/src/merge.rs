//! Re-attaches server GUIDs to collection entries before an update.
//!
//! The server treats a collection entry without a `guid` as new: the old
//! entry is deleted and a fresh one created, which loses whatever state hung
//! off it. [`CollectionMerger`] finds the existing entry each updated entry
//! stands for and copies its GUID over.
//!
//! Matching runs in two stages. First by value: an updated entry whose
//! fields equal those of an existing entry (ignoring `guid` and key order)
//! takes that entry's GUID. Then by logical key: one identity field is
//! chosen from the existing entries (`name`, else `key`, else any field
//! ending in `name`) and entries with equal values under it are paired.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::properties::{CollectionItem, PropertyMap, PropertyValue, ResponseProperty};

/// When the logical-key stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// The logical-key stage runs only when the value stage matched nothing
    /// in the whole collection.
    #[default]
    CollectionLevel,
    /// The logical-key stage runs for every entry the value stage left
    /// unmatched.
    PerItem,
}

/// How an updated entry got its GUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    ValueMatch { existing: usize, guid: String },
    LogicalKey { field: String, existing: usize, guid: String },
    NoMatch,
}

impl MergeDecision {
    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        match self {
            Self::ValueMatch { guid, .. } | Self::LogicalKey { guid, .. } => Some(guid),
            Self::NoMatch => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionMerger {
    strategy: MergeStrategy,
}

impl CollectionMerger {
    #[must_use]
    pub fn new(strategy: MergeStrategy) -> Self {
        Self { strategy }
    }

    #[must_use]
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Works out a decision per updated entry without touching anything.
    #[must_use]
    pub fn decide(&self, updated: &[CollectionItem], existing: &[CollectionItem]) -> Vec<MergeDecision> {
        let existing_values: Vec<_> = existing.iter().map(comparable_fields).collect();

        let mut decisions: Vec<MergeDecision> = updated
            .iter()
            .map(|item| {
                let fields = comparable_fields(item);
                existing_values
                    .iter()
                    .zip(existing)
                    .position(|(candidate, entry)| entry.guid.is_some() && *candidate == fields)
                    .and_then(|index| {
                        existing[index].guid.clone().map(|guid| MergeDecision::ValueMatch {
                            existing: index,
                            guid,
                        })
                    })
                    .unwrap_or(MergeDecision::NoMatch)
            })
            .collect();

        let any_value_match = decisions.iter().any(|d| matches!(d, MergeDecision::ValueMatch { .. }));
        if self.strategy == MergeStrategy::CollectionLevel && any_value_match {
            return decisions;
        }

        let Some(field) = existing.first().and_then(logical_key_field) else {
            return decisions;
        };

        for (decision, item) in decisions.iter_mut().zip(updated) {
            if *decision != MergeDecision::NoMatch {
                continue;
            }
            let Some(wanted) = item.fields.get(&field).and_then(PropertyValue::unwrapped) else {
                continue;
            };
            if wanted.is_null() {
                continue;
            }
            let found = existing.iter().enumerate().find_map(|(index, entry)| {
                let guid = entry.guid.as_ref()?;
                let value = entry.fields.get(&field)?.unwrapped()?;
                (value == wanted).then(|| (index, guid.clone()))
            });
            if let Some((existing, guid)) = found {
                *decision = MergeDecision::LogicalKey {
                    field: field.clone(),
                    existing,
                    guid,
                };
            }
        }
        decisions
    }

    /// Writes the GUIDs of matched existing entries into `updated`.
    ///
    /// Entries with no match are left without a GUID so the server creates
    /// them.
    pub fn merge(&self, updated: &mut [CollectionItem], existing: &[CollectionItem]) -> Vec<MergeDecision> {
        let decisions = self.decide(updated, existing);
        for (item, decision) in updated.iter_mut().zip(&decisions) {
            item.guid = decision.guid().map(str::to_owned);
        }
        tracing::debug!(
            updated = updated.len(),
            existing = existing.len(),
            matched = decisions.iter().filter(|d| d.guid().is_some()).count(),
            "associated existing collection guids"
        );
        decisions
    }

    /// Merges every collection in `updated` that is a collection on the
    /// server as well.
    ///
    /// Returns the names of the properties that were merged.
    pub fn merge_properties(
        &self,
        updated: &mut PropertyMap,
        existing: &BTreeMap<String, ResponseProperty>,
    ) -> Vec<String> {
        let mut merged = Vec::new();
        for (name, value) in updated.iter_mut() {
            let Some(current) = existing.get(name) else {
                continue;
            };
            if !current.is_collection() {
                continue;
            }
            let (Some(items), Some(existing_items)) =
                (value.collection_mut(), current.value.as_collection())
            else {
                continue;
            };
            self.merge(items, existing_items);
            merged.push(name.clone());
        }
        merged
    }
}

/// Field values with envelopes stripped, without `guid` and without
/// entries the server marks as not configurable.
fn comparable_fields(item: &CollectionItem) -> BTreeMap<&str, Value> {
    item.fields
        .iter()
        .filter_map(|(key, value)| value.unwrapped().map(|v| (key.as_str(), v)))
        .collect()
}

/// Picks the identity field from sorted field names: exactly `name`, then
/// exactly `key`, then the first name ending in `name` in any case.
fn logical_key_field(item: &CollectionItem) -> Option<String> {
    let names: Vec<&String> = item.fields.keys().collect();
    names
        .iter()
        .find(|n| n.as_str() == "name")
        .or_else(|| names.iter().find(|n| n.as_str() == "key"))
        .or_else(|| names.iter().find(|n| n.to_ascii_lowercase().ends_with("name")))
        .map(|n| (*n).clone())
}
