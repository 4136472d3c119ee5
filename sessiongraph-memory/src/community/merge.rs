//! Reconciling fresh detection output with stored communities

use std::collections::{BTreeMap, BTreeSet};

use super::detect::Communities;

/// Default minimum overlap for a detected community to fold into an existing one
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.5;

/// Share of `new` already present in `existing`
pub fn overlap_ratio(new: &BTreeSet<&str>, existing: &BTreeSet<&str>) -> f64 {
    if new.is_empty() {
        return 0.0;
    }
    new.intersection(existing).count() as f64 / new.len() as f64
}

/// Fold `detected` into `existing`.
///
/// Each detected community is matched against the existing ones as they were
/// passed in. The best match is the highest overlap ratio, ties going to the
/// lexicographically smallest existing key. At or above `threshold` the
/// members are unioned into that existing key, so a community keeps its
/// identity across refreshes; otherwise the detected community is added
/// under its own key. Existing communities nothing matched are kept as is.
pub fn merge_communities(
    existing: &Communities,
    detected: &Communities,
    threshold: f64,
) -> Communities {
    let existing_sets: BTreeMap<&str, BTreeSet<&str>> = existing
        .iter()
        .map(|(key, members)| (key.as_str(), members.iter().map(String::as_str).collect()))
        .collect();

    let mut merged: BTreeMap<String, BTreeSet<String>> = existing
        .iter()
        .map(|(key, members)| (key.clone(), members.iter().cloned().collect()))
        .collect();

    for (new_key, members) in detected {
        if members.is_empty() {
            continue;
        }
        let new_set: BTreeSet<&str> = members.iter().map(String::as_str).collect();

        // BTreeMap order visits keys ascending, so a strict `>` keeps the
        // smallest key among equal ratios.
        let mut best: Option<(&str, f64)> = None;
        for (key, set) in &existing_sets {
            let ratio = overlap_ratio(&new_set, set);
            if best.map_or(true, |(_, r)| ratio > r) {
                best = Some((*key, ratio));
            }
        }

        let target = match best {
            Some((key, ratio)) if ratio >= threshold => {
                log::debug!("Merging {} into {} (overlap {:.2})", new_key, key, ratio);
                key.to_string()
            }
            _ => {
                if merged.contains_key(new_key) {
                    log::warn!("Detected key {} collides with a stored community; unioning", new_key);
                }
                new_key.clone()
            }
        };
        merged
            .entry(target)
            .or_default()
            .extend(members.iter().cloned());
    }

    merged
        .into_iter()
        .map(|(key, members)| (key, members.into_iter().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn communities(entries: &[(&str, &[&str])]) -> Communities {
        entries
            .iter()
            .map(|(key, members)| {
                (
                    key.to_string(),
                    members.iter().map(|m| m.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_overlap_merges_into_existing_key() {
        let existing = communities(&[("g", &["a", "b", "c"])]);
        let detected = communities(&[("n", &["b", "c", "d"])]);
        let merged = merge_communities(&existing, &detected, DEFAULT_MERGE_THRESHOLD);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged["g"], vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_low_overlap_inserts_new() {
        let existing = communities(&[("g", &["a", "b", "c"])]);
        let detected = communities(&[("n", &["c", "d", "e"])]);
        let merged = merge_communities(&existing, &detected, DEFAULT_MERGE_THRESHOLD);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged["g"], vec!["a", "b", "c"]);
        assert_eq!(merged["n"], vec!["c", "d", "e"]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let existing = communities(&[("g", &["a", "b"])]);
        let detected = communities(&[("n", &["a", "z"])]);
        let merged = merge_communities(&existing, &detected, 0.5);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["g"], vec!["a", "b", "z"]);
    }

    #[test]
    fn test_tie_goes_to_smallest_key() {
        let existing = communities(&[("k2", &["a", "b"]), ("k1", &["c", "d"])]);
        let detected = communities(&[("n", &["a", "c"])]);
        let merged = merge_communities(&existing, &detected, 0.5);

        assert_eq!(merged["k1"], vec!["a", "c", "d"]);
        assert_eq!(merged["k2"], vec!["a", "b"]);
        assert!(!merged.contains_key("n"));
    }

    #[test]
    fn test_empty_inputs() {
        let existing = communities(&[("g", &["a"])]);
        let detected = communities(&[("empty", &[])]);
        assert_eq!(merge_communities(&existing, &detected, 0.5), existing);
        assert_eq!(
            merge_communities(&Communities::new(), &existing, 0.5),
            existing
        );
    }

    #[test]
    fn test_unmatched_existing_kept() {
        let existing = communities(&[("old", &["p", "q", "r"]), ("g", &["a", "b", "c"])]);
        let detected = communities(&[("n", &["a", "b", "c"])]);
        let merged = merge_communities(&existing, &detected, 0.5);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["old"], vec!["p", "q", "r"]);
        assert_eq!(merged["g"], vec!["a", "b", "c"]);
    }
}
