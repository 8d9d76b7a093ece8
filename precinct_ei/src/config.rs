// ********* Input data structures ***********

use std::fmt::Display;

use crate::errors::*;
use snafu::ensure;

/// Label of the residual category appended to every category group.
///
/// It collects the registered voters that are not tallied to a declared
/// category: undervotes, abstentions, write-ins outside the declared set.
pub const RESIDUAL_LABEL: &str = "No Vote / Other";

/// Tolerance used when checking that every precinct column sums to one.
pub const FRACTION_TOLERANCE: f64 = 1e-9;

/// One reported vote count: a candidate in a contest, in a precinct.
///
/// The count is signed because that is how result files report it. Negative
/// values are rejected by the aggregator.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct RawBallotRecord {
    pub contest_id: String,
    pub contest_name: String,
    pub candidate_id: String,
    pub candidate_name: String,
    pub party: String,
    pub precinct_id: String,
    pub precinct_name_raw: String,
    pub vote_count: i64,
}

/// The canonical identifier of a precinct.
///
/// Two sources are matched on this key only. It is obtained from a raw
/// precinct name by dropping any parenthetical suffix, lower-casing and
/// trimming: `"P1 (Ward 3)"` and `" p1"` are the same precinct.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
pub struct PrecinctKey(String);

impl PrecinctKey {
    /// Returns `None` when nothing is left of the name after canonicalization.
    pub fn canonicalize(raw: &str) -> Option<PrecinctKey> {
        let stem = match raw.find('(') {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        let key = stem.trim().to_lowercase();
        if key.is_empty() {
            None
        } else {
            Some(PrecinctKey(key))
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for PrecinctKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a category inside its [`CategorySet`].
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct CategoryId(usize);

impl CategoryId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The closed set of outcome categories retained by the aggregation.
///
/// Labels are exact identifiers (`Harris`, `Senate_D`, ...). The set is fixed
/// at construction, so every tally is a fixed-shape array indexed by
/// [`CategoryId`].
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CategorySet {
    labels: Vec<String>,
}

impl CategorySet {
    pub fn new(labels: &[String]) -> Result<CategorySet, PrepError> {
        let mut res: Vec<String> = Vec::new();
        for label in labels.iter() {
            ensure!(
                !label.trim().is_empty() && label != RESIDUAL_LABEL,
                UnknownCategorySnafu {
                    label: label.clone()
                }
            );
            ensure!(
                !res.contains(label),
                DuplicateCategorySnafu {
                    label: label.clone()
                }
            );
            res.push(label.clone());
        }
        Ok(CategorySet { labels: res })
    }

    pub fn id(&self, label: &str) -> Option<CategoryId> {
        self.labels.iter().position(|l| l == label).map(CategoryId)
    }

    /// Panics if the id was produced by another set.
    pub fn label(&self, id: CategoryId) -> &str {
        self.labels[id.0].as_str()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, &str)> {
        self.labels
            .iter()
            .enumerate()
            .map(|(idx, l)| (CategoryId(idx), l.as_str()))
    }
}

// ********* Configuration **********

/// What to do with a precinct that has zero registered voters and no votes.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ZeroRegistrationPolicy {
    /// The whole column goes to the residual category.
    Residual,
    /// The precinct is reported as degenerate.
    Strict,
}

/// What to do with votes tallied to a declared category that belongs to
/// neither the row group nor the column group.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum UndeclaredCategoryPolicy {
    /// Fail with [`PrepError::UnclassifiedCandidate`].
    Reject,
    /// Let these voters fall into the residual category.
    Residual,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PrepRules {
    pub zero_registration: ZeroRegistrationPolicy,
    pub undeclared_categories: UndeclaredCategoryPolicy,
    /// Largest difference between the registration counts of two raw names
    /// that share a precinct key before the key is reported as unresolved.
    pub registration_collision_tolerance: u64,
}

impl PrepRules {
    pub const DEFAULT_RULES: PrepRules = PrepRules {
        zero_registration: ZeroRegistrationPolicy::Residual,
        undeclared_categories: UndeclaredCategoryPolicy::Reject,
        registration_collision_tolerance: 0,
    };
}

impl Default for PrepRules {
    fn default() -> Self {
        PrepRules::DEFAULT_RULES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn canonical_key_drops_parenthetical_suffix() {
        let k1 = PrecinctKey::canonicalize("P1 (Ward 3)").unwrap();
        let k2 = PrecinctKey::canonicalize("  p1 ").unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.as_str(), "p1");
    }

    #[test]
    fn canonical_key_keeps_inner_spaces() {
        let k = PrecinctKey::canonicalize("Ann Arbor City, Ward 1, Precinct 4 (AV)").unwrap();
        assert_eq!(k.as_str(), "ann arbor city, ward 1, precinct 4");
    }

    #[test]
    fn canonical_key_rejects_empty_names() {
        assert_eq!(PrecinctKey::canonicalize("   "), None);
        assert_eq!(PrecinctKey::canonicalize("(absentee)"), None);
    }

    #[test]
    fn category_set_is_closed_and_ordered() {
        let cs = CategorySet::new(&labels(&["Harris", "Trump"])).unwrap();
        assert_eq!(cs.len(), 2);
        assert_eq!(cs.id("Trump").map(|id| id.index()), Some(1));
        assert_eq!(cs.id("trump"), None);
        let id = cs.id("Harris").unwrap();
        assert_eq!(cs.label(id), "Harris");
    }

    #[test]
    fn category_set_rejects_duplicates_and_residual() {
        assert_eq!(
            CategorySet::new(&labels(&["Harris", "Harris"])),
            Err(PrepError::DuplicateCategory {
                label: "Harris".to_string()
            })
        );
        assert!(matches!(
            CategorySet::new(&labels(&[RESIDUAL_LABEL])),
            Err(PrepError::UnknownCategory { .. })
        ));
    }
}
