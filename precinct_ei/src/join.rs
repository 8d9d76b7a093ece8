//! Full outer join of the vote tallies with the registration counts.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use snafu::{ensure, OptionExt};

use crate::aggregate::*;
use crate::config::*;
use crate::errors::*;

/// One row of the registration source, before canonicalization.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
pub struct RegistrationEntry {
    pub raw_name: String,
    pub count: u64,
}

/// Registered voters per precinct, as loaded from the registration source.
///
/// All the raw rows are kept: collisions between raw names that share a key
/// are only resolved by [`join`].
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct RegisteredVoters {
    entries: BTreeMap<PrecinctKey, BTreeSet<RegistrationEntry>>,
}

impl RegisteredVoters {
    pub fn from_rows<I, S>(rows: I) -> PrepResult<RegisteredVoters>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        let mut entries: BTreeMap<PrecinctKey, BTreeSet<RegistrationEntry>> = BTreeMap::new();
        for (raw_name, count) in rows {
            let raw_name = raw_name.as_ref();
            let key = PrecinctKey::canonicalize(raw_name).context(InvalidRecordSnafu {
                contest_id: "",
                candidate_id: "",
                precinct: raw_name,
                reason: "empty precinct name in registration",
            })?;
            ensure!(
                count >= 0,
                InvalidRecordSnafu {
                    contest_id: "",
                    candidate_id: "",
                    precinct: raw_name,
                    reason: format!("negative registration count {}", count),
                }
            );
            entries.entry(key).or_default().insert(RegistrationEntry {
                raw_name: raw_name.to_string(),
                count: count as u64,
            });
        }
        Ok(RegisteredVoters { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PrecinctKey> {
        self.entries.keys()
    }

    pub fn entries(&self, key: &PrecinctKey) -> Option<&BTreeSet<RegistrationEntry>> {
        self.entries.get(key)
    }

    fn raw_names<'a>(&'a self, key: &PrecinctKey) -> impl Iterator<Item = String> + 'a {
        self.entries
            .get(key)
            .into_iter()
            .flatten()
            .map(|e| e.raw_name.clone())
    }

    // The registration count of a key, once the raw rows agree.
    fn resolve(&self, key: &PrecinctKey, tolerance: u64) -> PrepResult<Option<u64>> {
        let entries = match self.entries.get(key) {
            Some(e) => e,
            None => return Ok(None),
        };
        let counts: BTreeSet<u64> = entries.iter().map(|e| e.count).collect();
        match (counts.iter().next(), counts.iter().next_back()) {
            (Some(&lo), Some(&hi)) if hi - lo <= tolerance => {
                if entries.len() > 1 {
                    debug!(
                        "resolve: precinct {} has {} consistent registration rows, using {}",
                        key,
                        entries.len(),
                        hi
                    );
                }
                Ok(Some(hi))
            }
            (Some(_), Some(_)) => UnresolvedPrecinctSnafu {
                precinct: key.to_string(),
                entries: entries
                    .iter()
                    .map(|e| (e.raw_name.clone(), e.count))
                    .collect::<Vec<(String, u64)>>(),
            }
            .fail(),
            _ => Ok(None),
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Registration {
    Known(u64),
    /// The precinct is absent from the registration source. This is not zero.
    Unknown,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum JoinSide {
    Both,
    VotesOnly,
    RegistrationOnly,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct JoinedPrecinct {
    counts: Vec<u64>,
    pub registration: Registration,
    pub side: JoinSide,
    pub precinct_ids: BTreeSet<String>,
    /// The raw precinct names of the results and of the registration rows.
    pub raw_names: BTreeSet<String>,
}

impl JoinedPrecinct {
    pub fn count(&self, id: CategoryId) -> u64 {
        self.counts[id.index()]
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// The sum over all categories, `None` on overflow.
    pub fn total_votes(&self) -> Option<u64> {
        self.counts.iter().try_fold(0u64, |acc, c| acc.checked_add(*c))
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct JoinStats {
    pub both: usize,
    pub votes_only: usize,
    pub registration_only: usize,
}

/// Every precinct of either source, exactly once, in key order.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct JoinedTable {
    categories: CategorySet,
    precincts: BTreeMap<PrecinctKey, JoinedPrecinct>,
    audit: AggregationAudit,
}

impl JoinedTable {
    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    /// The audit of the aggregation this table was built from.
    pub fn audit(&self) -> &AggregationAudit {
        &self.audit
    }

    pub fn len(&self) -> usize {
        self.precincts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precincts.is_empty()
    }

    pub fn get(&self, key: &PrecinctKey) -> Option<&JoinedPrecinct> {
        self.precincts.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PrecinctKey, &JoinedPrecinct)> {
        self.precincts.iter()
    }

    pub fn stats(&self) -> JoinStats {
        let mut stats = JoinStats::default();
        for jp in self.precincts.values() {
            match jp.side {
                JoinSide::Both => stats.both += 1,
                JoinSide::VotesOnly => stats.votes_only += 1,
                JoinSide::RegistrationOnly => stats.registration_only += 1,
            }
        }
        stats
    }
}

/// Full outer join on the precinct key.
///
/// Precincts with votes but no registration row are marked
/// [`Registration::Unknown`]. Precincts with a registration row but no votes
/// get zero counts in every category.
pub fn join(
    votes: &PrecinctCategoryTable,
    registered: &RegisteredVoters,
    collision_tolerance: u64,
) -> PrepResult<JoinedTable> {
    let num_categories = votes.categories().len();
    let mut precincts: BTreeMap<PrecinctKey, JoinedPrecinct> = BTreeMap::new();

    for (key, tally) in votes.iter() {
        let mut raw_names = tally.raw_names.clone();
        raw_names.extend(registered.raw_names(key));
        let (registration, side) = match registered.resolve(key, collision_tolerance)? {
            Some(n) => (Registration::Known(n), JoinSide::Both),
            None => {
                warn!(
                    "join: precinct {} (reported as {:?}) has votes but no registration count",
                    key, raw_names
                );
                (Registration::Unknown, JoinSide::VotesOnly)
            }
        };
        precincts.insert(
            key.clone(),
            JoinedPrecinct {
                counts: tally.counts().to_vec(),
                registration,
                side,
                precinct_ids: tally.precinct_ids.clone(),
                raw_names,
            },
        );
    }

    for key in registered.keys() {
        if precincts.contains_key(key) {
            continue;
        }
        if let Some(n) = registered.resolve(key, collision_tolerance)? {
            debug!("join: precinct {} has {} registered voters and no votes", key, n);
            precincts.insert(
                key.clone(),
                JoinedPrecinct {
                    counts: vec![0; num_categories],
                    registration: Registration::Known(n),
                    side: JoinSide::RegistrationOnly,
                    precinct_ids: BTreeSet::new(),
                    raw_names: registered.raw_names(key).collect(),
                },
            );
        }
    }

    let res = JoinedTable {
        categories: votes.categories().clone(),
        precincts,
        audit: votes.audit().clone(),
    };
    let stats = res.stats();
    info!(
        "join: {} precincts ({} in both sources, {} votes only, {} registration only)",
        res.len(),
        stats.both,
        stats.votes_only,
        stats.registration_only
    );
    Ok(res)
}
