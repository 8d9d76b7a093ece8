//! Per-precinct tallies of the declared categories.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;

use log::{debug, info, warn};
use snafu::{ensure, OptionExt};

use crate::classifier::*;
use crate::config::*;
use crate::errors::*;

/// The summed counts of one precinct, indexed by [`CategoryId`].
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PrecinctTally {
    counts: Vec<u64>,
    /// The raw precinct ids that were folded into this precinct.
    pub precinct_ids: BTreeSet<String>,
    /// The raw precinct names that were folded into this precinct.
    pub raw_names: BTreeSet<String>,
}

impl PrecinctTally {
    fn empty(num_categories: usize) -> PrecinctTally {
        PrecinctTally {
            counts: vec![0; num_categories],
            precinct_ids: BTreeSet::new(),
            raw_names: BTreeSet::new(),
        }
    }

    pub fn count(&self, id: CategoryId) -> u64 {
        self.counts[id.index()]
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// The sum over all categories, `None` on overflow.
    pub fn total(&self) -> Option<u64> {
        self.counts.iter().try_fold(0u64, |acc, c| acc.checked_add(*c))
    }

    fn absorb(&mut self, other: PrecinctTally) -> Option<()> {
        for (c, o) in self.counts.iter_mut().zip(other.counts) {
            *c = c.checked_add(o)?;
        }
        self.precinct_ids.extend(other.precinct_ids);
        self.raw_names.extend(other.raw_names);
        Some(())
    }
}

/// The accounting of the votes that did not reach a declared category.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct AggregationAudit {
    pub records: u64,
    pub declared_records: u64,
    pub declared_votes: u64,
    pub ignored_records: u64,
    pub ignored_votes: u64,
    /// Votes per opaque category (`{contest_id}_{candidate_id}`).
    pub opaque_votes: BTreeMap<String, u64>,
}

impl AggregationAudit {
    pub fn opaque_total(&self) -> Option<u64> {
        self.opaque_votes
            .values()
            .try_fold(0u64, |acc, c| acc.checked_add(*c))
    }

    fn absorb(&mut self, other: AggregationAudit) -> Option<()> {
        self.records = self.records.checked_add(other.records)?;
        self.declared_records = self.declared_records.checked_add(other.declared_records)?;
        self.declared_votes = self.declared_votes.checked_add(other.declared_votes)?;
        self.ignored_records = self.ignored_records.checked_add(other.ignored_records)?;
        self.ignored_votes = self.ignored_votes.checked_add(other.ignored_votes)?;
        for (label, votes) in other.opaque_votes {
            let v = self.opaque_votes.entry(label).or_insert(0);
            *v = v.checked_add(votes)?;
        }
        Some(())
    }
}

/// Counts per precinct and per declared category.
///
/// Invariant: for every precinct and category, the stored count is the sum
/// of the vote counts of all the records classified to that pair, whatever
/// the order of the records.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PrecinctCategoryTable {
    categories: CategorySet,
    precincts: BTreeMap<PrecinctKey, PrecinctTally>,
    audit: AggregationAudit,
}

impl PrecinctCategoryTable {
    pub fn empty(categories: &CategorySet) -> PrecinctCategoryTable {
        PrecinctCategoryTable {
            categories: categories.clone(),
            precincts: BTreeMap::new(),
            audit: AggregationAudit::default(),
        }
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn audit(&self) -> &AggregationAudit {
        &self.audit
    }

    pub fn len(&self) -> usize {
        self.precincts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precincts.is_empty()
    }

    pub fn get(&self, key: &PrecinctKey) -> Option<&PrecinctTally> {
        self.precincts.get(key)
    }

    /// The count for a precinct and a category label, if both are known.
    pub fn count(&self, key: &PrecinctKey, label: &str) -> Option<u64> {
        let id = self.categories.id(label)?;
        self.precincts.get(key).map(|t| t.count(id))
    }

    /// Precincts in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&PrecinctKey, &PrecinctTally)> {
        self.precincts.iter()
    }

    /// Combines two partial tallies over the same categories.
    ///
    /// The merge is associative and commutative, so record sets can be
    /// aggregated in any partition and merged back.
    pub fn merge(mut self, other: PrecinctCategoryTable) -> PrepResult<PrecinctCategoryTable> {
        ensure!(
            self.categories == other.categories,
            IncompatibleTablesSnafu {
                detail: format!(
                    "categories {:?} and {:?} differ",
                    self.categories.labels(),
                    other.categories.labels()
                )
            }
        );
        let num_categories = self.categories.len();
        for (key, tally) in other.precincts {
            let precinct = key.to_string();
            self.precincts
                .entry(key)
                .or_insert_with(|| PrecinctTally::empty(num_categories))
                .absorb(tally)
                .context(IncompatibleTablesSnafu {
                    detail: format!("vote count overflow in precinct {}", precinct),
                })?;
        }
        self.audit
            .absorb(other.audit)
            .context(IncompatibleTablesSnafu {
                detail: "vote count overflow in the audit",
            })?;
        Ok(self)
    }
}

/// Sums the records per precinct and per declared category.
///
/// Records of opaque and ignored classifications still register their
/// precinct, with their votes accounted in the audit only. Duplicate records
/// are legal and add up.
pub fn aggregate(
    records: &[RawBallotRecord],
    classifier: &Classifier,
) -> PrepResult<PrecinctCategoryTable> {
    let categories = classifier.categories();
    let mut table = PrecinctCategoryTable::empty(categories);
    for record in records.iter() {
        let count = checked_count(record)?;
        let key = PrecinctKey::canonicalize(&record.precinct_name_raw).context(
            InvalidRecordSnafu {
                contest_id: record.contest_id.clone(),
                candidate_id: record.candidate_id.clone(),
                precinct: record.precinct_name_raw.clone(),
                reason: "empty precinct name",
            },
        )?;
        let classification = classifier.classify(record)?;

        let tally = table
            .precincts
            .entry(key)
            .or_insert_with(|| PrecinctTally::empty(categories.len()));
        tally.precinct_ids.insert(record.precinct_id.clone());
        tally.raw_names.insert(record.precinct_name_raw.clone());

        let overflow = || InvalidRecordSnafu {
            contest_id: record.contest_id.clone(),
            candidate_id: record.candidate_id.clone(),
            precinct: record.precinct_name_raw.clone(),
            reason: "vote count overflow",
        };
        let audit = &mut table.audit;
        audit.records += 1;
        match classification {
            Classification::Declared(id) => {
                let c = &mut tally.counts[id.index()];
                *c = c.checked_add(count).with_context(overflow)?;
                audit.declared_records += 1;
                audit.declared_votes = audit
                    .declared_votes
                    .checked_add(count)
                    .with_context(overflow)?;
            }
            Classification::Opaque(label) => {
                let v = audit.opaque_votes.entry(label).or_insert(0);
                *v = v.checked_add(count).with_context(overflow)?;
            }
            Classification::Ignored => {
                audit.ignored_records += 1;
                audit.ignored_votes = audit
                    .ignored_votes
                    .checked_add(count)
                    .with_context(overflow)?;
            }
        }
    }

    let audit = &table.audit;
    info!(
        "aggregate: {} records over {} precincts, {} votes in declared categories",
        audit.records,
        table.precincts.len(),
        audit.declared_votes
    );
    if audit.ignored_records > 0 {
        warn!(
            "aggregate: ignored {} votes from {} records",
            audit.ignored_votes, audit.ignored_records
        );
    }
    if !audit.opaque_votes.is_empty() {
        debug!(
            "aggregate: {:?} votes in {} opaque categories",
            audit.opaque_total(),
            audit.opaque_votes.len()
        );
    }
    Ok(table)
}

/// Same result as [`aggregate`], with the records split across threads.
///
/// Errors are reported for the first faulty record in input order, as in
/// the sequential version.
pub fn aggregate_parallel(
    records: &[RawBallotRecord],
    classifier: &Classifier,
    partitions: usize,
) -> PrepResult<PrecinctCategoryTable> {
    let partitions = partitions.max(1);
    let chunk_size = ((records.len() + partitions - 1) / partitions).max(1);
    debug!(
        "aggregate_parallel: {} records in chunks of {}",
        records.len(),
        chunk_size
    );
    let partials: Vec<PrepResult<PrecinctCategoryTable>> = thread::scope(|s| {
        let handles: Vec<_> = records
            .chunks(chunk_size)
            .map(|part| s.spawn(move || aggregate(part, classifier)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });

    let mut res = PrecinctCategoryTable::empty(classifier.categories());
    for partial in partials {
        res = res.merge(partial?)?;
    }
    Ok(res)
}

fn checked_count(record: &RawBallotRecord) -> PrepResult<u64> {
    ensure!(
        record.vote_count >= 0,
        InvalidRecordSnafu {
            contest_id: record.contest_id.clone(),
            candidate_id: record.candidate_id.clone(),
            precinct: record.precinct_name_raw.clone(),
            reason: format!("negative vote count {}", record.vote_count),
        }
    );
    Ok(record.vote_count as u64)
}
