pub use crate::config::*;

/// A contest as reported in a results file.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ContestInfo {
    pub id: String,
    pub name: String,
}

/// A candidate (ballot option) of a contest.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CandidateInfo {
    pub id: String,
    pub name: String,
    pub party: String,
}

/// A builder that flattens nested results (contests, then candidates, then
/// precincts) into [`RawBallotRecord`]s.
///
/// ```
/// use precinct_ei::builder::{Builder, CandidateInfo, ContestInfo};
///
/// let president = ContestInfo { id: "1".to_string(), name: "President".to_string() };
/// let harris = CandidateInfo {
///     id: "11".to_string(),
///     name: "Kamala D. Harris".to_string(),
///     party: "Democratic".to_string(),
/// };
///
/// let mut builder = Builder::new();
/// builder
///     .add_votes(&president, &harris, "101", "P1 (Ward 3)", 80)
///     .add_votes(&president, &harris, "102", "P2", 30);
///
/// let records = builder.build();
/// assert_eq!(records.len(), 2);
/// assert_eq!(records[0].precinct_name_raw, "P1 (Ward 3)");
/// ```
#[derive(Debug, Default)]
pub struct Builder {
    pub(crate) _records: Vec<RawBallotRecord>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            _records: Vec::new(),
        }
    }

    /// Adds the count of one candidate in one precinct.
    ///
    /// The count is not checked here, the aggregation rejects negative ones.
    pub fn add_votes(
        &mut self,
        contest: &ContestInfo,
        candidate: &CandidateInfo,
        precinct_id: &str,
        precinct_name: &str,
        count: i64,
    ) -> &mut Builder {
        self._records.push(RawBallotRecord {
            contest_id: contest.id.clone(),
            contest_name: contest.name.clone(),
            candidate_id: candidate.id.clone(),
            candidate_name: candidate.name.clone(),
            party: candidate.party.clone(),
            precinct_id: precinct_id.to_string(),
            precinct_name_raw: precinct_name.to_string(),
            vote_count: count,
        });
        self
    }

    /// Adds the records from another source, for example a second results
    /// file with partial counts for the same contests.
    pub fn extend(&mut self, records: &[RawBallotRecord]) -> &mut Builder {
        self._records.extend(records.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self._records.len()
    }

    pub fn is_empty(&self) -> bool {
        self._records.is_empty()
    }

    pub fn build(self) -> Vec<RawBallotRecord> {
        self._records
    }
}
