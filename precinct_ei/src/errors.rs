use std::fmt::Display;

use snafu::Snafu;

/// Why a precinct column could not be turned into fractions.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum DegenerateReason {
    /// The precinct reported votes but the registration source does not know it.
    UnknownRegistration,
    /// Zero registered voters, yet some votes were tallied.
    ZeroRegistrationWithVotes,
    /// Zero registered voters and no votes, under the strict policy.
    ZeroRegistration,
}

impl Display for DegenerateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegenerateReason::UnknownRegistration => write!(f, "registration count is unknown"),
            DegenerateReason::ZeroRegistrationWithVotes => {
                write!(f, "zero registered voters but votes were reported")
            }
            DegenerateReason::ZeroRegistration => write!(f, "zero registered voters"),
        }
    }
}

/// Which quantity went above the registration count.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum OverVoteScope {
    Category(String),
    /// The sum of all the declared categories of a group.
    GroupTotal(Vec<String>),
}

impl Display for OverVoteScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverVoteScope::Category(label) => write!(f, "category {}", label),
            OverVoteScope::GroupTotal(labels) => write!(f, "total of {}", labels.join(" + ")),
        }
    }
}

/// Errors that stop the preparation of the inference inputs.
///
/// None of them is recovered locally: a partially valid matrix is never
/// returned.
#[derive(PartialEq, Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PrepError {
    #[snafu(display(
        "invalid record (contest {contest_id:?}, candidate {candidate_id:?}, precinct {precinct:?}): {reason}"
    ))]
    InvalidRecord {
        contest_id: String,
        candidate_id: String,
        precinct: String,
        reason: String,
    },

    #[snafu(display(
        "precinct key {precinct:?} is shared by registration entries with different counts: {entries:?}"
    ))]
    UnresolvedPrecinct {
        precinct: String,
        entries: Vec<(String, u64)>,
    },

    #[snafu(display("precinct {precinct:?} is degenerate: {reason}"))]
    DegeneratePrecinct {
        precinct: String,
        reason: DegenerateReason,
    },

    #[snafu(display(
        "precinct {precinct:?}: {scope} is {fraction} of the registered voters"
    ))]
    OverVoteFraction {
        precinct: String,
        scope: OverVoteScope,
        fraction: f64,
    },

    #[snafu(display("no classification for {subject} (precinct {precinct:?})"))]
    UnclassifiedCandidate { subject: String, precinct: String },

    #[snafu(display("unknown category {label:?}"))]
    UnknownCategory { label: String },

    #[snafu(display("category {label:?} is declared more than once"))]
    DuplicateCategory { label: String },

    #[snafu(display("the {group} category group is empty"))]
    EmptyCategoryGroup { group: String },

    #[snafu(display("classifier rule #{index} is invalid: {reason}"))]
    InvalidRule { index: usize, reason: String },

    #[snafu(display("tables cannot be combined: {detail}"))]
    IncompatibleTables { detail: String },

    #[snafu(display("fraction matrix check failed for {label:?} at precinct {precinct:?}: {detail}"))]
    InvalidMatrix {
        label: String,
        precinct: String,
        detail: String,
    },

    #[snafu(display("posterior means rejected: {detail}"))]
    InvalidPosterior { detail: String },
}

pub type PrepResult<T> = Result<T, PrepError>;
