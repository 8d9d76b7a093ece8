//! Preparation of precinct-level tallies for row-by-column ecological
//! inference.
//!
//! The pipeline runs in explicit stages, each a function from immutable
//! inputs to a new value:
//!
//! 1. [`classifier::Classifier`] maps each reported candidate to a category,
//! 2. [`aggregate::aggregate`] sums the records per precinct and category,
//! 3. [`join::join`] matches the tallies with the registration counts,
//! 4. [`normalize::normalize`] produces the two fraction matrices,
//! 5. [`estimation::EiInput`] bundles them for the estimator.
//!
//! [`prepare`] chains all of them.
mod config;
mod errors;

pub mod aggregate;
pub mod builder;
pub mod classifier;
pub mod estimation;
pub mod join;
pub mod manual;
pub mod normalize;

use log::info;

pub use crate::config::*;
pub use crate::errors::*;

use crate::aggregate::*;
use crate::classifier::*;
use crate::estimation::*;
use crate::join::*;

/// The output of every stage of [`prepare`].
#[derive(PartialEq, Debug, Clone)]
pub struct Prepared {
    pub table: PrecinctCategoryTable,
    pub joined: JoinedTable,
    pub input: EiInput,
}

/// Runs classify, aggregate, join and normalize over the loaded inputs.
///
/// Arguments:
/// * `records` the flattened vote counts of every contest
/// * `classifier` the rule table and its declared categories
/// * `registered` the registration counts, keyed by raw precinct name
/// * `row_categories`, `col_categories` the ordered category groups, without
///   the residual which is appended to both
/// * `rules` the policies for degenerate precincts and undeclared categories
pub fn prepare(
    records: &[RawBallotRecord],
    classifier: &Classifier,
    registered: &RegisteredVoters,
    row_categories: &[String],
    col_categories: &[String],
    rules: &PrepRules,
) -> Result<Prepared, PrepError> {
    info!(
        "prepare: {} records, {} registration keys, rules: {:?}",
        records.len(),
        registered.len(),
        rules
    );
    let table = aggregate(records, classifier)?;
    let joined = join(&table, registered, rules.registration_collision_tolerance)?;
    let input = EiInput::from_joined(&joined, row_categories, col_categories, rules)?;
    info!("prepare: input fingerprint {}", input.fingerprint());
    Ok(Prepared {
        table,
        joined,
        input,
    })
}

#[cfg(test)]
mod tests {
    use super::builder::*;
    use super::*;

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    fn contest(id: &str, name: &str) -> ContestInfo {
        ContestInfo {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn candidate(id: &str, name: &str, party: &str) -> CandidateInfo {
        CandidateInfo {
            id: id.to_string(),
            name: name.to_string(),
            party: party.to_string(),
        }
    }

    #[test]
    fn end_to_end_single_precinct() {
        let _ = env_logger::try_init();
        let president = contest("1", "President");
        let mut b = Builder::new();
        b.add_votes(&president, &candidate("11", "Harris", "Dem"), "P1", "P1 (Ward 3)", 80)
            .add_votes(&president, &candidate("12", "Trump", "Rep"), "P1", "p1", 20);
        let records = b.build();
        let cl = Classifier::presidential_senate().unwrap();
        let reg = RegisteredVoters::from_rows(vec![("P1", 100)]).unwrap();
        let res = prepare(
            &records,
            &cl,
            &reg,
            &labels(&["Harris", "Trump", "President_Other"]),
            &labels(&["Senate_D", "Senate_R", "Senate_Other"]),
            &PrepRules::DEFAULT_RULES,
        )
        .unwrap();

        let p1 = PrecinctKey::canonicalize("p1").unwrap();
        assert_eq!(res.table.count(&p1, "Harris"), Some(80));
        assert_eq!(res.table.count(&p1, "Trump"), Some(20));
        assert_eq!(res.joined.len(), 1);
        let rows = res.input.row_fractions();
        assert_eq!(rows.column(0), vec![0.8, 0.2, 0.0, 0.0]);
        assert_eq!(res.input.registered(), &[100]);
    }

    #[test]
    fn end_to_end_is_deterministic() {
        let president = contest("1", "President");
        let senate = contest("2", "United States Senator");
        let harris = candidate("11", "Harris", "Democratic");
        let trump = candidate("12", "Trump", "Republican");
        let slotkin = candidate("21", "Slotkin", "Democratic");
        let rogers = candidate("22", "Rogers", "Republican");
        let mut b = Builder::new();
        b.add_votes(&president, &harris, "1", "Ward 1", 210)
            .add_votes(&president, &trump, "1", "Ward 1", 140)
            .add_votes(&senate, &slotkin, "1", "WARD 1 (AV)", 205)
            .add_votes(&senate, &rogers, "1", "Ward 1", 139)
            .add_votes(&president, &harris, "2", "Ward 2", 75)
            .add_votes(&president, &trump, "2", "Ward 2", 301)
            .add_votes(&senate, &slotkin, "2", "Ward 2", 80)
            .add_votes(&senate, &rogers, "2", "Ward 2", 290);
        let records = b.build();
        let mut shuffled = records.clone();
        shuffled.reverse();
        shuffled.swap(1, 5);

        let cl = Classifier::presidential_senate().unwrap();
        let reg = RegisteredVoters::from_rows(vec![("Ward 1", 400), ("Ward 2", 420), ("Ward 3", 12)]).unwrap();
        let rows = labels(&["Harris", "Trump", "President_Other"]);
        let cols = labels(&["Senate_D", "Senate_R", "Senate_Other"]);
        let a = prepare(&records, &cl, &reg, &rows, &cols, &PrepRules::DEFAULT_RULES).unwrap();
        let b = prepare(&shuffled, &cl, &reg, &rows, &cols, &PrepRules::DEFAULT_RULES).unwrap();
        assert_eq!(a.input.fingerprint(), b.input.fingerprint());
        assert_eq!(a, b);
        assert_eq!(a.input.num_precincts(), 3);
    }

    #[test]
    fn failures_stop_the_pipeline() {
        let president = contest("1", "President");
        let mut b = Builder::new();
        b.add_votes(&president, &candidate("11", "Harris", "Democratic"), "P1", "P1", 80);
        let records = b.build();
        let cl = Classifier::presidential_senate().unwrap();
        let reg = RegisteredVoters::from_rows(vec![("P1", 60)]).unwrap();
        let res = prepare(
            &records,
            &cl,
            &reg,
            &labels(&["Harris", "Trump", "President_Other"]),
            &labels(&["Senate_D", "Senate_R", "Senate_Other"]),
            &PrepRules::DEFAULT_RULES,
        );
        assert!(matches!(res, Err(PrepError::OverVoteFraction { .. })));
    }
}
