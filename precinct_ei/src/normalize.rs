//! Registration-normalized fractions for the row and column category groups.

use std::collections::HashSet;

use log::{debug, info, warn};
use snafu::{ensure, OptionExt};

use crate::config::*;
use crate::errors::*;
use crate::join::*;

/// A category-by-precinct matrix of shares of registered voters.
///
/// The last category is always [`RESIDUAL_LABEL`]. Every entry lies in
/// [0, 1] and every column sums to 1 within [`FRACTION_TOLERANCE`].
/// Values are stored row-major and never modified after construction.
#[derive(PartialEq, Debug, Clone)]
pub struct FractionMatrix {
    labels: Vec<String>,
    precincts: Vec<PrecinctKey>,
    values: Vec<f64>,
}

impl FractionMatrix {
    // `columns` holds one vector of length `labels.len()` per precinct.
    fn from_columns(
        labels: Vec<String>,
        precincts: Vec<PrecinctKey>,
        columns: &[Vec<f64>],
    ) -> FractionMatrix {
        let num_precincts = precincts.len();
        let mut values = vec![0.0; labels.len() * num_precincts];
        for (p, column) in columns.iter().enumerate() {
            for (k, v) in column.iter().enumerate() {
                values[k * num_precincts + p] = *v;
            }
        }
        FractionMatrix {
            labels,
            precincts,
            values,
        }
    }

    /// Category labels, residual included.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn precincts(&self) -> &[PrecinctKey] {
        &self.precincts
    }

    pub fn num_categories(&self) -> usize {
        self.labels.len()
    }

    pub fn num_precincts(&self) -> usize {
        self.precincts.len()
    }

    /// (categories, precincts)
    pub fn shape(&self) -> (usize, usize) {
        (self.num_categories(), self.num_precincts())
    }

    pub fn get(&self, category: usize, precinct: usize) -> f64 {
        self.values[category * self.num_precincts() + precinct]
    }

    pub fn row(&self, category: usize) -> &[f64] {
        let n = self.num_precincts();
        &self.values[category * n..(category + 1) * n]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.num_categories()).map(move |k| self.row(k))
    }

    pub fn column(&self, precinct: usize) -> Vec<f64> {
        (0..self.num_categories())
            .map(|k| self.get(k, precinct))
            .collect()
    }

    /// Re-checks the range of every entry and the sum of every column.
    pub fn validate(&self) -> PrepResult<()> {
        ensure!(
            self.labels.last().map(|l| l.as_str()) == Some(RESIDUAL_LABEL),
            InvalidMatrixSnafu {
                label: self.labels.last().cloned().unwrap_or_default(),
                precinct: "",
                detail: "the last category is not the residual",
            }
        );
        for p in 0..self.num_precincts() {
            let mut sum = 0.0;
            for k in 0..self.num_categories() {
                let v = self.get(k, p);
                ensure!(
                    v.is_finite() && (0.0..=1.0).contains(&v),
                    InvalidMatrixSnafu {
                        label: self.labels[k].clone(),
                        precinct: self.precincts[p].to_string(),
                        detail: format!("value {} outside [0, 1]", v),
                    }
                );
                sum += v;
            }
            ensure!(
                (sum - 1.0).abs() <= FRACTION_TOLERANCE,
                InvalidMatrixSnafu {
                    label: RESIDUAL_LABEL,
                    precinct: self.precincts[p].to_string(),
                    detail: format!("column sums to {}", sum),
                }
            );
        }
        Ok(())
    }
}

// A category group resolved against the joined table.
struct Group<'a> {
    name: &'static str,
    labels: &'a [String],
    ids: Vec<CategoryId>,
}

impl<'a> Group<'a> {
    fn labels_with_residual(&self) -> Vec<String> {
        let mut labels = self.labels.to_vec();
        labels.push(RESIDUAL_LABEL.to_string());
        labels
    }
}

fn resolve_group<'a>(
    name: &'static str,
    labels: &'a [String],
    categories: &CategorySet,
) -> PrepResult<Group<'a>> {
    ensure!(!labels.is_empty(), EmptyCategoryGroupSnafu { group: name });
    let mut ids: Vec<CategoryId> = Vec::new();
    for label in labels.iter() {
        let id = match categories.id(label) {
            Some(id) => id,
            None => {
                return UnknownCategorySnafu {
                    label: label.clone(),
                }
                .fail()
            }
        };
        ensure!(
            !ids.contains(&id),
            DuplicateCategorySnafu {
                label: label.clone()
            }
        );
        ids.push(id);
    }
    Ok(Group { name, labels, ids })
}

/// Checks the categories that are in neither group.
fn check_undeclared(
    joined: &JoinedTable,
    rows: &Group,
    cols: &Group,
    policy: UndeclaredCategoryPolicy,
) -> PrepResult<()> {
    let grouped: HashSet<CategoryId> = rows.ids.iter().chain(cols.ids.iter()).cloned().collect();
    for (id, label) in joined.categories().iter() {
        if grouped.contains(&id) {
            continue;
        }
        let mut total: u64 = 0;
        for (key, jp) in joined.iter() {
            let c = jp.count(id);
            if c > 0 && policy == UndeclaredCategoryPolicy::Reject {
                return UnclassifiedCandidateSnafu {
                    subject: format!(
                        "category {:?} ({} votes), outside the row and column groups",
                        label, c
                    ),
                    precinct: key.to_string(),
                }
                .fail();
            }
            total = total.saturating_add(c);
        }
        if total > 0 {
            warn!(
                "normalize: {} votes of category {} counted in the residual",
                total, label
            );
        }
    }
    Ok(())
}

/// One column of a group for one precinct: the declared fractions followed
/// by the residual.
fn group_column(
    key: &PrecinctKey,
    jp: &JoinedPrecinct,
    registered: u64,
    group: &Group,
) -> PrepResult<Vec<f64>> {
    let mut column: Vec<f64> = Vec::with_capacity(group.ids.len() + 1);
    if registered == 0 {
        // All the counts are zero here, the caller checked it.
        column.resize(group.ids.len(), 0.0);
        column.push(1.0);
        return Ok(column);
    }
    let reg = registered as f64;
    let mut group_total: u64 = 0;
    for (id, label) in group.ids.iter().zip(group.labels.iter()) {
        let c = jp.count(*id);
        ensure!(
            c <= registered,
            OverVoteFractionSnafu {
                precinct: key.to_string(),
                scope: OverVoteScope::Category(label.clone()),
                fraction: c as f64 / reg,
            }
        );
        group_total = group_total
            .checked_add(c)
            .with_context(|| OverVoteFractionSnafu {
                precinct: key.to_string(),
                scope: OverVoteScope::GroupTotal(group.labels.to_vec()),
                fraction: (group_total as f64 + c as f64) / reg,
            })?;
        column.push(c as f64 / reg);
    }
    ensure!(
        group_total <= registered,
        OverVoteFractionSnafu {
            precinct: key.to_string(),
            scope: OverVoteScope::GroupTotal(group.labels.to_vec()),
            fraction: group_total as f64 / reg,
        }
    );
    // Exact integer difference, so the residual is never negative.
    column.push((registered - group_total) as f64 / reg);
    Ok(column)
}

/// Turns the joined counts into the row-group and column-group matrices.
///
/// Both matrices share the precinct order of `joined` and have the residual
/// category appended. Fails on the first precinct that cannot be normalized;
/// no partial matrix is returned.
pub fn normalize(
    joined: &JoinedTable,
    row_categories: &[String],
    col_categories: &[String],
    rules: &PrepRules,
) -> PrepResult<(FractionMatrix, FractionMatrix)> {
    let rows = resolve_group("row", row_categories, joined.categories())?;
    let cols = resolve_group("column", col_categories, joined.categories())?;
    check_undeclared(joined, &rows, &cols, rules.undeclared_categories)?;

    let mut precincts: Vec<PrecinctKey> = Vec::with_capacity(joined.len());
    let mut row_columns: Vec<Vec<f64>> = Vec::with_capacity(joined.len());
    let mut col_columns: Vec<Vec<f64>> = Vec::with_capacity(joined.len());
    let mut zero_registration: usize = 0;

    for (key, jp) in joined.iter() {
        let registered = match jp.registration {
            Registration::Known(n) => n,
            Registration::Unknown => {
                return DegeneratePrecinctSnafu {
                    precinct: key.to_string(),
                    reason: DegenerateReason::UnknownRegistration,
                }
                .fail()
            }
        };
        if registered == 0 {
            ensure!(
                jp.total_votes() == Some(0),
                DegeneratePrecinctSnafu {
                    precinct: key.to_string(),
                    reason: DegenerateReason::ZeroRegistrationWithVotes,
                }
            );
            ensure!(
                rules.zero_registration == ZeroRegistrationPolicy::Residual,
                DegeneratePrecinctSnafu {
                    precinct: key.to_string(),
                    reason: DegenerateReason::ZeroRegistration,
                }
            );
            zero_registration += 1;
        }
        let rc = group_column(key, jp, registered, &rows)?;
        let cc = group_column(key, jp, registered, &cols)?;
        debug!("normalize: {}: {} -> {:?} / {:?}", key, registered, rc, cc);
        precincts.push(key.clone());
        row_columns.push(rc);
        col_columns.push(cc);
    }

    if zero_registration > 0 {
        warn!(
            "normalize: {} precincts with zero registered voters assigned to {:?}",
            zero_registration, RESIDUAL_LABEL
        );
    }

    let row_matrix =
        FractionMatrix::from_columns(rows.labels_with_residual(), precincts.clone(), &row_columns);
    let col_matrix = FractionMatrix::from_columns(cols.labels_with_residual(), precincts, &col_columns);
    row_matrix.validate()?;
    col_matrix.validate()?;
    info!(
        "normalize: {} matrix {:?}, {} matrix {:?}",
        rows.name,
        row_matrix.shape(),
        cols.name,
        col_matrix.shape()
    );
    Ok((row_matrix, col_matrix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::classifier::Classifier;
    use proptest::prelude::*;

    fn rec(contest: &str, candidate: &str, party: &str, precinct: &str, count: i64) -> RawBallotRecord {
        RawBallotRecord {
            contest_id: contest.to_lowercase(),
            contest_name: contest.to_string(),
            candidate_id: candidate.to_lowercase(),
            candidate_name: candidate.to_string(),
            party: party.to_string(),
            precinct_id: precinct.to_lowercase(),
            precinct_name_raw: precinct.to_string(),
            vote_count: count,
        }
    }

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    fn presidential() -> Vec<String> {
        labels(&["Harris", "Trump", "President_Other"])
    }

    fn senate() -> Vec<String> {
        labels(&["Senate_D", "Senate_R", "Senate_Other"])
    }

    fn joined(records: &[RawBallotRecord], registration: Vec<(&str, i64)>) -> JoinedTable {
        let cl = Classifier::presidential_senate().unwrap();
        let t = aggregate(records, &cl).unwrap();
        let r = RegisteredVoters::from_rows(registration).unwrap();
        join(&t, &r, 0).unwrap()
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-12, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn single_precinct_scenario() {
        let _ = env_logger::try_init();
        let records = vec![
            rec("President", "Harris", "Dem", "P1 (Ward 3)", 80),
            rec("President", "Trump", "Rep", "p1", 20),
        ];
        let j = joined(&records, vec![("P1", 100)]);
        let (rows, cols) = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES).unwrap();
        assert_eq!(rows.shape(), (4, 1));
        assert_eq!(rows.precincts()[0].as_str(), "p1");
        assert_close(&rows.column(0), &[0.8, 0.2, 0.0, 0.0]);
        assert_close(&cols.column(0), &[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows.labels().last().map(|s| s.as_str()), Some(RESIDUAL_LABEL));
    }

    fn mixed() -> JoinedTable {
        let records = vec![
            rec("President", "Harris", "Democratic", "P1", 31),
            rec("President", "Trump", "Republican", "P1", 29),
            rec("President", "Oliver", "Libertarian", "P1", 3),
            rec("United States Senator", "Slotkin", "Democratic", "P1", 30),
            rec("United States Senator", "Rogers", "Republican", "P1", 28),
            rec("President", "Harris", "Democratic", "P2", 7),
            rec("President", "Trump", "Republican", "P2", 113),
            rec("United States Senator", "Rogers", "Republican", "P2", 109),
            rec("United States Senator", "Marsh", "Green", "P2", 4),
        ];
        joined(&records, vec![("P1", 97), ("P2", 211), ("P3", 17)])
    }

    #[test]
    fn columns_are_distributions() {
        let (rows, cols) = normalize(&mixed(), &presidential(), &senate(), &PrepRules::DEFAULT_RULES).unwrap();
        for m in [&rows, &cols] {
            assert_eq!(m.shape(), (4, 3));
            for p in 0..m.num_precincts() {
                let column = m.column(p);
                assert!(column.iter().all(|v| (0.0..=1.0).contains(v)));
                let sum: f64 = column.iter().sum();
                assert!((sum - 1.0).abs() <= FRACTION_TOLERANCE);
            }
        }
        // Registration only: everything is residual.
        assert_close(&rows.column(2), &[0.0, 0.0, 0.0, 1.0]);
        assert_close(&cols.row(1).to_vec(), &[28.0 / 97.0, 109.0 / 211.0, 0.0]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let j = mixed();
        let a = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES).unwrap();
        let b = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES).unwrap();
        let bits = |m: &FractionMatrix| -> Vec<u64> {
            m.rows().flat_map(|r| r.iter().map(|v| v.to_bits())).collect()
        };
        assert_eq!(bits(&a.0), bits(&b.0));
        assert_eq!(bits(&a.1), bits(&b.1));
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_registration_is_degenerate() {
        let records = vec![rec("President", "Harris", "Democratic", "P1", 3)];
        let j = joined(&records, vec![("P2", 10)]);
        let res = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES);
        assert_eq!(
            res,
            Err(PrepError::DegeneratePrecinct {
                precinct: "p1".to_string(),
                reason: DegenerateReason::UnknownRegistration
            })
        );
    }

    #[test]
    fn zero_registration_with_votes_is_degenerate() {
        let records = vec![rec("President", "Harris", "Democratic", "P1", 3)];
        let j = joined(&records, vec![("P1", 0)]);
        let res = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES);
        assert_eq!(
            res,
            Err(PrepError::DegeneratePrecinct {
                precinct: "p1".to_string(),
                reason: DegenerateReason::ZeroRegistrationWithVotes
            })
        );
    }

    #[test]
    fn empty_precinct_follows_zero_registration_policy() {
        let records = vec![rec("President", "Harris", "Democratic", "P1", 3)];
        let j = joined(&records, vec![("P1", 10), ("P2", 0)]);
        let (rows, _) = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES).unwrap();
        let column = rows.column(1);
        assert!(column.iter().all(|v| !v.is_nan()));
        assert_close(&column, &[0.0, 0.0, 0.0, 1.0]);

        let strict = PrepRules {
            zero_registration: ZeroRegistrationPolicy::Strict,
            ..PrepRules::DEFAULT_RULES
        };
        let res = normalize(&j, &presidential(), &senate(), &strict);
        assert_eq!(
            res,
            Err(PrepError::DegeneratePrecinct {
                precinct: "p2".to_string(),
                reason: DegenerateReason::ZeroRegistration
            })
        );
    }

    #[test]
    fn over_vote_on_a_category() {
        let records = vec![rec("President", "Harris", "Democratic", "P1", 120)];
        let j = joined(&records, vec![("P1", 100)]);
        let res = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES);
        match res {
            Err(PrepError::OverVoteFraction {
                precinct,
                scope,
                fraction,
            }) => {
                assert_eq!(precinct, "p1");
                assert_eq!(scope, OverVoteScope::Category("Harris".to_string()));
                assert!((fraction - 1.2).abs() < 1e-12);
            }
            x => panic!("unexpected result {:?}", x),
        }
    }

    #[test]
    fn over_vote_on_a_group_total() {
        let records = vec![
            rec("President", "Harris", "Democratic", "P1", 60),
            rec("President", "Trump", "Republican", "P1", 50),
        ];
        let j = joined(&records, vec![("P1", 100)]);
        let res = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES);
        assert!(matches!(
            res,
            Err(PrepError::OverVoteFraction {
                scope: OverVoteScope::GroupTotal(_),
                ..
            })
        ));
    }

    #[test]
    fn undeclared_category_is_rejected_unless_residual() {
        let records = vec![
            rec("President", "Harris", "Democratic", "P1", 40),
            rec("President", "Stein", "Green", "P1", 10),
        ];
        let j = joined(&records, vec![("P1", 100)]);
        let rows = labels(&["Harris", "Trump"]);
        let res = normalize(&j, &rows, &senate(), &PrepRules::DEFAULT_RULES);
        assert!(matches!(res, Err(PrepError::UnclassifiedCandidate { .. })));

        let lenient = PrepRules {
            undeclared_categories: UndeclaredCategoryPolicy::Residual,
            ..PrepRules::DEFAULT_RULES
        };
        let (m, _) = normalize(&j, &rows, &senate(), &lenient).unwrap();
        assert_close(&m.column(0), &[0.4, 0.0, 0.6]);
    }

    #[test]
    fn undeclared_category_without_votes_is_fine() {
        let records = vec![rec("President", "Harris", "Democratic", "P1", 40)];
        let j = joined(&records, vec![("P1", 100)]);
        let rows = labels(&["Harris", "Trump"]);
        assert!(normalize(&j, &rows, &senate(), &PrepRules::DEFAULT_RULES).is_ok());
    }

    #[test]
    fn group_labels_are_checked() {
        let j = mixed();
        let res = normalize(&j, &labels(&["Harris", "Nobody"]), &senate(), &PrepRules::DEFAULT_RULES);
        assert_eq!(
            res,
            Err(PrepError::UnknownCategory {
                label: "Nobody".to_string()
            })
        );
        let res = normalize(&j, &labels(&["Harris", "Harris"]), &senate(), &PrepRules::DEFAULT_RULES);
        assert!(matches!(res, Err(PrepError::DuplicateCategory { .. })));
        let res = normalize(&j, &[], &senate(), &PrepRules::DEFAULT_RULES);
        assert!(matches!(res, Err(PrepError::EmptyCategoryGroup { .. })));
    }

    #[test]
    fn huge_counts_over_vote_without_overflow() {
        let records = vec![
            rec("President", "Harris", "Democratic", "P1", i64::MAX),
            rec("President", "Trump", "Republican", "P1", i64::MAX),
        ];
        let j = joined(&records, vec![("P1", i64::MAX)]);
        let res = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES);
        match res {
            Err(PrepError::OverVoteFraction {
                scope: OverVoteScope::GroupTotal(_),
                fraction,
                ..
            }) => assert!((fraction - 2.0).abs() < 1e-9),
            x => panic!("unexpected result {:?}", x),
        }
    }

    // Six counts (three presidential, three senate) and the registered
    // voters beyond the larger of the two group totals.
    fn arb_precinct() -> impl Strategy<Value = ([i64; 6], i64)> {
        (prop::array::uniform6(0..5_000i64), 0..5_000i64)
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            failure_persistence: None,
            ..ProptestConfig::default()
        })]
        #[test]
        fn every_column_is_a_distribution(
            precincts in prop::collection::vec(arb_precinct(), 1..12),
        ) {
            let candidates = [
                ("President", "Harris", "Democratic"),
                ("President", "Trump", "Republican"),
                ("President", "Stein", "Green"),
                ("United States Senator", "Slotkin", "Democratic"),
                ("United States Senator", "Rogers", "Republican"),
                ("United States Senator", "Marsh", "Green"),
            ];
            let mut records = Vec::new();
            let mut registration = Vec::new();
            let names: Vec<String> = (0..precincts.len()).map(|i| format!("P{}", i)).collect();
            for ((counts, slack), name) in precincts.iter().zip(names.iter()) {
                for ((contest, candidate, party), count) in candidates.iter().zip(counts.iter()) {
                    records.push(rec(contest, candidate, party, name, *count));
                }
                let pres: i64 = counts[..3].iter().sum();
                let sen: i64 = counts[3..].iter().sum();
                registration.push((name.as_str(), pres.max(sen) + slack));
            }
            let j = joined(&records, registration);
            let (rows, cols) = normalize(&j, &presidential(), &senate(), &PrepRules::DEFAULT_RULES).unwrap();
            for m in [&rows, &cols] {
                prop_assert_eq!(m.shape(), (4, precincts.len()));
                for p in 0..m.num_precincts() {
                    let column = m.column(p);
                    prop_assert!(column.iter().all(|v| (0.0..=1.0).contains(v)), "{:?}", column);
                    let sum: f64 = column.iter().sum();
                    prop_assert!((sum - 1.0).abs() <= 1e-9, "column {} sums to {}", p, sum);
                }
                prop_assert!(m.validate().is_ok());
            }
        }
    }
}
