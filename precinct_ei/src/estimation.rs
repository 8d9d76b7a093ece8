//! The boundary with the ecological-inference estimator.
//!
//! The estimator (a multinomial-Dirichlet row-by-column model fitted by
//! MCMC) is an external collaborator. This module fixes what it is handed
//! and what shape of answer is accepted back.
//!
//! Convention for the answer: an R×C matrix where the entry (r, c) is the
//! estimated share of the voters of row category r that fall in column
//! category c. Every row sums to 1.

use log::{debug, info};
use snafu::ensure;

use crate::config::*;
use crate::errors::*;
use crate::join::*;
use crate::normalize::*;

/// Everything the estimator consumes, already validated.
#[derive(PartialEq, Debug, Clone)]
pub struct EiInput {
    row_fractions: FractionMatrix,
    col_fractions: FractionMatrix,
    registered: Vec<u64>,
}

impl EiInput {
    pub fn new(
        row_fractions: FractionMatrix,
        col_fractions: FractionMatrix,
        registered: Vec<u64>,
    ) -> PrepResult<EiInput> {
        ensure!(
            row_fractions.precincts() == col_fractions.precincts(),
            InvalidMatrixSnafu {
                label: "",
                precinct: "",
                detail: "row and column matrices cover different precincts",
            }
        );
        ensure!(
            registered.len() == row_fractions.num_precincts(),
            InvalidMatrixSnafu {
                label: "",
                precinct: "",
                detail: format!(
                    "{} registration counts for {} precincts",
                    registered.len(),
                    row_fractions.num_precincts()
                ),
            }
        );
        row_fractions.validate()?;
        col_fractions.validate()?;
        Ok(EiInput {
            row_fractions,
            col_fractions,
            registered,
        })
    }

    /// Normalizes the joined table and collects the registration vector in
    /// the same precinct order.
    pub fn from_joined(
        joined: &JoinedTable,
        row_categories: &[String],
        col_categories: &[String],
        rules: &PrepRules,
    ) -> PrepResult<EiInput> {
        let (rows, cols) = normalize(joined, row_categories, col_categories, rules)?;
        let mut registered: Vec<u64> = Vec::with_capacity(joined.len());
        for (key, jp) in joined.iter() {
            match jp.registration {
                Registration::Known(n) => registered.push(n),
                Registration::Unknown => {
                    return DegeneratePrecinctSnafu {
                        precinct: key.to_string(),
                        reason: DegenerateReason::UnknownRegistration,
                    }
                    .fail()
                }
            }
        }
        EiInput::new(rows, cols, registered)
    }

    pub fn row_fractions(&self) -> &FractionMatrix {
        &self.row_fractions
    }

    pub fn col_fractions(&self) -> &FractionMatrix {
        &self.col_fractions
    }

    pub fn registered(&self) -> &[u64] {
        &self.registered
    }

    pub fn precincts(&self) -> &[PrecinctKey] {
        self.row_fractions.precincts()
    }

    pub fn row_labels(&self) -> &[String] {
        self.row_fractions.labels()
    }

    pub fn col_labels(&self) -> &[String] {
        self.col_fractions.labels()
    }

    pub fn num_precincts(&self) -> usize {
        self.registered.len()
    }

    /// SHA-256 over the labels, the precinct keys, the registration counts
    /// and the exact bit patterns of both matrices.
    pub fn fingerprint(&self) -> String {
        let mut buf = String::new();
        for m in [&self.row_fractions, &self.col_fractions] {
            buf.push_str(&m.labels().join("\u{1f}"));
            buf.push('\u{1e}');
            for row in m.rows() {
                for v in row.iter() {
                    buf.push_str(&format!("{:016x}", v.to_bits()));
                }
                buf.push('\u{1e}');
            }
        }
        for key in self.precincts() {
            buf.push_str(key.as_str());
            buf.push('\u{1f}');
        }
        buf.push('\u{1e}');
        for n in self.registered.iter() {
            buf.push_str(&n.to_string());
            buf.push('\u{1f}');
        }
        sha256::digest(buf)
    }
}

/// Posterior means returned by the estimator, in the convention of this
/// module.
#[derive(PartialEq, Debug, Clone)]
pub struct PosteriorMeans {
    row_labels: Vec<String>,
    col_labels: Vec<String>,
    values: Vec<f64>,
}

impl PosteriorMeans {
    /// Rows are sampled averages, so they only sum to 1 up to this.
    pub const ROW_SUM_TOLERANCE: f64 = 1e-6;

    pub fn new(
        row_labels: Vec<String>,
        col_labels: Vec<String>,
        rows: &[Vec<f64>],
    ) -> PrepResult<PosteriorMeans> {
        ensure!(
            rows.len() == row_labels.len(),
            InvalidPosteriorSnafu {
                detail: format!("{} rows for {} row labels", rows.len(), row_labels.len()),
            }
        );
        let mut values: Vec<f64> = Vec::with_capacity(row_labels.len() * col_labels.len());
        for (label, row) in row_labels.iter().zip(rows.iter()) {
            ensure!(
                row.len() == col_labels.len(),
                InvalidPosteriorSnafu {
                    detail: format!(
                        "row {} has {} values for {} column labels",
                        label,
                        row.len(),
                        col_labels.len()
                    ),
                }
            );
            ensure!(
                row.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)),
                InvalidPosteriorSnafu {
                    detail: format!("row {} has values outside [0, 1]: {:?}", label, row),
                }
            );
            let sum: f64 = row.iter().sum();
            ensure!(
                (sum - 1.0).abs() <= PosteriorMeans::ROW_SUM_TOLERANCE,
                InvalidPosteriorSnafu {
                    detail: format!("row {} sums to {}", label, sum),
                }
            );
            values.extend(row.iter());
        }
        Ok(PosteriorMeans {
            row_labels,
            col_labels,
            values,
        })
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn col_labels(&self) -> &[String] {
        &self.col_labels
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.col_labels.len() + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let n = self.col_labels.len();
        &self.values[row * n..(row + 1) * n]
    }

    /// The labels must be those of the input, in the same order.
    pub fn check_against(&self, input: &EiInput) -> PrepResult<()> {
        ensure!(
            self.row_labels == input.row_labels() && self.col_labels == input.col_labels(),
            InvalidPosteriorSnafu {
                detail: format!(
                    "labels {:?} x {:?} do not match the input {:?} x {:?}",
                    self.row_labels,
                    self.col_labels,
                    input.row_labels(),
                    input.col_labels()
                ),
            }
        );
        Ok(())
    }
}

/// An ecological-inference estimator.
pub trait Estimator {
    fn fit(&self, input: &EiInput) -> PrepResult<PosteriorMeans>;
}

/// Runs the estimator and checks its answer against the input.
pub fn estimate<E: Estimator + ?Sized>(estimator: &E, input: &EiInput) -> PrepResult<PosteriorMeans> {
    info!(
        "estimate: {} precincts, {} x {} categories",
        input.num_precincts(),
        input.row_labels().len(),
        input.col_labels().len()
    );
    let res = estimator.fit(input)?;
    res.check_against(input)?;
    debug!("estimate: posterior means {:?}", res);
    Ok(res)
}
