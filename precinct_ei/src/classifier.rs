//! Maps a reported (contest, candidate, party) to an outcome category.
//!
//! The mapping is a table of rules, evaluated in order, first match wins.
//! Contest and candidate names are matched case-insensitively, the party and
//! the contest id are matched exactly.

use log::debug;
use snafu::ensure;

use crate::config::*;
use crate::errors::*;

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ContestMatch {
    Any,
    NameContains(String),
    NameEquals(String),
    IdEquals(String),
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum CandidateMatch {
    Any,
    NameContains(String),
    NameEquals(String),
    PartyEquals(String),
}

/// What a matching rule does with the record.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum RuleOutcome {
    /// Tally to this declared category.
    Category(String),
    /// Tally to a category keyed by contest id and candidate id. These are
    /// audited but never enter the fraction matrices.
    Opaque,
    /// Drop the votes, counting them in the audit.
    Ignore,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ClassifierRule {
    pub contest: ContestMatch,
    pub candidate: CandidateMatch,
    pub outcome: RuleOutcome,
}

impl ClassifierRule {
    pub fn new(contest: ContestMatch, candidate: CandidateMatch, outcome: RuleOutcome) -> Self {
        ClassifierRule {
            contest,
            candidate,
            outcome,
        }
    }
}

/// The result of classifying one record.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Classification {
    Declared(CategoryId),
    Opaque(String),
    Ignored,
}

// The rules after validation, with the case-insensitive needles lower-cased once.
#[derive(Eq, PartialEq, Debug, Clone)]
enum CompiledOutcome {
    Declared(CategoryId),
    Opaque,
    Ignore,
}

#[derive(Eq, PartialEq, Debug, Clone)]
struct CompiledRule {
    contest: ContestMatch,
    candidate: CandidateMatch,
    outcome: CompiledOutcome,
}

impl CompiledRule {
    fn matches(&self, record: &RawBallotRecord) -> bool {
        let contest_ok = match &self.contest {
            ContestMatch::Any => true,
            ContestMatch::NameContains(s) => record.contest_name.to_lowercase().contains(s),
            ContestMatch::NameEquals(s) => record.contest_name.trim().to_lowercase() == *s,
            ContestMatch::IdEquals(s) => record.contest_id == *s,
        };
        contest_ok
            && match &self.candidate {
                CandidateMatch::Any => true,
                CandidateMatch::NameContains(s) => {
                    record.candidate_name.to_lowercase().contains(s)
                }
                CandidateMatch::NameEquals(s) => {
                    record.candidate_name.trim().to_lowercase() == *s
                }
                CandidateMatch::PartyEquals(s) => record.party == *s,
            }
    }
}

/// A validated rule table over a closed [`CategorySet`].
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Classifier {
    categories: CategorySet,
    rules: Vec<CompiledRule>,
}

impl Classifier {
    /// Checks every rule against the declared categories.
    ///
    /// A rule pointing at a category outside `categories`, or with an empty
    /// name needle, is rejected.
    pub fn new(categories: CategorySet, rules: &[ClassifierRule]) -> PrepResult<Classifier> {
        let mut compiled: Vec<CompiledRule> = Vec::new();
        for (index, rule) in rules.iter().enumerate() {
            let contest = match &rule.contest {
                ContestMatch::NameContains(s) => {
                    ContestMatch::NameContains(checked_needle(index, s)?)
                }
                ContestMatch::NameEquals(s) => ContestMatch::NameEquals(checked_needle(index, s)?),
                ContestMatch::IdEquals(s) => {
                    ensure!(
                        !s.is_empty(),
                        InvalidRuleSnafu {
                            index,
                            reason: "empty contest id"
                        }
                    );
                    ContestMatch::IdEquals(s.clone())
                }
                ContestMatch::Any => ContestMatch::Any,
            };
            let candidate = match &rule.candidate {
                CandidateMatch::NameContains(s) => {
                    CandidateMatch::NameContains(checked_needle(index, s)?)
                }
                CandidateMatch::NameEquals(s) => {
                    CandidateMatch::NameEquals(checked_needle(index, s)?)
                }
                CandidateMatch::PartyEquals(s) => CandidateMatch::PartyEquals(s.clone()),
                CandidateMatch::Any => CandidateMatch::Any,
            };
            let outcome = match &rule.outcome {
                RuleOutcome::Category(label) => match categories.id(label) {
                    Some(id) => CompiledOutcome::Declared(id),
                    None => {
                        return InvalidRuleSnafu {
                            index,
                            reason: format!("category {:?} is not declared", label),
                        }
                        .fail()
                    }
                },
                RuleOutcome::Opaque => CompiledOutcome::Opaque,
                RuleOutcome::Ignore => CompiledOutcome::Ignore,
            };
            compiled.push(CompiledRule {
                contest,
                candidate,
                outcome,
            });
        }
        debug!(
            "Classifier::new: {} rules over categories {:?}",
            compiled.len(),
            categories.labels()
        );
        Ok(Classifier {
            categories,
            rules: compiled,
        })
    }

    /// The presidential / senate rule table.
    ///
    /// Presidential candidates are told apart by name, senate candidates by
    /// party. Every other contest is opaque.
    pub fn presidential_senate() -> PrepResult<Classifier> {
        let categories = CategorySet::new(&[
            "Harris".to_string(),
            "Trump".to_string(),
            "President_Other".to_string(),
            "Senate_D".to_string(),
            "Senate_R".to_string(),
            "Senate_Other".to_string(),
        ])?;
        let president = || ContestMatch::NameContains("President".to_string());
        let senate = || ContestMatch::NameContains("United States Senator".to_string());
        let category = |s: &str| RuleOutcome::Category(s.to_string());
        let rules = vec![
            ClassifierRule::new(
                president(),
                CandidateMatch::NameContains("Harris".to_string()),
                category("Harris"),
            ),
            ClassifierRule::new(
                president(),
                CandidateMatch::NameContains("Trump".to_string()),
                category("Trump"),
            ),
            ClassifierRule::new(president(), CandidateMatch::Any, category("President_Other")),
            ClassifierRule::new(
                senate(),
                CandidateMatch::PartyEquals("Democratic".to_string()),
                category("Senate_D"),
            ),
            ClassifierRule::new(
                senate(),
                CandidateMatch::PartyEquals("Republican".to_string()),
                category("Senate_R"),
            ),
            ClassifierRule::new(senate(), CandidateMatch::Any, category("Senate_Other")),
            ClassifierRule::new(ContestMatch::Any, CandidateMatch::Any, RuleOutcome::Opaque),
        ];
        Classifier::new(categories, &rules)
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    /// Classifies a record. Only the contest, candidate and party fields are
    /// looked at.
    pub fn classify(&self, record: &RawBallotRecord) -> PrepResult<Classification> {
        let rule = self.rules.iter().find(|r| r.matches(record));
        match rule.map(|r| &r.outcome) {
            Some(CompiledOutcome::Declared(id)) => Ok(Classification::Declared(*id)),
            Some(CompiledOutcome::Opaque) => Ok(Classification::Opaque(format!(
                "{}_{}",
                record.contest_id, record.candidate_id
            ))),
            Some(CompiledOutcome::Ignore) => Ok(Classification::Ignored),
            None => UnclassifiedCandidateSnafu {
                subject: format!(
                    "contest {:?} ({}), candidate {:?} ({}), party {:?}",
                    record.contest_name,
                    record.contest_id,
                    record.candidate_name,
                    record.candidate_id,
                    record.party
                ),
                precinct: record.precinct_name_raw.clone(),
            }
            .fail(),
        }
    }
}

fn checked_needle(index: usize, s: &str) -> PrepResult<String> {
    let needle = s.trim().to_lowercase();
    ensure!(
        !needle.is_empty(),
        InvalidRuleSnafu {
            index,
            reason: "empty name pattern"
        }
    );
    Ok(needle)
}
