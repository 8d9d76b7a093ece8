use crate::ei::*;

use precinct_ei::classifier::*;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(rename = "analysisName")]
    pub analysis_name: String,
    #[serde(rename = "outputPath")]
    pub output_path: Option<String>,
    #[serde(rename = "electionDate")]
    pub election_date: Option<String>,
    #[serde(rename = "jurisdiction")]
    pub jurisdiction: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub analysis: String,
    pub date: Option<String>,
    pub jurisdiction: Option<String>,
    #[serde(rename = "rowCategories")]
    pub row_categories: Vec<String>,
    #[serde(rename = "columnCategories")]
    pub column_categories: Vec<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ResultsSource {
    #[serde(rename = "filePath")]
    pub file_path: String,
    /// Only nested JSON results are read for now.
    pub provider: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationSource {
    /// `csv` or `xlsx`
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    /// Header of the precinct name column. Defaults to the first column.
    #[serde(rename = "precinctColumn")]
    pub precinct_column: Option<String>,
    /// Header of the registered voters column. Defaults to the second column.
    #[serde(rename = "countColumn")]
    pub count_column: Option<String>,
    #[serde(rename = "excelWorksheetName")]
    pub excel_worksheet_name: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleConfig {
    #[serde(rename = "contestNameContains")]
    pub contest_name_contains: Option<String>,
    #[serde(rename = "contestNameEquals")]
    pub contest_name_equals: Option<String>,
    #[serde(rename = "contestId")]
    pub contest_id: Option<String>,
    #[serde(rename = "candidateNameContains")]
    pub candidate_name_contains: Option<String>,
    #[serde(rename = "candidateNameEquals")]
    pub candidate_name_equals: Option<String>,
    pub party: Option<String>,
    pub category: Option<String>,
    /// `category` (the default when a category is given), `opaque` or `ignore`.
    pub action: Option<String>,
}

impl RuleConfig {
    pub fn to_rule(&self, index: usize) -> EiResult<ClassifierRule> {
        let contest = match (
            &self.contest_name_contains,
            &self.contest_name_equals,
            &self.contest_id,
        ) {
            (None, None, None) => ContestMatch::Any,
            (Some(s), None, None) => ContestMatch::NameContains(s.clone()),
            (None, Some(s), None) => ContestMatch::NameEquals(s.clone()),
            (None, None, Some(s)) => ContestMatch::IdEquals(s.clone()),
            _ => {
                return InvalidConfigSnafu {
                    message: format!("rule #{}: more than one contest condition", index),
                }
                .fail()
            }
        };
        let candidate = match (
            &self.candidate_name_contains,
            &self.candidate_name_equals,
            &self.party,
        ) {
            (None, None, None) => CandidateMatch::Any,
            (Some(s), None, None) => CandidateMatch::NameContains(s.clone()),
            (None, Some(s), None) => CandidateMatch::NameEquals(s.clone()),
            (None, None, Some(s)) => CandidateMatch::PartyEquals(s.clone()),
            _ => {
                return InvalidConfigSnafu {
                    message: format!("rule #{}: more than one candidate condition", index),
                }
                .fail()
            }
        };
        let outcome = match (self.action.as_deref(), &self.category) {
            (None, Some(c)) | (Some("category"), Some(c)) => RuleOutcome::Category(c.clone()),
            (Some("opaque"), None) => RuleOutcome::Opaque,
            (Some("ignore"), None) => RuleOutcome::Ignore,
            (a, c) => {
                return InvalidConfigSnafu {
                    message: format!(
                        "rule #{}: cannot use action {:?} with category {:?}",
                        index, a, c
                    ),
                }
                .fail()
            }
        };
        Ok(ClassifierRule::new(contest, candidate, outcome))
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub categories: Vec<String>,
    pub rules: Vec<RuleConfig>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EiRules {
    #[serde(rename = "zeroRegistration")]
    pub zero_registration: Option<String>,
    #[serde(rename = "undeclaredCategories")]
    pub undeclared_categories: Option<String>,
    #[serde(rename = "registrationCollisionTolerance")]
    pub registration_collision_tolerance: Option<u64>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EiConfig {
    #[serde(rename = "outputSettings")]
    pub output_settings: OutputSettings,
    #[serde(rename = "resultsSources")]
    pub results_sources: Vec<ResultsSource>,
    #[serde(rename = "registrationSource")]
    pub registration_source: RegistrationSource,
    pub classifier: Option<ClassifierConfig>,
    #[serde(rename = "rowCategories")]
    pub row_categories: Vec<String>,
    #[serde(rename = "columnCategories")]
    pub column_categories: Vec<String>,
    pub rules: Option<EiRules>,
}

pub fn read_config(path: &str) -> EiResult<EiConfig> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let config: EiConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    debug!("read_config: {:?}", config);
    Ok(config)
}

/// The configured rule table, or the presidential / senate one.
pub fn build_classifier(config: &Option<ClassifierConfig>) -> EiResult<Classifier> {
    match config {
        None => Classifier::presidential_senate().context(PreparationSnafu {}),
        Some(cc) => {
            let categories = CategorySet::new(&cc.categories).context(PreparationSnafu {})?;
            let rules: Vec<ClassifierRule> = cc
                .rules
                .iter()
                .enumerate()
                .map(|(idx, r)| r.to_rule(idx))
                .collect::<EiResult<Vec<ClassifierRule>>>()?;
            Classifier::new(categories, &rules).context(PreparationSnafu {})
        }
    }
}

pub fn validate_rules(rules: &Option<EiRules>) -> EiResult<PrepRules> {
    let r = match rules {
        None => return Ok(PrepRules::DEFAULT_RULES),
        Some(r) => r,
    };
    let res = PrepRules {
        zero_registration: match r.zero_registration.as_deref() {
            None | Some("residual") => ZeroRegistrationPolicy::Residual,
            Some("strict") => ZeroRegistrationPolicy::Strict,
            Some(x) => {
                return InvalidConfigSnafu {
                    message: format!("unknown zeroRegistration policy {:?}", x),
                }
                .fail()
            }
        },
        undeclared_categories: match r.undeclared_categories.as_deref() {
            None | Some("reject") => UndeclaredCategoryPolicy::Reject,
            Some("residual") => UndeclaredCategoryPolicy::Residual,
            Some(x) => {
                return InvalidConfigSnafu {
                    message: format!("unknown undeclaredCategories policy {:?}", x),
                }
                .fail()
            }
        },
        registration_collision_tolerance: r.registration_collision_tolerance.unwrap_or(0),
    };
    Ok(res)
}
