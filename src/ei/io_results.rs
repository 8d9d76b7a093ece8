// Reader for the nested JSON results export: contests (ballot items), then
// candidates (ballot options), then per-precinct counts.

use precinct_ei::builder::*;

use crate::ei::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrecinctResult {
    id: JSValue,
    name: String,
    #[serde(rename = "voteCount")]
    vote_count: JSValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BallotOption {
    id: JSValue,
    name: String,
    #[serde(rename = "politicalParty")]
    political_party: Option<String>,
    #[serde(rename = "precinctResults")]
    precinct_results: Vec<PrecinctResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BallotItem {
    id: JSValue,
    name: String,
    #[serde(rename = "ballotOptions")]
    ballot_options: Vec<BallotOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Results {
    #[serde(rename = "ballotItems")]
    ballot_items: Vec<BallotItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResultsExport {
    results: Results,
}

/// Ids are numbers in some exports and strings in others.
fn js_id(v: &JSValue) -> String {
    match v {
        JSValue::String(s) => s.clone(),
        JSValue::Null => "".to_string(),
        x => x.to_string(),
    }
}

fn js_count(v: &JSValue, path: &str, context: &str) -> EiResult<i64> {
    let res = match v {
        JSValue::Number(n) => n.as_i64(),
        JSValue::String(s) => parse_count(s),
        _ => None,
    };
    res.context(BadCountSnafu {
        path,
        context,
        content: v.to_string(),
    })
}

pub fn read_results_json(path: &str) -> EiResult<Vec<RawBallotRecord>> {
    info!("Attempting to read results file {:?}", path);
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    parse_results_json(contents.as_str(), path)
}

/// Flattens the export into one record per (contest, candidate, precinct).
pub fn parse_results_json(contents: &str, path: &str) -> EiResult<Vec<RawBallotRecord>> {
    let export: ResultsExport =
        serde_json::from_str(contents).context(ParsingJsonSnafu { path })?;
    let mut builder = Builder::new();
    for item in export.results.ballot_items.iter() {
        let contest = ContestInfo {
            id: js_id(&item.id),
            name: item.name.clone(),
        };
        debug!(
            "parse_results_json: contest {:?}: {} options",
            contest,
            item.ballot_options.len()
        );
        for option in item.ballot_options.iter() {
            let candidate = CandidateInfo {
                id: js_id(&option.id),
                name: option.name.clone(),
                party: option.political_party.clone().unwrap_or_default(),
            };
            for pr in option.precinct_results.iter() {
                let ctx = format!("{} / {} / {}", contest.name, candidate.name, pr.name);
                let count = js_count(&pr.vote_count, path, &ctx)?;
                builder.add_votes(&contest, &candidate, &js_id(&pr.id), &pr.name, count);
            }
        }
    }
    info!(
        "parse_results_json: {}: {} records",
        simplify_file_name(path),
        builder.len()
    );
    Ok(builder.build())
}
