use log::{debug, info, warn};

use precinct_ei::aggregate::*;
use precinct_ei::builder::Builder;
use precinct_ei::estimation::*;
use precinct_ei::join::*;
use precinct_ei::normalize::FractionMatrix;
use precinct_ei::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::Path;

use calamine::{open_workbook, Reader, Xlsx};

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

pub mod config_reader;
mod io_common;
mod io_registration;
mod io_results;

use crate::ei::config_reader::*;
use crate::ei::io_common::*;
use crate::ei::io_registration::*;
use crate::ei::io_results::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EiError {
    #[snafu(display("Error opening excel file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("Worksheet {worksheet:?} not found in {path}"))]
    MissingWorksheet { path: String, worksheet: String },
    #[snafu(display("Empty excel file {path}"))]
    EmptyExcel { path: String },
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON in {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing the summary"))]
    WritingJson { source: serde_json::Error },
    #[snafu(display("{path}: could not parse line {lineno}"))]
    CsvLineParse {
        source: csv::Error,
        path: String,
        lineno: usize,
    },
    #[snafu(display("{path}: column {column:?} not found"))]
    MissingColumn { path: String, column: String },
    #[snafu(display("{path}: {context}: cannot read a count from {content}"))]
    BadCount {
        path: String,
        context: String,
        content: String,
    },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},
    #[snafu(display("Invalid configuration: {message}"))]
    InvalidConfig { message: String },
    #[snafu(display("{source}"))]
    Preparation { source: PrepError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type EiResult<T> = Result<T, EiError>;

/// Posterior means computed outside of this program and read back from a
/// JSON file.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorFile {
    #[serde(rename = "rowLabels")]
    pub row_labels: Vec<String>,
    #[serde(rename = "columnLabels")]
    pub column_labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl PosteriorFile {
    pub fn read(path: &str) -> EiResult<PosteriorFile> {
        info!("Attempting to read posterior file {:?}", path);
        let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })
    }
}

impl Estimator for PosteriorFile {
    fn fit(&self, _input: &EiInput) -> Result<PosteriorMeans, PrepError> {
        PosteriorMeans::new(
            self.row_labels.clone(),
            self.column_labels.clone(),
            &self.values,
        )
    }
}

pub fn read_summary(path: &str) -> EiResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    debug!("read_summary: {:?}", contents);
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    Ok(js)
}

/// One array per category, in label order.
fn matrix_to_json(m: &FractionMatrix) -> JSValue {
    let rows: Vec<&[f64]> = m.rows().collect();
    json!(rows)
}

fn audit_to_json(audit: &AggregationAudit) -> JSValue {
    json!({
        "records": audit.records,
        "declaredRecords": audit.declared_records,
        "declaredVotes": audit.declared_votes,
        "ignoredRecords": audit.ignored_records,
        "ignoredVotes": audit.ignored_votes,
        "opaqueVotes": audit.opaque_votes,
    })
}

/// Same layout as the posterior file.
fn posterior_to_json(pm: &PosteriorMeans) -> JSValue {
    let values: Vec<&[f64]> = (0..pm.row_labels().len()).map(|r| pm.row(r)).collect();
    json!({
        "rowLabels": pm.row_labels(),
        "columnLabels": pm.col_labels(),
        "values": values,
    })
}

/// The posterior means as a text table, one line per row category.
pub fn posterior_table(pm: &PosteriorMeans) -> String {
    let width = pm
        .row_labels()
        .iter()
        .chain(pm.col_labels().iter())
        .map(|s| s.len())
        .max()
        .unwrap_or(0)
        .max(8);
    let mut res = format!("{:width$}", "", width = width);
    for c in pm.col_labels() {
        res.push_str(&format!(" {:>width$}", c, width = width));
    }
    res.push('\n');
    for (idx, r) in pm.row_labels().iter().enumerate() {
        res.push_str(&format!("{:width$}", r, width = width));
        for v in pm.row(idx) {
            res.push_str(&format!(" {:>width$.4}", v, width = width));
        }
        res.push('\n');
    }
    res
}

fn build_summary_js(
    config: &EiConfig,
    prepared: &Prepared,
    posterior: &Option<PosteriorMeans>,
) -> JSValue {
    let c = OutputConfig {
        analysis: config.output_settings.analysis_name.clone(),
        date: config.output_settings.election_date.clone(),
        jurisdiction: config.output_settings.jurisdiction.clone(),
        row_categories: config.row_categories.clone(),
        column_categories: config.column_categories.clone(),
    };
    let input = &prepared.input;
    let stats = prepared.joined.stats();
    let precincts: Vec<&str> = input.precincts().iter().map(|k| k.as_str()).collect();
    // The names under which each precinct was reported, in both sources.
    let precinct_names: Vec<Vec<&str>> = input
        .precincts()
        .iter()
        .map(|k| {
            prepared
                .joined
                .get(k)
                .map(|jp| jp.raw_names.iter().map(|n| n.as_str()).collect::<Vec<&str>>())
                .unwrap_or_default()
        })
        .collect();
    let mut js = json!({
        "config": c,
        "audit": audit_to_json(prepared.table.audit()),
        "join": {
            "both": stats.both,
            "votesOnly": stats.votes_only,
            "registrationOnly": stats.registration_only,
        },
        "precincts": precincts,
        "precinctNames": precinct_names,
        "registered": input.registered(),
        "rowLabels": input.row_labels(),
        "columnLabels": input.col_labels(),
        "rowFractions": matrix_to_json(input.row_fractions()),
        "columnFractions": matrix_to_json(input.col_fractions()),
        "fingerprint": input.fingerprint(),
    });
    if let (Some(pm), Some(obj)) = (posterior, js.as_object_mut()) {
        obj.insert("posterior".to_string(), posterior_to_json(pm));
    }
    js
}

/// Reads every input named by the configuration file and runs the
/// preparation. Relative paths are resolved against the directory of the
/// configuration file.
pub fn prepare_from_config(config_path: &str) -> EiResult<(EiConfig, Prepared)> {
    let config = read_config(config_path)?;
    info!("config: {:?}", config);

    let rules = validate_rules(&config.rules)?;
    let classifier = build_classifier(&config.classifier)?;

    ensure!(
        !config.results_sources.is_empty(),
        InvalidConfigSnafu {
            message: "no results sources"
        }
    );

    let root_p = Path::new(config_path)
        .parent()
        .context(MissingParentDirSnafu {})?;
    let mut builder = Builder::new();
    for rs in config.results_sources.iter() {
        let p = resolve_path(root_p, &rs.file_path);
        let file_data = match rs.provider.as_deref() {
            None | Some("json") => read_results_json(&p)?,
            Some(x) => whatever!("Results provider not implemented {:?}", x),
        };
        debug!(
            "prepare_from_config: {} records from {}",
            file_data.len(),
            simplify_file_name(&p)
        );
        builder.extend(&file_data);
    }
    let records = builder.build();

    let reg_p = resolve_path(root_p, &config.registration_source.file_path);
    let registered = read_registration(&reg_p, &config.registration_source)?;

    let prepared = prepare(
        &records,
        &classifier,
        &registered,
        &config.row_categories,
        &config.column_categories,
        &rules,
    )
    .context(PreparationSnafu {})?;
    Ok((config, prepared))
}

/// The summary of one run, with the posterior means when they were given.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub config: EiConfig,
    pub summary: JSValue,
    pub posterior: Option<PosteriorMeans>,
}

/// Prepares the inputs, attaches the posterior means if given and builds
/// the summary.
pub fn build_analysis(config_path: &str, posterior_path: &Option<String>) -> EiResult<Analysis> {
    let (config, prepared) = prepare_from_config(config_path)?;
    let posterior = match posterior_path {
        None => None,
        Some(p) => {
            let pf = PosteriorFile::read(p)?;
            Some(estimate(&pf, &prepared.input).context(PreparationSnafu {})?)
        }
    };
    let summary = build_summary_js(&config, &prepared, &posterior);
    Ok(Analysis {
        config,
        summary,
        posterior,
    })
}

pub fn run_analysis(
    config_path: &str,
    out: &Option<String>,
    reference: &Option<String>,
    posterior_path: &Option<String>,
) -> EiResult<()> {
    let analysis = build_analysis(config_path, posterior_path)?;
    let pretty_js_stats =
        serde_json::to_string_pretty(&analysis.summary).context(WritingJsonSnafu {})?;

    // The command line takes precedence over the configuration file.
    let out_path = match out {
        Some(x) => Some(x.clone()),
        None => analysis.config.output_settings.output_path.clone(),
    };
    match out_path.as_deref() {
        Some("stdout") => {
            println!("{}", pretty_js_stats);
        }
        Some(p) => {
            info!("Writing summary to {:?}", p);
            fs::write(p, &pretty_js_stats).context(WritingFileSnafu { path: p })?;
        }
        None => {
            debug!("run_analysis: no output requested");
        }
    }

    // Keeps stdout parseable when the summary goes there.
    if let Some(pm) = &analysis.posterior {
        if out_path.as_deref() != Some("stdout") {
            println!("{}", posterior_table(pm));
        }
    }

    // The reference summary, if provided for comparison
    if let Some(summary_p) = reference {
        let summary_ref = read_summary(summary_p)?;
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(WritingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference summary");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_ref(),
                "\n",
            );
            whatever!("Difference detected between calculated summary and reference summary")
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_path(name: &str) -> String {
        fixture_path("basic", name)
    }

    fn fixture_path(dir: &str, name: &str) -> String {
        format!("{}/tests/data/{}/{}", env!("CARGO_MANIFEST_DIR"), dir, name)
    }

    fn temp_path(name: &str) -> String {
        let p = std::env::temp_dir().join(format!("eiprep-{}-{}", std::process::id(), name));
        p.display().to_string()
    }

    fn floats(js: &JSValue) -> Vec<f64> {
        js.as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect()
    }

    #[test]
    fn basic_summary() {
        let _ = env_logger::try_init();
        let analysis = build_analysis(&data_path("config.json"), &None).unwrap();
        let js = &analysis.summary;
        assert_eq!(js["precincts"], json!(["ward 1", "ward 2", "ward 3"]));
        assert_eq!(
            js["precinctNames"],
            json!([["Ward 1", "Ward 1 (AV)"], ["Ward 2", "Ward 2 "], ["Ward 3"]])
        );
        assert_eq!(js["registered"], json!([400, 420, 12]));
        assert_eq!(
            js["rowLabels"],
            json!(["Harris", "Trump", "President_Other", "No Vote / Other"])
        );
        assert_eq!(js["join"]["both"], json!(2));
        assert_eq!(js["join"]["registrationOnly"], json!(1));
        assert_eq!(js["audit"]["records"], json!(15));
        assert_eq!(js["audit"]["declaredVotes"], json!(1487));
        assert_eq!(js["audit"]["opaqueVotes"]["3_31"], json!(100));
        assert_eq!(js["audit"]["opaqueVotes"]["3_32"], json!(50));

        // Harris, per precinct. The absentee line is folded into ward 1.
        assert_eq!(
            floats(&js["rowFractions"][0]),
            vec![230.0 / 400.0, 75.0 / 420.0, 0.0]
        );
        // Residual of the column group.
        assert_eq!(
            floats(&js["columnFractions"][3]),
            vec![44.0 / 400.0, 45.0 / 420.0, 1.0]
        );
        assert!(js.get("posterior").is_none());
        assert_eq!(js["fingerprint"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn reference_comparison() {
        let out = temp_path("summary.json");
        run_analysis(&data_path("config.json"), &Some(out.clone()), &None, &None).unwrap();
        // Every float reads back to the same bits.
        let written = read_summary(&out).unwrap();
        let analysis = build_analysis(&data_path("config.json"), &None).unwrap();
        assert_eq!(written, analysis.summary);
        // Same inputs, same summary.
        run_analysis(&data_path("config.json"), &None, &Some(out.clone()), &None).unwrap();

        let mut tampered = read_summary(&out).unwrap();
        tampered["registered"] = json!([400, 420, 13]);
        let tampered_p = temp_path("tampered.json");
        fs::write(&tampered_p, tampered.to_string()).unwrap();
        let res = run_analysis(&data_path("config.json"), &None, &Some(tampered_p.clone()), &None);
        assert!(matches!(res, Err(EiError::Whatever { .. })));
        let _ = fs::remove_file(out);
        let _ = fs::remove_file(tampered_p);
    }

    #[test]
    fn posterior_is_checked_and_reported() {
        let analysis =
            build_analysis(&data_path("config.json"), &Some(data_path("posterior.json"))).unwrap();
        let pm = analysis.posterior.unwrap();
        assert_eq!(pm.get(1, 1), 0.95);
        assert_eq!(analysis.summary["posterior"]["values"][2][2], json!(0.5));
        let table = posterior_table(&pm);
        assert_eq!(table.lines().count(), 5);
        assert!(table.lines().nth(1).unwrap().starts_with("Harris"));

        let mut pf = PosteriorFile::read(&data_path("posterior.json")).unwrap();
        pf.column_labels.swap(0, 1);
        let p = temp_path("swapped_posterior.json");
        fs::write(&p, serde_json::to_string(&pf).unwrap()).unwrap();
        let res = build_analysis(&data_path("config.json"), &Some(p.clone()));
        assert!(matches!(
            res,
            Err(EiError::Preparation {
                source: PrepError::InvalidPosterior { .. }
            })
        ));
        let _ = fs::remove_file(p);
    }

    #[test]
    fn results_from_several_files() {
        let whole = build_analysis(&data_path("config.json"), &None).unwrap();
        let split = build_analysis(&fixture_path("split_results", "config.json"), &None).unwrap();
        assert_eq!(split.summary, whole.summary);
        assert_eq!(split.config.results_sources.len(), 2);
    }

    #[test]
    fn missing_inputs() {
        let res = build_analysis(&data_path("no_such_config.json"), &None);
        assert!(matches!(res, Err(EiError::OpeningFile { .. })));
        let res = build_analysis(&data_path("config.json"), &Some(data_path("missing.json")));
        assert!(matches!(res, Err(EiError::OpeningFile { .. })));
    }
}
