use clap::Parser;

/// Prepares precinct results and registration counts for ecological inference.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON configuration file naming the results files, the registration table,
    /// the classification rules and the row and column categories.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path, 'stdout' or empty) If specified, the summary will be written in JSON format to the given
    /// location. Setting this option overrides the path that may be specified in the configuration file.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference summary in JSON format. If provided, eiprep will check that the computed
    /// summary matches the reference and print the differences otherwise.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path) Posterior means returned by the estimator, as a JSON object with rowLabels,
    /// columnLabels and values. They are checked against the prepared inputs and added to the summary.
    #[clap(short, long, value_parser)]
    pub posterior: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
