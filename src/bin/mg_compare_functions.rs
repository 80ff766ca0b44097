use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mg_compare_tools::api::{DEFAULT_API_URL, MgrastHttpClient, OntologyLookup};
use mg_compare_tools::batch::{BatchMerger, CheckpointSink, FileCheckpoint};
use mg_compare_tools::domain::{
    IntersectFilter, MatrixQuery, OutputFormat, load_id_list, load_name_list, ontology_level,
};
use mg_compare_tools::error::MgError;
use mg_compare_tools::filter;
use mg_compare_tools::output;

/// Retrieve a matrix of functional abundance profiles for multiple
/// metagenomes, as BIOM JSON or a tab-delimited table on stdout.
#[derive(Parser)]
#[command(name = "mg-compare-functions")]
#[command(about = "Retrieve functional abundance profiles for multiple metagenomes")]
#[command(version)]
struct Cli {
    /// Comma separated list or file of metagenome ids
    #[arg(long)]
    ids: String,

    /// Analytics API url
    #[arg(long, default_value = DEFAULT_API_URL)]
    url: String,

    /// OAuth token; falls back to the MGRAST_AUTH environment variable
    #[arg(long)]
    token: Option<String>,

    /// Functional level to retrieve abundances for
    #[arg(long, default_value = "function")]
    level: String,

    /// Function datasource to group results by
    #[arg(long, default_value = "Subsystems")]
    source: String,

    /// Function level to filter the displayed rows by
    #[arg(long)]
    filter_level: Option<String>,

    /// Function names to filter by, file or comma separated list
    #[arg(long)]
    filter_name: Option<String>,

    /// Taxon datasource for the intersection constraint
    #[arg(long, default_value = "SEED")]
    intersect_source: String,

    /// Taxon level for the intersection constraint
    #[arg(long)]
    intersect_level: Option<String>,

    /// Taxon names for the intersection constraint, file or comma separated list
    #[arg(long)]
    intersect_name: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Biom)]
    format: OutputFormat,

    /// Negative exponent for the maximum e-value cutoff
    #[arg(long, default_value_t = 5)]
    evalue: i32,

    /// Minimum percent identity cutoff
    #[arg(long, default_value_t = 60)]
    identity: i32,

    /// Minimum alignment length cutoff
    #[arg(long, default_value_t = 15)]
    length: i32,

    /// File to snapshot the accumulated matrix into after every batch
    #[arg(long)]
    temp: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<MgError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MgError) -> u8 {
    match error {
        MgError::InvalidInput(_) | MgError::InvalidMetagenomeId(_) => 2,
        MgError::Fetch(_)
        | MgError::FetchStatus { .. }
        | MgError::Ontology(_)
        | MgError::RemoteCompute(_)
        | MgError::LocalCompute(_)
        | MgError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let ids = load_id_list(&cli.ids).into_diagnostic()?;
    if ids.is_empty() {
        return Err(MgError::InvalidInput("one or more ids required".to_string()))
            .into_diagnostic();
    }
    if cli.filter_level.is_some() != cli.filter_name.is_some() {
        return Err(MgError::InvalidInput(
            "--filter-level and --filter-name must be used together".to_string(),
        ))
        .into_diagnostic();
    }
    if cli.intersect_level.is_some() != cli.intersect_name.is_some() {
        return Err(MgError::InvalidInput(
            "--intersect-level and --intersect-name must be used together".to_string(),
        ))
        .into_diagnostic();
    }

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("MGRAST_AUTH").ok());

    let intersect = match (&cli.intersect_level, &cli.intersect_name) {
        (Some(level), Some(names)) => Some(IntersectFilter {
            source: cli.intersect_source.clone(),
            level: level.clone(),
            names: load_name_list(names).into_diagnostic()?,
        }),
        _ => None,
    };
    let query = MatrixQuery {
        group_level: cli.level.clone(),
        source: cli.source.clone(),
        evalue: cli.evalue,
        identity: cli.identity,
        length: cli.length,
        intersect,
    };

    let client = MgrastHttpClient::new(&cli.url, token).into_diagnostic()?;
    let checkpoint = cli.temp.as_ref().map(FileCheckpoint::new);
    let merger = BatchMerger::new(&client);
    let matrix = merger
        .run(
            &query,
            &ids,
            checkpoint.as_ref().map(|sink| sink as &dyn CheckpointSink),
        )
        .into_diagnostic()?
        .ok_or_else(|| MgError::Fetch("service returned no matrix".to_string()))
        .into_diagnostic()?;

    let rows_filter = match (&cli.filter_level, &cli.filter_name) {
        (Some(filter_level), Some(filter_name)) => {
            let names = load_name_list(filter_name).into_diagnostic()?;
            let records = client
                .ontology(&cli.level, &cli.source)
                .into_diagnostic()?;
            filter::display_ids(&records, &names, filter_level, ontology_level(&cli.level))
        }
        _ => BTreeSet::new(),
    };

    match cli.format {
        OutputFormat::Biom => output::print_biom(&matrix).into_diagnostic()?,
        OutputFormat::Text => {
            // Subsystems function ids are synthetic; label rows by the
            // ontology leaf name instead.
            let use_id = !(cli.source == "Subsystems" && cli.level == "function");
            let dense = matrix.to_dense_labeled(use_id).into_diagnostic()?;
            let text = dense.to_tab(&rows_filter).into_diagnostic()?;
            output::print_text(&text).into_diagnostic()?;
        }
    }
    Ok(())
}
