use std::collections::BTreeSet;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mg_compare_tools::api::{DEFAULT_API_URL, MgrastHttpClient};
use mg_compare_tools::domain::OutputFormat;
use mg_compare_tools::error::MgError;
use mg_compare_tools::matrix::{DenseTable, SparseMatrix};
use mg_compare_tools::normalize::{
    EngineCommand, LocalNormalizer, MatrixInput, NormalizeBackend, NormalizedMatrix,
    normalize_matrix,
};
use mg_compare_tools::output;

/// Calculate normalized values from abundance profiles, locally via an R
/// library or through the remote compute endpoint.
#[derive(Parser)]
#[command(name = "mg-compare-normalize")]
#[command(about = "Normalize abundance profiles for multiple metagenomes")]
#[command(version)]
struct Cli {
    /// Analytics API url (remote normalization)
    #[arg(long, default_value = DEFAULT_API_URL)]
    url: String,

    /// R library path holding preprocessing.r; selects local normalization.
    /// Falls back to the MG_RLIB environment variable.
    #[arg(long)]
    rlib: Option<PathBuf>,

    /// Input file, or `-` for stdin
    #[arg(long, default_value = "-")]
    input: String,

    /// Input format
    #[arg(long, value_enum, default_value_t = OutputFormat::Biom)]
    format: OutputFormat,

    /// Output format; biom output requires biom input
    #[arg(long, value_enum, default_value_t = OutputFormat::Biom)]
    output: OutputFormat,
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
        MgError::InvalidInput(_) | MgError::Parse(_) | MgError::Format(_) => 2,
        MgError::RemoteCompute(_) | MgError::LocalCompute(_) | MgError::MissingTool(_) => 3,
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

    let raw = read_input(&cli.input).into_diagnostic()?;
    let input = match cli.format {
        OutputFormat::Biom => {
            let value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|err| MgError::Parse(format!("input is not BIOM JSON: {err}")))
                .into_diagnostic()?;
            MatrixInput::Biom(SparseMatrix::from_value(value).into_diagnostic()?)
        }
        OutputFormat::Text => MatrixInput::Table(DenseTable::from_tab(&raw).into_diagnostic()?),
    };

    let rlib = cli
        .rlib
        .clone()
        .or_else(|| std::env::var("MG_RLIB").ok().map(PathBuf::from));
    let backend: Box<dyn NormalizeBackend> = match rlib {
        Some(rlib) => Box::new(LocalNormalizer::new(EngineCommand::rscript(&rlib))),
        None => Box::new(MgrastHttpClient::new(&cli.url, None).into_diagnostic()?),
    };

    let result = normalize_matrix(input, backend.as_ref(), cli.output).into_diagnostic()?;
    match result {
        NormalizedMatrix::Biom(matrix) => output::print_biom(&matrix).into_diagnostic()?,
        NormalizedMatrix::Table(table) => {
            let text = table.to_tab(&BTreeSet::new()).into_diagnostic()?;
            output::print_text(&text).into_diagnostic()?;
        }
    }
    Ok(())
}

fn read_input(source: &str) -> Result<String, MgError> {
    if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|err| MgError::Filesystem(format!("read stdin: {err}")))?;
        return Ok(buffer);
    }
    std::fs::read_to_string(source)
        .map_err(|_| MgError::InvalidInput(format!("input data missing: {source}")))
}
