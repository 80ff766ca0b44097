use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::domain::OutputFormat;
use crate::error::MgError;
use crate::matrix::{DenseTable, ElementType, MatrixType, SparseMatrix};

pub const NORMALIZED_ID_SUFFIX: &str = "_normalized";

/// One normalization strategy: column-wise transform of a dense table.
/// Implementations must return a table satisfying [`check_contract`].
pub trait NormalizeBackend {
    fn normalize(&self, table: &DenseTable) -> Result<DenseTable, MgError>;
}

/// A matrix handed to the normalizer, tagged by representation.
#[derive(Debug, Clone)]
pub enum MatrixInput {
    Biom(SparseMatrix),
    Table(DenseTable),
}

#[derive(Debug, Clone)]
pub enum NormalizedMatrix {
    Biom(SparseMatrix),
    Table(DenseTable),
}

/// Verifies the shared backend contract: column ids unchanged and in input
/// order, output rows an order-preserving subset of the input rows
/// (normalization may drop rows, never add or reorder them).
pub fn check_contract(input: &DenseTable, output: &DenseTable) -> Result<(), String> {
    if output.columns != input.columns {
        return Err("column set or order changed".to_string());
    }
    output.validate().map_err(|err| err.to_string())?;
    let mut remaining = input.rows.iter();
    for row in &output.rows {
        if !remaining.any(|candidate| candidate == row) {
            return Err(format!("unexpected or out-of-order row {row}"));
        }
    }
    Ok(())
}

/// Dispatches a matrix to the selected backend and reconciles the result into
/// the requested representation. BIOM output is only produced for BIOM input;
/// a table input always yields a table.
pub fn normalize_matrix(
    input: MatrixInput,
    backend: &dyn NormalizeBackend,
    want: OutputFormat,
) -> Result<NormalizedMatrix, MgError> {
    match input {
        MatrixInput::Table(table) => {
            table.validate()?;
            Ok(NormalizedMatrix::Table(backend.normalize(&table)?))
        }
        MatrixInput::Biom(matrix) => {
            let table = matrix.to_dense()?;
            let normalized = backend.normalize(&table)?;
            if want == OutputFormat::Biom {
                Ok(NormalizedMatrix::Biom(reconcile(matrix, normalized)))
            } else {
                Ok(NormalizedMatrix::Table(normalized))
            }
        }
    }
}

/// Rebuilds a BIOM matrix around normalized values: surviving row metadata is
/// kept, the data becomes dense floats, and the id is marked as derived.
fn reconcile(mut matrix: SparseMatrix, normalized: DenseTable) -> SparseMatrix {
    let survivors: HashSet<&str> = normalized.rows.iter().map(String::as_str).collect();
    matrix.rows.retain(|row| survivors.contains(row.id.as_str()));
    matrix.data = normalized.data;
    matrix.shape[0] = matrix.rows.len();
    matrix.matrix_type = MatrixType::Dense;
    matrix.matrix_element_type = ElementType::Float;
    matrix.id.push_str(NORMALIZED_ID_SUFFIX);
    matrix
}

/// External engine invocation template. `{input}` and `{output}` placeholders
/// in the arguments are replaced with the scratch file paths at run time.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl EngineCommand {
    /// The stock engine: Rscript running `MGRAST_preprocessing` from the
    /// `preprocessing.r` library at `rlib`.
    pub fn rscript(rlib: &Path) -> Self {
        let expr = format!(
            "source(\"{}/preprocessing.r\"); \
             suppressMessages(MGRAST_preprocessing(file_in=\"{{input}}\", file_out=\"{{output}}\"))",
            rlib.display()
        );
        Self {
            program: PathBuf::from("Rscript"),
            args: vec!["--vanilla".to_string(), "-e".to_string(), expr],
        }
    }

    pub fn custom(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Runs the external statistical engine against a scratch copy of the table.
/// Both scratch files live in a [`tempfile::TempDir`] that is dropped on every
/// exit path, so nothing is left behind on success or failure.
pub struct LocalNormalizer {
    engine: EngineCommand,
    scratch_root: Option<PathBuf>,
}

impl LocalNormalizer {
    pub fn new(engine: EngineCommand) -> Self {
        Self {
            engine,
            scratch_root: None,
        }
    }

    /// Places scratch directories under `root` instead of the system temp
    /// directory.
    pub fn scratch_in(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, MgError> {
        let builder_prefix = "mg-normalize";
        let dir = match &self.scratch_root {
            Some(root) => tempfile::Builder::new()
                .prefix(builder_prefix)
                .tempdir_in(root),
            None => tempfile::Builder::new().prefix(builder_prefix).tempdir(),
        };
        dir.map_err(|err| MgError::Filesystem(err.to_string()))
    }
}

impl NormalizeBackend for LocalNormalizer {
    fn normalize(&self, table: &DenseTable) -> Result<DenseTable, MgError> {
        let scratch = self.scratch_dir()?;
        let input_path = scratch.path().join("abundance.txt");
        let output_path = scratch.path().join("normalized.txt");

        let text = table.to_tab(&BTreeSet::new())?;
        fs::write(&input_path, text).map_err(|err| MgError::Filesystem(err.to_string()))?;

        let args: Vec<String> = self
            .engine
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input_path.to_string_lossy())
                    .replace("{output}", &output_path.to_string_lossy())
            })
            .collect();
        tracing::debug!(program = %self.engine.program.display(), "running normalization engine");
        let output = Command::new(&self.engine.program)
            .args(&args)
            .output()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    MgError::MissingTool(self.engine.program.display().to_string())
                } else {
                    MgError::LocalCompute(err.to_string())
                }
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("engine exited with {}", output.status)
            } else {
                stderr
            };
            return Err(MgError::LocalCompute(message));
        }

        let result = fs::read_to_string(&output_path).map_err(|err| {
            MgError::LocalCompute(format!("engine produced no readable output: {err}"))
        })?;
        let normalized = DenseTable::from_tab(&result)
            .map_err(|err| MgError::LocalCompute(format!("engine output: {err}")))?;
        check_contract(table, &normalized).map_err(MgError::LocalCompute)?;
        Ok(normalized)
    }
}
