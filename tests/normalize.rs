use std::collections::BTreeSet;

use assert_matches::assert_matches;
use serde_json::Map;

use mg_compare_tools::domain::OutputFormat;
use mg_compare_tools::error::MgError;
use mg_compare_tools::matrix::{Axis, DenseTable, ElementType, MatrixType, SparseMatrix};
use mg_compare_tools::normalize::{
    EngineCommand, LocalNormalizer, MatrixInput, NormalizeBackend, NormalizedMatrix,
    normalize_matrix,
};

fn table() -> DenseTable {
    DenseTable {
        rows: vec!["f1".to_string(), "f2".to_string()],
        columns: vec!["s1".to_string(), "s2".to_string()],
        data: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
    }
}

fn biom() -> SparseMatrix {
    SparseMatrix {
        id: "m1".to_string(),
        matrix_type: MatrixType::Sparse,
        matrix_element_type: ElementType::Int,
        shape: [2, 2],
        rows: vec![
            Axis {
                id: "f1".to_string(),
                metadata: None,
            },
            Axis {
                id: "f2".to_string(),
                metadata: None,
            },
        ],
        columns: vec![
            Axis {
                id: "s1".to_string(),
                metadata: None,
            },
            Axis {
                id: "s2".to_string(),
                metadata: None,
            },
        ],
        data: vec![
            vec![0.0, 0.0, 1.0],
            vec![0.0, 1.0, 2.0],
            vec![1.0, 0.0, 3.0],
            vec![1.0, 1.0, 4.0],
        ],
        extra: Map::new(),
    }
}

/// An engine that copies its input to its output: normalization as identity.
fn identity_engine() -> EngineCommand {
    EngineCommand::custom("cp", vec!["{input}".to_string(), "{output}".to_string()])
}

/// An engine that keeps only the header and the first data row.
fn row_dropping_engine() -> EngineCommand {
    EngineCommand::custom(
        "/bin/sh",
        vec![
            "-c".to_string(),
            "head -n 2 {input} > {output}".to_string(),
        ],
    )
}

#[test]
fn local_path_round_trips_through_engine() {
    let normalizer = LocalNormalizer::new(identity_engine());
    let result = normalizer.normalize(&table()).unwrap();
    assert_eq!(result, table());
}

#[test]
fn local_path_cleans_up_scratch_files_on_success() {
    let scratch = tempfile::tempdir().unwrap();
    let normalizer = LocalNormalizer::new(identity_engine()).scratch_in(scratch.path());
    normalizer.normalize(&table()).unwrap();
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn local_path_cleans_up_scratch_files_on_engine_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = EngineCommand::custom("false", Vec::new());
    let normalizer = LocalNormalizer::new(engine).scratch_in(scratch.path());
    let err = normalizer.normalize(&table()).unwrap_err();
    assert_matches!(err, MgError::LocalCompute(_));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn local_path_rejects_unparseable_engine_output() {
    let engine = EngineCommand::custom(
        "/bin/sh",
        vec!["-c".to_string(), "echo garbage > {output}".to_string()],
    );
    let normalizer = LocalNormalizer::new(engine);
    let err = normalizer.normalize(&table()).unwrap_err();
    assert_matches!(err, MgError::LocalCompute(_));
}

#[test]
fn missing_engine_is_reported_as_missing_tool() {
    let engine = EngineCommand::custom("definitely-not-a-real-engine", Vec::new());
    let err = LocalNormalizer::new(engine).normalize(&table()).unwrap_err();
    assert_matches!(err, MgError::MissingTool(_));
}

#[test]
fn biom_input_reconciles_to_derived_biom() {
    let backend = LocalNormalizer::new(row_dropping_engine());
    let result = normalize_matrix(
        MatrixInput::Biom(biom()),
        &backend,
        OutputFormat::Biom,
    )
    .unwrap();

    let NormalizedMatrix::Biom(matrix) = result else {
        panic!("expected BIOM output");
    };
    assert_eq!(matrix.id, "m1_normalized");
    assert_eq!(matrix.shape, [1, 2]);
    assert_eq!(matrix.rows.len(), 1);
    assert_eq!(matrix.rows[0].id, "f1");
    assert_eq!(matrix.matrix_type, MatrixType::Dense);
    assert_eq!(matrix.matrix_element_type, ElementType::Float);
    assert_eq!(matrix.data, vec![vec![1.0, 2.0]]);
    // Column order must match the input.
    assert_eq!(matrix.columns[0].id, "s1");
    assert_eq!(matrix.columns[1].id, "s2");
}

#[test]
fn biom_input_with_text_output_yields_table() {
    let backend = LocalNormalizer::new(identity_engine());
    let result = normalize_matrix(
        MatrixInput::Biom(biom()),
        &backend,
        OutputFormat::Text,
    )
    .unwrap();
    let NormalizedMatrix::Table(out) = result else {
        panic!("expected table output");
    };
    assert_eq!(out, table());
}

#[test]
fn table_input_always_yields_table() {
    let backend = LocalNormalizer::new(identity_engine());
    let result = normalize_matrix(
        MatrixInput::Table(table()),
        &backend,
        OutputFormat::Biom,
    )
    .unwrap();
    assert_matches!(result, NormalizedMatrix::Table(_));
}

#[test]
fn normalized_table_renders_as_tab() {
    let backend = LocalNormalizer::new(identity_engine());
    let NormalizedMatrix::Table(out) = normalize_matrix(
        MatrixInput::Table(table()),
        &backend,
        OutputFormat::Text,
    )
    .unwrap() else {
        panic!("expected table output");
    };
    let text = out.to_tab(&BTreeSet::new()).unwrap();
    assert_eq!(text, "\ts1\ts2\nf1\t1\t2\nf2\t3\t4\n");
}
