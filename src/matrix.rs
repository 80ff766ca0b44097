use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MgError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixType {
    Sparse,
    Dense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int,
    Float,
}

/// One row or column descriptor of a BIOM matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Axis {
    /// Display label for a row. With `use_id` the id is used directly;
    /// otherwise the last entry of the `ontology` metadata hierarchy wins
    /// when present (Subsystems function names are stored there).
    pub fn label(&self, use_id: bool) -> &str {
        if use_id {
            return &self.id;
        }
        self.metadata
            .as_ref()
            .and_then(|meta| meta.get("ontology"))
            .and_then(|value| value.as_array())
            .and_then(|hierarchy| hierarchy.last())
            .and_then(|value| value.as_str())
            .unwrap_or(&self.id)
    }
}

/// A BIOM-style abundance matrix. `data` holds `[row, col, value]` triples
/// when `matrix_type` is sparse, or full rows when dense. Fields the service
/// sends beyond the ones modeled here (format, generated_by, date, ...) are
/// carried through `extra` so re-serialization is lossless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    pub id: String,
    pub matrix_type: MatrixType,
    pub matrix_element_type: ElementType,
    pub shape: [usize; 2],
    pub rows: Vec<Axis>,
    pub columns: Vec<Axis>,
    pub data: Vec<Vec<f64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SparseMatrix {
    pub fn from_value(value: Value) -> Result<Self, MgError> {
        let matrix: SparseMatrix = serde_json::from_value(value)
            .map_err(|err| MgError::Parse(format!("not a BIOM matrix: {err}")))?;
        matrix.validate()?;
        Ok(matrix)
    }

    pub fn validate(&self) -> Result<(), MgError> {
        if self.shape[0] != self.rows.len() || self.shape[1] != self.columns.len() {
            return Err(MgError::Parse(format!(
                "shape {:?} does not match {} rows x {} columns",
                self.shape,
                self.rows.len(),
                self.columns.len()
            )));
        }
        let mut seen = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            if !seen.insert(row.id.as_str()) {
                return Err(MgError::Parse(format!("duplicate row id: {}", row.id)));
            }
        }
        match self.matrix_type {
            MatrixType::Sparse => {
                for entry in &self.data {
                    let [row, col, _value] = entry.as_slice() else {
                        return Err(MgError::Parse(format!(
                            "sparse entry has {} fields, expected 3",
                            entry.len()
                        )));
                    };
                    let (row_idx, col_idx) = (as_index(*row)?, as_index(*col)?);
                    if row_idx >= self.shape[0] || col_idx >= self.shape[1] {
                        return Err(MgError::Parse(format!(
                            "sparse entry ({row_idx}, {col_idx}) out of bounds for shape {:?}",
                            self.shape
                        )));
                    }
                }
            }
            MatrixType::Dense => {
                if self.data.len() != self.shape[0] {
                    return Err(MgError::Parse(format!(
                        "dense data has {} rows, expected {}",
                        self.data.len(),
                        self.shape[0]
                    )));
                }
                for (idx, row) in self.data.iter().enumerate() {
                    if row.len() != self.shape[1] {
                        return Err(MgError::Parse(format!(
                            "dense row {idx} has {} values, expected {}",
                            row.len(),
                            self.shape[1]
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// All non-zero cells as `(row, col, value)` regardless of representation.
    pub fn triples(&self) -> Result<Vec<(usize, usize, f64)>, MgError> {
        match self.matrix_type {
            MatrixType::Sparse => self
                .data
                .iter()
                .map(|entry| {
                    let [row, col, value] = entry.as_slice() else {
                        return Err(MgError::Parse(format!(
                            "sparse entry has {} fields, expected 3",
                            entry.len()
                        )));
                    };
                    Ok((as_index(*row)?, as_index(*col)?, *value))
                })
                .collect(),
            MatrixType::Dense => {
                let mut out = Vec::new();
                for (row_idx, row) in self.data.iter().enumerate() {
                    for (col_idx, value) in row.iter().enumerate() {
                        if *value != 0.0 {
                            out.push((row_idx, col_idx, *value));
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    /// Materializes the matrix as a zero-filled dense table, row and column
    /// order preserved. Rows are labeled by id.
    pub fn to_dense(&self) -> Result<DenseTable, MgError> {
        self.to_dense_labeled(true)
    }

    /// As [`to_dense`](Self::to_dense), with row labels chosen per
    /// [`Axis::label`].
    pub fn to_dense_labeled(&self, use_id: bool) -> Result<DenseTable, MgError> {
        self.validate()?;
        let mut data = vec![vec![0.0; self.shape[1]]; self.shape[0]];
        for (row, col, value) in self.triples()? {
            data[row][col] = value;
        }
        Ok(DenseTable {
            rows: self
                .rows
                .iter()
                .map(|row| row.label(use_id).to_string())
                .collect(),
            columns: self.columns.iter().map(|col| col.id.clone()).collect(),
            data,
        })
    }
}

/// Folds a fetched fragment into the accumulated matrix. Row ids are
/// deduplicated in first-seen order; columns are concatenated, so fragments
/// must carry disjoint column sets (one fetch per distinct id batch). A
/// shared column id is rejected outright rather than corrupting indices.
pub fn merge(
    accumulated: Option<SparseMatrix>,
    fragment: &SparseMatrix,
) -> Result<SparseMatrix, MgError> {
    fragment.validate()?;
    let Some(acc) = accumulated else {
        return Ok(fragment.clone());
    };
    acc.validate()?;

    let acc_columns: HashSet<&str> = acc.columns.iter().map(|col| col.id.as_str()).collect();
    if let Some(shared) = fragment
        .columns
        .iter()
        .find(|col| acc_columns.contains(col.id.as_str()))
    {
        return Err(MgError::Merge(format!(
            "column {} appears in more than one fragment",
            shared.id
        )));
    }

    let mut rows = acc.rows.clone();
    let mut row_index: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| (row.id.clone(), idx))
        .collect();
    for row in &fragment.rows {
        if !row_index.contains_key(&row.id) {
            row_index.insert(row.id.clone(), rows.len());
            rows.push(row.clone());
        }
    }

    let column_offset = acc.columns.len();
    let mut columns = acc.columns.clone();
    columns.extend(fragment.columns.iter().cloned());

    let mut data: Vec<Vec<f64>> = acc
        .triples()?
        .into_iter()
        .map(|(row, col, value)| vec![row as f64, col as f64, value])
        .collect();
    for (row, col, value) in fragment.triples()? {
        let merged_row = row_index[&fragment.rows[row].id];
        data.push(vec![
            merged_row as f64,
            (col + column_offset) as f64,
            value,
        ]);
    }

    let element_type = if acc.matrix_element_type == ElementType::Float
        || fragment.matrix_element_type == ElementType::Float
    {
        ElementType::Float
    } else {
        ElementType::Int
    };

    Ok(SparseMatrix {
        id: acc.id.clone(),
        matrix_type: MatrixType::Sparse,
        matrix_element_type: element_type,
        shape: [rows.len(), columns.len()],
        rows,
        columns,
        data,
        extra: acc.extra.clone(),
    })
}

/// A fully materialized numeric table, `data` indexed `[row][column]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseTable {
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    pub data: Vec<Vec<f64>>,
}

impl DenseTable {
    pub fn validate(&self) -> Result<(), MgError> {
        if self.data.len() != self.rows.len() {
            return Err(MgError::Parse(format!(
                "table has {} data rows for {} row labels",
                self.data.len(),
                self.rows.len()
            )));
        }
        for (idx, row) in self.data.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(MgError::Parse(format!(
                    "row {} has {} values, expected {}",
                    self.rows[idx],
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }

    /// Renders the table as tab-delimited text: a header of column ids behind
    /// an empty leading cell, then one line per row. A non-empty `rows_filter`
    /// keeps only the named rows in their original order; an empty filter
    /// passes every row through.
    pub fn to_tab(&self, rows_filter: &BTreeSet<String>) -> Result<String, MgError> {
        self.validate()?;
        let mut out = String::new();
        out.push('\t');
        out.push_str(&self.columns.join("\t"));
        out.push('\n');
        for (label, values) in self.rows.iter().zip(&self.data) {
            if !rows_filter.is_empty() && !rows_filter.contains(label) {
                continue;
            }
            out.push_str(label);
            for value in values {
                out.push('\t');
                out.push_str(&format_number(*value)?);
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Parses tab-delimited text produced by [`to_tab`](Self::to_tab): first
    /// line is the header (leading cell ignored), each following line a row
    /// id and its values.
    pub fn from_tab(text: &str) -> Result<Self, MgError> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| MgError::Parse("empty input, missing header line".to_string()))?;
        let columns: Vec<String> = header
            .split('\t')
            .skip(1)
            .map(str::to_string)
            .collect();
        if columns.is_empty() {
            return Err(MgError::Parse("header line has no columns".to_string()));
        }

        let mut rows = Vec::new();
        let mut data = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let mut cells = line.split('\t');
            let label = cells.next().unwrap_or_default();
            let values = cells
                .map(|cell| {
                    cell.trim()
                        .parse::<f64>()
                        .ok()
                        .filter(|value| value.is_finite())
                        .ok_or_else(|| {
                            MgError::Parse(format!("row {label}: non-numeric value {cell:?}"))
                        })
                })
                .collect::<Result<Vec<f64>, MgError>>()?;
            if values.len() != columns.len() {
                return Err(MgError::Parse(format!(
                    "row {label} has {} values, expected {}",
                    values.len(),
                    columns.len()
                )));
            }
            rows.push(label.to_string());
            data.push(values);
        }
        Ok(Self {
            rows,
            columns,
            data,
        })
    }
}

fn format_number(value: f64) -> Result<String, MgError> {
    if !value.is_finite() {
        return Err(MgError::Format(value.to_string()));
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Ok(format!("{}", value as i64))
    } else {
        Ok(value.to_string())
    }
}

fn as_index(value: f64) -> Result<usize, MgError> {
    if value < 0.0 || value.fract() != 0.0 || value > usize::MAX as f64 {
        return Err(MgError::Parse(format!("invalid matrix index: {value}")));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn axis(id: &str) -> Axis {
        Axis {
            id: id.to_string(),
            metadata: None,
        }
    }

    fn sparse(id: &str, rows: &[&str], cols: &[&str], data: Vec<Vec<f64>>) -> SparseMatrix {
        SparseMatrix {
            id: id.to_string(),
            matrix_type: MatrixType::Sparse,
            matrix_element_type: ElementType::Int,
            shape: [rows.len(), cols.len()],
            rows: rows.iter().map(|id| axis(id)).collect(),
            columns: cols.iter().map(|id| axis(id)).collect(),
            data,
            extra: Map::new(),
        }
    }

    #[test]
    fn to_dense_zero_fills_missing_entries() {
        let matrix = sparse(
            "m1",
            &["f1", "f2"],
            &["s1", "s2"],
            vec![vec![0.0, 0.0, 3.0], vec![1.0, 1.0, 7.0]],
        );
        let dense = matrix.to_dense().unwrap();
        assert_eq!(dense.data, vec![vec![3.0, 0.0], vec![0.0, 7.0]]);
        assert_eq!(dense.rows, vec!["f1", "f2"]);
        assert_eq!(dense.columns, vec!["s1", "s2"]);
    }

    #[test]
    fn validate_rejects_out_of_bounds_entry() {
        let matrix = sparse("m1", &["f1"], &["s1"], vec![vec![1.0, 0.0, 3.0]]);
        assert_matches!(matrix.validate(), Err(MgError::Parse(_)));
    }

    #[test]
    fn validate_rejects_duplicate_row_ids() {
        let matrix = sparse("m1", &["f1", "f1"], &["s1"], vec![]);
        assert_matches!(matrix.validate(), Err(MgError::Parse(_)));
    }

    #[test]
    fn merge_rejects_shared_columns() {
        let left = sparse("m1", &["f1"], &["s1"], vec![]);
        let right = sparse("m2", &["f2"], &["s1"], vec![]);
        let err = merge(Some(left), &right).unwrap_err();
        assert_matches!(err, MgError::Merge(_));
    }

    #[test]
    fn row_label_prefers_ontology_leaf() {
        let row = Axis {
            id: "SS0001".to_string(),
            metadata: Some(serde_json::json!({
                "ontology": ["Metabolism", "Nitrogen Metabolism", "Denitrification"]
            })),
        };
        assert_eq!(row.label(false), "Denitrification");
        assert_eq!(row.label(true), "SS0001");
    }

    #[test]
    fn biom_json_round_trips_extra_fields() {
        let json = serde_json::json!({
            "id": "m1",
            "format": "Biological Observation Matrix 1.0",
            "matrix_type": "sparse",
            "matrix_element_type": "int",
            "shape": [1, 1],
            "rows": [{"id": "f1", "metadata": null}],
            "columns": [{"id": "s1"}],
            "data": [[0, 0, 5]]
        });
        let matrix = SparseMatrix::from_value(json).unwrap();
        assert_eq!(
            matrix.extra.get("format").and_then(|v| v.as_str()),
            Some("Biological Observation Matrix 1.0")
        );
        let back = serde_json::to_value(&matrix).unwrap();
        assert_eq!(back.get("format").and_then(|v| v.as_str()),
            Some("Biological Observation Matrix 1.0"));
    }
}
