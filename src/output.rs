use std::io::{self, Write};

use crate::matrix::SparseMatrix;

/// Writes the matrix as single-line BIOM JSON to standard output.
pub fn print_biom(matrix: &SparseMatrix) -> io::Result<()> {
    let json = serde_json::to_string(matrix)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    let mut stdout = io::stdout();
    stdout.write_all(json.as_bytes())?;
    stdout.write_all(b"\n")?;
    Ok(())
}

/// Writes an already rendered tab table to standard output.
pub fn print_text(text: &str) -> io::Result<()> {
    io::stdout().write_all(text.as_bytes())
}
