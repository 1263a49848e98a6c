use std::path::Path;

use tracing::debug;

use crate::error::CoreError;

/// Read the column names from the header row of a reference CSV.
///
/// # Errors
///
/// Returns `CoreError::Reference` if the file is missing or the header
/// cannot be parsed.
pub(crate) fn read_reference_columns(path: &Path) -> Result<Vec<String>, CoreError> {
    let to_error = |source| CoreError::Reference {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(to_error)?;
    let columns: Vec<String> = reader
        .headers()
        .map_err(to_error)?
        .iter()
        .map(|column| column.trim().to_owned())
        .collect();

    debug!(path = %path.display(), ?columns, "read reference columns");
    Ok(columns)
}
