use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{File, create_dir_all};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::models::UploadReport;

/// Write report history (newest first) as gzip-compressed bincode.
///
/// The snapshot is written to a temporary file next to `path` and renamed over it,
/// so readers never observe a half-written file.
pub fn save_reports(reports: &[Arc<UploadReport>], path: &Path) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    create_dir_all(dir)?;

    let records: Vec<&UploadReport> = reports.iter().map(|report| report.as_ref()).collect();
    let mut file = NamedTempFile::new_in(dir)?;
    {
        let encoder = GzEncoder::new(file.as_file_mut(), Compression::default());
        let mut writer = BufWriter::new(encoder);
        serialize_into(&mut writer, &records)?;
        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?;
    }
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read report history written by [`save_reports`].
pub fn load_reports(path: &Path) -> Result<Vec<UploadReport>, StoreError> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let reports: Vec<UploadReport> = deserialize_from(&mut reader)?;
    Ok(reports)
}
