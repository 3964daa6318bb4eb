//! Turns uploaded lab report bytes into a [`RawDataset`].
//!
//! The format is chosen from the file name: `.xlsx`/`.xls`/`.xlsm`/`.ods` go through
//! calamine, `.pdf` through pdf-extract, anything else (including no name) is read as CSV.

use crate::error::AnalysisError;
use crate::models::{RawCell, RawDataset, TIMESTAMP_FORMAT};
use crate::parameters::resolve_column;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::io::Cursor;

lazy_static! {
    static ref DELIMITED: Regex = Regex::new(r"\s*[|,;\t]\s*").unwrap();
    static ref WIDE_GAP: Regex = Regex::new(r"\s{2,}").unwrap();
    static ref READING: Regex = Regex::new(
        r"(?i)\b(ph|turbidity|ntu|tds|total dissolved solids|do|dissolved oxygen|bod|cod|iron|fe|chlorine|cl2)\b[^0-9\-.\n]{0,12}(-?[0-9]+(?:\.[0-9]+)?)"
    )
    .unwrap();
}

/// Upload formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Excel,
    Pdf,
}

impl SourceFormat {
    /// Picks a format from the file extension; unknown or missing names are read as CSV.
    pub fn from_filename(filename: Option<&str>) -> Self {
        let extension = filename
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("xlsx" | "xls" | "xlsm" | "xlsb" | "ods") => SourceFormat::Excel,
            Some("pdf") => SourceFormat::Pdf,
            _ => SourceFormat::Csv,
        }
    }
}

/// Load an uploaded file into a cleaned [`RawDataset`]
///
/// Blank header cells are named `col_<n>` and rows with no content are dropped.
///
/// # Arguments
/// * `contents` - Raw bytes of the upload
/// * `filename` - Client-supplied file name, used only to pick the format
///
/// # Returns
/// * `Result<RawDataset, AnalysisError>` - The dataset or [`AnalysisError::Parse`]
///
/// # Examples
/// ```
/// use wqam::loader::load_dataset;
///
/// let dataset = load_dataset(b"timestamp,pH\n2024-01-01,7.1\n", Some("lab.csv")).unwrap();
/// assert_eq!(dataset.columns, vec!["timestamp", "pH"]);
/// assert_eq!(dataset.len(), 1);
/// ```
pub fn load_dataset(contents: &[u8], filename: Option<&str>) -> Result<RawDataset, AnalysisError> {
    let format = SourceFormat::from_filename(filename);
    debug!("Loading {:?} as {:?}", filename, format);
    let dataset = match format {
        SourceFormat::Csv => from_csv(contents)?,
        SourceFormat::Excel => from_excel(contents)?,
        SourceFormat::Pdf => from_pdf(contents)?,
    };
    Ok(clean(dataset))
}

/// Read a CSV upload. The first record is the header row.
pub fn from_csv(contents: &[u8]) -> Result<RawDataset, AnalysisError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(contents);

    let headers = reader
        .headers()
        .map_err(|e| AnalysisError::Parse(e.to_string()))?
        .clone();
    if headers.is_empty() {
        return Err(AnalysisError::Parse("CSV file has no header row".to_string()));
    }

    let mut dataset = RawDataset::new(headers.iter().map(str::to_string).collect());
    for record in reader.records() {
        let record = record.map_err(|e| AnalysisError::Parse(e.to_string()))?;
        dataset.push_row(record.iter().map(RawCell::from_text).collect());
    }
    Ok(dataset)
}

/// Read the first worksheet of a spreadsheet upload.
pub fn from_excel(contents: &[u8]) -> Result<RawDataset, AnalysisError> {
    use calamine::{Reader, open_workbook_auto_from_rs};

    let cursor = Cursor::new(contents.to_vec());
    let mut workbook =
        open_workbook_auto_from_rs(cursor).map_err(|e| AnalysisError::Parse(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AnalysisError::Parse("No sheets found in Excel file".to_string()))?
        .map_err(|e| AnalysisError::Parse(e.to_string()))?;

    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| AnalysisError::Parse("Excel sheet is empty".to_string()))?;

    let mut dataset = RawDataset::new(header.iter().map(|cell| cell.to_string()).collect());
    for row in rows {
        dataset.push_row(row.iter().map(excel_cell).collect());
    }
    Ok(dataset)
}

fn excel_cell(cell: &calamine::Data) -> RawCell {
    use calamine::Data;

    match cell {
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::Float(f) => RawCell::Number(*f),
        Data::String(s) => RawCell::from_text(s),
        Data::Bool(b) => RawCell::Text(b.to_string()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|ts| RawCell::Text(ts.format(TIMESTAMP_FORMAT).to_string()))
            .unwrap_or(RawCell::Empty),
        Data::Empty => RawCell::Empty,
        // ISO dates and durations come through as text; error cells become non-numeric text
        other => RawCell::from_text(&other.to_string()),
    }
}

/// Extract a table from a text-based PDF.
pub fn from_pdf(contents: &[u8]) -> Result<RawDataset, AnalysisError> {
    let text =
        pdf_extract::extract_text_from_mem(contents).map_err(|e| AnalysisError::Parse(e.to_string()))?;
    table_from_text(&text)
}

/// Recover a table from extracted PDF text.
///
/// The header is the first line with at least two cells, one of which names a known
/// parameter; following lines with the same cell count become rows. Without such a
/// table, `name value` pairs are scanned from the free text and laid out one column
/// per parameter.
pub fn table_from_text(text: &str) -> Result<RawDataset, AnalysisError> {
    let lines: Vec<Vec<String>> = text
        .lines()
        .map(split_line)
        .filter(|cells| !cells.is_empty())
        .collect();

    let header_at = lines
        .iter()
        .position(|cells| cells.len() >= 2 && cells.iter().any(|c| resolve_column(c).is_some()));
    if let Some(index) = header_at {
        let mut dataset = RawDataset::new(lines[index].clone());
        for cells in &lines[index + 1..] {
            if cells.len() == dataset.columns.len() {
                dataset.push_row(cells.iter().map(|c| RawCell::from_text(c)).collect());
            }
        }
        if !dataset.is_empty() {
            return Ok(dataset);
        }
    }

    readings_from_text(text)
}

fn split_line(line: &str) -> Vec<String> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    let cells: Vec<&str> = if DELIMITED.is_match(line) {
        DELIMITED.split(line).collect()
    } else if WIDE_GAP.is_match(line) {
        WIDE_GAP.split(line).collect()
    } else {
        line.split_whitespace().collect()
    };
    cells
        .into_iter()
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect()
}

fn readings_from_text(text: &str) -> Result<RawDataset, AnalysisError> {
    let mut columns: Vec<(String, Vec<f64>)> = Vec::new();
    for capture in READING.captures_iter(text) {
        let Some(parameter) = resolve_column(&capture[1]) else {
            continue;
        };
        let Ok(value) = capture[2].parse::<f64>() else {
            continue;
        };
        let name = parameter.name();
        match columns.iter_mut().find(|(column, _)| column == name) {
            Some((_, values)) => values.push(value),
            None => columns.push((name.to_string(), vec![value])),
        }
    }

    if columns.is_empty() {
        return Err(AnalysisError::Parse(
            "Could not extract tabular data from PDF".to_string(),
        ));
    }

    let height = columns.iter().map(|(_, values)| values.len()).max().unwrap_or(0);
    let mut dataset = RawDataset::new(columns.iter().map(|(name, _)| name.clone()).collect());
    for row in 0..height {
        dataset.push_row(
            columns
                .iter()
                .map(|(_, values)| values.get(row).map_or(RawCell::Empty, |v| RawCell::Number(*v)))
                .collect(),
        );
    }
    Ok(dataset)
}

fn clean(mut dataset: RawDataset) -> RawDataset {
    for (index, column) in dataset.columns.iter_mut().enumerate() {
        let trimmed = column.trim_start_matches('\u{feff}').trim();
        *column = if trimmed.is_empty() {
            format!("col_{}", index)
        } else {
            trimmed.to_string()
        };
    }
    dataset
        .rows
        .retain(|row| row.iter().any(|cell| !cell.is_empty()));
    dataset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Parameter;

    #[test]
    fn picks_format_from_extension() {
        assert_eq!(SourceFormat::from_filename(Some("lab.XLSX")), SourceFormat::Excel);
        assert_eq!(SourceFormat::from_filename(Some("scan.pdf")), SourceFormat::Pdf);
        assert_eq!(SourceFormat::from_filename(Some("readings.csv")), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_filename(Some("noext")), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_filename(None), SourceFormat::Csv);
    }

    #[test]
    fn csv_keeps_text_and_drops_blank_rows() {
        let data = b"\xef\xbb\xbftimestamp, pH ,,notes\n2024-01-01,7.1,,fine\n,,,\n2024-01-02,,,\n";
        let dataset = load_dataset(data, Some("lab.csv")).unwrap();
        assert_eq!(dataset.columns, vec!["timestamp", "pH", "col_2", "notes"]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.cell(0, 1).as_number(), Some(7.1));
        assert!(dataset.cell(1, 1).is_empty());
    }

    #[test]
    fn ragged_csv_rows_are_padded() {
        let dataset = load_dataset(b"pH,DO\n7.0\n7.2,6.1,extra\n", None).unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset.cell(0, 1).is_empty());
        assert_eq!(dataset.rows[1].len(), 2);
    }

    #[test]
    fn corrupt_spreadsheet_is_a_parse_error() {
        let result = load_dataset(b"definitely not a zip archive", Some("lab.xlsx"));
        assert!(matches!(result, Err(AnalysisError::Parse(_))));
    }

    #[test]
    fn reads_first_sheet_of_generated_workbook() {
        use rust_xlsxwriter::Workbook;

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Date").unwrap();
        sheet.write_string(0, 1, "Turbidity (NTU)").unwrap();
        sheet.write_string(1, 0, "2024-03-01").unwrap();
        sheet.write_number(1, 1, 3.5).unwrap();
        sheet.write_string(2, 0, "2024-03-02").unwrap();
        sheet.write_number(2, 1, 6.0).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let dataset = load_dataset(&bytes, Some("lab.xlsx")).unwrap();
        assert_eq!(dataset.columns, vec!["Date", "Turbidity (NTU)"]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.cell(1, 1).as_number(), Some(6.0));
    }

    #[test]
    fn pdf_text_table_is_recovered() {
        let text = "Municipal Lab Report\n\nDate | pH | Turbidity\n2024-01-01 | 7.2 | 1.5\n2024-01-02 | 7.4 | 2.0\nSigned: lab\n";
        let dataset = table_from_text(text).unwrap();
        assert_eq!(dataset.columns, vec!["Date", "pH", "Turbidity"]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.cell(1, 2).as_number(), Some(2.0));
    }

    #[test]
    fn pdf_free_text_falls_back_to_readings() {
        let text = "Sample A: pH 7.1, turbidity: 3 NTU\nSample B: pH 6.9\nDissolved oxygen = 5.5 mg/L";
        let dataset = table_from_text(text).unwrap();
        assert_eq!(
            dataset.columns,
            vec![
                Parameter::Ph.name(),
                Parameter::Turbidity.name(),
                Parameter::DissolvedOxygen.name()
            ]
        );
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.cell(1, 0).as_number(), Some(6.9));
        assert!(dataset.cell(1, 1).is_empty());
    }

    #[test]
    fn pdf_without_readings_is_a_parse_error() {
        assert!(matches!(
            table_from_text("Nothing to see here."),
            Err(AnalysisError::Parse(_))
        ));
    }
}
