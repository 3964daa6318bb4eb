#![cfg(not(tarpaulin_include))]

use crate::error::ExportError;
use crate::models::{TIMESTAMP_FORMAT, UploadReport};
use crate::parameters::with_unit;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 18.0;
const WRAP_AT: usize = 95;

/// Render a report as a PDF document
///
/// The PDF lists the report identity, the pollution assessment, one line per
/// parameter with its directive, the alerts, the recommendations and the forecasts.
/// Pages are added as needed.
///
/// # Arguments
/// * `report` - The report to render
///
/// # Returns
/// * `Result<Vec<u8>, ExportError>` - PDF file content as bytes or an error
///
/// # Examples
/// ```
/// use wqam::downloader::to_pdf;
/// use wqam::pipeline::Analyzer;
///
/// let report = Analyzer::default()
///     .analyze(b"timestamp,pH\n2024-01-01,7.1\n", Some("lab.csv"), "operator")
///     .unwrap();
/// let pdf = to_pdf(&report).unwrap();
/// assert!(pdf.starts_with(b"%PDF"));
/// ```
pub fn to_pdf(report: &UploadReport) -> Result<Vec<u8>, ExportError> {
    let (doc, page, layer) = PdfDocument::new(
        "Water Quality Report",
        Mm(PAGE_WIDTH),
        Mm(PAGE_HEIGHT),
        "Layer 1",
    );
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;
    let layer = doc.get_page(page).get_layer(layer);

    let mut pen = Pen {
        doc: &doc,
        layer,
        y: PAGE_HEIGHT - MARGIN,
        regular,
        bold,
    };

    pen.heading("Water Quality Report", 18.0);
    pen.text(&format!("Report ID: {}", report.id));
    pen.text(&format!("Uploaded by: {}", report.uploaded_by));
    pen.text(&format!(
        "Created at: {}",
        report.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(filename) = &report.source_filename {
        pen.text(&format!("Source file: {}", filename));
    }
    pen.text(&format!("Site status: {:?}", report.map_status).to_lowercase());
    pen.gap();

    if let Some(insights) = &report.ml_insights {
        pen.heading("Pollution assessment", 13.0);
        pen.text(&format!(
            "Label: {} (score {})",
            insights.pollution_label, insights.pollution_score
        ));
        match insights.pollution_prediction {
            Some(prediction) => pen.text(&format!("Model prediction: {:.3}", prediction)),
            None => pen.text("Model prediction: unavailable"),
        }
        pen.gap();
    }

    pen.heading("Parameters", 13.0);
    for summary in &report.parameters {
        pen.text(&format!(
            "{}: avg {}  min {}  max {}  [{}]",
            summary.parameter,
            with_unit(&summary.average.to_string(), &summary.unit),
            summary.minimum,
            summary.maximum,
            summary.status.as_str().to_uppercase()
        ));
        if let Some(directive) = &summary.directive {
            pen.wrapped(&format!("Action: {}", directive));
        }
    }
    pen.gap();

    if !report.alerts.is_empty() {
        pen.heading("Alerts", 13.0);
        for alert in &report.alerts {
            pen.wrapped(&format!("[{:?}] {}: {}", alert.severity, alert.title, alert.message));
        }
        pen.gap();
    }

    pen.heading("Recommendations", 13.0);
    for recommendation in &report.recommendations {
        pen.wrapped(&format!("- {}", recommendation));
    }

    if let Some(insights) = report.ml_insights.as_ref().filter(|i| !i.forecasts.is_empty()) {
        pen.gap();
        pen.heading("Forecast (next readings)", 13.0);
        for (parameter, values) in &insights.forecasts {
            let values: Vec<String> = values.iter().map(|v| format!("{:.3}", v)).collect();
            pen.text(&format!("{}: {}", parameter, values.join(", ")));
        }
    }

    drop(pen);
    doc.save_to_bytes().map_err(|e| ExportError::Pdf(e.to_string()))
}

/// Writes lines top to bottom, starting a new page when the current one is full.
struct Pen<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

impl Pen<'_> {
    fn line(&mut self, text: &str, size: f32, bold: bool) {
        let advance = size * 0.45 + 2.0;
        if self.y - advance < MARGIN {
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT - MARGIN;
        }
        self.y -= advance;
        let font = if bold { &self.bold } else { &self.regular };
        self.layer
            .use_text(pdf_safe(text), size, Mm(MARGIN), Mm(self.y), font);
    }

    fn heading(&mut self, text: &str, size: f32) {
        self.line(text, size, true);
    }

    fn text(&mut self, text: &str) {
        self.line(text, 10.0, false);
    }

    fn wrapped(&mut self, text: &str) {
        for line in wrap(text, WRAP_AT) {
            self.text(&line);
        }
    }

    fn gap(&mut self) {
        self.y -= 3.0;
    }
}

// Builtin fonts only cover single-byte encodings.
fn pdf_safe(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split(' ') {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
            current.push_str("  ");
        }
        if !current.is_empty() && !current.ends_with("  ") {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.trim().is_empty() {
        lines.push(current);
    }
    lines
}

/// Convert a report to XLSX format
///
/// Produces three worksheets: `Summary` (one row per parameter), `Readings`
/// (every cleaned reading) and `Notes` (alerts and recommendations).
///
/// # Arguments
/// * `report` - The report to export
///
/// # Returns
/// * `Result<Vec<u8>, ExportError>` - XLSX file content as bytes or an error
pub fn to_xlsx(report: &UploadReport) -> Result<Vec<u8>, ExportError> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();

    let mut summary = Worksheet::new();
    summary.set_name("Summary")?;
    for (col, title) in ["Parameter", "Unit", "Average", "Minimum", "Maximum", "Status", "Directive"]
        .iter()
        .enumerate()
    {
        summary.write_string(0, col as u16, *title)?;
    }
    for (index, item) in report.parameters.iter().enumerate() {
        let row = index as u32 + 1;
        summary.write_string(row, 0, item.parameter.name())?;
        if !item.unit.is_empty() {
            summary.write_string(row, 1, &item.unit)?;
        }
        summary.write_number(row, 2, item.average)?;
        summary.write_number(row, 3, item.minimum)?;
        summary.write_number(row, 4, item.maximum)?;
        summary.write_string(row, 5, item.status.as_str())?;
        if let Some(directive) = &item.directive {
            summary.write_string(row, 6, directive)?;
        }
    }
    workbook.push_worksheet(summary);

    let mut readings = Worksheet::new();
    readings.set_name("Readings")?;
    readings.write_string(0, 0, "Parameter")?;
    readings.write_string(0, 1, "Timestamp")?;
    readings.write_string(0, 2, "Value")?;
    let mut row = 1u32;
    for series in &report.timeseries {
        for point in &series.points {
            readings.write_string(row, 0, series.parameter.name())?;
            readings.write_string(row, 1, &point.timestamp.format(TIMESTAMP_FORMAT).to_string())?;
            readings.write_number(row, 2, point.value)?;
            row += 1;
        }
    }
    workbook.push_worksheet(readings);

    let mut notes = Worksheet::new();
    notes.set_name("Notes")?;
    notes.write_string(0, 0, "Kind")?;
    notes.write_string(0, 1, "Text")?;
    let mut row = 1u32;
    for alert in &report.alerts {
        notes.write_string(row, 0, &format!("alert ({:?})", alert.severity).to_lowercase())?;
        notes.write_string(row, 1, &alert.message)?;
        row += 1;
    }
    for recommendation in &report.recommendations {
        notes.write_string(row, 0, "recommendation")?;
        notes.write_string(row, 1, recommendation)?;
        row += 1;
    }
    workbook.push_worksheet(notes);

    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}
