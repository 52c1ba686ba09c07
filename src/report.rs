//! PDF export for water-quality readings.
//!
//! Emits a minimal PDF 1.4 document by hand: a catalog, a page tree,
//! two built-in Type1 fonts and one content stream per page. Built-in
//! fonts need no embedding, so the whole file is plain ASCII and the
//! only bookkeeping is byte offsets for the xref table.

use chrono::{DateTime, Utc};

use crate::db::Reading;

/// Rows that fit under the title block on the first page.
pub const ROWS_FIRST_PAGE: usize = 36;
/// Rows per follow-on page (column header only, no title).
pub const ROWS_PER_PAGE: usize = 44;

const REPORT_TITLE: &str = "Fish Feeder - Water Quality Report";
const TABLE_WIDTH: usize = 57;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub device_id: String,
    pub generated_at: DateTime<Utc>,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Table formatting
// ---------------------------------------------------------------------------

fn fmt_opt(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(v) => format!("{v:.precision$}"),
        None => "-".to_string(),
    }
}

fn column_header() -> String {
    format!(
        "{:<14}  {:>6}  {:>5}  {:>7}  {:>8}  {:>7}",
        "TIME (UTC)", "TEMP_C", "PH", "AMMONIA", "TURB_NTU", "DIST_CM"
    )
}

/// One fixed-width table row; Courier keeps the columns aligned.
fn reading_row(r: &Reading) -> String {
    format!(
        "{:<14}  {:>6}  {:>5}  {:>7}  {:>8}  {:>7}",
        r.created_at.format("%m-%d %H:%M:%S").to_string(),
        fmt_opt(r.temperature, 1),
        fmt_opt(r.ph, 2),
        fmt_opt(r.ammonia, 2),
        fmt_opt(r.turbidity, 1),
        fmt_opt(r.distance, 1),
    )
}

fn header_lines(meta: &ReportMeta) -> Vec<String> {
    vec![
        format!("Device:    {}", meta.device_id),
        format!(
            "Window:    {} .. {}",
            meta.since.format(TIME_FORMAT),
            meta.until.format(TIME_FORMAT)
        ),
        format!("Generated: {}", meta.generated_at.format(TIME_FORMAT)),
        String::new(),
        column_header(),
        "-".repeat(TABLE_WIDTH),
    ]
}

fn page_line_blocks(meta: &ReportMeta, rows: &[String]) -> Vec<Vec<String>> {
    let mut first = header_lines(meta);
    if rows.is_empty() {
        first.push("No readings recorded in this window.".to_string());
        return vec![first];
    }

    let head = rows.len().min(ROWS_FIRST_PAGE);
    first.extend(rows[..head].iter().cloned());
    let mut pages = vec![first];

    for chunk in rows[head..].chunks(ROWS_PER_PAGE) {
        let mut lines = vec![column_header(), "-".repeat(TABLE_WIDTH)];
        lines.extend(chunk.iter().cloned());
        pages.push(lines);
    }
    pages
}

// ---------------------------------------------------------------------------
// PDF emission
// ---------------------------------------------------------------------------

/// Escape for a PDF literal string. Non-ASCII is replaced so the
/// output stays 7-bit clean with the unencoded built-in fonts.
fn escape_pdf_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

/// Content stream for one page. Body text uses 9pt Courier with 14pt
/// leading; the first page carries the bold title above the body.
fn page_stream(lines: &[String], first: bool) -> String {
    let mut s = String::new();
    let mut y = 720;
    if first {
        s.push_str("BT\n/F1 16 Tf\n72 720 Td\n(");
        s.push_str(&escape_pdf_text(REPORT_TITLE));
        s.push_str(") Tj\nET\n");
        y = 690;
    }
    s.push_str(&format!("BT\n/F2 9 Tf\n14 TL\n72 {y} Td\n"));
    for line in lines {
        s.push('(');
        s.push_str(&escape_pdf_text(line));
        s.push_str(") Tj T*\n");
    }
    s.push_str("ET");
    s
}

/// Sequential object writer. Object numbers follow insertion order and
/// offsets are captured for the xref table as each object lands.
struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn new() -> Self {
        Self {
            buf: b"%PDF-1.4\n".to_vec(),
            offsets: Vec::new(),
        }
    }

    fn add_object(&mut self, body: &str) {
        self.offsets.push(self.buf.len());
        let num = self.offsets.len();
        self.buf
            .extend_from_slice(format!("{num} 0 obj\n{body}\nendobj\n").as_bytes());
    }

    fn add_stream(&mut self, content: &str) {
        let body = format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        );
        self.add_object(&body);
    }

    fn finish(mut self) -> Vec<u8> {
        let xref_at = self.buf.len();
        let count = self.offsets.len() + 1;
        // Fixed 20-byte xref entries, free entry for object 0 first.
        let mut xref = format!("xref\n0 {count}\n0000000000 65535 f \n");
        for off in &self.offsets {
            xref.push_str(&format!("{off:010} 00000 n \n"));
        }
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf.extend_from_slice(
            format!("trailer\n<< /Size {count} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n")
                .as_bytes(),
        );
        self.buf
    }
}

/// Render the report. Objects 1-4 are the catalog, page tree and the
/// two fonts; each page then takes two objects (page, content), so
/// page `i` is object `5 + 2i` and its stream is `6 + 2i`.
pub fn render_pdf(meta: &ReportMeta, readings: &[Reading]) -> Vec<u8> {
    let rows: Vec<String> = readings.iter().map(reading_row).collect();
    let pages = page_line_blocks(meta, &rows);
    let page_count = pages.len();

    let kids = (0..page_count)
        .map(|i| format!("{} 0 R", 5 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");

    let mut w = PdfWriter::new();
    w.add_object("<< /Type /Catalog /Pages 2 0 R >>");
    w.add_object(&format!(
        "<< /Type /Pages /Kids [{kids}] /Count {page_count} >>"
    ));
    w.add_object("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>");
    w.add_object("<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>");

    for (i, lines) in pages.iter().enumerate() {
        let content_obj = 6 + 2 * i;
        w.add_object(&format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> \
             /Contents {content_obj} 0 R >>"
        ));
        w.add_stream(&page_stream(lines, i == 0));
    }
    w.finish()
}

// ===========================================================================
// Tests
// ===========================================================================
