//! Text extraction module
//!
//! Turns uploaded bytes into plain text:
//! - PDF via lopdf, with `[Page n]` markers
//! - DOCX and XLSX via zip + quick-xml
//! - CSV rendered in the same sheet layout as XLSX
//! - TXT/MD as UTF-8 with a Latin-1 fallback

use crate::errors::IngestionError;
use async_trait::async_trait;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::{debug, warn};

/// Line separating sheets in rendered spreadsheet text
pub const SHEET_SEPARATOR: &str = "==================================================";

/// Rows rendered per sheet
const MAX_RECORDS_PER_SHEET: usize = 100;

/// Maximum decompressed bytes read from a single ZIP entry
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Trait for document text extraction.
///
/// `Ok(None)` means the file was readable but held no text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, file_name: &str, bytes: &[u8])
        -> Result<Option<String>, IngestionError>;

    /// Whether the file extension is handled
    fn supports(&self, file_name: &str) -> bool;
}

/// Extension-dispatching extractor for the supported formats
#[derive(Debug, Default, Clone)]
pub struct FileExtractor;

impl FileExtractor {
    pub fn new() -> Self {
        Self
    }
}

fn extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[async_trait]
impl TextExtractor for FileExtractor {
    async fn extract_text(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Option<String>, IngestionError> {
        let text = match extension(file_name).as_str() {
            "pdf" => extract_pdf(file_name, bytes)?,
            "docx" => extract_docx(file_name, bytes)?,
            "xlsx" => extract_xlsx(file_name, bytes)?,
            "csv" => extract_csv(file_name, bytes),
            "txt" | "md" => decode_text(bytes),
            _ => return Err(IngestionError::UnsupportedFileType(file_name.to_string())),
        };

        debug!(file_name, chars = text.len(), "Text extracted");
        Ok(non_empty(text))
    }

    fn supports(&self, file_name: &str) -> bool {
        matches!(
            extension(file_name).as_str(),
            "pdf" | "docx" | "xlsx" | "csv" | "txt" | "md"
        )
    }
}

/// UTF-8, falling back to Latin-1 byte mapping
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start_matches('\u{FEFF}').to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

fn extract_pdf(file_name: &str, bytes: &[u8]) -> Result<String, IngestionError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| IngestionError::PdfParseError {
        file_name: file_name.to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    for (page_num, page_id) in pages {
        let page_text = match doc.extract_text(&[page_num]) {
            Ok(t) if !t.trim().is_empty() => t,
            _ => match doc.get_page_content(page_id) {
                Ok(content) => extract_text_from_content(&content),
                Err(e) => {
                    warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
                    continue;
                }
            },
        };

        if !page_text.trim().is_empty() {
            text.push_str(&format!("[Page {}]\n{}\n\n", page_num, page_text.trim()));
        }
    }

    Ok(text)
}

/// Text shown by `Tj`/`TJ` operators in a page content stream
fn extract_text_from_content(content: &[u8]) -> String {
    let content = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut pending = String::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut escaped = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if depth > 0 {
            match ch {
                _ if escaped => {
                    current.push('\\');
                    current.push(ch);
                    escaped = false;
                }
                '\\' => escaped = true,
                '(' => {
                    depth += 1;
                    current.push(ch);
                }
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        pending.push_str(&decode_pdf_string(&current));
                        current.clear();
                    } else {
                        current.push(ch);
                    }
                }
                _ => current.push(ch),
            }
            continue;
        }

        match ch {
            '(' => depth = 1,
            'T' if matches!(chars.peek(), Some('j') | Some('J')) => {
                chars.next();
                if !pending.is_empty() {
                    text.push_str(&pending);
                    text.push(' ');
                    pending.clear();
                }
            }
            _ => {}
        }
    }

    text
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

// ---------------------------------------------------------------------------
// OOXML
// ---------------------------------------------------------------------------

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn ooxml_error(file_name: &str, e: impl std::fmt::Display) -> IngestionError {
    IngestionError::OoxmlError {
        file_name: file_name.to_string(),
        message: e.to_string(),
    }
}

fn open_archive<'a>(file_name: &str, bytes: &'a [u8]) -> Result<Archive<'a>, IngestionError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ooxml_error(file_name, e))
}

fn read_entry(
    archive: &mut Archive<'_>,
    file_name: &str,
    entry: &str,
) -> Result<Option<Vec<u8>>, IngestionError> {
    let file = match archive.by_name(entry) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ooxml_error(file_name, e)),
    };

    let mut out = Vec::new();
    file.take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ooxml_error(file_name, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_error(file_name, format!("{} exceeds size limit", entry)));
    }
    Ok(Some(out))
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Paragraph text of `word/document.xml`, one paragraph per line
fn extract_docx(file_name: &str, bytes: &[u8]) -> Result<String, IngestionError> {
    let mut archive = open_archive(file_name, bytes)?;
    let xml = read_entry(&mut archive, file_name, "word/document.xml")?
        .ok_or_else(|| ooxml_error(file_name, "word/document.xml not found"))?;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(&te.unescape().unwrap_or_default());
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => out.push('\t'),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(file_name, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// A worksheet as header row plus data rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    /// First row becomes the column header
    fn from_grid(name: String, mut grid: Vec<Vec<String>>) -> Option<Self> {
        grid.retain(|row| row.iter().any(|cell| !cell.trim().is_empty()));
        if grid.is_empty() {
            return None;
        }
        let columns = grid.remove(0).into_iter().map(|c| c.trim().to_string()).collect();
        Some(Self {
            name,
            columns,
            rows: grid,
        })
    }
}

/// Render sheets in the layout the structured chunker reads
pub fn render_sheets(file_name: &str, sheets: &[Sheet]) -> String {
    let mut lines = vec![
        format!("Workbook: {}", file_name),
        format!("Total Sheets: {}", sheets.len()),
    ];

    for sheet in sheets {
        lines.push(SHEET_SEPARATOR.to_string());
        lines.push(format!("SHEET: {}", sheet.name));
        lines.push(format!(
            "Dimensions: {} rows x {} columns",
            sheet.rows.len(),
            sheet.columns.len()
        ));
        lines.push(format!("Columns: {}", sheet.columns.join(", ")));
        lines.push("SAMPLE RECORDS:".to_string());

        for (idx, row) in sheet.rows.iter().take(MAX_RECORDS_PER_SHEET).enumerate() {
            let parts: Vec<String> = sheet
                .columns
                .iter()
                .zip(row)
                .filter(|(_, value)| !value.trim().is_empty())
                .map(|(column, value)| format!("{}={}", column, value.trim()))
                .collect();
            if !parts.is_empty() {
                lines.push(format!("Record {}: {}", idx + 1, parts.join(" | ")));
            }
        }
    }

    lines.join("\n")
}

fn extract_xlsx(file_name: &str, bytes: &[u8]) -> Result<String, IngestionError> {
    let mut archive = open_archive(file_name, bytes)?;

    let shared_strings = match read_entry(&mut archive, file_name, "xl/sharedStrings.xml")? {
        Some(xml) => read_shared_strings(file_name, &xml)?,
        None => Vec::new(),
    };
    let sheet_names = match read_entry(&mut archive, file_name, "xl/workbook.xml")? {
        Some(xml) => read_sheet_names(file_name, &xml)?,
        None => Vec::new(),
    };

    let mut worksheets: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    worksheets.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut sheets = Vec::new();
    for (idx, entry) in worksheets.iter().enumerate() {
        let Some(xml) = read_entry(&mut archive, file_name, entry)? else {
            continue;
        };
        let grid = read_sheet_grid(file_name, &xml, &shared_strings)?;
        let name = sheet_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        if let Some(sheet) = Sheet::from_grid(name, grid) {
            sheets.push(sheet);
        }
    }

    if sheets.is_empty() {
        return Ok(String::new());
    }
    Ok(render_sheets(file_name, &sheets))
}

fn read_shared_strings(file_name: &str, xml: &[u8]) -> Result<Vec<String>, IngestionError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(file_name, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

fn read_sheet_names(file_name: &str, xml: &[u8]) -> Result<Vec<String>, IngestionError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut names = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.local_name().as_ref() == b"sheet" => {
                names.extend(attribute(&e, b"name"));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(file_name, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(names)
}

/// Zero-based column of a cell reference such as `C12`
fn column_index(reference: &str) -> Option<usize> {
    let letters: String = reference.chars().take_while(char::is_ascii_alphabetic).collect();
    if letters.is_empty() {
        return None;
    }
    letters
        .chars()
        .try_fold(0usize, |acc, c| {
            Some(acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1))
        })
        .map(|n| n - 1)
}

fn read_sheet_grid(
    file_name: &str,
    xml: &[u8],
    shared_strings: &[String],
) -> Result<Vec<Vec<String>>, IngestionError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut grid: Vec<Vec<String>> = Vec::new();

    let mut row: HashMap<usize, String> = HashMap::new();
    let mut column = 0usize;
    let mut cell_type = String::new();
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    column = attribute(&e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(row.len());
                    cell_type = attribute(&e, b"t").unwrap_or_default();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default().into_owned();
                let value = if cell_type == "s" {
                    raw.trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i).cloned())
                        .unwrap_or_default()
                } else {
                    raw
                };
                row.entry(column).or_default().push_str(&value);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" => {
                    let width = row.keys().max().map_or(0, |m| m + 1);
                    let cells = (0..width)
                        .map(|i| row.remove(&i).unwrap_or_default())
                        .collect();
                    grid.push(cells);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(file_name, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(grid)
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Split one CSV line, honouring double-quoted fields
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn extract_csv(file_name: &str, bytes: &[u8]) -> String {
    let text = decode_text(bytes);
    let grid = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(split_csv_line)
        .collect();

    let name = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem)
        .to_string();

    match Sheet::from_grid(name, grid) {
        Some(sheet) => render_sheets(file_name, &[sheet]),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let err = FileExtractor::new()
            .extract_text("movie.mp4", b"bytes")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::UnsupportedFileType(_)));
        assert!(!FileExtractor::new().supports("movie.mp4"));
        assert!(FileExtractor::new().supports("Report.PDF"));
    }

    #[tokio::test]
    async fn test_text_with_latin1_fallback() {
        let extractor = FileExtractor::new();
        let utf8 = extractor.extract_text("a.txt", "café menu".as_bytes()).await.unwrap();
        assert_eq!(utf8.as_deref(), Some("café menu"));

        let latin1 = extractor.extract_text("b.txt", &[b'c', b'a', b'f', 0xE9]).await.unwrap();
        assert_eq!(latin1.as_deref(), Some("café"));

        let blank = extractor.extract_text("c.md", b"   \n ").await.unwrap();
        assert_eq!(blank, None);
    }

    #[tokio::test]
    async fn test_invalid_pdf_is_parse_error() {
        let err = FileExtractor::new()
            .extract_text("broken.pdf", b"not a pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::PdfParseError { .. }));
    }

    #[tokio::test]
    async fn test_csv_renders_sheet_layout() {
        let csv = "carrier,on_time,region\nFedEx,yes,\"West, Coast\"\nUPS,no,East\n";
        let text = FileExtractor::new()
            .extract_text("shipments.csv", csv.as_bytes())
            .await
            .unwrap()
            .unwrap();

        assert!(text.contains(SHEET_SEPARATOR));
        assert!(text.contains("SHEET: shipments"));
        assert!(text.contains("Columns: carrier, on_time, region"));
        assert!(text.contains("Record 1: carrier=FedEx | on_time=yes | region=West, Coast"));
        assert!(text.contains("Record 2: carrier=UPS | on_time=no | region=East"));
    }

    #[tokio::test]
    async fn test_docx_paragraphs() {
        let bytes = zip_with(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="x"><w:body><w:p><w:r><w:t>First line</w:t></w:r></w:p><w:p><w:r><w:t>Second</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        let text = FileExtractor::new()
            .extract_text("memo.docx", &bytes)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "First line\nSecond");
    }

    #[tokio::test]
    async fn test_xlsx_sheet_layout() {
        let bytes = zip_with(&[
            (
                "xl/workbook.xml",
                r#"<workbook><sheets><sheet name="Deliveries" sheetId="1"/></sheets></workbook>"#,
            ),
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>carrier</t></si><si><t>days</t></si><si><t>FedEx</t></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row><row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>3</v></c></row></sheetData></worksheet>"#,
            ),
        ]);

        let text = FileExtractor::new()
            .extract_text("ops.xlsx", &bytes)
            .await
            .unwrap()
            .unwrap();
        assert!(text.contains("SHEET: Deliveries"));
        assert!(text.contains("Columns: carrier, days"));
        assert!(text.contains("Record 1: carrier=FedEx | days=3"));
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("C12"), Some(2));
        assert_eq!(column_index("AA3"), Some(26));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn test_content_stream_text() {
        let content = b"BT /F1 12 Tf 100 700 Td (Hello \\(world\\)) Tj ET";
        assert_eq!(extract_text_from_content(content).trim(), "Hello (world)");
    }
}
