//! Text chunking module
//!
//! Splits normalized document text into chunks for embedding:
//! - Spreadsheet/CSV text becomes one header chunk per sheet and one
//!   self-contained chunk per data row
//! - Prose is split per detected section, or uniformly when the document
//!   has no usable structure

use crate::extract::SHEET_SEPARATOR;
use docforge_common::config::ChunkingConfig;
use docforge_common::document::{Chunk, ChunkType};
use regex_lite::Regex;
use std::sync::LazyLock;
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

static ALL_CAPS_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z\s]{2,}$").expect("static pattern"));
static NUMBERED_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.?\s+[A-Z][^.\n]{5,}$").expect("static pattern"));
static TITLE_CASE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*$").expect("static pattern")
});
static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[Page (\d+)\]$").expect("static pattern"));

const STRUCTURED_EXTENSIONS: &[&str] = &[".xlsx", ".xls", ".csv"];
const LOGISTICS_SHEET_HINTS: &[&str] = &["shipment", "delivery", "logistics", "carrier", "transport"];
const ROW_KEYWORDS: &[&str] = &["carrier", "shipment", "delivery", "order"];
const MAX_TITLE_CASE_HEADING: usize = 60;

/// A run of text under one heading, with the pages it spans
struct Section {
    title: String,
    content: String,
    /// (byte offset in `content`, page number) at each page change
    page_starts: Vec<(usize, u32)>,
}

impl Section {
    fn new(title: impl Into<String>, page: u32) -> Self {
        Self {
            title: title.into(),
            content: String::new(),
            page_starts: vec![(0, page)],
        }
    }

    fn page_at(&self, offset: usize) -> u32 {
        self.page_starts
            .iter()
            .take_while(|(start, _)| *start <= offset)
            .last()
            .map_or(0, |(_, page)| *page)
    }
}

/// Structure-aware document chunker
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Chunk a document; never yields a chunk with zero words
    pub fn chunk(&self, text: &str, file_name: &str) -> Vec<Chunk> {
        let lower_name = file_name.to_lowercase();
        let structured = STRUCTURED_EXTENSIONS.iter().any(|ext| lower_name.ends_with(ext));

        let chunks = if structured {
            self.chunk_structured(text, file_name)
        } else {
            self.chunk_prose(text)
        };

        let mut chunks = self.merge_small(chunks);
        chunks.truncate(self.config.max_chunks_per_document);
        for (index, chunk) in chunks.iter_mut().enumerate() {
            chunk.chunk_index = index;
        }

        debug!(
            file_name,
            structured,
            chunk_count = chunks.len(),
            chunk_size = self.config.chunk_size,
            "Text chunked"
        );
        chunks
    }

    fn splitter(&self) -> TextSplitter<text_splitter::Characters> {
        let config = ChunkConfig::new(self.config.chunk_size)
            .with_overlap(self.config.chunk_overlap)
            .unwrap_or_else(|_| ChunkConfig::new(self.config.chunk_size));
        TextSplitter::new(config)
    }

    fn chunk_prose(&self, text: &str) -> Vec<Chunk> {
        let sections = split_sections(text, true);
        if sections.len() >= 2 {
            return sections
                .iter()
                .flat_map(|section| self.split_section(section, ChunkType::Section))
                .collect();
        }

        split_sections(text, false)
            .iter()
            .flat_map(|section| self.split_section(section, ChunkType::Standard))
            .collect()
    }

    fn split_section(&self, section: &Section, chunk_type: ChunkType) -> Vec<Chunk> {
        self.splitter()
            .chunk_indices(&section.content)
            .filter(|(_, piece)| !piece.trim().is_empty())
            .map(|(offset, piece)| {
                Chunk::new(piece.trim(), chunk_type, section.title.clone(), section.page_at(offset))
            })
            .collect()
    }

    fn chunk_structured(&self, text: &str, file_name: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for section in text.split(SHEET_SEPARATOR) {
            let lines: Vec<&str> = section
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            if lines.len() < 3 {
                continue;
            }
            chunks.extend(sheet_chunks(&lines, file_name));
        }

        if chunks.is_empty() {
            return self.fallback(text);
        }
        chunks
    }

    fn fallback(&self, text: &str) -> Vec<Chunk> {
        self.splitter()
            .chunks(text)
            .filter(|piece| !piece.trim().is_empty())
            .enumerate()
            .map(|(i, piece)| Chunk::new(piece.trim(), ChunkType::Fallback, format!("Chunk {}", i + 1), 0))
            .collect()
    }

    /// Fold undersized chunks into the previous chunk of the same section
    fn merge_small(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            if chunk.word_count == 0 {
                continue;
            }
            let small = chunk.word_count < self.config.min_chunk_words;
            match merged.last_mut() {
                Some(previous)
                    if small
                        && previous.section_title == chunk.section_title
                        && previous.chunk_type == chunk.chunk_type =>
                {
                    let page = previous.page_number;
                    *previous = Chunk::new(
                        format!("{}\n{}", previous.text, chunk.text),
                        previous.chunk_type,
                        previous.section_title.clone(),
                        page,
                    );
                }
                _ => merged.push(chunk),
            }
        }

        merged
    }
}

fn is_heading(line: &str, next: Option<&str>) -> bool {
    if line.is_empty() {
        return false;
    }
    if ALL_CAPS_HEADING.is_match(line) || NUMBERED_HEADING.is_match(line) {
        return true;
    }
    line.len() <= MAX_TITLE_CASE_HEADING
        && TITLE_CASE_HEADING.is_match(line)
        && next.is_some_and(|n| n.trim().is_empty())
}

/// Split on headings (when enabled), tracking `[Page n]` markers
fn split_sections(text: &str, detect_headings: bool) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections = Vec::new();
    let mut page = 0u32;
    let mut current = Section::new(if detect_headings { "Introduction" } else { "" }, page);

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if let Some(caps) = PAGE_MARKER.captures(line) {
            page = caps[1].parse().unwrap_or(page);
            current.page_starts.push((current.content.len(), page));
            continue;
        }

        if detect_headings && is_heading(line, lines.get(i + 1).copied()) {
            let next = Section::new(line, page);
            let finished = std::mem::replace(&mut current, next);
            if !finished.content.trim().is_empty() {
                sections.push(finished);
            }
            continue;
        }

        current.content.push_str(raw);
        current.content.push('\n');
    }

    if !current.content.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn sheet_chunks(lines: &[&str], file_name: &str) -> Vec<Chunk> {
    let mut sheet_name = "Unknown Sheet".to_string();
    let mut columns_line = String::new();
    let mut data_start = 0;

    for (i, line) in lines.iter().enumerate() {
        if let Some(name) = line.strip_prefix("SHEET:") {
            sheet_name = name.trim().to_string();
        } else if let Some(columns) = line.strip_prefix("Columns:") {
            columns_line = columns.trim().to_string();
        } else if line.contains("SAMPLE RECORDS:") || line.contains("DATA PREVIEW:") {
            data_start = i + 1;
            break;
        }
    }

    let column_names: Vec<&str> = columns_line
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();

    let mut header = vec![
        format!("Data Source: {}", file_name),
        format!("Sheet: {}", sheet_name),
    ];
    if !columns_line.is_empty() {
        header.push(format!("Columns: {}", columns_line));
    }
    let lower_sheet = sheet_name.to_lowercase();
    if LOGISTICS_SHEET_HINTS.iter().any(|k| lower_sheet.contains(k)) {
        header.push("Domain: logistics data with shipping and delivery records".to_string());
        header.push(
            "Supports: carrier performance, delivery times, route analysis, shipment tracking"
                .to_string(),
        );
    }

    let mut chunks = vec![Chunk::new(
        header.join("\n"),
        ChunkType::StructuredHeader,
        format!("{} - Metadata", sheet_name),
        0,
    )];

    let mut row_number = 0;
    for line in &lines[data_start..] {
        let Some(body) = row_body(line, file_name, &sheet_name, &columns_line, &column_names)
        else {
            continue;
        };
        row_number += 1;
        chunks.push(Chunk::new(
            body,
            ChunkType::StructuredRow,
            format!("{} - Row {}", sheet_name, row_number),
            0,
        ));
    }

    chunks
}

/// Self-contained text for one data row, if the line is a row
fn row_body(
    line: &str,
    file_name: &str,
    sheet_name: &str,
    columns_line: &str,
    column_names: &[&str],
) -> Option<String> {
    let mut body = vec![
        format!("Data Source: {} - {}", file_name, sheet_name),
        format!("Available Columns: {}", columns_line),
    ];

    let is_record = line.starts_with("Record ") || line.contains('|');
    if is_record && line.contains('=') {
        let record = match line.strip_prefix("Record ") {
            Some(rest) => rest.split_once(':').map_or(rest, |(_, data)| data).trim(),
            None => line,
        };
        body.push(format!("Row Data: {}", record));

        let fields: Vec<String> = record
            .split(" | ")
            .filter_map(|pair| pair.split_once('='))
            .map(|(field, value)| format!("{}: {}", field.trim(), value.trim()))
            .collect();
        if !fields.is_empty() {
            body.push("Structured Fields:".to_string());
            body.extend(fields);
        }
        return Some(body.join("\n"));
    }

    let lower = line.to_lowercase();
    if column_names.is_empty() || !ROW_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return None;
    }
    let values: Vec<&str> = line.split_whitespace().collect();
    if values.len() < column_names.len() / 2 {
        return None;
    }

    body.push(format!("Row Data: {}", line));
    body.push("Structured Fields:".to_string());
    body.extend(
        column_names
            .iter()
            .zip(&values)
            .map(|(column, value)| format!("{}: {}", column, value)),
    );
    Some(body.join("\n"))
}
