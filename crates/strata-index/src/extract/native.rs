//! In-process parsers for PDF and OOXML (DOCX, XLSX) documents.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Value, json};
use strata_llm::BoxFuture;

use super::{Extraction, Extractor};
use crate::document::Document;
use crate::error::ExtractionError;

const NAME: &str = "NativeExtractor";
const MAX_CELLS_PER_SHEET: usize = 1000;
/// Cap on decompressed bytes read from one archive entry.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pdf,
    Docx,
    Xlsx,
}

impl Format {
    fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            #[cfg(feature = "pdf")]
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }
}

/// Priority-5 extractor for formats that need real parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeExtractor;

impl NativeExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for NativeExtractor {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        5
    }

    fn can_extract(&self, path: &Path, _mime_type: &str) -> bool {
        Format::of(path).is_some()
    }

    fn extract<'a>(
        &'a self,
        doc: &'a Document,
    ) -> BoxFuture<'a, Result<Option<Extraction>, ExtractionError>> {
        Box::pin(async move {
            let path = doc.file_path();
            let path_display = path.display().to_string();
            let Some(format) = Format::of(&path) else {
                return Ok(None);
            };

            let parse_path = path.clone();
            let parsed = tokio::task::spawn_blocking(move || parse(format, &parse_path))
                .await
                .map_err(|e| {
                    ExtractionError::new(NAME, path_display.clone(), "parser task failed").with_source(e)
                })?;

            let mut extraction = parsed.map_err(|msg| ExtractionError::new(NAME, path_display.clone(), msg))?;
            extraction.title = path.file_name().map(|n| n.to_string_lossy().into_owned());
            let words = extraction.content.split_whitespace().count();
            extraction.metadata.insert("word_count".into(), json!(words));
            tracing::debug!(path = %path_display, ?format, words, "native extraction done");
            Ok(Some(extraction))
        })
    }
}

fn parse(format: Format, path: &Path) -> Result<Extraction, String> {
    match format {
        Format::Pdf => parse_pdf(path),
        Format::Docx => {
            let mut archive = open_archive(path)?;
            let xml = read_entry(&mut archive, "word/document.xml")?
                .ok_or_else(|| "word/document.xml not found".to_owned())?;
            let content = docx_text(&xml)?;
            let paragraphs = content.split("\n\n").filter(|p| !p.trim().is_empty()).count();
            Ok(Extraction {
                content,
                metadata: meta("Word Document", "paragraphs", paragraphs),
                ..Extraction::default()
            })
        }
        Format::Xlsx => {
            let mut archive = open_archive(path)?;
            let (content, sheets) = xlsx_text(&mut archive)?;
            Ok(Extraction {
                content,
                metadata: meta("Excel Spreadsheet", "sheets", sheets),
                ..Extraction::default()
            })
        }
    }
}

fn meta(kind: &str, count_key: &str, count: usize) -> HashMap<String, Value> {
    HashMap::from([
        ("type".to_owned(), json!(kind)),
        (count_key.to_owned(), json!(count)),
    ])
}

#[cfg(feature = "pdf")]
fn parse_pdf(path: &Path) -> Result<Extraction, String> {
    let pages = pdf_extract::extract_text_by_pages(path).map_err(|e| format!("failed to parse PDF: {e}"))?;
    let content = pages
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| format!("--- Page {} ---\n{}", i + 1, text.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(Extraction {
        content,
        metadata: meta("PDF Document", "pages", pages.len()),
        ..Extraction::default()
    })
}

#[cfg(not(feature = "pdf"))]
fn parse_pdf(_path: &Path) -> Result<Extraction, String> {
    Err("PDF support is disabled".to_owned())
}

type Archive = zip::ZipArchive<std::fs::File>;

fn open_archive(path: &Path) -> Result<Archive, String> {
    let file = std::fs::File::open(path).map_err(|e| format!("open failed: {e}"))?;
    zip::ZipArchive::new(file).map_err(|e| format!("not a valid OOXML container: {e}"))
}

/// Read one entry, bounded. `Ok(None)` if the entry does not exist.
fn read_entry(archive: &mut Archive, name: &str) -> Result<Option<Vec<u8>>, String> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(format!("{name} exceeds size limit"));
    }
    Ok(Some(out))
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok())
        .map(std::borrow::Cow::into_owned)
}

/// `w:t` runs, one paragraph per `w:p`, paragraphs separated by a blank line.
fn docx_text(xml: &[u8]) -> Result<String, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => current.push('\t'),
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"br" => current.push('\n'),
            Ok(Event::Text(t)) if in_text => {
                current.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = std::mem::take(&mut current);
                    if !para.trim().is_empty() {
                        paragraphs.push(para);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("invalid document.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n\n"))
}

fn shared_strings(archive: &mut Archive) -> Result<Vec<String>, String> {
    let Some(xml) = read_entry(archive, "xl/sharedStrings.xml")? else {
        return Ok(Vec::new());
    };
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(t)) if in_text => {
                current.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("invalid sharedStrings.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn sheet_names(archive: &mut Archive) -> Result<Vec<String>, String> {
    let Some(xml) = read_entry(archive, "xl/workbook.xml")? else {
        return Ok(Vec::new());
    };
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut names = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                names.push(attr(&e, b"name").unwrap_or_default());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("invalid workbook.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn worksheet_entries(archive: &Archive) -> Vec<String> {
    let mut entries: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(str::to_owned)
        .collect();
    entries.sort_by_key(|n| {
        n.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    entries
}

/// Returns the text and the number of sheets.
fn xlsx_text(archive: &mut Archive) -> Result<(String, usize), String> {
    let shared = shared_strings(archive)?;
    let names = sheet_names(archive)?;
    let entries = worksheet_entries(archive);

    let mut blocks = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let name = names
            .get(i)
            .filter(|n| !n.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", i + 1));
        let mut block = format!("--- Sheet: {name} ---\n");
        match read_entry(archive, entry) {
            Ok(Some(xml)) => sheet_cells(&xml, &shared, &mut block)?,
            Ok(None) => {}
            Err(e) => {
                let _ = writeln!(block, "Error reading sheet: {e}");
            }
        }
        blocks.push(block.trim_end().to_owned());
    }
    Ok((blocks.join("\n\n"), entries.len()))
}

/// Append `REF: value` lines for non-empty cells, capped per sheet.
fn sheet_cells(xml: &[u8], shared: &[String], out: &mut String) -> Result<(), String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut row = 0usize;
    let mut col = 0usize;
    let mut cell_ref: Option<String> = None;
    let mut cell_type: Option<String> = None;
    let mut value = String::new();
    let mut in_value = false;
    let mut cells = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row = attr(&e, b"r").and_then(|r| r.parse().ok()).unwrap_or(row + 1);
                    col = 0;
                }
                b"c" => {
                    cell_ref = attr(&e, b"r");
                    cell_type = attr(&e, b"t");
                    value.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                value.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let text = match cell_type.as_deref() {
                        Some("s") => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i))
                            .cloned()
                            .unwrap_or_default(),
                        _ => value.clone(),
                    };
                    let text = text.trim();
                    if !text.is_empty() {
                        if cells >= MAX_CELLS_PER_SHEET {
                            out.push_str("... (truncated)\n");
                            return Ok(());
                        }
                        let reference = cell_ref
                            .take()
                            .unwrap_or_else(|| format!("{}{}", column_letter(col), row.max(1)));
                        let _ = writeln!(out, "{reference}: {text}");
                        cells += 1;
                    }
                    col += 1;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("invalid worksheet: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// 0-based column index to spreadsheet letters: 0 → A, 25 → Z, 26 → AA.
#[must_use]
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + u8::try_from(index % 26).unwrap_or(0));
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::document::keys;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn doc_for(path: &Path) -> Document {
        Document::new(path.to_string_lossy())
            .with_source_path(path.file_name().unwrap().to_string_lossy())
            .with_metadata(keys::ABSOLUTE_PATH, path.to_string_lossy().into_owned())
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn handles_known_extensions_only() {
        let ex = NativeExtractor::new();
        assert!(ex.can_extract(Path::new("a.DOCX"), ""));
        assert!(ex.can_extract(Path::new("b.xlsx"), ""));
        assert!(!ex.can_extract(Path::new("c.txt"), "text/plain"));
    }

    #[tokio::test]
    async fn docx_paragraphs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.docx");
        write_zip(
            &path,
            &[(
                "word/document.xml",
                r#"<?xml version="1.0"?><w:document xmlns:w="w"><w:body>
                <w:p><w:r><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> report</w:t></w:r></w:p>
                <w:p><w:r><w:t>Revenue &amp; costs</w:t></w:r></w:p>
                </w:body></w:document>"#,
            )],
        );

        let out = NativeExtractor::new().extract(&doc_for(&path)).await.unwrap().unwrap();
        assert_eq!(out.content, "Quarterly report\n\nRevenue & costs");
        assert_eq!(out.title.as_deref(), Some("memo.docx"));
        assert_eq!(out.metadata["type"], json!("Word Document"));
        assert_eq!(out.metadata["word_count"], json!(5));
    }

    #[tokio::test]
    async fn xlsx_sheets_and_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budget.xlsx");
        write_zip(
            &path,
            &[
                (
                    "xl/workbook.xml",
                    r#"<workbook><sheets><sheet name="Costs" sheetId="1"/></sheets></workbook>"#,
                ),
                (
                    "xl/sharedStrings.xml",
                    r"<sst><si><t>Rent</t></si><si><r><t>Po</t></r><r><t>wer</t></r></si></sst>",
                ),
                (
                    "xl/worksheets/sheet1.xml",
                    r#"<worksheet><sheetData>
                    <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>1200</v></c></row>
                    <row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><v>80</v></c></row>
                    </sheetData></worksheet>"#,
                ),
            ],
        );

        let out = NativeExtractor::new().extract(&doc_for(&path)).await.unwrap().unwrap();
        assert_eq!(
            out.content,
            "--- Sheet: Costs ---\nA1: Rent\nB1: 1200\nA2: Power\nB2: 80"
        );
        assert_eq!(out.metadata["sheets"], json!(1));
    }

    #[test]
    fn xlsx_cell_cap() {
        let mut rows = String::new();
        for r in 1..=1005 {
            rows.push_str(&format!(r#"<row r="{r}"><c r="A{r}"><v>{r}</v></c></row>"#));
        }
        let xml = format!("<worksheet><sheetData>{rows}</sheetData></worksheet>");
        let mut out = String::new();
        sheet_cells(xml.as_bytes(), &[], &mut out).unwrap();
        assert_eq!(out.lines().count(), MAX_CELLS_PER_SHEET + 1);
        assert!(out.ends_with("... (truncated)\n"));
    }

    #[tokio::test]
    async fn corrupt_container_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        let err = NativeExtractor::new().extract(&doc_for(&path)).await.unwrap_err();
        assert_eq!(err.extractor, "NativeExtractor");
    }
}
