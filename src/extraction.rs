/*!
 * Plain-text extraction from translated documents.
 *
 * The extracted text only feeds the document's search blob, so the output
 * keeps paragraph breaks and drops all formatting.
 */

use anyhow::{Context, Result, anyhow};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::fmt::Debug;
use std::io::{Cursor, Read};

/// Binary format to plain text
pub trait TextExtractor: Send + Sync + Debug {
    /// Extract text from `bytes` of the given format (file extension)
    fn extract(&self, format: &str, bytes: &[u8]) -> Result<String>;
}

/// Extractor for the formats the translation provider hands back
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractor;

impl TextExtractor for DefaultExtractor {
    fn extract(&self, format: &str, bytes: &[u8]) -> Result<String> {
        match format.to_lowercase().as_str() {
            "docx" => extract_docx(bytes),
            "pptx" => extract_pptx(bytes),
            "pdf" => pdf_extract::extract_text_from_mem(bytes)
                .map(|text| text.trim().to_string())
                .map_err(|e| anyhow!("Failed to extract PDF text: {}", e)),
            "txt" | "text" | "md" => Ok(String::from_utf8_lossy(bytes).trim().to_string()),
            "json" => Ok(String::new()),
            other => Err(anyhow!("Unsupported format for text extraction: {}", other)),
        }
    }
}

fn read_zip_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("Missing archive entry: {}", name))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .with_context(|| format!("Archive entry is not UTF-8: {}", name))?;
    Ok(xml)
}

/// Collect the text runs of an OOXML part, one line per paragraph
///
/// `text_tag` is `w:t` for word processing and `a:t` for drawing text;
/// `paragraph_tag` closes a line.
fn ooxml_text(xml: &str, text_tag: &[u8], paragraph_tag: &[u8]) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == text_tag => in_text = true,
            Event::End(e) if e.name().as_ref() == text_tag => in_text = false,
            Event::End(e) if e.name().as_ref() == paragraph_tag => {
                let line = current.trim();
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
                current.clear();
            }
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        lines.push(tail.to_string());
    }

    Ok(lines.join("\n"))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Document is not a valid docx archive")?;
    let xml = read_zip_entry(&mut archive, "word/document.xml")?;
    ooxml_text(&xml, b"w:t", b"w:p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .context("Presentation is not a valid pptx archive")?;

    // Slide order follows the number in slideN.xml, not archive order
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut texts = Vec::with_capacity(slides.len());
    for (_, name) in slides {
        let xml = read_zip_entry(&mut archive, &name)?;
        let text = ooxml_text(&xml, b"a:t", b"a:p")?;
        if !text.is_empty() {
            texts.push(text);
        }
    }

    Ok(texts.join("\n"))
}
