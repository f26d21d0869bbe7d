//! Document ingestion, cleaning, and chunking.
//!
//! [`DocumentProcessor`] extracts raw text from heterogeneous file formats,
//! normalizes it, and splits it into overlapping [`DocumentChunk`]s with
//! attached metadata. Extraction is format-polymorphic via the
//! [`TextExtractor`] trait, with one implementation per supported format.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;
use tracing::{error, info, warn};

use crate::document::{DocumentChunk, Metadata};
use crate::error::{RagError, Result};

/// How far back from the end of a window the splitter looks for a sentence
/// boundary before falling back to a word boundary.
const SENTENCE_SEARCH_SPAN: usize = 200;

/// A strategy for extracting plain text from one file format.
pub trait TextExtractor: Send + Sync {
    /// Extract the text content of the file at `path`.
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Extracts text from PDF files via `pdf-extract`.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        pdf_extract::extract_text(path)
            .map_err(|e| RagError::ProcessingError(format!("pdf extraction failed: {e}")))
    }
}

/// Extracts text from DOCX files by reading the `word/document.xml` entry
/// of the archive and collecting the `<w:t>` text runs.
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let file = fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| RagError::ProcessingError(format!("invalid docx archive: {e}")))?;
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|e| RagError::ProcessingError(format!("docx is missing document.xml: {e}")))?
            .read_to_string(&mut xml)?;
        docx_xml_to_text(&xml)
    }
}

/// Collect the text runs of a WordprocessingML document, one line per paragraph.
fn docx_xml_to_text(xml: &str) -> Result<String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if matches!(e.local_name().as_ref(), b"br" | b"tab") {
                    text.push(' ');
                }
            }
            Ok(Event::Text(t)) if in_text_run => {
                let run = t
                    .unescape()
                    .map_err(|e| RagError::ProcessingError(format!("docx xml decode failed: {e}")))?;
                text.push_str(&run);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RagError::ProcessingError(format!("docx xml parse failed: {e}")));
            }
            _ => {}
        }
    }
    Ok(text)
}

/// Extracts text from Markdown files by stripping formatting syntax.
pub struct MarkdownExtractor;

impl TextExtractor for MarkdownExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let content = fs::read_to_string(path)?;
        Ok(strip_markdown(&content))
    }
}

static MD_CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[\s\S]*?```").unwrap());
static MD_INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`]*`").unwrap());
static MD_HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s*").unwrap());
static MD_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static MD_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static MD_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[*_]{1,3}([^*_]+)[*_]{1,3}").unwrap());

/// Reduce markdown source to its plain-text content.
fn strip_markdown(md: &str) -> String {
    let text = MD_CODE_BLOCK.replace_all(md, "");
    let text = MD_INLINE_CODE.replace_all(&text, "");
    let text = MD_HEADER.replace_all(&text, "");
    let text = MD_IMAGE.replace_all(&text, "");
    let text = MD_LINK.replace_all(&text, "$1");
    let text = MD_EMPHASIS.replace_all(&text, "$1");
    text.into_owned()
}

/// Extracts text from plain-text files.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }
}

/// Processes source documents into normalized, overlapping chunks.
///
/// # Example
///
/// ```rust,ignore
/// use edu_rag::DocumentProcessor;
///
/// let processor = DocumentProcessor::new(1000, 200, 100);
/// let chunks = processor.process_file(path, None)?;
/// ```
#[derive(Debug, Clone)]
pub struct DocumentProcessor {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl DocumentProcessor {
    /// Create a new processor.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` — maximum number of characters per chunk
    /// * `chunk_overlap` — characters of context shared between consecutive chunks
    /// * `min_chunk_size` — minimum stripped length for a non-solitary chunk to be kept
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        Self { chunk_size, chunk_overlap, min_chunk_size }
    }

    /// Process a file into document chunks.
    ///
    /// A missing file is a hard error. A failure inside a format extractor
    /// is logged and degrades to empty text, yielding zero chunks, so one
    /// bad file cannot abort a batch ingestion.
    pub fn process_file(
        &self,
        path: &Path,
        extra_metadata: Option<Metadata>,
    ) -> Result<Vec<DocumentChunk>> {
        if !path.exists() {
            return Err(RagError::ProcessingError(format!("file not found: {}", path.display())));
        }

        let file_type = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let text = match self.extract_text(path, &file_type) {
            Ok(text) => text,
            Err(e) => {
                error!(path = %path.display(), error = %e, "text extraction failed");
                String::new()
            }
        };

        let file_size = path.metadata().map(|m| m.len()).unwrap_or(0);
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), json!(path.display().to_string()));
        metadata.insert(
            "filename".to_string(),
            json!(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()),
        );
        metadata.insert("file_type".to_string(), json!(file_type));
        metadata.insert("file_size".to_string(), json!(file_size));
        if let Some(extra) = extra_metadata {
            metadata.extend(extra);
        }

        Ok(self.process_text(&text, metadata))
    }

    /// Process raw text into document chunks carrying `base_metadata`.
    ///
    /// The text is cleaned, split with overlap, and each retained chunk is
    /// annotated with `chunk_index`, `chunk_count`, `char_count` and
    /// `word_count`. Chunks shorter than `min_chunk_size` are dropped,
    /// except when the whole text fits in a single chunk.
    pub fn process_text(&self, text: &str, base_metadata: Metadata) -> Vec<DocumentChunk> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Vec::new();
        }

        let pieces = self.split_text(&cleaned);
        let chunk_count = pieces.len();
        let solitary = chunk_count == 1;

        let mut chunks = Vec::new();
        for (index, piece) in pieces.into_iter().enumerate() {
            let stripped = piece.trim();
            if !solitary && stripped.chars().count() < self.min_chunk_size {
                continue;
            }
            let mut metadata = base_metadata.clone();
            metadata.insert("chunk_index".to_string(), json!(index));
            metadata.insert("chunk_count".to_string(), json!(chunk_count));
            metadata.insert("char_count".to_string(), json!(stripped.chars().count()));
            metadata.insert("word_count".to_string(), json!(stripped.split_whitespace().count()));
            chunks.push(DocumentChunk::new(stripped, metadata));
        }

        info!(chunk_count = chunks.len(), "processed text into chunks");
        chunks
    }

    /// Select an extractor by file extension and run it.
    fn extract_text(&self, path: &Path, file_type: &str) -> Result<String> {
        let extractor: Box<dyn TextExtractor> = match file_type {
            "pdf" => Box::new(PdfExtractor),
            "docx" | "doc" => Box::new(DocxExtractor),
            "md" | "markdown" => Box::new(MarkdownExtractor),
            "txt" | "text" => Box::new(PlainTextExtractor),
            other => {
                warn!(file_type = other, "unknown file type, treating as plain text");
                Box::new(PlainTextExtractor)
            }
        };
        extractor.extract(path)
    }

    /// Split cleaned text into overlapping windows, preferring sentence
    /// boundaries, then word boundaries.
    ///
    /// Each window advance is strictly positive, so the loop terminates for
    /// any input.
    fn split_text(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut pieces = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let end = start + self.chunk_size;
            if end >= chars.len() {
                pieces.push(chars[start..].iter().collect());
                break;
            }

            let window = &chars[start..end];
            let break_len = find_sentence_break(window)
                .or_else(|| find_word_break(window))
                .unwrap_or(window.len());

            let piece: String = chars[start..start + break_len].iter().collect();
            pieces.push(piece.trim_end().to_string());

            // Step back by the overlap, but always move the window forward.
            let step = if break_len > self.chunk_overlap {
                break_len - self.chunk_overlap
            } else {
                break_len.max(1)
            };
            start += step;
        }

        pieces
    }
}

/// Find the last sentence terminator followed by whitespace within the final
/// [`SENTENCE_SEARCH_SPAN`] characters of the window. Returns the chunk
/// length that ends just after the terminator.
fn find_sentence_break(window: &[char]) -> Option<usize> {
    let floor = window.len().saturating_sub(SENTENCE_SEARCH_SPAN);
    for i in (floor..window.len().saturating_sub(1)).rev() {
        if matches!(window[i], '.' | '!' | '?' | '\n') && window[i + 1].is_whitespace() {
            return Some(i + 1);
        }
    }
    None
}

/// Fall back to the last whitespace-delimited word boundary, dropping the
/// trailing partial word.
fn find_word_break(window: &[char]) -> Option<usize> {
    window.iter().rposition(|c| c.is_whitespace()).filter(|&i| i > 0)
}

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^\w\s.,!?;:()"'-]"#).unwrap());

/// Clean and normalize raw extracted text: collapse whitespace runs,
/// normalize curly quotes, and strip characters outside the word/whitespace/
/// basic-punctuation whitelist.
pub fn clean_text(text: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(text, " ");
    let normalized: String = collapsed
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();
    DISALLOWED.replace_all(&normalized, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn processor() -> DocumentProcessor {
        DocumentProcessor::new(1000, 200, 100)
    }

    #[test]
    fn cleaning_collapses_whitespace_and_normalizes_quotes() {
        let cleaned = clean_text("  „Szia\u{201D}   –  \t mondta\n\n a  tanár ");
        assert_eq!(cleaned, "\"Szia\" mondta a tanár");
    }

    #[test]
    fn cleaning_strips_non_whitelisted_characters() {
        let cleaned = clean_text("képlet: a² + b² = c² ✔ ok");
        assert!(!cleaned.contains('✔'));
        assert!(!cleaned.contains('='));
        assert!(cleaned.contains("képlet:"));
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = processor().process_text("A háromszög szögeinek összege 180 fok.", Metadata::new());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "A háromszög szögeinek összege 180 fok.");
        assert_eq!(chunks[0].metadata["chunk_index"], json!(0));
        assert_eq!(chunks[0].metadata["chunk_count"], json!(1));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(processor().process_text("   \n\t ", Metadata::new()).is_empty());
    }

    #[test]
    fn long_text_splits_at_sentence_boundaries_with_overlap() {
        let sentence = "Ez a mondat a tananyag egy fontos megállapítását tartalmazza. ";
        let text = sentence.repeat(60); // well over chunk_size
        let chunks = processor().process_text(&text, Metadata::new());

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 1000);
            // Sentence-boundary breaks end chunks on a terminator.
            assert!(chunk.content.ends_with('.'), "chunk ends mid-sentence: {}", chunk.content);
        }
        // Overlap: consecutive chunks share context.
        let first_tail: String = chunks[0].content.chars().rev().take(50).collect::<String>();
        let tail: String = first_tail.chars().rev().collect();
        assert!(chunks[1].content.contains(tail.trim()), "no overlap between chunks");
    }

    #[test]
    fn splitter_makes_progress_on_pathological_input() {
        // A single unbroken word longer than several windows.
        let text = "x".repeat(5000);
        let chunks = DocumentProcessor::new(100, 20, 10).process_text(&text, Metadata::new());
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 5000 / (100 - 20) + 2);
    }

    #[test]
    fn small_tail_fragments_are_dropped() {
        let sentence = "Rövid mondat itt következik most azonnal é. ";
        // Slightly over one window with a small overlap, so the final piece
        // falls below the minimum size and is dropped.
        let text = sentence.repeat(23);
        let chunks = DocumentProcessor::new(1000, 20, 150).process_text(&text, Metadata::new());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata["chunk_count"], json!(2));
        assert!(chunks[0].content.chars().count() >= 150);
    }

    #[test]
    fn chunk_indices_reflect_split_positions() {
        let sentence = "A fotoszintézis során a növények fényenergiát alakítanak át kémiai energiává. ";
        let text = sentence.repeat(40);
        let chunks = processor().process_text(&text, Metadata::new());
        let indices: Vec<u64> =
            chunks.iter().map(|c| c.metadata["chunk_index"].as_u64().unwrap()).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
        for chunk in &chunks {
            assert_eq!(chunks[0].metadata["chunk_count"], chunk.metadata["chunk_count"]);
        }
    }

    #[test]
    fn missing_file_is_a_hard_error() {
        let err = processor().process_file(Path::new("/nonexistent/tananyag.txt"), None);
        assert!(matches!(err, Err(RagError::ProcessingError(_))));
    }

    #[test]
    fn unknown_extension_is_treated_as_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jegyzet.xyz");
        let body = "A sejt az élőlények legkisebb szerkezeti és működési egysége. ".repeat(3);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();

        let chunks = processor().process_file(&path, None).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata["file_type"], json!("xyz"));
        assert_eq!(chunks[0].metadata["filename"], json!("jegyzet.xyz"));
    }

    #[test]
    fn extra_metadata_overrides_base_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ora.txt");
        fs::write(&path, "A mohácsi csata 1526-ban zajlott le a török hódítás idején. ".repeat(3))
            .unwrap();

        let mut extra = Metadata::new();
        extra.insert("subject".to_string(), json!("történelem"));
        extra.insert("source".to_string(), json!("feltöltés"));
        let chunks = processor().process_file(&path, Some(extra)).unwrap();
        assert_eq!(chunks[0].metadata["subject"], json!("történelem"));
        assert_eq!(chunks[0].metadata["source"], json!("feltöltés"));
    }

    #[test]
    fn markdown_syntax_is_stripped() {
        let md = "# Cím\n\nEz **fontos** és [link](http://example.com) `kód` szöveg.";
        let stripped = strip_markdown(md);
        assert!(!stripped.contains('#'));
        assert!(!stripped.contains("**"));
        assert!(stripped.contains("fontos"));
        assert!(stripped.contains("link"));
        assert!(!stripped.contains("http://example.com"));
    }

    #[test]
    fn docx_xml_text_runs_are_collected() {
        let xml = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>Els&#337; bekezd&#233;s.</w:t></w:r></w:p>
                <w:p><w:r><w:t>M&#225;sodik bekezd&#233;s.</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let text = docx_xml_to_text(xml).unwrap();
        assert!(text.contains("Első bekezdés."));
        assert!(text.contains("Második bekezdés."));
    }
}
