use anyhow::{Context, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use std::fs;
use std::path::Path;

/// Represents a document with its extracted content and metadata
#[derive(Debug, Clone)]
pub struct Document {
    /// The cleaned text content of the document
    pub content: String,
    /// The document's file name
    pub filename: String,
    /// The document's MIME type
    pub mime_type: String,
}

impl Document {
    /// Create a new document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let filename = path
            .file_name()
            .context("Invalid file name")?
            .to_str()
            .context("Invalid file name encoding")?
            .to_string();

        // Detect MIME type
        let mime = from_path(path).first_or_octet_stream();
        let mime_type = mime.to_string();
        debug!("Detected MIME type: {}", mime_type);

        // Read content based on file type
        let content = read_document_content(path, &mime_type)?;

        Ok(Document {
            content,
            filename,
            mime_type,
        })
    }
}

/// Read content from a document based on its MIME type
pub fn read_document_content<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<String> {
    let path = file_path.as_ref();

    match mime_type {
        // Handle PDF documents
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", path.display());
            let content = extract_text(path)
                .with_context(|| format!("Failed to extract text from PDF: {}", path.display()))?;

            let cleaned_content = clean_text(&content);

            if cleaned_content.is_empty() {
                warn!("Extracted PDF content is empty or contains only whitespace");
            }

            Ok(cleaned_content)
        }

        // Handle plain text documents
        mime if mime.starts_with("text/") => {
            info!("Processing text document: {}", path.display());
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read text file: {}", path.display()))?;
            Ok(clean_text(&content))
        }

        // Unsupported format
        _ => Err(anyhow::anyhow!(
            "Unsupported document format: {}. Only text and PDF files are supported.",
            mime_type
        )),
    }
}

/// Normalize extracted text: strip carriage returns and bare page-number
/// lines, collapse runs of spaces, and cap blank runs at one paragraph break.
fn clean_text(text: &str) -> String {
    let without_cr = text.replace('\r', "");

    // PDF extraction leaves page numbers on lines of their own.
    let lines: Vec<&str> = without_cr
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit())
        })
        .collect();

    collapse_whitespace(&lines.join("\n"))
}

fn collapse_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut prev_char = ' ';
    let mut newline_count = 0;

    for c in text.chars() {
        if c == '\n' {
            newline_count += 1;
            continue;
        }

        if newline_count > 0 {
            // Keep at most one blank line (paragraph break)
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
            prev_char = '\n';
        }

        if c == ' ' || c == '\t' {
            if prev_char != ' ' {
                normalized.push(' ');
                prev_char = ' ';
            }
        } else {
            normalized.push(c);
            prev_char = c;
        }
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_spaces_and_newlines() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(clean_text(text), expected);
    }

    #[test]
    fn drops_bare_page_number_lines() {
        let text = "End of page one.\n12\nStart of page two.";
        assert_eq!(clean_text(text), "End of page one.\nStart of page two.");
    }

    #[test]
    fn keeps_numbers_embedded_in_sentences() {
        let text = "Chapter 12 covers 34 topics.";
        assert_eq!(clean_text(text), "Chapter 12 covers 34 topics.");
    }

    #[test]
    fn tabs_collapse_like_spaces() {
        assert_eq!(clean_text("a\t\tb  c"), "a b c");
    }
}
