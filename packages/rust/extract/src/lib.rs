//! Text extraction from uploaded guide files.
//!
//! Extraction never fails: every input yields a string (possibly empty).
//! Content validity is the caller's concern, checked downstream by grid
//! validation. CSV input is re-flattened into pipe-separated lines so that
//! table-shaped guides survive the trip into prompt text.

use tracing::debug;

/// Extract text from an uploaded file based on its extension.
///
/// `.csv` is parsed quote-aware and flattened row by row; everything else
/// (`.txt`, `.md`, unknown extensions) is decoded as plain text.
pub fn extract_text(file_content: &[u8], filename: &str) -> String {
    let lower = filename.to_lowercase();

    if lower.ends_with(".csv") {
        csv_to_text(file_content)
    } else {
        // .txt, .md, .markdown, and anything unrecognized
        decode_plain(file_content)
    }
}

/// Decode bytes as UTF-8, falling back to Latin-1 so extraction never fails.
fn decode_plain(file_content: &[u8]) -> String {
    match std::str::from_utf8(file_content) {
        Ok(s) => s.to_string(),
        Err(_) => {
            debug!(len = file_content.len(), "input is not UTF-8, decoding as Latin-1");
            file_content.iter().map(|&b| b as char).collect()
        }
    }
}

/// Flatten a CSV file into one pipe-joined line per row.
fn csv_to_text(file_content: &[u8]) -> String {
    let content = decode_plain(file_content);
    parse_csv(&content)
        .iter()
        .map(|row| row.join(" | "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Minimal quote-aware CSV reader: `""` escapes a quote inside a quoted
/// field, commas and newlines inside quotes belong to the field.
fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    // Last line without a trailing newline
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}
