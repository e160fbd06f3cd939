//! Input and grid validation.
//!
//! Messages here are user-facing and pass through run status unchanged, so
//! they are written for end users, not operators.

use levelgrid_shared::{LevelGridError, ParsedGuide, Result};

/// Minimum source text length for a plausible leveling guide.
pub const MIN_TEXT_LENGTH: usize = 100;

/// Minimum levels a parsed grid must contain.
pub const MIN_LEVELS: usize = 1;

/// Minimum competencies a parsed grid must contain.
pub const MIN_COMPETENCIES: usize = 1;

/// Minimum cells a parsed grid must contain.
pub const MIN_CELLS: usize = 1;

/// Validate extracted source text before the parsing call.
pub fn validate_source_text(text: &str) -> Result<()> {
    let stripped = text.trim();
    if stripped.is_empty() {
        return Err(LevelGridError::validation(
            "Could not extract text from file. Please ensure the file contains readable text.",
        ));
    }

    let chars = stripped.chars().count();
    if chars < MIN_TEXT_LENGTH {
        return Err(LevelGridError::validation(format!(
            "File content too short to be a leveling guide \
             (found {chars} characters, minimum {MIN_TEXT_LENGTH} required)."
        )));
    }

    Ok(())
}

/// Validate a parsed grid against the structural minimums.
///
/// Returns a non-fatal coverage warning when fewer than half of the
/// expected levels × competencies cells were extracted; the caller attaches
/// it to run status instead of failing.
pub fn validate_parsed_guide(guide: &ParsedGuide) -> Result<Option<String>> {
    let levels = guide.levels.len();
    let competencies = guide.competencies.len();
    let cells = guide.cells.len();

    if levels < MIN_LEVELS {
        return Err(LevelGridError::validation(format!(
            "Could not find at least {MIN_LEVELS} levels in the document. Found {levels}. \
             Please upload a valid leveling guide with multiple levels."
        )));
    }

    if competencies < MIN_COMPETENCIES {
        return Err(LevelGridError::validation(
            "Could not find any competencies in the document. \
             Please upload a valid leveling guide with competency columns.",
        ));
    }

    if cells < MIN_CELLS {
        return Err(LevelGridError::validation(
            "Could not extract any level/competency content from the document. \
             Please ensure the file contains a structured leveling guide table.",
        ));
    }

    let expected = levels * competencies;
    if (cells as f64) < (expected as f64) * 0.5 {
        return Ok(Some(format!(
            "Warning: Parsing may be incomplete. Expected ~{expected} cells, found {cells}."
        )));
    }

    Ok(None)
}
