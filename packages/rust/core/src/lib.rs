//! Guide processing core: validation, parsing, example generation, and the
//! run service tying them to storage.

pub mod generator;
pub mod parser;
pub mod pipeline;
pub mod service;
pub mod validate;

pub use generator::{CellKey, CellOutcome, CellTask, RunContext, generate_examples};
pub use parser::parse_guide;
pub use pipeline::{SubmitGuide, process_guide};
pub use service::{GuideService, RoleDetail};
pub use validate::{validate_parsed_guide, validate_source_text};
