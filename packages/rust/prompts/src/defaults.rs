//! Built-in prompt configurations.
//!
//! These seed the registry on first startup and double as the hardcoded
//! fallback when a key has no stored active version, so guide processing
//! never fails for lack of a configured prompt.

use levelgrid_shared::PromptSpec;

/// Registry key of the guide-structuring prompt.
pub const PARSE_GUIDE_KEY: &str = "parse_guide";

/// Registry key of the example-generation prompt.
pub const GENERATE_EXAMPLES_KEY: &str = "generate_examples";

const PARSE_GUIDE_SYSTEM: &str = "You are a helpful assistant that parses leveling guides into structured JSON. Always respond with valid JSON only, no markdown formatting.";

const PARSE_GUIDE_TEMPLATE: &str = r#"You are parsing a leveling guide document. Extract the structure into JSON format.

A leveling guide is a table where:
- Rows represent career levels (e.g., L1-Junior, L2-Mid, L3-Senior, etc.)
- Columns represent competencies/skills (e.g., Technical Skills, Leadership, Communication, etc.)
- Each cell describes what's expected at that level for that competency

Extract and return a JSON object with this exact structure:
{
    "levels": ["Level 1 Name", "Level 2 Name", ...],
    "competencies": ["Competency 1 Name", "Competency 2 Name", ...],
    "cells": [
        {"level_name": "Level 1 Name", "competency_name": "Competency 1 Name", "requirement": "Description text..."},
        ...
    ]
}

Rules:
- Preserve the exact level and competency names from the document
- Keep levels in order from junior to senior
- Keep competencies in their original order
- Include ALL cells from the table
- The requirement should be the full text from that cell

Here is the leveling guide text to parse:

{{raw_text}}"#;

const GENERATE_EXAMPLES_SYSTEM: &str = "You are a career coach helping employees understand what great performance looks like. Give specific, actionable examples. Respond with valid JSON only.";

const GENERATE_EXAMPLES_TEMPLATE: &str = r#"You are helping a manager explain career expectations to their direct reports.

Context:
- Company: {{company_url}}
- Role: {{role_name}}
- Level: {{level_name}}
- Competency Area: {{competency_name}}

The leveling guide says someone at this level should demonstrate:
"{{requirement}}"

Generate exactly 3 SPECIFIC, ACTIONABLE examples of what an employee could DO to demonstrate they are operating at this level.

Each example should:
1. Be concrete and observable (not vague like "show leadership")
2. Be realistic for the role and level
3. Include enough detail that an employee knows exactly what to do
4. Be different from the other examples (cover different scenarios)

Format your response as a JSON object:
{"examples": ["Example 1 text", "Example 2 text", "Example 3 text"]}"#;

/// Built-in configurations for every known key, seeded at version 1.
pub fn default_prompts() -> Vec<PromptSpec> {
    vec![
        PromptSpec {
            key: PARSE_GUIDE_KEY.into(),
            name: "Parse Leveling Guide".into(),
            description: "Parses raw document text into structured levels, competencies, and requirements.".into(),
            system_message: PARSE_GUIDE_SYSTEM.into(),
            user_message_template: PARSE_GUIDE_TEMPLATE.into(),
            model: "gpt-4o".into(),
            temperature: 0.1,
        },
        PromptSpec {
            key: GENERATE_EXAMPLES_KEY.into(),
            name: "Generate Examples".into(),
            description: "Generates 3 specific, actionable examples for a leveling guide cell.".into(),
            system_message: GENERATE_EXAMPLES_SYSTEM.into(),
            user_message_template: GENERATE_EXAMPLES_TEMPLATE.into(),
            model: "gpt-4o".into(),
            temperature: 0.7,
        },
    ]
}

/// The built-in configuration for a key, if the key is a known default.
pub(crate) fn default_for(key: &str) -> Option<PromptSpec> {
    default_prompts().into_iter().find(|p| p.key == key)
}
