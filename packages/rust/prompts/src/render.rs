//! Template rendering: `{{ variable }}` substitution.
//!
//! Stored prompt templates only use plain variable substitution, so this
//! stays a regex pass rather than a templating engine. Unknown variables
//! render as empty strings; a prompt typo must not fail a whole run.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid placeholder regex"));

/// Substitute `{{ name }}` placeholders with values from `variables`.
pub fn render_template(template: &str, variables: &HashMap<&str, String>) -> String {
    VAR_RE
        .replace_all(template, |caps: &Captures<'_>| {
            variables.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn substitutes_variables() {
        let rendered = render_template(
            "Role: {{role_name}} at level {{level_name}}",
            &vars(&[("role_name", "Engineer"), ("level_name", "L2")]),
        );
        assert_eq!(rendered, "Role: Engineer at level L2");
    }

    #[test]
    fn tolerates_inner_whitespace() {
        let rendered = render_template("{{ role_name }}", &vars(&[("role_name", "Engineer")]));
        assert_eq!(rendered, "Engineer");
    }

    #[test]
    fn repeated_placeholders_all_render() {
        let rendered = render_template(
            "{{name}} and {{name}} again",
            &vars(&[("name", "Ada")]),
        );
        assert_eq!(rendered, "Ada and Ada again");
    }

    #[test]
    fn unknown_variables_render_empty() {
        let rendered = render_template("before {{missing}} after", &vars(&[]));
        assert_eq!(rendered, "before  after");
    }

    #[test]
    fn plain_text_passes_through() {
        let rendered = render_template("no placeholders here", &vars(&[("x", "y")]));
        assert_eq!(rendered, "no placeholders here");
    }

    #[test]
    fn renders_the_builtin_generation_template() {
        let generate = crate::defaults::default_prompts()
            .into_iter()
            .find(|p| p.key == crate::defaults::GENERATE_EXAMPLES_KEY)
            .expect("generate default");
        let rendered = render_template(
            &generate.user_message_template,
            &vars(&[
                ("company_url", "https://acme.example"),
                ("role_name", "Software Engineer"),
                ("level_name", "L2"),
                ("competency_name", "Technical Skill"),
                ("requirement", "Writes correct, tested code"),
            ]),
        );
        assert!(rendered.contains("https://acme.example"));
        assert!(rendered.contains("\"Writes correct, tested code\""));
        assert!(!rendered.contains("{{"));
    }
}
