//! Template engine for `{{var}}` instruction templates.
//!
//! Placeholder names match `[A-Za-z_][A-Za-z0-9_]*`; malformed tokens such
//! as `{{123x}}` or `{{}}` are ignored wherever they appear.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").expect("valid regex"));

/// Outcome of checking a variables map against a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateValidation {
    pub valid: bool,
    /// Template tokens absent from the supplied variables map.
    pub missing: Vec<String>,
}

/// Return the unique set of placeholder names in first-occurrence order.
pub fn extract(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    for caps in TOKEN_RE.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Replace every occurrence of each recognized token with its value.
/// Tokens without a supplied value are left intact.
pub fn substitute(template: &str, variables: &BTreeMap<String, String>) -> String {
    TOKEN_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match variables.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Check that `variables` covers every template token. Extra variables are
/// allowed.
pub fn validate(template: &str, variables: &BTreeMap<String, String>) -> TemplateValidation {
    let missing: Vec<String> = extract(template)
        .into_iter()
        .filter(|name| !variables.contains_key(name))
        .collect();
    TemplateValidation {
        valid: missing.is_empty(),
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_extract_unique_tokens() {
        let names = extract("Deploy {{service}} to {{env}} then verify {{service}}");
        assert_eq!(names, vec!["service", "env"]);
    }

    #[test]
    fn test_extract_ignores_malformed() {
        assert!(extract("{{}} {{123x}} {{-bad}} {{ spaced }}").is_empty());
        assert_eq!(extract("{{_ok}} {{ok_2}}"), vec!["_ok", "ok_2"]);
    }

    #[test]
    fn test_substitute_replaces_all_occurrences() {
        let out = substitute(
            "{{x}} and {{x}} and {{y}}",
            &vars(&[("x", "1"), ("y", "2")]),
        );
        assert_eq!(out, "1 and 1 and 2");
    }

    #[test]
    fn test_substitute_leaves_unknown_tokens() {
        let out = substitute("{{x}} and {{missing}}", &vars(&[("x", "1")]));
        assert_eq!(out, "1 and {{missing}}");
    }

    #[test]
    fn test_substitute_extra_variables_allowed() {
        let out = substitute("just {{x}}", &vars(&[("x", "1"), ("unused", "z")]));
        assert_eq!(out, "just 1");
    }

    #[test]
    fn test_validate_reports_missing() {
        let result = validate("{{a}} {{b}} {{c}}", &vars(&[("a", "1")]));
        assert!(!result.valid);
        assert_eq!(result.missing, vec!["b", "c"]);

        let result = validate("{{a}}", &vars(&[("a", "1"), ("extra", "2")]));
        assert!(result.valid);
        assert!(result.missing.is_empty());
    }

    #[test]
    fn test_no_residual_tokens_after_substitution() {
        // For every token that has a value, no `{{token}}` survives.
        let template = "{{a}}-{{b}}-{{c}}-{{a}}";
        let supplied = vars(&[("a", "x"), ("b", "y")]);
        let out = substitute(template, &supplied);
        for name in extract(template) {
            if supplied.contains_key(&name) {
                assert!(!out.contains(&format!("{{{{{name}}}}}")));
            }
        }
        assert!(out.contains("{{c}}"));
    }
}
