//! Placeholder substitution for route prefixes and path templates
//!
//! Supports `{variable}` placeholders. Unknown variables are left untouched so
//! a misconfigured template shows up verbatim in the registered route.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Regex for matching {variable} placeholders
static TEMPLATE_VAR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap());

/// Substitute `{name}` placeholders with values from `vars`
pub fn render(template: &str, vars: &HashMap<&str, &str>) -> String {
    TEMPLATE_VAR_REGEX
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match vars.get(name) {
                Some(value) => (*value).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Names of all placeholders in a template, in order of appearance
pub fn placeholders(template: &str) -> Vec<String> {
    TEMPLATE_VAR_REGEX
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}
