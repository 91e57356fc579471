//! Prompt templates with `{name}` placeholders.
//!
//! Only identifier-shaped placeholders are substituted, so JSON examples
//! embedded in a template (`{}` or `{"content": ...}`) pass through untouched.

use regex::Regex;
use std::sync::LazyLock;

use crate::errors::RolechainError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Yes/no capability classification. Variables: `query`, `capabilities`.
pub const CLASSIFY_TEMPLATE: &str = r#"Given the following customer query:
"{query}"

And considering this agent's expertise: {capabilities}

Determine if this agent can handle the query.
Return a boolean value (true or false) without explanation."#;

/// Domain answer. Variables: `query`, `capabilities`.
pub const ANSWER_TEMPLATE: &str = r#"As an agent with expertise in {capabilities},
provide a helpful and friendly response to the following query:

"{query}"

Ensure your response is:
1. Accurate and informative
2. Tailored to the specific question
3. Empathetic and professional in tone
4. Concise but comprehensive"#;

/// A text template rendered from named variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Creates a template.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Returns the raw template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Returns the distinct placeholder names, in first-use order.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(&self.template) {
            if let Some(name) = caps.get(1).map(|m| m.as_str()) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Renders the template.
    ///
    /// # Errors
    ///
    /// Returns [`RolechainError::Template`] for the first placeholder with no
    /// value in `vars`.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String, RolechainError> {
        if let Some(missing) = self
            .variables()
            .into_iter()
            .find(|name| !vars.iter().any(|(key, _)| key == name))
        {
            return Err(RolechainError::Template {
                variable: missing.to_string(),
            });
        }

        let rendered = PLACEHOLDER.replace_all(&self.template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
                .unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

impl From<&str> for PromptTemplate {
    fn from(template: &str) -> Self {
        Self::new(template)
    }
}

impl From<String> for PromptTemplate {
    fn from(template: String) -> Self {
        Self::new(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_substitutes_all_occurrences() {
        let template = PromptTemplate::new("{greeting}, {name}! Bye, {name}.");
        let out = template
            .render(&[("greeting", "Hello"), ("name", "Sam")])
            .unwrap();
        assert_eq!(out, "Hello, Sam! Bye, Sam.");
        assert_eq!(template.variables(), vec!["greeting", "name"]);
    }

    #[test]
    fn test_json_braces_untouched() {
        let template = PromptTemplate::new(r#"Return {} or {"content": "x"} for {query}"#);
        let out = template.render(&[("query", "q")]).unwrap();
        assert_eq!(out, r#"Return {} or {"content": "x"} for q"#);
    }

    #[test]
    fn test_missing_variable() {
        let err = PromptTemplate::new("{query} {capabilities}")
            .render(&[("query", "q")])
            .unwrap_err();
        assert!(matches!(err, RolechainError::Template { ref variable } if variable == "capabilities"));
    }

    #[test]
    fn test_values_are_not_reexpanded() {
        let out = PromptTemplate::new("{query}")
            .render(&[("query", "{capabilities}"), ("capabilities", "x")])
            .unwrap();
        assert_eq!(out, "{capabilities}");
    }

    #[test]
    fn test_default_templates_variables() {
        assert_eq!(
            PromptTemplate::new(CLASSIFY_TEMPLATE).variables(),
            vec!["query", "capabilities"]
        );
        assert_eq!(
            PromptTemplate::new(ANSWER_TEMPLATE).variables(),
            vec!["capabilities", "query"]
        );
    }
}
