//! Token-budgeted prompt assembly.

use std::collections::BTreeMap;

use minijinja::Environment;

use crate::core::{Error, Result};

/// Template for augmenting a test module with source context.
const AUGMENT_TEMPLATE: &str = include_str!("augment_prompt.jinja");
const TEMPLATE_NAME: &str = "augment";

/// Section holding the test code being extended.
pub const TEST_CODE: &str = "test_code";
/// Section holding source files the tests target.
pub const FILE_CONTENTS: &str = "file_contents";

/// Rough token count (~4 bytes per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// A template with named sections filled under a token budget.
pub struct Prompt {
    env: Environment<'static>,
    keywords: Vec<&'static str>,
    sections: BTreeMap<&'static str, String>,
    base_tokens: usize,
    budget: usize,
}

impl std::fmt::Debug for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("keywords", &self.keywords)
            .field("used", &self.used_tokens())
            .field("budget", &self.budget)
            .finish()
    }
}

impl Prompt {
    pub fn new(template: &'static str, keywords: &[&'static str], budget: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template(TEMPLATE_NAME, template)?;
        Ok(Self {
            env,
            keywords: keywords.to_vec(),
            sections: BTreeMap::new(),
            base_tokens: estimate_tokens(template),
            budget,
        })
    }

    /// The test-augmentation prompt with `test_code` and `file_contents` sections.
    pub fn augment_with_context(budget: usize) -> Result<Self> {
        Self::new(AUGMENT_TEMPLATE, &[TEST_CODE, FILE_CONTENTS], budget)
    }

    /// Tokens used by the template plus every filled section.
    pub fn used_tokens(&self) -> usize {
        self.base_tokens + self.sections.values().map(|s| estimate_tokens(s)).sum::<usize>()
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn remaining_tokens(&self) -> usize {
        self.budget.saturating_sub(self.used_tokens())
    }

    /// Append `text` to a section. Returns `false`, leaving the prompt
    /// unchanged, when it would exceed the budget.
    pub fn insert(&mut self, keyword: &str, text: &str) -> Result<bool> {
        let key = self.keyword(keyword)?;
        let current = self.sections.get(key).map(String::as_str).unwrap_or("");
        let updated = format!("{current}\n{text}\n");
        self.replace_if_fits(key, updated)
    }

    /// Replace a section's content. Returns `false` when it would not fit.
    pub fn update(&mut self, keyword: &str, text: &str) -> Result<bool> {
        let key = self.keyword(keyword)?;
        self.replace_if_fits(key, format!("\n{text}\n"))
    }

    pub fn section(&self, keyword: &str) -> Option<&str> {
        self.sections.get(keyword).map(String::as_str)
    }

    pub fn render(&self) -> Result<String> {
        let template = self.env.get_template(TEMPLATE_NAME)?;
        Ok(template.render(&self.sections)?)
    }

    fn keyword(&self, keyword: &str) -> Result<&'static str> {
        self.keywords
            .iter()
            .copied()
            .find(|k| *k == keyword)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown prompt section '{keyword}'")))
    }

    fn replace_if_fits(&mut self, key: &'static str, content: String) -> Result<bool> {
        let old = self.sections.get(key).map(|s| estimate_tokens(s)).unwrap_or(0);
        let needed = self.used_tokens() - old + estimate_tokens(&content);
        if needed > self.budget {
            return Ok(false);
        }
        self.sections.insert(key, content);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_render_sections() {
        let mut prompt = Prompt::augment_with_context(10_000).unwrap();
        assert!(prompt.insert(TEST_CODE, "def test_a():\n    pass").unwrap());
        let text = prompt.render().unwrap();
        assert!(text.contains("def test_a():"));
        assert!(!text.contains("Here is the source code file"));

        assert!(prompt.insert(FILE_CONTENTS, "def add(a, b):\n    return a + b").unwrap());
        let text = prompt.render().unwrap();
        assert!(text.contains("Here is the source code file that the test intends to cover"));
        assert!(text.contains("return a + b"));
    }

    #[test]
    fn test_budget_is_tracked_across_inserts() {
        let mut prompt = Prompt::augment_with_context(0).unwrap();
        let base = prompt.used_tokens();
        prompt.budget = base + 10;

        assert!(prompt.insert(FILE_CONTENTS, &"x".repeat(20)).unwrap());
        let after_first = prompt.used_tokens();
        assert!(after_first > base);
        // A second insert of the same size no longer fits.
        assert!(!prompt.insert(FILE_CONTENTS, &"y".repeat(20)).unwrap());
        assert_eq!(prompt.used_tokens(), after_first);
        assert_eq!(prompt.remaining_tokens(), base + 10 - after_first);
        assert!(!prompt.section(FILE_CONTENTS).unwrap().contains('y'));
    }

    #[test]
    fn test_update_replaces_only_its_section() {
        let mut prompt = Prompt::augment_with_context(10_000).unwrap();
        prompt.insert(TEST_CODE, "def test_old():\n    pass").unwrap();
        prompt.insert(FILE_CONTENTS, "SOURCE").unwrap();
        assert!(prompt.update(TEST_CODE, "def test_new():\n    pass").unwrap());

        let text = prompt.render().unwrap();
        assert!(text.contains("test_new"));
        assert!(!text.contains("test_old"));
        assert!(text.contains("SOURCE"));
    }

    #[test]
    fn test_update_over_budget_keeps_old() {
        let mut prompt = Prompt::augment_with_context(0).unwrap();
        prompt.budget = prompt.used_tokens() + 8;
        assert!(prompt.insert(TEST_CODE, "short").unwrap());
        assert!(!prompt.update(TEST_CODE, &"z".repeat(200)).unwrap());
        assert!(prompt.section(TEST_CODE).unwrap().contains("short"));
    }

    #[test]
    fn test_unknown_section() {
        let mut prompt = Prompt::augment_with_context(100).unwrap();
        assert!(matches!(
            prompt.insert("missing_lines", "x"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
