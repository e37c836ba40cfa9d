//! Per-tool rendering of rules and prompts

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::error::ArmError;
use crate::resource::{Enforcement, Promptset, Rule, Ruleset};

static PLAIN_SCALAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9 _./()-]*[A-Za-z0-9_./()-]$|^[A-Za-z0-9_]$")
        .expect("plain scalar pattern compiles")
});

/// Assistant a sink targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Cursor,
    Markdown,
    AmazonQ,
    Copilot,
}

/// How a tool's files are arranged inside the sink directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `arm/<registry>/<package>/<file>` plus `arm/index.json`
    Hierarchical,
    /// `arm_<registry>_<package>_<file>` plus `arm-index.json`
    Flat,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::Cursor, Tool::Markdown, Tool::AmazonQ, Tool::Copilot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Cursor => "cursor",
            Tool::Markdown => "markdown",
            Tool::AmazonQ => "amazonq",
            Tool::Copilot => "copilot",
        }
    }

    pub fn layout(&self) -> Layout {
        match self {
            Tool::Copilot => Layout::Flat,
            Tool::Cursor | Tool::Markdown | Tool::AmazonQ => Layout::Hierarchical,
        }
    }

    pub fn rule_filename(&self, ruleset_id: &str, rule_id: &str) -> Result<String> {
        require_ids("rule", ruleset_id, rule_id)?;
        let extension = match self {
            Tool::Cursor => "mdc",
            Tool::Markdown | Tool::AmazonQ => "md",
            Tool::Copilot => "instructions.md",
        };
        Ok(format!("{ruleset_id}_{rule_id}.{extension}"))
    }

    pub fn prompt_filename(&self, promptset_id: &str, prompt_id: &str) -> Result<String> {
        require_ids("prompt", promptset_id, prompt_id)?;
        Ok(format!("{promptset_id}_{prompt_id}.md"))
    }

    pub fn generate_rule(&self, namespace: &str, ruleset: &Ruleset, rule_id: &str) -> Result<String> {
        let rule = ruleset
            .spec
            .rules
            .get(rule_id)
            .ok_or_else(|| ArmError::not_found("rule", format!("{}/{}", ruleset.metadata.id, rule_id)))?;

        let mut out = String::new();
        if *self == Tool::Cursor {
            out.push_str(&cursor_frontmatter(rule));
        }
        out.push_str(&metadata_frontmatter(namespace, ruleset, rule_id, rule));
        out.push('\n');
        out.push_str(&rule.body);
        Ok(out)
    }

    pub fn generate_prompt(
        &self,
        _namespace: &str,
        promptset: &Promptset,
        prompt_id: &str,
    ) -> Result<String> {
        let prompt = promptset.spec.prompts.get(prompt_id).ok_or_else(|| {
            ArmError::not_found("prompt", format!("{}/{}", promptset.metadata.id, prompt_id))
        })?;
        Ok(prompt.body.clone())
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = ArmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ArmError::Unsupported {
                what: "tool",
                value: s.to_string(),
            })
    }
}

fn require_ids(kind: &str, set_id: &str, item_id: &str) -> Result<()> {
    if set_id.trim().is_empty() {
        anyhow::bail!(ArmError::validation(format!("{kind} filename"), "set id is empty"));
    }
    if item_id.trim().is_empty() {
        anyhow::bail!(ArmError::validation(format!("{kind} filename"), format!("{kind} id is empty")));
    }
    for id in [set_id, item_id] {
        if !is_filename_safe(id) {
            anyhow::bail!(ArmError::validation(
                format!("{kind} filename"),
                format!("'{id}' cannot be used in a filename")
            ));
        }
    }
    Ok(())
}

/// True when `id` is a single path component with no separators or dot segments
pub(crate) fn is_filename_safe(id: &str) -> bool {
    !id.contains(['/', '\\', '\0']) && !id.contains("..") && id != "."
}

fn cursor_frontmatter(rule: &Rule) -> String {
    let description = rule.description.as_deref().unwrap_or(&rule.name);
    let globs = rule
        .scope
        .first()
        .map(|s| quoted_list(&s.files))
        .unwrap_or_else(|| "[]".to_string());

    format!(
        "---\ndescription: {}\nglobs: {}\nalwaysApply: {}\n---\n",
        scalar(description),
        globs,
        rule.enforcement == Enforcement::Must
    )
}

fn metadata_frontmatter(namespace: &str, ruleset: &Ruleset, rule_id: &str, rule: &Rule) -> String {
    let mut out = String::from("---\n");
    let _ = writeln!(out, "namespace: {}", scalar(namespace));
    out.push_str("ruleset:\n");
    let _ = writeln!(out, "  id: {}", scalar(&ruleset.metadata.id));
    let _ = writeln!(out, "  name: {}", scalar(&ruleset.metadata.name));
    out.push_str("  rules:\n");
    for id in ruleset.rule_ids() {
        let _ = writeln!(out, "    - {}", scalar(id));
    }
    out.push_str("rule:\n");
    let _ = writeln!(out, "  id: {}", scalar(rule_id));
    let _ = writeln!(out, "  name: {}", scalar(&rule.name));
    if let Some(description) = rule.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "  description: {}", scalar(description));
    }
    let _ = writeln!(out, "  enforcement: {}", rule.enforcement.as_str().to_uppercase());
    if rule.priority > 0 {
        let _ = writeln!(out, "  priority: {}", rule.priority);
    }
    if !rule.scope.is_empty() {
        out.push_str("  scope:\n");
        for scope in &rule.scope {
            let _ = writeln!(out, "    - files: {}", quoted_list(&scope.files));
        }
    }
    out.push_str("---\n");
    out
}

/// Plain YAML scalar when unambiguous, double-quoted otherwise
fn scalar(value: &str) -> String {
    if PLAIN_SCALAR_RE.is_match(value) && !looks_typed(value) {
        value.to_string()
    } else {
        quote(value)
    }
}

/// Plain scalars YAML would read back as something other than a string
fn looks_typed(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no" | "on" | "off" | "null" | "~"
    ) || value.parse::<f64>().is_ok()
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

fn quoted_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quote(s)).collect();
    format!("[{}]", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{parse_promptset, parse_ruleset};
    use pretty_assertions::assert_eq;

    const TEST_RULESET: &str = r##"
apiVersion: v1
kind: Ruleset
metadata:
  id: test-ruleset
  name: Test Ruleset
spec:
  rules:
    test-rule:
      name: Test Rule
      enforcement: should
      priority: 80
      scope:
        - files: ["**/*.py"]
      body: "# Test Rule\n\nThis is a test rule body."
"##;

    fn ruleset() -> Ruleset {
        parse_ruleset(TEST_RULESET.as_bytes()).unwrap()
    }

    #[test]
    fn test_amazonq_rule_document() {
        let rendered = Tool::AmazonQ
            .generate_rule("test-namespace", &ruleset(), "test-rule")
            .unwrap();

        let expected = "---
namespace: test-namespace
ruleset:
  id: test-ruleset
  name: Test Ruleset
  rules:
    - test-rule
rule:
  id: test-rule
  name: Test Rule
  enforcement: SHOULD
  priority: 80
  scope:
    - files: [\"**/*.py\"]
---

# Test Rule

This is a test rule body.";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_markdown_and_copilot_share_rule_format() {
        let rs = ruleset();
        let amazonq = Tool::AmazonQ.generate_rule("ns", &rs, "test-rule").unwrap();
        assert_eq!(Tool::Markdown.generate_rule("ns", &rs, "test-rule").unwrap(), amazonq);
        assert_eq!(Tool::Copilot.generate_rule("ns", &rs, "test-rule").unwrap(), amazonq);
    }

    #[test]
    fn test_cursor_rule_document() {
        let rendered = Tool::Cursor
            .generate_rule("test-namespace", &ruleset(), "test-rule")
            .unwrap();

        assert!(rendered.starts_with(
            "---\ndescription: Test Rule\nglobs: [\"**/*.py\"]\nalwaysApply: false\n---\n---\nnamespace: test-namespace\n"
        ));
        assert!(rendered.ends_with("---\n\n# Test Rule\n\nThis is a test rule body."));
    }

    #[test]
    fn test_cursor_always_apply_for_must() {
        let yaml = TEST_RULESET.replace("enforcement: should", "enforcement: must");
        let rs = parse_ruleset(yaml.as_bytes()).unwrap();
        let rendered = Tool::Cursor.generate_rule("ns", &rs, "test-rule").unwrap();
        assert!(rendered.contains("alwaysApply: true\n"));
        assert!(rendered.contains("enforcement: MUST\n"));
    }

    #[test]
    fn test_rule_ids_sorted_and_zero_priority_omitted() {
        let yaml = r#"
apiVersion: v1
kind: Ruleset
metadata:
  id: rs
  name: RS
spec:
  rules:
    zeta:
      name: Zeta
      enforcement: may
      body: z
    alpha:
      name: Alpha
      description: "Use: care"
      enforcement: could
      body: a
"#;
        let rs = parse_ruleset(yaml.as_bytes()).unwrap();
        let rendered = Tool::Markdown.generate_rule("ns", &rs, "alpha").unwrap();
        assert!(rendered.contains("  rules:\n    - alpha\n    - zeta\n"));
        assert!(rendered.contains("  description: \"Use: care\"\n"));
        assert!(!rendered.contains("priority"));
        assert!(!rendered.contains("scope"));
    }

    #[test]
    fn test_filenames() {
        assert_eq!(Tool::Cursor.rule_filename("rs", "r").unwrap(), "rs_r.mdc");
        assert_eq!(Tool::Markdown.rule_filename("rs", "r").unwrap(), "rs_r.md");
        assert_eq!(Tool::AmazonQ.rule_filename("rs", "r").unwrap(), "rs_r.md");
        assert_eq!(Tool::Copilot.rule_filename("rs", "r").unwrap(), "rs_r.instructions.md");
        for tool in Tool::ALL {
            assert_eq!(tool.prompt_filename("ps", "p").unwrap(), "ps_p.md");
        }
        assert!(Tool::Cursor.rule_filename("", "r").is_err());
        assert!(Tool::Copilot.prompt_filename("ps", " ").is_err());
    }

    #[test]
    fn test_filenames_reject_path_components() {
        for bad in ["../../escaped", "a/b", "a\\b", "..", ".", "/etc", "nul\0byte"] {
            assert!(Tool::Copilot.rule_filename(bad, "r").is_err(), "set id {bad:?}");
            assert!(Tool::Cursor.rule_filename("rs", bad).is_err(), "rule id {bad:?}");
            assert!(Tool::Markdown.prompt_filename(bad, "p").is_err(), "set id {bad:?}");
            assert!(Tool::AmazonQ.prompt_filename("ps", bad).is_err(), "prompt id {bad:?}");
        }
        assert_eq!(Tool::Markdown.rule_filename("style.v2", "no-tabs").unwrap(), "style.v2_no-tabs.md");
    }

    #[test]
    fn test_prompt_is_body_verbatim() {
        let yaml = "apiVersion: v1\nkind: Promptset\nmetadata:\n  id: ps\n  name: PS\nspec:\n  prompts:\n    p:\n      name: P\n      body: \"Do the thing.\\n\"\n";
        let ps = parse_promptset(yaml.as_bytes()).unwrap();
        for tool in Tool::ALL {
            assert_eq!(tool.generate_prompt("ns", &ps, "p").unwrap(), "Do the thing.\n");
        }
        assert!(Tool::Cursor.generate_prompt("ns", &ps, "missing").is_err());
    }

    #[test]
    fn test_tool_parse() {
        assert_eq!("amazonq".parse::<Tool>().unwrap(), Tool::AmazonQ);
        assert_eq!("Cursor".parse::<Tool>().unwrap(), Tool::Cursor);
        assert_eq!(Tool::Copilot.layout(), Layout::Flat);
        let err = "vim".parse::<Tool>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported tool: vim");
    }

    #[test]
    fn test_scalar_quoting() {
        assert_eq!(scalar("test-namespace"), "test-namespace");
        assert_eq!(scalar("Test Rule"), "Test Rule");
        assert_eq!(scalar("true"), "\"true\"");
        assert_eq!(scalar("1.0"), "\"1.0\"");
        assert_eq!(scalar("a: b"), "\"a: b\"");
        assert_eq!(scalar(""), "\"\"");
    }
}
