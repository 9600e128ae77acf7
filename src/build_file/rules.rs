use regex::Regex;
use crate::config::BuildFileConfig;
use super::{Edit, Line, LineContext};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RewriteState {
    pub project_emitted: bool,
    pub root_seen: bool,
}

/// Ordered line rules for the companion makefile. The first rule that matches a line wins.
pub struct RuleSet {
    root_variable: String,
    project_variable: String,
    sdk_dir: String,
    extra_cflags: Vec<String>,
    root_re: Regex,
    project_re: Regex,
}

impl RuleSet {
    pub fn new(config: &BuildFileConfig, sdk_dir: &str) -> Self {
        Self {
            root_variable: config.root_variable.clone(),
            project_variable: config.project_variable.clone(),
            sdk_dir: sdk_dir.to_string(),
            extra_cflags: config.extra_cflags.clone(),
            root_re: assignment_pattern(&config.root_variable),
            project_re: assignment_pattern(&config.project_variable),
        }
    }

    pub fn extra_cflags(&self) -> &[String] {
        &self.extra_cflags
    }

    /// Output lines for one input line; empty when the line is dropped.
    pub fn apply(&self, line: &Line, edits: &[Edit], state: &mut RewriteState) -> Vec<String> {
        if let Some(out) = self.project_variable_rule(line, state) {
            return out;
        }
        if let Some(out) = self.root_variable_rule(line, state) {
            return out;
        }
        if let Some(out) = path_token_rule(&line.body, edits) {
            return vec![out];
        }
        vec![line.body.clone()]
    }

    /// `PROJ_DIR := ../../..` → `PROJ_DIR := .` once, later definitions dropped.
    pub fn project_variable_rule(&self, line: &Line, state: &mut RewriteState) -> Option<Vec<String>> {
        if !is_assignment(line) || !self.project_re.is_match(&line.body) {
            return None;
        }
        if state.project_emitted {
            return Some(Vec::new());
        }
        state.project_emitted = true;
        Some(vec![self.project_definition()])
    }

    /// `SDK_ROOT := <anything>` → `SDK_ROOT := $(PROJ_DIR)/sdk_files`.
    pub fn root_variable_rule(&self, line: &Line, state: &mut RewriteState) -> Option<Vec<String>> {
        if !is_assignment(line) || !self.root_re.is_match(&line.body) {
            return None;
        }
        state.root_seen = true;
        let mut out = Vec::new();
        if !state.project_emitted {
            state.project_emitted = true;
            out.push(self.project_definition());
        }
        out.push(self.root_definition());
        Some(out)
    }

    /// Definitions for build files that never assign the root variable.
    pub fn root_definitions(&self) -> Vec<String> {
        vec![self.project_definition(), self.root_definition()]
    }

    fn project_definition(&self) -> String {
        format!("{} := .", self.project_variable)
    }

    fn root_definition(&self) -> String {
        format!("{} := $({})/{}", self.root_variable, self.project_variable, self.sdk_dir)
    }
}

/// Splices token edits into a line, or `None` when nothing changes.
pub fn path_token_rule(body: &str, edits: &[Edit]) -> Option<String> {
    if edits.is_empty() {
        return None;
    }
    let mut sorted: Vec<&Edit> = edits.iter().collect();
    sorted.sort_by_key(|e| e.start);

    let mut out = String::with_capacity(body.len());
    let mut cursor = 0;
    for edit in sorted {
        if edit.start < cursor || edit.end > body.len() {
            continue;
        }
        out.push_str(&body[cursor..edit.start]);
        out.push_str(&edit.text);
        cursor = edit.end;
    }
    out.push_str(&body[cursor..]);

    if out == body { None } else { Some(out) }
}

fn is_assignment(line: &Line) -> bool {
    matches!(&line.context, LineContext::Assignment { op, .. } if op != "+=")
}

// Anchored on the whole assignment so `MY_SDK_ROOT :=` or `$(SDK_ROOT)/x` never match.
fn assignment_pattern(variable: &str) -> Regex {
    Regex::new(&format!(r"^\s*(?:(?:export|override)\s+)?{}\s*(?:::=|:=|\?=|=)", regex::escape(variable)))
        .expect("escaped variable name")
}
