pub mod rules;

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use crate::error::StandaloneError;
use crate::resolver::mapping::Target;
use self::rules::{RewriteState, RuleSet};

static ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[^\s:=#]+\s*:\s+)?(?:(?:export|override)\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*(::=|:=|\+=|\?=|=)\s*")
        .expect("static pattern")
});

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*-?include\s+").expect("static pattern")
});

#[derive(Debug, Clone, PartialEq)]
pub enum LineContext {
    /// First line of `VAR op value`.
    Assignment { var: String, op: String, value_start: usize },
    /// Follows a line ending in `\` inside an assignment of `var`.
    Continuation { var: String },
    Include { value_start: usize },
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub body: String,
    /// `\n`, `\r\n` or empty on the last line.
    pub ending: String,
    pub context: LineContext,
}

impl Line {
    /// Statement variable the line contributes to.
    pub fn variable(&self) -> Option<&str> {
        match &self.context {
            LineContext::Assignment { var, .. } | LineContext::Continuation { var } => Some(var),
            _ => None,
        }
    }

    fn value_range(&self) -> Option<(usize, usize)> {
        let start = match &self.context {
            LineContext::Assignment { value_start, .. } | LineContext::Include { value_start } => *value_start,
            LineContext::Continuation { .. } => 0,
            LineContext::Other => return None,
        };
        Some((start, comment_start(&self.body).unwrap_or(self.body.len()).max(start)))
    }
}

/// Path-bearing word on a line, without any `-I` prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub line: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Replacement of `start..end` on one line.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

pub type TokenEdits = BTreeMap<usize, Vec<Edit>>;

/// Companion makefile split into classified lines. Parsing never fails: unknown lines pass through.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildFile {
    lines: Vec<Line>,
    variables: HashMap<String, String>,
}

impl BuildFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(StandaloneError::MissingInput {
                path: path.to_path_buf(),
                what: "build file",
            }
            .into());
        }
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read build file {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut variables = HashMap::new();
        let mut continuing: Option<String> = None;

        for raw in text.split_inclusive('\n') {
            let (body, ending) = split_ending(raw);

            let context = if let Some(var) = continuing.take() {
                LineContext::Continuation { var }
            } else if body.starts_with('\t') {
                // Recipe line.
                LineContext::Other
            } else if let Some(m) = INCLUDE_RE.find(body) {
                LineContext::Include { value_start: m.end() }
            } else if let Some(caps) = ASSIGNMENT_RE.captures(body) {
                LineContext::Assignment {
                    var: caps[1].to_string(),
                    op: caps[2].to_string(),
                    value_start: caps.get(0).map(|m| m.end()).unwrap_or(0),
                }
            } else {
                LineContext::Other
            };

            let continues = continues(body);
            match &context {
                LineContext::Assignment { var, op, value_start } => {
                    if continues {
                        continuing = Some(var.clone());
                    } else if op != "+=" {
                        let end = comment_start(body).unwrap_or(body.len()).max(*value_start);
                        let value = body[*value_start..end].trim().to_string();
                        if op == "?=" {
                            variables.entry(var.clone()).or_insert(value);
                        } else {
                            variables.insert(var.clone(), value);
                        }
                    }
                }
                LineContext::Continuation { var } if continues => continuing = Some(var.clone()),
                _ => {}
            }

            lines.push(Line {
                body: body.to_string(),
                ending: ending.to_string(),
                context,
            });
        }

        Self { lines, variables }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Value of a single-line simple assignment, as written.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    /// Path tokens of `include` lines and of assignments to `path_variables`, in line order.
    pub fn path_tokens(&self, path_variables: &[String]) -> Vec<Token> {
        let mut tokens = Vec::new();

        for (index, line) in self.lines.iter().enumerate() {
            let wanted = match &line.context {
                LineContext::Include { .. } => true,
                _ => line.variable().is_some_and(|v| path_variables.iter().any(|p| p == v)),
            };
            if !wanted {
                continue;
            }
            let Some((start, end)) = line.value_range() else {
                continue;
            };

            for (offset, word) in words(&line.body[start..end]) {
                if word == "\\" {
                    continue;
                }
                let (skip, path) = match word.strip_prefix("-I") {
                    Some(rest) => (2, rest),
                    None if word.starts_with('-') => continue,
                    None => (0, word),
                };
                if path.is_empty() {
                    continue;
                }
                let token_start = start + offset + skip;
                tokens.push(Token {
                    line: index,
                    start: token_start,
                    end: token_start + path.len(),
                    text: path.to_string(),
                });
            }
        }

        tokens
    }

    /// Applies the rule table line by line, then the insertions that need the whole file.
    pub fn rewrite(&self, rules: &RuleSet, edits: &TokenEdits) -> String {
        let mut state = RewriteState::default();
        let mut out: Vec<(String, String, Option<usize>)> = Vec::new();
        let no_edits = Vec::new();

        for (index, line) in self.lines.iter().enumerate() {
            let line_edits = edits.get(&index).unwrap_or(&no_edits);
            for body in rules.apply(line, line_edits, &mut state) {
                out.push((body, line_ending(line), Some(index)));
            }
        }
        // Restore the original final-newline state.
        if let (Some(last), Some(orig)) = (out.last_mut(), self.lines.last()) {
            last.1 = orig.ending.clone();
        }

        if !state.root_seen {
            let at = self
                .lines
                .iter()
                .position(|l| l.variable() == Some("PROJECT_NAME"))
                .and_then(|i| out.iter().rposition(|o| o.2 == Some(i)).map(|p| p + 1))
                .unwrap_or(0);
            insert_lines(&mut out, at, rules.root_definitions());
        }

        if !rules.extra_cflags().is_empty() {
            let last_cflags = self.lines.iter().rposition(|l| l.variable() == Some("CFLAGS"));
            if let Some(i) = last_cflags {
                if let Some(p) = out.iter().rposition(|o| o.2 == Some(i)) {
                    insert_lines(&mut out, p + 1, rules.extra_cflags().to_vec());
                }
            } else {
                log::warn!("No CFLAGS assignment found, extra CFLAGS were not inserted");
            }
        }

        out.into_iter().map(|(body, ending, _)| body + &ending).collect()
    }
}

/// Build-file syntax of a mapped destination.
pub fn render(target: Target<'_>, root_variable: &str, project_variable: &str, sdk_dir: &str) -> String {
    match target {
        Target::Verbatim(raw) => raw.to_string(),
        Target::Destination(".") => format!("$({})", project_variable),
        Target::Destination(dest) if dest == sdk_dir => format!("$({})", root_variable),
        Target::Destination(dest) => match dest.strip_prefix(sdk_dir).and_then(|r| r.strip_prefix('/')) {
            Some(rel) => format!("$({})/{}", root_variable, rel),
            None => format!("$({})/{}", project_variable, dest),
        },
    }
}

fn insert_lines(out: &mut Vec<(String, String, Option<usize>)>, at: usize, bodies: Vec<String>) {
    let at = at.min(out.len());
    // A file without trailing newline still needs one before the inserted lines.
    if at == out.len() {
        if let Some(last) = out.last_mut() {
            if last.1.is_empty() {
                last.1 = "\n".to_string();
            }
        }
    }
    let ending = out.first().map(|o| o.1.clone()).filter(|e| !e.is_empty()).unwrap_or_else(|| "\n".to_string());
    for (k, body) in bodies.into_iter().enumerate() {
        out.insert(at + k, (body, ending.clone(), None));
    }
}

fn line_ending(line: &Line) -> String {
    if line.ending.is_empty() { "\n".to_string() } else { line.ending.clone() }
}

fn split_ending(raw: &str) -> (&str, &str) {
    if let Some(body) = raw.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = raw.strip_suffix('\n') {
        (body, "\n")
    } else {
        (raw, "")
    }
}

fn continues(body: &str) -> bool {
    let trimmed = body.trim_end();
    trimmed.ends_with('\\') && !trimmed.ends_with("\\\\")
}

/// Byte offset of an unescaped `#`.
fn comment_start(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    (0..bytes.len()).find(|&i| bytes[i] == b'#' && (i == 0 || bytes[i - 1] != b'\\'))
}

/// Whitespace-separated words with their byte offsets.
/// A `$(...)` or `${...}` group is one word even when it holds spaces.
fn words(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    let mut depth = 0usize;
    let mut prev = '\0';
    for (i, c) in text.char_indices() {
        match c {
            '(' | '{' if depth > 0 || prev == '$' => depth += 1,
            ')' | '}' if depth > 0 => depth -= 1,
            _ => {}
        }
        prev = c;
        if c.is_whitespace() && depth == 0 {
            if let Some(s) = start.take() {
                out.push((s, &text[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push((s, &text[s..]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAKEFILE: &str = "\
PROJECT_NAME     := blinky_pca10040
TARGETS          := nrf52832_xxaa
OUTPUT_DIRECTORY := _build

SDK_ROOT := ../../../../../..
PROJ_DIR := ../../..

$(OUTPUT_DIRECTORY)/nrf52832_xxaa.out: \\
  LINKER_SCRIPT  := blinky_gcc_nrf52.ld

# Source files common to all targets
SRC_FILES += \\
  $(SDK_ROOT)/modules/nrfx/mdk/gcc_startup_nrf52.S \\
  $(PROJ_DIR)/main.c \\

# Include folders common to all targets
INC_FOLDERS += \\
  $(SDK_ROOT)/components \\
  ../config \\

LIB_FILES += -lc -lnosys -lm

CFLAGS += -DBOARD_PCA10040
CFLAGS += -fno-builtin -fshort-enums

TEMPLATE_PATH := $(SDK_ROOT)/components/toolchain/gcc
include $(TEMPLATE_PATH)/Makefile.common

$(foreach target, $(TARGETS), $(call define_target, $(target)))
";

    #[test]
    fn test_parse_is_line_preserving() {
        let bf = BuildFile::parse(MAKEFILE);
        let rebuilt: String = bf.lines().iter().map(|l| format!("{}{}", l.body, l.ending)).collect();
        assert_eq!(rebuilt, MAKEFILE);
    }

    #[test]
    fn test_parse_simple_variables() {
        let bf = BuildFile::parse(MAKEFILE);
        assert_eq!(bf.variable("SDK_ROOT"), Some("../../../../../.."));
        assert_eq!(bf.variable("PROJ_DIR"), Some("../../.."));
        assert_eq!(bf.variable("TEMPLATE_PATH"), Some("$(SDK_ROOT)/components/toolchain/gcc"));
        assert_eq!(bf.variable("SRC_FILES"), None);
    }

    #[test]
    fn test_path_tokens_follow_continuations() {
        let bf = BuildFile::parse(MAKEFILE);
        let vars: Vec<String> = ["SRC_FILES", "INC_FOLDERS", "LIB_FILES", "LINKER_SCRIPT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let texts: Vec<String> = bf.path_tokens(&vars).into_iter().map(|t| t.text).collect();
        assert_eq!(
            texts,
            vec![
                "blinky_gcc_nrf52.ld",
                "$(SDK_ROOT)/modules/nrfx/mdk/gcc_startup_nrf52.S",
                "$(PROJ_DIR)/main.c",
                "$(SDK_ROOT)/components",
                "../config",
                "$(TEMPLATE_PATH)/Makefile.common",
            ]
        );
    }

    #[test]
    fn test_path_tokens_strip_include_flag() {
        let bf = BuildFile::parse("INC_FOLDERS := -I../config -I$(SDK_ROOT)/components # trailing\n");
        let tokens = bf.path_tokens(&["INC_FOLDERS".to_string()]);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "../config");
        assert_eq!(&bf.lines()[0].body[tokens[0].start..tokens[0].end], "../config");
    }

    #[test]
    fn test_render_build_syntax() {
        assert_eq!(
            render(Target::Destination("sdk_files/components/x.h"), "SDK_ROOT", "PROJ_DIR", "sdk_files"),
            "$(SDK_ROOT)/components/x.h"
        );
        assert_eq!(render(Target::Destination("main.c"), "SDK_ROOT", "PROJ_DIR", "sdk_files"), "$(PROJ_DIR)/main.c");
        assert_eq!(render(Target::Destination("."), "SDK_ROOT", "PROJ_DIR", "sdk_files"), "$(PROJ_DIR)");
        assert_eq!(
            render(Target::Verbatim("$(GNU_INSTALL_ROOT)/lib"), "SDK_ROOT", "PROJ_DIR", "sdk_files"),
            "$(GNU_INSTALL_ROOT)/lib"
        );
    }

    #[test]
    fn test_words_offsets() {
        assert_eq!(words("  a  bc\t"), vec![(2, "a"), (5, "bc")]);
    }

    #[test]
    fn test_words_keep_function_calls_whole() {
        assert_eq!(
            words(" $(wildcard ../src/*.c) ../main.c"),
            vec![(1, "$(wildcard ../src/*.c)"), (24, "../main.c")]
        );
        assert_eq!(
            words("$(patsubst %.c,%.o,$(filter %.c, $(SRC))) x"),
            vec![(0, "$(patsubst %.c,%.o,$(filter %.c, $(SRC)))"), (42, "x")]
        );
    }

    #[test]
    fn test_path_tokens_keep_function_calls_whole() {
        let bf = BuildFile::parse("SRC_FILES += \\\n  $(wildcard ../src/*.c) \\\n  ../main.c \\\n");
        let texts: Vec<String> = bf
            .path_tokens(&["SRC_FILES".to_string()])
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(texts, vec!["$(wildcard ../src/*.c)", "../main.c"]);
    }
}
