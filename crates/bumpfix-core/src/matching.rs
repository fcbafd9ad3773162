//! Fuzzy patch application.
//!
//! Model output rarely reproduces the file byte for byte: quotes change,
//! trailing semicolons go missing, indentation drifts. [`apply`] first tries
//! a literal replacement and falls back to line-level approximate matching:
//! every line of the snippet is scored against every file line with
//! normalized Levenshtein similarity, and the first contiguous run of
//! acceptable lines is replaced, re-indented to the matched location.
//!
//! Matching is quadratic in snippet lines times file lines. It is meant for
//! snippets scoped to a single code unit, not whole-file diffs.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum distance from a perfect score (1.0) a line may be and still
/// count as a candidate.
pub const TOLERANCE: f64 = 0.3;

static STATEMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // import x from 'y'; import { a, b } from "y"; import * as x from 'y'
        r#"^import\s+(?:type\s+)?.+?\s+from\s+['"][^'"]+['"]\s*;?$"#,
        // import 'side-effect';
        r#"^import\s+['"][^'"]+['"]\s*;?$"#,
        // import x = require('y');
        r#"^import\s+\w+\s*=\s*require\(\s*['"][^'"]+['"]\s*\)\s*;?$"#,
        // const x = require('y'); const { a } = require("y")
        r#"^(?:const|let|var)\s+.+?=\s*require\(\s*['"][^'"]+['"]\s*\)\s*;?$"#,
        // require('side-effect');
        r#"^require\(\s*['"][^'"]+['"]\s*\)\s*;?$"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid import statement regex"))
    .collect()
});

/// Candidate file lines for one snippet line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCandidates {
    /// Blank snippet line; matches any position.
    Any,
    /// Indices of acceptable file lines, ascending.
    At(Vec<usize>),
}

/// Replaces `old_code` with `new_code` in `content`.
///
/// Returns `content` unchanged when `old_code` is blank or no acceptable
/// block is found.
pub fn apply(content: &str, old_code: &str, new_code: &str) -> String {
    if old_code.trim().is_empty() {
        return content.to_string();
    }

    if content.contains(old_code) {
        return content.replacen(old_code, new_code, 1);
    }

    if let (Some(old_parts), Some(new_parts)) = (
        split_statements(old_code),
        split_statements(new_code),
    ) {
        if old_parts.len() == new_parts.len() {
            return old_parts
                .iter()
                .zip(new_parts.iter())
                .fold(content.to_string(), |acc, (old, new)| {
                    apply_approximate(&acc, old, new)
                });
        }
    }

    apply_approximate(content, old_code, new_code)
}

/// Splits `code` into its import/require statements if it consists of two
/// or more of them, one per line, and nothing else.
pub fn split_statements(code: &str) -> Option<Vec<&str>> {
    let statements: Vec<&str> = code
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if statements.len() < 2 {
        return None;
    }
    let all_statements = statements
        .iter()
        .all(|line| STATEMENT_PATTERNS.iter().any(|re| re.is_match(line)));
    all_statements.then_some(statements)
}

fn apply_approximate(content: &str, old_code: &str, new_code: &str) -> String {
    let content_lines: Vec<&str> = content.split('\n').collect();
    let old_lines = trim_blank_edges(old_code);
    if old_lines.is_empty() {
        return content.to_string();
    }

    let trimmed_content: Vec<&str> = content_lines.iter().map(|line| line.trim()).collect();
    let candidates: Vec<LineCandidates> = old_lines
        .iter()
        .map(|line| line_candidates(line.trim(), &trimmed_content))
        .collect();

    let Some((start, end)) = find_matched_block(&candidates) else {
        tracing::debug!(
            old_lines = old_lines.len(),
            "no sufficiently similar block found; content left unchanged"
        );
        return content.to_string();
    };

    // Keep CRLF files consistent.
    let eol = if content_lines[end].ends_with('\r') { "\r" } else { "" };
    let replacement = format_new_code(content_lines[start], new_code)
        .into_iter()
        .map(|line| format!("{line}{eol}"));
    content_lines[..start]
        .iter()
        .map(|line| line.to_string())
        .chain(replacement)
        .chain(content_lines[end + 1..].iter().map(|line| line.to_string()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn line_candidates(line: &str, content: &[&str]) -> LineCandidates {
    if line.is_empty() {
        return LineCandidates::Any;
    }
    let hits = content
        .iter()
        .enumerate()
        .filter(|(_, candidate)| {
            1.0 - strsim::normalized_levenshtein(line, candidate) <= TOLERANCE
        })
        .map(|(idx, _)| idx)
        .collect();
    LineCandidates::At(hits)
}

/// Finds the first run of consecutive file lines, one per snippet line,
/// that every snippet line accepts. Returns inclusive `(start, end)`.
///
/// The run is anchored on the first concrete snippet line, and its
/// candidates are tried in order. A snippet of only wildcards, or any
/// concrete line without candidates, matches nothing.
pub fn find_matched_block(candidates: &[LineCandidates]) -> Option<(usize, usize)> {
    let (anchor, anchor_hits) = candidates.iter().enumerate().find_map(|(j, c)| match c {
        LineCandidates::At(hits) => Some((j, hits)),
        LineCandidates::Any => None,
    })?;

    anchor_hits.iter().find_map(|&hit| {
        let start = hit.checked_sub(anchor)?;
        let fits = candidates.iter().enumerate().all(|(j, c)| match c {
            LineCandidates::Any => true,
            LineCandidates::At(hits) => hits.contains(&(start + j)),
        });
        fits.then_some((start, start + candidates.len() - 1))
    })
}

/// Re-indents `new_code` to sit where `matched_line` was.
///
/// The matched line's leading whitespace replaces the first new line's
/// indentation; later lines keep their indentation relative to the first.
/// Blank lines stay blank and blank edges are dropped.
pub fn format_new_code(matched_line: &str, new_code: &str) -> Vec<String> {
    let lines = trim_blank_edges(new_code);
    let Some(first) = lines.first() else {
        return Vec::new();
    };

    let target = leading_whitespace(matched_line);
    let base_width = leading_whitespace(first).chars().count();

    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                return String::new();
            }
            let own = leading_whitespace(line).chars().count();
            let strip = own.min(base_width);
            let rest: String = line.chars().skip(strip).collect();
            format!("{target}{rest}")
        })
        .collect()
}

fn leading_whitespace(line: &str) -> &str {
    let end = line.len() - line.trim_start().len();
    &line[..end]
}

fn trim_blank_edges(code: &str) -> Vec<&str> {
    let lines: Vec<&str> = code.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].to_vec(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hits: &[usize]) -> LineCandidates {
        LineCandidates::At(hits.to_vec())
    }

    #[test]
    fn finds_contiguous_block() {
        let candidates = vec![at(&[1, 5, 6]), at(&[2, 9, 16]), at(&[0, 3])];
        assert_eq!(find_matched_block(&candidates), Some((1, 3)));
    }

    #[test]
    fn no_block_when_run_breaks() {
        let candidates = vec![at(&[1, 5, 6]), at(&[3, 9, 16]), at(&[0, 3])];
        assert_eq!(find_matched_block(&candidates), None);
    }

    #[test]
    fn empty_candidate_set_matches_nothing() {
        assert_eq!(
            find_matched_block(&[at(&[1, 7]), at(&[]), at(&[2, 3, 4])]),
            None
        );
        assert_eq!(find_matched_block(&[at(&[])]), None);
        assert_eq!(find_matched_block(&[]), None);
    }

    #[test]
    fn single_line_takes_first_candidate() {
        assert_eq!(find_matched_block(&[at(&[1, 7])]), Some((1, 1)));
    }

    #[test]
    fn wildcards_fill_any_position() {
        let candidates = vec![at(&[4]), LineCandidates::Any, at(&[2, 6])];
        assert_eq!(find_matched_block(&candidates), Some((4, 6)));
        // A leading wildcard shifts the start back from the anchor.
        let candidates = vec![LineCandidates::Any, at(&[0, 3]), at(&[4])];
        assert_eq!(find_matched_block(&candidates), Some((2, 4)));
        assert_eq!(find_matched_block(&[LineCandidates::Any]), None);
    }

    #[test]
    fn format_adds_missing_indent() {
        let line = "    import * as Sentry from '@sentry/line';";
        let replace = "import * as Sentry from '@sentry/replace';";
        assert_eq!(
            format_new_code(line, replace),
            vec!["    import * as Sentry from '@sentry/replace';"]
        );
    }

    #[test]
    fn format_removes_extra_indent() {
        let line = "import * as Sentry from '@sentry/line';";
        let replace = "  import * as Sentry from '@sentry/replace';";
        assert_eq!(
            format_new_code(line, replace),
            vec!["import * as Sentry from '@sentry/replace';"]
        );
    }

    #[test]
    fn format_preserves_tabs() {
        let line = "\t\timport * as Sentry from '@sentry/line';";
        let replace = "import * as Sentry from '@sentry/replace';";
        assert_eq!(
            format_new_code(line, replace),
            vec!["\t\timport * as Sentry from '@sentry/replace';"]
        );
    }

    #[test]
    fn format_keeps_relative_indent() {
        let formatted = format_new_code("    if (x) {", "if (y) {\n  run();\n\n}");
        assert_eq!(formatted, vec!["    if (y) {", "      run();", "", "    }"]);
    }

    #[test]
    fn blank_old_code_is_noop() {
        let content = "const a = 1;\n";
        assert_eq!(apply(content, "  \n\t", "const b = 2;"), content);
    }

    #[test]
    fn exact_match_replaces_first_occurrence_only() {
        let content = "foo();\nfoo();\n";
        assert_eq!(apply(content, "foo();", "bar();"), "bar();\nfoo();\n");
    }

    #[test]
    fn exact_replacement_is_idempotent_when_new_contains_no_old() {
        let content = "import x from 'lib';\nx.oldFn();\n";
        let once = apply(content, "x.oldFn()", "x.newFn()");
        let twice = apply(&once, "x.oldFn()", "x.newFn()");
        assert_eq!(once, "import x from 'lib';\nx.newFn();\n");
        assert_eq!(once, twice);
    }

    #[test]
    fn approximate_match_tolerates_quotes_and_semicolons() {
        let content = "function main() {\n    import * as rawGlob from 'glob';\n    run();\n}\n";
        let result = apply(
            content,
            "import * as rawGlob from \"glob\"",
            "import { glob as rawGlob } from 'glob';",
        );
        assert_eq!(
            result,
            "function main() {\n    import { glob as rawGlob } from 'glob';\n    run();\n}\n"
        );
    }

    #[test]
    fn approximate_multi_line_block_is_reindented() {
        let content = "class A {\n  method() {\n    return oldFn(1, 2);\n  }\n}\n";
        let old = "method() {\n  return oldFn(1,2)\n}";
        let new = "method() {\n  return newFn({ a: 1, b: 2 });\n}";
        let result = apply(content, old, new);
        assert_eq!(
            result,
            "class A {\n  method() {\n    return newFn({ a: 1, b: 2 });\n  }\n}\n"
        );
    }

    #[test]
    fn approximate_match_keeps_crlf_line_endings() {
        let content = "a();\r\n    oldFn(1);\r\nb();\r\n";
        assert_eq!(
            apply(content, "oldFn(1)  ;", "newFn(1);"),
            "a();\r\n    newFn(1);\r\nb();\r\n"
        );
    }

    #[test]
    fn no_match_leaves_content_unchanged() {
        let content = "const a = 1;\nconst b = 2;\n";
        assert_eq!(
            apply(content, "completely unrelated text here", "x"),
            content
        );
    }

    #[test]
    fn multiple_imports_are_paired_and_applied_separately() {
        let content = "import a from \"alpha\";\nconst keep = 1;\nimport b from \"beta\";\n";
        let old = "import a from 'alpha';\nimport b from 'beta';";
        let new = "import { a } from 'alpha';\nimport { b } from 'beta';";
        let result = apply(content, old, new);
        assert_eq!(
            result,
            "import { a } from 'alpha';\nconst keep = 1;\nimport { b } from 'beta';\n"
        );
    }

    #[test]
    fn split_statements_requires_only_statements() {
        assert_eq!(
            split_statements("import a from 'a';\nconst b = require(\"b\");"),
            Some(vec!["import a from 'a';", "const b = require(\"b\");"])
        );
        assert_eq!(split_statements("import a from 'a';"), None);
        assert_eq!(split_statements("import a from 'a';\nrun();"), None);
    }
}
