//! Report Renderers
//!
//! Renders test trees, trace diffs and change summaries as plain text for
//! terminals, or as JSON for other tools.

use anyhow::Result;

use crate::api::dto::TreeDto;
use crate::domain::changes::{ChangeStatus, NodeChange};
use crate::domain::matcher::OpTag;
use crate::domain::model::{Build, TestNode, TestTree};
use crate::domain::trace_diff::{DiffEntry, TraceDiff};
use crate::ports::ReportExporter;

/// Width of one side of a diff line.
const SIDE_WIDTH: usize = 48;

/// Human-readable text reports.
pub struct TextExporter;

impl ReportExporter for TextExporter {
    fn render_tree(&self, build: &Build, tree: &TestTree) -> Result<String> {
        let mut lines = Vec::new();
        lines.push(format!(
            "Build {} ({}) - {} tests, {:.3}s total",
            build.key, build.datetime, build.num_tests, build.total_duration
        ));
        if !build.tags.is_empty() {
            lines.push(format!("Tags: {}", build.tags.join(", ")));
        }
        lines.push(String::new());

        for root in tree.roots() {
            Self::push_node(tree, root, 0, &mut lines);
        }
        Ok(lines.join("\n"))
    }

    fn render_diff(&self, diff: &TraceDiff) -> Result<String> {
        if diff.is_empty() {
            return Ok("No calls recorded in either run.".to_string());
        }

        let mut lines = Vec::new();
        lines.push(format!("{} differences", diff.num_diffs));
        lines.push(String::new());

        let rows = diff.previous.records.len().max(diff.current.records.len());
        for row in 0..rows {
            let left = diff.previous.records.get(row);
            let right = diff.current.records.get(row);
            let tag = right.or(left).map(|e| e.tag).unwrap_or(OpTag::Equal);
            lines.push(format!(
                "{} {:<width$} | {}",
                Self::marker(tag),
                Self::cell(left),
                Self::cell(right),
                width = SIDE_WIDTH
            ));
        }
        Ok(lines.join("\n"))
    }

    fn render_changes(&self, changes: &[NodeChange]) -> Result<String> {
        if changes.is_empty() {
            return Ok("No changes.".to_string());
        }

        let mut lines = Vec::new();
        for change in changes {
            if change.status == ChangeStatus::New {
                lines.push(format!("{} (new)", change.label));
                continue;
            }
            let parts: Vec<String> = change
                .interfaces
                .iter()
                .map(|(name, c)| format!("{name} {} ({} -> {})", c.change, c.previous, c.current))
                .collect();
            lines.push(format!("{}: {}", change.label, parts.join(", ")));
        }
        Ok(lines.join("\n"))
    }
}

impl TextExporter {
    fn push_node(tree: &TestTree, node: &TestNode, depth: usize, lines: &mut Vec<String>) {
        let indent = "  ".repeat(depth);
        let calls: Vec<String> = node
            .data
            .iter()
            .map(|(name, stats)| format!("{name}={}", stats.mean_calls))
            .collect();
        if node.is_leaf() {
            lines.push(format!(
                "{indent}{} {:.3}s [{}]",
                node.label,
                node.duration.mean,
                calls.join(" ")
            ));
        } else {
            lines.push(format!(
                "{indent}{} ({} tests) {:.3}s max {:.3}s p90 {:.3}s [{}]",
                node.label,
                node.num_tests,
                node.duration.mean,
                node.duration.upper,
                node.duration.upper90,
                calls.join(" ")
            ));
        }
        for child in tree.children(node) {
            Self::push_node(tree, child, depth + 1, lines);
        }
    }

    fn marker(tag: OpTag) -> char {
        match tag {
            OpTag::Equal => ' ',
            OpTag::Replace => '~',
            OpTag::Delete => '-',
            OpTag::Insert => '+',
        }
    }

    fn cell(entry: Option<&DiffEntry>) -> String {
        let Some(record) = entry.and_then(|e| e.record.as_ref()) else {
            return String::new();
        };
        let text = Self::escape(&format!("{} {}", record.interface, record.command));
        if text.chars().count() > SIDE_WIDTH {
            let mut cut: String = text.chars().take(SIDE_WIDTH - 3).collect();
            cut.push_str("...");
            cut
        } else {
            text
        }
    }

    fn escape(text: &str) -> String {
        text.replace('\\', "\\\\").replace('\n', "\\n").replace('\t', " ")
    }
}

/// Pretty-printed JSON reports.
pub struct JsonExporter;

impl ReportExporter for JsonExporter {
    fn render_tree(&self, build: &Build, tree: &TestTree) -> Result<String> {
        Ok(serde_json::to_string_pretty(&TreeDto::new(build, tree))?)
    }

    fn render_diff(&self, diff: &TraceDiff) -> Result<String> {
        Ok(serde_json::to_string_pretty(diff)?)
    }

    fn render_changes(&self, changes: &[NodeChange]) -> Result<String> {
        Ok(serde_json::to_string_pretty(changes)?)
    }
}
