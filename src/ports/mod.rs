use crate::domain::changes::NodeChange;
use crate::domain::model::{Build, TestTree};
use crate::domain::trace_diff::TraceDiff;

pub mod report_exporter;

pub trait ReportExporter {
    fn render_tree(&self, build: &Build, tree: &TestTree) -> anyhow::Result<String>;
    fn render_diff(&self, diff: &TraceDiff) -> anyhow::Result<String>;
    fn render_changes(&self, changes: &[NodeChange]) -> anyhow::Result<String>;
}
