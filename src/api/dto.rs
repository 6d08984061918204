use serde::{Deserialize, Serialize};
use time::macros::format_description;

use crate::domain::model::{Build, TestTree};
use crate::domain::stats::InterfaceData;

#[derive(Debug, Serialize, Deserialize)]
pub struct TreeDto {
    pub build: BuildDto,
    pub nodes: Vec<NodeDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildDto {
    pub project: String,
    pub revision: String,
    pub datetime: String,
    pub tags: Vec<String>,
    pub num_tests: usize,
    pub total_duration: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDto {
    pub label: String,
    pub parent: Option<String>,
    pub description: String,
    pub leaf: bool,
    pub num_tests: usize,
    pub mean_duration: f64,
    pub upper_duration: f64,
    pub lower_duration: f64,
    pub upper90_duration: f64,
    pub data: InterfaceData,
}

impl From<&Build> for BuildDto {
    fn from(build: &Build) -> Self {
        let format =
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]");
        BuildDto {
            project: build.key.project.clone(),
            revision: build.key.revision.clone(),
            datetime: build
                .datetime
                .format(format)
                .unwrap_or_else(|_| build.datetime.to_string()),
            tags: build.tags.clone(),
            num_tests: build.num_tests,
            total_duration: build.total_duration,
        }
    }
}

impl TreeDto {
    pub fn new(build: &Build, tree: &TestTree) -> Self {
        let nodes = tree
            .nodes()
            .iter()
            .map(|n| NodeDto {
                label: n.label.clone(),
                parent: tree.parent(n).map(|p| p.label.clone()),
                description: n.description.clone(),
                leaf: n.is_leaf(),
                num_tests: n.num_tests,
                mean_duration: n.duration.mean,
                upper_duration: n.duration.upper,
                lower_duration: n.duration.lower,
                upper90_duration: n.duration.upper90,
                data: n.data.clone(),
            })
            .collect();

        TreeDto {
            build: BuildDto::from(build),
            nodes,
        }
    }
}
