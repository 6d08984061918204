// Domain model and algorithms for build imports and comparisons.

pub mod call;
pub mod changes;
pub mod history;
pub mod matcher;
pub mod model;
pub mod payload;
pub mod stats;
pub mod store;
pub mod trace_diff;
pub mod tree;
