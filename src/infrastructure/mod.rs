// Infrastructure adapters: filesystem access for report files.

pub mod payload_loader;

pub use payload_loader::PayloadLoader;
