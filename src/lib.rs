pub mod app;
pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod fs_util;
pub mod normalize;
pub mod output;
pub mod pickle;
pub mod report;
pub mod store;
