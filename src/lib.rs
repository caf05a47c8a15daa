pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod eutils;
pub mod executor;
pub mod extract;
pub mod fs_util;
pub mod history;
pub mod listing;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod rate_limit;
pub mod retry;
