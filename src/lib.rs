pub mod backend;
pub mod change;
pub mod cli;
pub mod config;
pub mod contract;
pub mod destiny;
pub mod download;
pub mod error;
pub mod extract;
pub mod journal;
pub mod links;
pub mod load_config;
pub mod stamps;
pub mod synchronise;
