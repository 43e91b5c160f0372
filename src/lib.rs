pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod history;
pub mod identity;
pub mod logging;
pub mod model;
pub mod parsers;
pub mod publish;
pub mod ratio;
pub mod target;
