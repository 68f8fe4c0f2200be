pub mod cleaner;
pub mod models;
pub mod ruleset;

#[cfg(feature = "server")]
pub mod config;
#[cfg(feature = "server")]
pub mod db;
#[cfg(feature = "server")]
pub mod logging;
#[cfg(feature = "server")]
pub mod rule_store;
#[cfg(feature = "server")]
pub mod web;

pub use cleaner::{apply, clean};
pub use models::{CleanError, CleanResult, CleaningOptions, Strategy};
pub use ruleset::Ruleset;
