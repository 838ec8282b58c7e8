//! Run shell commands concurrently with prefixed, multiplexed output and an
//! optional live health panel.

pub mod app;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod logging;
pub mod output;
pub mod prefix;
pub mod style;
pub mod template;

pub use app::App;
pub use config::Config;
pub use error::{Error, Result, RunErrors};
