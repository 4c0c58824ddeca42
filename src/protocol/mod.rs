//! Stdout line classification and in-band request envelopes (§4.4, §6.2).

mod command_request;
mod config_request;
mod detector;
mod types;

pub use command_request::build_definitions;
pub use config_request::JsonConfigRequestBuilder;
pub use detector::classify;
pub use types::{ConfigRequestBuilder, ConfigRequestEntry, StdoutLine};
