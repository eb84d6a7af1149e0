#![forbid(unsafe_code)]

mod cache_key;
mod log_entry;
mod parser;
mod step_result;

pub use cache_key::*;
pub use log_entry::*;
pub use parser::*;
pub use step_result::*;
