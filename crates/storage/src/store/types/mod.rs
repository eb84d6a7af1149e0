#![forbid(unsafe_code)]

mod cache;
mod entities;
mod jobs;

pub use cache::*;
pub use entities::*;
pub use jobs::*;
