#![forbid(unsafe_code)]

mod builder;
mod metadata;
mod spec_ids;
mod template;

pub use builder::*;
pub use metadata::*;
pub use spec_ids::*;
pub use template::*;

#[cfg(test)]
mod tests;
