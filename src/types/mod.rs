//! Type definitions

pub mod feed;
pub mod job;
pub mod lane;
pub mod location;
pub mod output;
pub mod schedule;

pub use feed::*;
pub use job::*;
pub use lane::*;
pub use location::*;
pub use output::*;
pub use schedule::*;
