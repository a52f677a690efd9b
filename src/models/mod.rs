pub mod catalog;
pub mod document;
pub mod enums;
pub mod job;

pub use catalog::*;
pub use document::*;
pub use enums::*;
pub use job::*;
