//! Pattern libraries that pull structure out of extracted report text.
//!
//! Everything here is a pure function over strings. A missing match is a
//! normal outcome, never an error.

pub mod dates;
pub mod imaging;
pub mod labs;

pub use dates::*;
pub use imaging::*;
pub use labs::*;
