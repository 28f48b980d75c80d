pub mod beb;
pub mod pl;

pub use beb::*;
pub use pl::*;
