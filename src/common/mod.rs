pub mod error;
pub mod id;
pub mod message;
pub mod peers;
pub mod quorum;
pub mod value;

pub use error::*;
pub use id::*;
pub use message::*;
pub use peers::*;
pub use quorum::*;
pub use value::*;
