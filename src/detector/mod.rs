pub mod eld;
pub mod epfd;

pub use eld::*;
pub use epfd::*;
