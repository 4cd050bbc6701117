mod block;
mod error;

pub use block::*;
pub use error::*;
