// Slotgate common library - main library exports

pub mod chain;
pub mod error;
pub mod id;
pub mod types;
pub mod validators;

// Flattened re-exports
pub use self::chain::*;
pub use self::error::*;
pub use self::id::*;
pub use self::types::*;
pub use self::validators::*;
