//! Repository implementations for database operations

pub mod events;
pub mod market;
pub mod signals;
pub mod trades;

pub use events::*;
pub use market::*;
pub use signals::*;
pub use trades::*;
