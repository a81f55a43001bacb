pub mod auth;
pub mod developer;

pub use auth::*;
pub use developer::*;
