pub mod auth;
pub mod maintenance;
pub mod origin;

pub use auth::{
    removal_cookie, require_developer, session_cookie, session_middleware, CurrentIdentity,
    SESSION_COOKIE,
};
pub use maintenance::{maintenance_middleware, MAINTENANCE_PAGE};
