//! Authentication: validates JWTs issued upstream by the account/auth
//! service (spec §1 Non-goal — this service validates claims, it does not
//! issue tokens).

pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
