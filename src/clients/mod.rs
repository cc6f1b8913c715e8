//! Outbound HTTP integrations to the external collaborators named in spec
//! §1/§6 (token/account service, permission service, market-data service).
//! Thin `reqwest::Client` wrappers with typed request/response structs,
//! carrying the internal API key on `X-Internal-API-Key`.

pub mod market_data;
pub mod permission;
pub mod token_account;

pub use market_data::MarketDataClient;
pub use permission::PermissionClient;
pub use token_account::{ResolvedAccount, TokenAccountClient};
