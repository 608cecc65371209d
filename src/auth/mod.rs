//! Credential lifecycle: verification codes, password login, token
//! issuance, refresh rotation and the rate governor in front of them.

pub mod codes;
pub mod handlers;
pub mod password;
pub mod rate_limit;
pub mod service;
pub mod token;

pub use rate_limit::{client_identity, RateGovernor, RateLimitConfig};
pub use service::{
    AuthPolicy, AuthService, Backend, CodeAuthOutcome, LoginOutcome, MemoryBackend,
    PostgresBackend, TokenPair,
};
pub use token::{AccessClaims, RefreshClaims, TokenIssuer};
