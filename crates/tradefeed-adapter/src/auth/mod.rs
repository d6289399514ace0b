/*
[INPUT]:  Authentication tokens supplied by an out-of-band login flow
[OUTPUT]: Handshake credentials for authenticated sessions
[POS]:    Auth layer - credential capability consumed by sessions
[UPDATE]: When auth sources or token handling change
*/

pub mod authenticator;
pub mod tokens;

pub use authenticator::{Authenticator, StaticAuthenticator};
pub use tokens::{AuthTokens, TokenData, TokenStore};
