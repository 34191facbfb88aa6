//! Operator identity and the credential lifecycle of one console session.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod coalesce;
mod token;
mod csrf;
mod session;

pub use principal::Identity;
pub use coalesce::Coalescer;
pub use token::{decode_claims, TokenClaims, TokenGrant, TokenLifecycle};
pub use csrf::AntiForgeryCoordinator;
pub use session::{SessionController, SessionState};
