//! Identity for the HTTP API: bearer tokens, the per-request session they
//! produce, the gates that guard routes, and the login flow that issues them.
//! Keep the public surface thin and split implementation across sub-modules.

mod gate;
mod provider;
mod session;
mod token;

pub use gate::{
    authorize, bearer_token, is_admin, require_admin, require_auth, AuthError, AuthGate, InvalidTokenReason,
    ADMIN_USER_IDS,
};
pub use provider::{AuthResponse, AuthService, LoginRequest};
pub use session::Session;
pub use token::{Claims, TokenCodec, TokenError, ALGORITHM, KEY_MARKER};
