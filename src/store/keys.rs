//! Well-known shared-store keys.
//!
//! Both applications must agree on these names bit for bit.

/// Pending authentication request written by the requester
pub const AUTH_REQUEST: &str = "lasko_auth_request";

/// Signed session written by the holder on approval
pub const AUTH_RESPONSE: &str = "lasko_auth_response";

/// Explicit denial written by the holder on deny
pub const AUTH_DENIED: &str = "lasko_auth_denied";

/// Content-hash signing request
pub const POST_SIGN_REQUEST: &str = "lasko_post_sign_request";

/// Content-hash signing response
pub const POST_SIGN_RESPONSE: &str = "lasko_post_sign_response";

/// Cached bearer token
pub const HALO_ACCESS_TOKEN: &str = "halo_access_token";

/// Absolute expiry (epoch seconds) of the cached bearer token
pub const HALO_TOKEN_EXPIRES_AT: &str = "halo_token_expires_at";

/// Flag set by the requester to ask the holder for a fresh token
pub const HALO_TOKEN_REFRESH_REQUEST: &str = "halo_token_refresh_request";

/// Epoch seconds of the last refresh performed in answer to the flag
pub const HALO_TOKEN_REFRESHED_AT: &str = "halo_token_refreshed_at";

/// Every key owned by this layer
pub const ALL: [&str; 9] = [
    AUTH_REQUEST,
    AUTH_RESPONSE,
    AUTH_DENIED,
    POST_SIGN_REQUEST,
    POST_SIGN_RESPONSE,
    HALO_ACCESS_TOKEN,
    HALO_TOKEN_EXPIRES_AT,
    HALO_TOKEN_REFRESH_REQUEST,
    HALO_TOKEN_REFRESHED_AT,
];
