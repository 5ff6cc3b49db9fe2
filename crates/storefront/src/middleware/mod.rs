//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP context)
//! 2. Route guard (cookie-presence redirects, runs before routing)
//! 3. Security headers
//! 4. Request ID (add unique ID to each request)
//! 5. `TraceLayer` (request tracing)
//! 6. API rate limit (`/api/*` except the payment webhook)
//! 7. Sign-in rate limit (governor, `/api/auth/session-login` only)

pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod route_guard;
pub mod security_headers;

pub use auth::{RequireAdmin, RequireUser, session_cookie};
pub use rate_limit::{RateLimiter, auth_rate_limiter, rate_limit_middleware};
pub use request_id::request_id_middleware;
pub use route_guard::route_guard_middleware;
pub use security_headers::security_headers_middleware;
