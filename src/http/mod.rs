//! HTTP plumbing shared by the content store and enrichment clients
//!
//! - `throttled`: retrying, throttle-aware request execution with call counters
//! - `auth`: bearer token provider seam and refresh-ahead cache

pub mod auth;
mod throttled;

pub use auth::{AccessToken, EnvTokenProvider, TokenCache, TokenProvider};
pub use throttled::{
    build_http_client, decode_json, CallCounters, CallStats, RetryPolicy, ThrottledClient,
};
