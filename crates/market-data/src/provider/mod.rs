//! Upstream data providers.
//!
//! This module contains:
//! - The `QuoteProvider` trait the refresh scheduler fetches through
//! - The HTTP implementation for the dashboard backend API
//! - Payload validation and an optional token bucket for upstream calls

mod http;
mod models;
mod rate_limiter;
mod traits;
mod validator;

pub use http::HttpQuoteProvider;
pub use rate_limiter::RateLimiter;
pub use traits::QuoteProvider;
pub use validator::{QuoteValidator, ValidationSeverity, ValidatorConfig};
