//! HTTP access to the CareerNavigator backend.
//!
//! [`ApiClient`] is the authenticated request pipeline; the endpoint
//! wrappers in `auth`, `users` and `contributions` are `impl ApiClient`
//! blocks on top of it.

mod auth;
mod client;
mod contributions;
mod error;
mod users;

pub use client::{ApiClient, ApiRequest, FilePart, RequestBody, SessionEvent};
pub use contributions::{ContributionLedger, ContributionRelay};
pub use error::ApiError;
pub use users::{ResumeFile, DOCX_MIME, MAX_RESUME_BYTES, PDF_MIME};
