//! `fluent-http` is a fluent, single-use async HTTP client.
//!
//! An [`HttpClient`] accumulates headers, parameters, file attachments and
//! a body, then executes once with a retry policy:
//! - GET parameters become the query string
//! - POST/PUT/PATCH/DELETE parameters become a urlencoded form, or a streamed
//!   multipart body when files are attached
//! - [`HttpClient::bytes`], [`HttpClient::to_json`], [`HttpClient::to_xml`]
//!   and [`HttpClient::to_file`] read the response body once and cache it

mod attachments;
mod body;
mod client;
mod context;
mod error;
mod multipart;
mod options;
mod params;
mod response;
mod transport;

pub use attachments::Attachments;
pub use client::{get, post, HttpClient};
pub use context::ClientContext;
pub use error::{ErrorKind, HttpError};
pub use options::{ClientOptions, RetryPolicy, TransportOptions};
pub use params::Params;
pub use response::ResponseHead;
pub use transport::{BoxError, ReqwestTransport, Transport};

pub use reqwest::{cookie::Jar, Method, StatusCode};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, HttpError>;
