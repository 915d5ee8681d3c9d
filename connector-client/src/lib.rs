//! # connector-client
//!
//! HTTP clients for the two sides of the connector.
//!
//! - [`source`]: WiseTime, read-only, watermark-paginated posted time plus
//!   tag upserts.
//! - [`target`]: Allisa, case lookup and multipart time posts.
//!
//! Both sides are `async_trait` traits so the engine can run against the
//! in-memory mocks in tests and the `reqwest` implementations in production.
//!
//! # Example
//!
//! ```ignore
//! use connector_client::{AllisaClient, AllisaClientConfig, TargetApi};
//!
//! let client = AllisaClient::new(AllisaClientConfig::new(
//!     "https://allisa.example.com/",
//!     "api-key",
//!     "projekt",
//!     "zeiterfassung",
//! ))?;
//! if let Some(case) = client.find_case("CASE-1").await? {
//!     println!("case id {}", case.case_id);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod source;
pub mod target;

pub use error::ClientError;
pub use source::{
    MockSource, PostedTimePage, SourceApi, UpsertTagRequest, WiseTimeClient, WiseTimeClientConfig,
};
pub use target::{
    AllisaCase, AllisaClient, AllisaClientConfig, MockTarget, TargetApi, TimePost,
};
