//! # Courier
//!
//! A background HTTP client for interactive applications: requests are
//! submitted from any thread, executed on a dedicated I/O thread, and their
//! results delivered back through an explicit [`RequestQueue::pump`] call on
//! whichever thread should run the callbacks. No callback ever fires from
//! the I/O thread.
//!
//! ## Features
//!
//! - **Request groups**: independent concurrency caps and failure budgets,
//!   with fail-fast submission once a group's budget is spent
//! - **Response cache**: persistent, size-bounded storage with HTTP
//!   freshness (`Cache-Control`, `Expires`) and `ETag`/`Last-Modified`
//!   revalidation
//! - **Pluggable transport**: the reqwest engine behind a [`Transport`]
//!   trait, swappable for test doubles or custom engines
//! - **Streaming file I/O**: uploads from and downloads to disk without
//!   buffering whole bodies in memory
//!
//! ## Example
//!
//! ```no_run
//! use courier_engine::{ClientConfigBuilder, GroupConfig, Request, RequestQueue, TransferEvent};
//!
//! # fn main() -> Result<(), courier_engine::CourierError> {
//! let config = ClientConfigBuilder::new()
//!     .with_caching_enabled(true)
//!     .build();
//! let queue = RequestQueue::new(
//!     config,
//!     vec![GroupConfig::new("assets").with_max_concurrent(4)],
//! )?;
//!
//! queue.submit(
//!     Request::get("https://example.com/data.json").with_caching(true),
//!     0,
//!     |event| {
//!         if let TransferEvent::Done(result) = event {
//!             println!("status {} ({} bytes)", result.status, result.body.len());
//!         }
//!     },
//! );
//!
//! // Somewhere in the application's tick loop:
//! queue.pump();
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod message;
pub mod proxy;
pub mod queue;
mod transfer;
pub mod transport;
mod worker;

pub use builder::ClientConfigBuilder;
pub use cache::{CacheEntry, ResponseCache, unix_now};
pub use config::{CacheConfig, ClientConfig};
pub use error::{CourierError, TransferError};
pub use message::{
    EventCallback, GroupId, MessageId, Method, Request, RequestHandle, TransferEvent,
    TransferResult, TransferState,
};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use queue::{GroupConfig, RequestQueue};
pub use transport::{HttpTransport, TransferSink, Transport, TransportRequest, create_client};
