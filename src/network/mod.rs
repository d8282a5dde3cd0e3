//! Everything that talks to the network: endpoints, request transport and fallback domains.
pub(crate) mod dns;
mod endpoint;
pub(crate) mod fallback_resolver;
pub mod gzip;
pub(crate) mod sync_client;

pub use endpoint::{Endpoint, DEFAULT_API_URL};
pub use dns::DNS_QUERY_ENDPOINT;
