// Adapters layer: concrete implementations of the domain ports
// (assignment store, process supervisor, provider catalogs, credentials)
// plus the HTTP surface.

pub mod catalog;
pub mod credentials;
pub mod http;
pub mod store;
pub mod supervisor;
