//! Federation layer: connector contract and registry, the fetch cache with one
//! in-flight request per key, the concurrent fetch engine and the file-backed bundle
//! connector.
//! NOTE: keep this module thin; logic lives in the submodules.

pub mod connector;
pub mod cache;
pub mod engine;
pub mod bundle;

pub use bundle::BundleConnector;
pub use cache::{CacheKey, CacheOrigin, CacheStats, FetchCache};
pub use connector::{
    Connector, ConnectorCapabilities, ConnectorIssue, ConnectorQuery, ConnectorRegistry, ConnectorResponse,
    RegisteredConnector, RelationQuery,
};
pub use engine::{ConnectorOutcome, FederationEngine, FetchReport, Fetched, OutcomeStatus};

#[cfg(test)]
#[path = "federation/tests.rs"]
mod tests;
