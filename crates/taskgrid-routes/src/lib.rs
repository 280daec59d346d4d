//! taskgrid-routes — the static route table.
//!
//! Loads the route manifest emitted by the registration SDK (a JSON
//! array of path/methods/resources/handler entries) and builds an
//! immutable [`RouteTable`]. Matching is exact-segment with `{param}`
//! placeholders; there is no prefix or wildcard fallback, and a miss is
//! the signal to hand the request to the fallback collaborator.
//!
//! Duplicate `(path, method)` combinations and malformed entries are
//! fatal at startup.

pub mod manifest;
pub mod table;

pub use manifest::{ManifestEntry, RouteError, load_manifest};
pub use table::{RouteEntry, RouteMatch, RouteTable};
