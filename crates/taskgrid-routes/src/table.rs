//! The compiled route table and exact-segment matcher.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use taskgrid_core::types::ResourceVector;

use crate::manifest::{ManifestEntry, RouteError};

/// One segment of a compiled route path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A single registered route, immutable after startup.
#[derive(Debug)]
pub struct RouteEntry {
    pub path: String,
    pub methods: BTreeSet<String>,
    pub resources: ResourceVector,
    pub handler_id: String,
    segments: Vec<Segment>,
}

/// A successful match: the route plus any bound path parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub entry: Arc<RouteEntry>,
    pub params: HashMap<String, String>,
}

/// Immutable mapping from `(path, method)` to handler + requirement.
///
/// Built once at startup; owned by the orchestrator context and passed
/// by reference; there is no process-global registry.
pub struct RouteTable {
    entries: Vec<Arc<RouteEntry>>,
}

impl RouteTable {
    /// Compile manifest entries into a table.
    ///
    /// Fails on malformed paths, empty method lists, and duplicate
    /// `(path, method)` combinations, all fatal configuration errors.
    pub fn from_manifest(manifest: Vec<ManifestEntry>) -> Result<Self, RouteError> {
        let mut entries = Vec::with_capacity(manifest.len());
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

        for raw in manifest {
            let segments = compile_path(&raw.path)?;

            if raw.methods.is_empty() {
                return Err(RouteError::InvalidRoute {
                    path: raw.path,
                    reason: "no methods declared".to_string(),
                });
            }

            let mut methods = BTreeSet::new();
            for method in &raw.methods {
                let method = method.to_ascii_uppercase();
                if !seen.insert((raw.path.clone(), method.clone())) {
                    return Err(RouteError::DuplicateRoute {
                        path: raw.path,
                        method,
                    });
                }
                methods.insert(method);
            }

            debug!(path = %raw.path, handler = %raw.handler_id, "route registered");
            entries.push(Arc::new(RouteEntry {
                path: raw.path,
                methods,
                resources: raw.resources,
                handler_id: raw.handler_id,
                segments,
            }));
        }

        Ok(Self { entries })
    }

    /// Match a request against the table.
    ///
    /// A route matches only if the segment count and every literal
    /// segment agree and the method is declared. `{param}` segments
    /// bind the corresponding request segment.
    pub fn match_route(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let method = method.to_ascii_uppercase();
        let request_segments = split_path(path);

        for entry in &self.entries {
            if !entry.methods.contains(&method) {
                continue;
            }
            if let Some(params) = bind_segments(&entry.segments, &request_segments) {
                return Some(RouteMatch {
                    entry: Arc::clone(entry),
                    params,
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered paths, in manifest order.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }
}

fn compile_path(path: &str) -> Result<Vec<Segment>, RouteError> {
    if !path.starts_with('/') {
        return Err(RouteError::InvalidRoute {
            path: path.to_string(),
            reason: "path must start with '/'".to_string(),
        });
    }

    let mut segments = Vec::new();
    for part in split_path(path) {
        if part.is_empty() {
            return Err(RouteError::InvalidRoute {
                path: path.to_string(),
                reason: "empty path segment".to_string(),
            });
        }
        if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            if name.is_empty() {
                return Err(RouteError::InvalidRoute {
                    path: path.to_string(),
                    reason: "empty parameter name".to_string(),
                });
            }
            segments.push(Segment::Param(name.to_string()));
        } else {
            segments.push(Segment::Literal(part.to_string()));
        }
    }
    Ok(segments)
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').collect()
}

fn bind_segments(
    route: &[Segment],
    request: &[&str],
) -> Option<HashMap<String, String>> {
    if route.len() != request.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (segment, part) in route.iter().zip(request) {
        match segment {
            Segment::Literal(literal) => {
                if literal != part {
                    return None;
                }
            }
            Segment::Param(name) => {
                params.insert(name.clone(), (*part).to_string());
            }
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, methods: &[&str], handler: &str) -> ManifestEntry {
        ManifestEntry {
            path: path.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            resources: ResourceVector::new(1.0, 0.0, 1.0),
            handler_id: handler.to_string(),
        }
    }

    fn table(entries: Vec<ManifestEntry>) -> RouteTable {
        RouteTable::from_manifest(entries).unwrap()
    }

    #[test]
    fn exact_match() {
        let table = table(vec![entry("/infer", &["POST"], "app.infer")]);

        let matched = table.match_route("POST", "/infer").unwrap();
        assert_eq!(matched.entry.handler_id, "app.infer");
        assert!(matched.params.is_empty());
    }

    #[test]
    fn method_must_be_declared() {
        let table = table(vec![entry("/infer", &["POST"], "app.infer")]);
        assert!(table.match_route("GET", "/infer").is_none());
    }

    #[test]
    fn method_matching_is_case_insensitive() {
        let table = table(vec![entry("/infer", &["post"], "app.infer")]);
        assert!(table.match_route("POST", "/infer").is_some());
    }

    #[test]
    fn param_segments_bind_values() {
        let table = table(vec![entry(
            "/models/{name}/versions/{version}",
            &["GET"],
            "app.get_version",
        )]);

        let matched = table
            .match_route("GET", "/models/resnet/versions/3")
            .unwrap();
        assert_eq!(matched.params["name"], "resnet");
        assert_eq!(matched.params["version"], "3");
    }

    #[test]
    fn no_prefix_matching() {
        let table = table(vec![entry("/items", &["GET"], "app.items")]);

        assert!(table.match_route("GET", "/items/42").is_none());
        assert!(table.match_route("GET", "/items/42/details").is_none());
        assert!(table.match_route("GET", "/").is_none());
    }

    #[test]
    fn segment_count_must_agree() {
        let table = table(vec![entry("/a/{x}/c", &["GET"], "app.h")]);

        assert!(table.match_route("GET", "/a/b/c").is_some());
        assert!(table.match_route("GET", "/a/b").is_none());
        assert!(table.match_route("GET", "/a/b/c/d").is_none());
    }

    #[test]
    fn literal_segments_must_agree() {
        let table = table(vec![entry("/a/{x}/c", &["GET"], "app.h")]);
        assert!(table.match_route("GET", "/a/b/d").is_none());
    }

    #[test]
    fn root_path_matches() {
        let table = table(vec![entry("/", &["GET"], "app.root")]);
        assert!(table.match_route("GET", "/").is_some());
        assert!(table.match_route("GET", "/x").is_none());
    }

    #[test]
    fn duplicate_path_method_rejected() {
        let result = RouteTable::from_manifest(vec![
            entry("/infer", &["POST", "GET"], "app.a"),
            entry("/infer", &["POST"], "app.b"),
        ]);

        assert!(matches!(
            result,
            Err(RouteError::DuplicateRoute { path, method })
                if path == "/infer" && method == "POST"
        ));
    }

    #[test]
    fn duplicate_within_one_entry_rejected() {
        let result = RouteTable::from_manifest(vec![entry("/x", &["GET", "get"], "app.x")]);
        assert!(matches!(result, Err(RouteError::DuplicateRoute { .. })));
    }

    #[test]
    fn same_path_different_methods_allowed() {
        let table = table(vec![
            entry("/items", &["GET"], "app.list"),
            entry("/items", &["POST"], "app.create"),
        ]);

        assert_eq!(
            table.match_route("GET", "/items").unwrap().entry.handler_id,
            "app.list"
        );
        assert_eq!(
            table.match_route("POST", "/items").unwrap().entry.handler_id,
            "app.create"
        );
    }

    #[test]
    fn relative_path_rejected() {
        let result = RouteTable::from_manifest(vec![entry("infer", &["POST"], "app.x")]);
        assert!(matches!(result, Err(RouteError::InvalidRoute { .. })));
    }

    #[test]
    fn empty_segment_rejected() {
        let result = RouteTable::from_manifest(vec![entry("/a//b", &["GET"], "app.x")]);
        assert!(matches!(result, Err(RouteError::InvalidRoute { .. })));
    }

    #[test]
    fn empty_methods_rejected() {
        let result = RouteTable::from_manifest(vec![entry("/a", &[], "app.x")]);
        assert!(matches!(result, Err(RouteError::InvalidRoute { .. })));
    }

    #[test]
    fn empty_param_name_rejected() {
        let result = RouteTable::from_manifest(vec![entry("/a/{}", &["GET"], "app.x")]);
        assert!(matches!(result, Err(RouteError::InvalidRoute { .. })));
    }

    #[test]
    fn manifest_order_decides_ambiguous_matches() {
        // A literal route listed first wins over a later param route.
        let table = table(vec![
            entry("/items/featured", &["GET"], "app.featured"),
            entry("/items/{id}", &["GET"], "app.get"),
        ]);

        assert_eq!(
            table
                .match_route("GET", "/items/featured")
                .unwrap()
                .entry
                .handler_id,
            "app.featured"
        );
        assert_eq!(
            table.match_route("GET", "/items/42").unwrap().entry.handler_id,
            "app.get"
        );
    }
}
