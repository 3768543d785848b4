//! Static handler-to-lane routing.

use std::collections::{BTreeSet, HashMap};

use crate::job::{handlers, lanes};

/// Handler name to lane mapping, fixed at startup.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::empty()
            .with_route(handlers::PROCESS_DOCUMENT, lanes::DOCUMENT_PROCESSING)
            .with_route(handlers::GENERATE_SUMMARY, lanes::DOCUMENT_PROCESSING)
            .with_route(handlers::CLEANUP, lanes::MAINTENANCE)
    }
}

impl RouteTable {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Add or replace a route.
    pub fn with_route(mut self, handler: impl Into<String>, lane: impl Into<String>) -> Self {
        self.routes.insert(handler.into(), lane.into());
        self
    }

    pub fn lane_for(&self, handler: &str) -> Option<&str> {
        self.routes.get(handler).map(String::as_str)
    }

    /// Distinct lanes, sorted.
    pub fn lanes(&self) -> Vec<String> {
        self.routes
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
