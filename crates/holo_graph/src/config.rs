//! Runtime knobs for the statistics path, loaded from `HOLO_GRAPH_STATS_*`.

use anyhow::{Context, Result};

const ENV_MAX_INFLIGHT_PARTITIONS: &str = "HOLO_GRAPH_STATS_MAX_INFLIGHT_PARTITIONS";
const ENV_MAX_EDGES_PER_VERTEX: &str = "HOLO_GRAPH_STATS_MAX_EDGES_PER_VERTEX";
const ENV_SCAN_PAGE_HINT: &str = "HOLO_GRAPH_STATS_SCAN_PAGE_HINT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsConfig {
    /// Upper bound on partition units running at the same time.
    pub max_inflight_partitions: usize,
    /// Edges folded per vertex before the rest are ignored; 0 means unlimited.
    pub max_edges_per_vertex: usize,
    /// Initial capacity for per-partition row buffers.
    pub scan_page_hint: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            max_inflight_partitions: 64,
            max_edges_per_vertex: 0,
            scan_page_hint: 1024,
        }
    }
}

impl StatsConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let max_inflight_partitions = parse_usize(
            ENV_MAX_INFLIGHT_PARTITIONS,
            lookup(ENV_MAX_INFLIGHT_PARTITIONS),
            defaults.max_inflight_partitions,
        )?
        .max(1);
        let max_edges_per_vertex = parse_usize(
            ENV_MAX_EDGES_PER_VERTEX,
            lookup(ENV_MAX_EDGES_PER_VERTEX),
            defaults.max_edges_per_vertex,
        )?;
        let scan_page_hint = parse_usize(
            ENV_SCAN_PAGE_HINT,
            lookup(ENV_SCAN_PAGE_HINT),
            defaults.scan_page_hint,
        )?;
        Ok(Self {
            max_inflight_partitions,
            max_edges_per_vertex,
            scan_page_hint,
        })
    }

    /// Edge cap as an iterator bound.
    pub(crate) fn edge_limit(&self) -> usize {
        if self.max_edges_per_vertex == 0 {
            usize::MAX
        } else {
            self.max_edges_per_vertex
        }
    }
}

fn parse_usize(name: &str, value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid {name} value: {raw}")),
        None => Ok(default_value),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_variables_use_defaults() {
        let config = StatsConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, StatsConfig::default());
        assert_eq!(config.edge_limit(), usize::MAX);
    }

    #[test]
    fn overrides_are_parsed_and_clamped() {
        let config = StatsConfig::from_lookup(lookup_from(&[
            (ENV_MAX_INFLIGHT_PARTITIONS, "0"),
            (ENV_MAX_EDGES_PER_VERTEX, "5"),
            (ENV_SCAN_PAGE_HINT, " 16 "),
        ]))
        .unwrap();
        assert_eq!(config.max_inflight_partitions, 1);
        assert_eq!(config.edge_limit(), 5);
        assert_eq!(config.scan_page_hint, 16);
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let err = StatsConfig::from_lookup(lookup_from(&[(ENV_SCAN_PAGE_HINT, "lots")]))
            .expect_err("non-numeric hint");
        assert!(err.to_string().contains(ENV_SCAN_PAGE_HINT));
    }
}
