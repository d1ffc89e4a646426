//! Persisted graph format.
//!
//! A graph is stored as one self-describing JSON document; every node and
//! edge record carries a stable `"type"` tag (and attribute values a
//! `"codec"` tag), so reloading dispatches on plain string tags instead of
//! reflective type lookup. The memoized information matrices are not
//! stored; they are recomputed on first use after loading.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::core::error::Result;
use crate::core::graph::Graph;

/// Serializes the graph as JSON.
pub fn to_json_string(graph: &Graph) -> Result<String> {
    Ok(serde_json::to_string_pretty(graph)?)
}

/// Parses a graph from JSON and validates its structure (edge endpoints in
/// range with the dimensions their edges expect, covariances invertible).
pub fn from_json_str(json: &str) -> Result<Graph> {
    let graph: Graph = serde_json::from_str(json)?;
    graph.validate()?;
    Ok(graph)
}

pub fn save_json<P: AsRef<Path>>(graph: &Graph, path: P) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), graph)?;
    Ok(())
}

pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Graph> {
    let file = File::open(path)?;
    let graph: Graph = serde_json::from_reader(BufReader::new(file))?;
    graph.validate()?;
    Ok(graph)
}
