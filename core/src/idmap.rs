//! User/group identity mapping between container-internal and host IDs.

use serde::{Deserialize, Serialize};

use crate::error::{BerthError, Result};

/// A single contiguous ID mapping range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    /// First ID inside the container.
    pub container_id: u32,
    /// First ID on the host.
    pub host_id: u32,
    /// Number of IDs in the range.
    pub size: u32,
}

/// UID and GID mapping tables, derived once from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMappings {
    pub uids: Vec<IdMap>,
    pub gids: Vec<IdMap>,
}

impl IdMappings {
    /// Parse UID and GID mapping specs.
    ///
    /// Each spec is a comma-separated list of `container:host:size` triples.
    /// An empty spec on either side disables identity remapping entirely and
    /// yields `None`.
    pub fn from_spec(uid_spec: &str, gid_spec: &str) -> Result<Option<IdMappings>> {
        if uid_spec.is_empty() || gid_spec.is_empty() {
            return Ok(None);
        }

        Ok(Some(IdMappings {
            uids: parse_id_map(uid_spec)?,
            gids: parse_id_map(gid_spec)?,
        }))
    }
}

/// Parse a comma-separated list of `container:host:size` triples.
fn parse_id_map(spec: &str) -> Result<Vec<IdMap>> {
    spec.split(',').map(parse_triple).collect()
}

fn parse_triple(entry: &str) -> Result<IdMap> {
    let fields: Vec<&str> = entry.splitn(3, ':').collect();
    if fields.len() < 3 {
        return Err(BerthError::IdMapError {
            token: entry.to_string(),
            message: "mapping requires 3 fields".to_string(),
        });
    }

    let parse_field = |field: &str| -> Result<u32> {
        field.parse::<u32>().map_err(|e| BerthError::IdMapError {
            token: field.to_string(),
            message: e.to_string(),
        })
    };

    Ok(IdMap {
        container_id: parse_field(fields[0])?,
        host_id: parse_field(fields[1])?,
        size: parse_field(fields[2])?,
    })
}
