//! YAML-backed entity schemas and the room-index table.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Either a single byte offset or an inclusive `[lo, hi]` byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldIndex {
    Byte(usize),
    Range(usize, usize),
}

impl FieldIndex {
    /// The inclusive byte span this field occupies within its record.
    pub fn span(&self) -> (usize, usize) {
        match *self {
            FieldIndex::Byte(i) => (i, i),
            FieldIndex::Range(lo, hi) => (lo, hi),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub index: FieldIndex,
    #[serde(default, rename = "enum")]
    pub enum_values: Option<HashMap<u64, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSchema {
    pub name: String,
    #[serde(flatten)]
    pub fields: IndexMap<String, FieldSpec>,
}

impl ActorSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }
}

/// `entity_structures.yaml`: actor id -> schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySchemaTable(HashMap<u16, ActorSchema>);

impl EntitySchemaTable {
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse_yaml(&text)
    }

    pub fn parse_yaml(text: &str) -> Result<Self> {
        let table: HashMap<u16, ActorSchema> = serde_yaml::from_str(text)?;
        Ok(EntitySchemaTable(table))
    }

    pub fn get(&self, actor_id: u16) -> Result<&ActorSchema> {
        self.0.get(&actor_id).ok_or(EngineError::SchemaMissing { actor_id })
    }

    pub fn field(&self, actor_id: u16, field: &str) -> Result<&FieldSpec> {
        let schema = self.get(actor_id)?;
        schema
            .field(field)
            .ok_or_else(|| EngineError::SchemaFieldMissing {
                actor_id,
                field: field.to_string(),
            })
    }

    pub fn contains(&self, actor_id: u16) -> bool {
        self.0.contains_key(&actor_id)
    }
}

/// A single line of `room_indexes.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomIndexEntry {
    pub warp_index: u16,
    pub file_index: u16,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomIndex(Vec<RoomIndexEntry>);

impl RoomIndex {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let warp = parts
                .next()
                .ok_or_else(|| EngineError::InvariantViolated(format!("malformed room_indexes line: {}", line)))?;
            let file = parts
                .next()
                .ok_or_else(|| EngineError::InvariantViolated(format!("malformed room_indexes line: {}", line)))?;
            let name = parts.next().map(|s| s.to_string());

            let warp_index = parse_hex_u16(warp)?;
            let file_index = parse_hex_u16(file)?;
            entries.push(RoomIndexEntry {
                warp_index,
                file_index,
                name,
            });
        }
        Ok(RoomIndex(entries))
    }

    pub fn entries(&self) -> &[RoomIndexEntry] {
        &self.0
    }

    pub fn file_index_for(&self, warp_index: u16) -> Option<u16> {
        self.0.iter().find(|e| e.warp_index == warp_index).map(|e| e.file_index)
    }

    /// Reverse of [`RoomIndex::file_index_for`]: the externally-visible warp
    /// index a file-table index corresponds to.
    pub fn warp_index_for(&self, file_index: u16) -> Option<u16> {
        self.0.iter().find(|e| e.file_index == file_index).map(|e| e.warp_index)
    }
}

fn parse_hex_u16(s: &str) -> Result<u16> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(s, 16).map_err(|e| EngineError::InvariantViolated(format!("bad hex value '{}': {}", s, e)))
}

/// `actor_id -> file_index` extra dependency an actor implies whenever it
/// appears among a room's definitions (e.g. a shared graphics or sound
/// bank), beyond what the room's own misc `loading_files` fields name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorFileIndex(HashMap<u16, u16>);

impl ActorFileIndex {
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        Ok(ActorFileIndex(serde_yaml::from_str(&fs::read_to_string(path)?)?))
    }

    pub fn parse_yaml(text: &str) -> Result<Self> {
        Ok(ActorFileIndex(serde_yaml::from_str(text)?))
    }

    pub fn file_for_actor(&self, actor_id: u16) -> Option<u16> {
        self.0.get(&actor_id).copied()
    }
}

/// `warp_index -> extra file indices`, for dependencies that can't be
/// derived from either the misc overlay or an actor's own implied file —
/// e.g. a room-specific cutscene asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraDependencies(HashMap<u16, Vec<u16>>);

impl ExtraDependencies {
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        Ok(ExtraDependencies(serde_yaml::from_str(&fs::read_to_string(path)?)?))
    }

    pub fn parse_yaml(text: &str) -> Result<Self> {
        Ok(ExtraDependencies(serde_yaml::from_str(text)?))
    }

    pub fn for_room(&self, warp_index: u16) -> &[u16] {
        self.0.get(&warp_index).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Combines a room's misc-overlay loading files, its actors' implied files,
/// and any extra dependencies into the deduplicated list
/// [`crate::loading::write`] consumes. Order: base files first, then
/// actor-implied files in definition order, then extras; `loading::write`
/// itself drops duplicates and logs them.
pub fn dependencies_for_room(
    base_files: &[u16],
    actor_ids: &[u16],
    actor_file_index: &ActorFileIndex,
    extra: &ExtraDependencies,
    warp_index: u16,
) -> Vec<u16> {
    let mut deps: Vec<u16> = base_files.to_vec();
    for actor_id in actor_ids {
        if let Some(file) = actor_file_index.file_for_actor(*actor_id) {
            deps.push(file);
        }
    }
    deps.extend_from_slice(extra.for_room(warp_index));
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_parses_and_preserves_field_order() {
        let yaml = r#"
0x1A1:
  name: BronzeKey
  actor_id: { index: [0, 1] }
  door_design: { index: 5 }
  state: { index: 7, enum: { 0: Locked, 1: Unlocked } }
"#;
        let table = EntitySchemaTable::parse_yaml(yaml).unwrap();
        let schema = table.get(0x1A1).unwrap();
        assert_eq!(schema.name, "BronzeKey");
        let names: Vec<&str> = schema.fields.keys().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["actor_id", "door_design", "state"]);
        assert_eq!(schema.field("door_design").unwrap().index.span(), (5, 5));
    }

    #[test]
    fn missing_actor_is_schema_missing() {
        let table = EntitySchemaTable::default();
        let err = table.get(0xFFFF).unwrap_err();
        assert!(matches!(err, EngineError::SchemaMissing { actor_id: 0xFFFF }));
    }

    #[test]
    fn missing_field_is_schema_field_missing() {
        let yaml = "0x1: { name: Foo, bar: { index: 0 } }";
        let table = EntitySchemaTable::parse_yaml(yaml).unwrap();
        let err = table.field(0x1, "nope").unwrap_err();
        assert!(matches!(err, EngineError::SchemaFieldMissing { .. }));
    }

    #[test]
    fn room_index_parses_lines_and_skips_comments() {
        let text = "# comment\n0x335 0x1d3 Entrance\n0x336 0x195\n\n";
        let idx = RoomIndex::parse(text).unwrap();
        assert_eq!(idx.entries().len(), 2);
        assert_eq!(idx.file_index_for(0x335), Some(0x1d3));
        assert_eq!(idx.warp_index_for(0x1d3), Some(0x335));
        assert_eq!(idx.entries()[1].name, None);
    }

    #[test]
    fn dependencies_combine_base_actor_and_extra_files() {
        let actor_index = ActorFileIndex::parse_yaml("0x1a1: 0x50\n0x1a2: 0x51\n").unwrap();
        let extra = ExtraDependencies::parse_yaml("0x10: [0x99]\n").unwrap();
        let deps = dependencies_for_room(&[0x10, 0x11], &[0x1a1, 0x1a1, 0x1a2], &actor_index, &extra, 0x10);
        assert_eq!(deps, vec![0x10, 0x11, 0x50, 0x50, 0x51, 0x99]);
    }

    #[test]
    fn extra_dependencies_empty_for_unlisted_room() {
        let extra = ExtraDependencies::default();
        assert!(extra.for_room(0x5).is_empty());
    }
}
