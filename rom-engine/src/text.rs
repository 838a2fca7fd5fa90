//! Line-based text dump/import of entity data (spec.md §6).

use crate::entity::{EntityDefinition, EntityInstance, FieldValue, DEFINITION_LEN, INSTANCE_LEN};
use crate::error::{EngineError, Result};
use crate::room::{Room, RoomMetadata, SpawnGroup, SpawnGroupFooter, FOOTER_LEN, METADATA_LEN};
use crate::schema::EntitySchemaTable;

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    text.split_whitespace()
        .map(|tok| u8::from_str_radix(tok, 16).map_err(|e| EngineError::InvariantViolated(format!("bad hex byte '{}': {}", tok, e))))
        .collect()
}

fn parse_hex_u64_list(text: &str) -> Result<Vec<u64>> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|tok| u64::from_str_radix(tok, 16).map_err(|e| EngineError::InvariantViolated(format!("bad hex value '{}': {}", tok, e))))
        .collect()
}

fn parse_hex_u16_list(text: &str) -> Result<Vec<u16>> {
    Ok(parse_hex_u64_list(text)?.into_iter().map(|v| v as u16).collect())
}

#[derive(Debug, Clone)]
pub struct ParsedRoomText {
    pub warp_index: u16,
    pub meta: Vec<(String, u64)>,
    pub misc: Vec<(String, Vec<u64>)>,
    pub load: Vec<u16>,
    pub room: Room,
}

enum PendingRecord {
    None,
    Definition(usize),
    Instance(usize, usize),
}

/// Parses a room dump produced by [`dump_room`]. Whitespace- and
/// comment-tolerant; `@ field: value` lines attach to the most recently
/// read definition or instance record and are applied through `schema`.
pub fn parse_room(text: &str, schema: &EntitySchemaTable) -> Result<ParsedRoomText> {
    let mut warp_index = None;
    let mut meta = Vec::new();
    let mut misc = Vec::new();
    let mut load = Vec::new();
    let mut definitions: Vec<EntityDefinition> = Vec::new();
    let mut groups: Vec<SpawnGroup> = Vec::new();
    let mut footer_bytes: Vec<u8> = Vec::new();
    let mut pending = PendingRecord::None;

    for raw_line in text.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("ROOM ") {
            let hex = rest.trim_end_matches(':').trim();
            warp_index = Some(u16::from_str_radix(hex, 16).map_err(|e| EngineError::InvariantViolated(format!("bad warp index '{}': {}", hex, e)))?);
            continue;
        }
        if let Some(rest) = line.strip_prefix("!meta ") {
            let (field, value) = split_once_ws(rest)?;
            let value = u64::from_str_radix(value, 16).map_err(|e| EngineError::InvariantViolated(format!("bad !meta value: {}", e)))?;
            meta.push((field.to_string(), value));
            continue;
        }
        if let Some(rest) = line.strip_prefix("!misc ") {
            let (field, rest) = split_once_ws(rest)?;
            misc.push((field.to_string(), parse_hex_u64_list(rest)?));
            continue;
        }
        if let Some(rest) = line.strip_prefix("!load ") {
            load = parse_hex_u16_list(rest)?;
            continue;
        }
        if let Some(rest) = line.strip_prefix("+GROUP") {
            let key = parse_group_key(rest.trim())?;
            groups.push(SpawnGroup { key, instances: Vec::new() });
            pending = PendingRecord::None;
            continue;
        }
        if let Some(rest) = line.strip_prefix('@') {
            let (field, value) = split_once_colon(rest.trim())?;
            apply_override(&mut definitions, &mut groups, &pending, schema, field.trim(), value.trim())?;
            continue;
        }
        if let Some(rest) = line.strip_prefix('+') {
            let (_idx, hex) = split_once_colon(rest)?;
            let bytes = parse_hex_bytes(hex)?;
            if bytes.len() != INSTANCE_LEN {
                return Err(EngineError::InvariantViolated(format!("instance record has {} bytes, expected {}", bytes.len(), INSTANCE_LEN)));
            }
            let mut arr = [0u8; INSTANCE_LEN];
            arr.copy_from_slice(&bytes);
            if groups.is_empty() {
                groups.push(SpawnGroup {
                    key: crate::room::UNGROUPED,
                    instances: Vec::new(),
                });
            }
            let gi = groups.len() - 1;
            groups[gi].instances.push(EntityInstance::from_bytes(arr));
            pending = PendingRecord::Instance(gi, groups[gi].instances.len() - 1);
            continue;
        }
        if let Some(colon) = line.find(':') {
            let (idx_part, hex) = line.split_at(colon);
            if idx_part.chars().all(|c| c.is_ascii_hexdigit()) && !idx_part.is_empty() {
                let bytes = parse_hex_bytes(&hex[1..])?;
                if bytes.len() == DEFINITION_LEN {
                    let mut arr = [0u8; DEFINITION_LEN];
                    arr.copy_from_slice(&bytes);
                    definitions.push(EntityDefinition::from_bytes(arr));
                    pending = PendingRecord::Definition(definitions.len() - 1);
                    continue;
                }
            }
        }

        // A bare hex-only line with no prefix: footer bytes.
        let bytes = parse_hex_bytes(line)?;
        footer_bytes.extend(bytes);
    }

    let warp_index = warp_index.ok_or_else(|| EngineError::InvariantViolated("room dump missing ROOM header".into()))?;
    if footer_bytes.len() != FOOTER_LEN {
        return Err(EngineError::InvariantViolated(format!(
            "footer has {} bytes, expected {}",
            footer_bytes.len(),
            FOOTER_LEN
        )));
    }
    let mut footer_arr = [0u8; FOOTER_LEN];
    footer_arr.copy_from_slice(&footer_bytes);

    let room = Room {
        metadata: RoomMetadata { bytes: [0u8; METADATA_LEN] },
        definitions,
        groups,
        footer: SpawnGroupFooter { bytes: footer_arr },
    };

    Ok(ParsedRoomText {
        warp_index,
        meta,
        misc,
        load,
        room,
    })
}

fn split_once_ws(s: &str) -> Result<(&str, &str)> {
    let s = s.trim();
    let i = s
        .find(char::is_whitespace)
        .ok_or_else(|| EngineError::InvariantViolated(format!("expected '<field> <value>' in '{}'", s)))?;
    Ok((&s[..i], s[i..].trim()))
}

fn split_once_colon(s: &str) -> Result<(&str, &str)> {
    let i = s
        .find(':')
        .ok_or_else(|| EngineError::InvariantViolated(format!("expected ':' in '{}'", s)))?;
    Ok((&s[..i], &s[i + 1..]))
}

fn parse_group_key(s: &str) -> Result<(i32, i32, i32)> {
    let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
    if parts.len() != 3 {
        return Err(EngineError::InvariantViolated(format!("expected 'x,z,y' group key, got '{}'", s)));
    }
    let parse = |p: &str| -> Result<i32> { p.parse().map_err(|e| EngineError::InvariantViolated(format!("bad group coordinate '{}': {}", p, e))) };
    Ok((parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
}

fn apply_override(
    definitions: &mut [EntityDefinition],
    groups: &mut [SpawnGroup],
    pending: &PendingRecord,
    schema: &EntitySchemaTable,
    field: &str,
    value: &str,
) -> Result<()> {
    let fv = if let Ok(n) = u64::from_str_radix(value, 16) {
        FieldValue::Number(n)
    } else {
        FieldValue::Label(value.to_string())
    };
    match pending {
        PendingRecord::Definition(i) => definitions[*i].set_field(schema, field, fv),
        PendingRecord::Instance(_, _) => {
            // The instance schema is fixed (position/rotation/definition
            // index), not actor-schema-driven; overrides target it
            // directly rather than through `EntitySchemaTable`.
            Err(EngineError::InvariantViolated(format!(
                "instance field overrides are not schema-driven: '{}'",
                field
            )))
        }
        PendingRecord::None => Err(EngineError::InvariantViolated("'@' override with no preceding record".into())),
    }
}

/// Emits the inverse of [`parse_room`].
pub fn dump_room(
    warp_index: u16,
    room: &Room,
    schema: &EntitySchemaTable,
    meta: &[(String, u64)],
    misc: &[(String, Vec<u64>)],
    load: &[u16],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("ROOM {:03x}:\n", warp_index));

    for (field, value) in meta {
        out.push_str(&format!("  !meta {} {:x}\n", field, value));
    }
    for (field, values) in misc {
        let joined: Vec<String> = values.iter().map(|v| format!("{:x}", v)).collect();
        out.push_str(&format!("  !misc {} {}\n", field, joined.join(",")));
    }
    if !load.is_empty() {
        let joined: Vec<String> = load.iter().map(|v| format!("{:x}", v)).collect();
        out.push_str(&format!("  !load {}\n", joined.join(" ")));
    }

    out.push_str("  # DEFINITIONS\n");
    for (i, def) in room.definitions.iter().enumerate() {
        out.push_str(&format!("  {}: {}\n", i, hex_line(&def.bytes)));
        if let Ok(s) = schema.get(def.actor_id()) {
            for name in s.fields.keys() {
                if let Ok(value) = def.field(schema, name) {
                    out.push_str(&format!("    @ {}: {}\n", name, format_field(&value)));
                }
            }
        }
    }

    out.push_str("  # INSTANCES\n");
    for group in &room.groups {
        out.push_str(&format!("  +GROUP {},{},{}\n", group.key.0, group.key.1, group.key.2));
        for (i, inst) in group.instances.iter().enumerate() {
            out.push_str(&format!("  +{}: {}\n", i, hex_line(&inst.bytes)));
        }
    }

    out.push_str("  # FOOTER\n");
    out.push_str(&format!("  {}\n", hex_line(&room.footer.bytes)));

    out
}

fn hex_line(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

fn format_field(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(n) => format!("{:x}", n),
        FieldValue::Label(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> EntitySchemaTable {
        EntitySchemaTable::parse_yaml(
            r#"
0x1a1:
  name: Key
  actor_id: { index: [0, 1] }
  key_id: { index: 4 }
"#,
        )
        .unwrap()
    }

    #[test]
    fn dump_then_parse_roundtrips_definitions_and_instances() {
        let schema = schema();
        let def = EntityDefinition::from_bytes([0x01, 0xA1, 0, 0, 0x07, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let inst = EntityInstance::new(1, 2, 3, 0, 0, 0, 0);
        let room = Room {
            metadata: RoomMetadata { bytes: [0u8; METADATA_LEN] },
            definitions: vec![def],
            groups: vec![SpawnGroup {
                key: crate::room::UNGROUPED,
                instances: vec![inst],
            }],
            footer: SpawnGroupFooter { bytes: [0u8; FOOTER_LEN] },
        };

        let text = dump_room(0x42, &room, &schema, &[("bgm".to_string(), 3)], &[], &[1, 2]);
        let parsed = parse_room(&text, &schema).unwrap();

        assert_eq!(parsed.warp_index, 0x42);
        assert_eq!(parsed.meta, vec![("bgm".to_string(), 3)]);
        assert_eq!(parsed.load, vec![1, 2]);
        assert_eq!(parsed.room.definitions.len(), 1);
        assert_eq!(parsed.room.definitions[0].bytes, room.definitions[0].bytes);
        assert_eq!(parsed.room.groups[0].instances[0].bytes, room.groups[0].instances[0].bytes);
    }

    #[test]
    fn field_override_updates_definition_bytes() {
        let schema = schema();
        let text = "ROOM 1:\n  # DEFINITIONS\n  0: 01 a1 00 00 00 00 00 00 00 00 00 00 00 00 00 00\n    @ key_id: 9\n  # INSTANCES\n  # FOOTER\n  00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00\n";
        let parsed = parse_room(text, &schema).unwrap();
        assert_eq!(parsed.room.definitions[0].bytes[4], 9);
    }

    #[test]
    fn missing_room_header_is_an_error() {
        let schema = schema();
        assert!(parse_room("  # DEFINITIONS\n", &schema).is_err());
    }
}
