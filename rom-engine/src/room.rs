//! Room payload parsing and serialization: metadata header, entity
//! definitions/instances grouped by spawn group, and the spawn-group grid.

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;

use crate::entity::{EntityDefinition, EntityInstance, DEFINITION_LEN, INSTANCE_LEN};
use crate::error::{EngineError, Result};

pub const METADATA_LEN: usize = 28;
pub const FOOTER_LEN: usize = 28;

/// The synthetic spawn-group key for instances with no grid cell.
pub const UNGROUPED: (i32, i32, i32) = (-1, -1, -1);

#[derive(Debug, Clone)]
pub struct RoomMetadata {
    pub bytes: [u8; METADATA_LEN],
}

impl RoomMetadata {
    fn instance_offset(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[0..2])
    }

    fn footer_offset(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[2..4])
    }

    fn ending_offset(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[4..6])
    }

    fn file_index_self(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[6..8])
    }

    pub fn loading_thunk_address(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[0x18..0x1c])
    }

    pub fn set_loading_thunk_address(&mut self, addr: u32) {
        BigEndian::write_u32(&mut self.bytes[0x18..0x1c], addr);
    }
}

#[derive(Debug, Clone)]
pub struct SpawnGroupFooter {
    pub bytes: [u8; FOOTER_LEN],
}

impl SpawnGroupFooter {
    fn groups_x(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[0..2])
    }
    fn groups_z(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[2..4])
    }
    fn groups_y(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[4..6])
    }
}

#[derive(Debug, Clone)]
pub struct SpawnGroup {
    pub key: (i32, i32, i32),
    pub instances: Vec<EntityInstance>,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub metadata: RoomMetadata,
    pub definitions: Vec<EntityDefinition>,
    pub groups: Vec<SpawnGroup>,
    pub footer: SpawnGroupFooter,
}

impl Room {
    /// Parses a room payload per the metadata/definitions/instances/footer/
    /// spawn-group-grid layout.
    pub fn parse(data: &[u8]) -> Result<Room> {
        if data.len() < METADATA_LEN {
            return Err(EngineError::InvariantViolated("room payload shorter than metadata header".into()));
        }
        let mut meta_bytes = [0u8; METADATA_LEN];
        meta_bytes.copy_from_slice(&data[0..METADATA_LEN]);
        let metadata = RoomMetadata { bytes: meta_bytes };

        let instance_offset = metadata.instance_offset() as usize;
        let footer_offset = metadata.footer_offset() as usize;
        let ending_offset = metadata.ending_offset() as usize;

        if ending_offset != footer_offset + FOOTER_LEN {
            return Err(EngineError::InvariantViolated(format!(
                "ending_offset {:#x} != footer_offset {:#x} + {:#x}",
                ending_offset, footer_offset, FOOTER_LEN
            )));
        }
        if instance_offset % DEFINITION_LEN != 0 {
            return Err(EngineError::InvariantViolated(format!(
                "instance_offset {:#x} is not a multiple of {:#x}",
                instance_offset, DEFINITION_LEN
            )));
        }

        // instance_offset/footer_offset/ending_offset are relative to the end
        // of the metadata header (serialize() computes them that way), not
        // to the start of the payload.
        let definitions = Self::parse_definitions(&data[METADATA_LEN..METADATA_LEN + instance_offset])?;

        let mut footer_bytes = [0u8; FOOTER_LEN];
        footer_bytes.copy_from_slice(&data[METADATA_LEN + footer_offset..METADATA_LEN + footer_offset + FOOTER_LEN]);
        let footer = SpawnGroupFooter { bytes: footer_bytes };

        let (gx, gz, gy) = (footer.groups_x() as usize, footer.groups_z() as usize, footer.groups_y() as usize);
        let cell_count = gx * gz * gy;
        let grid_start = METADATA_LEN + ending_offset;
        let grid_end = grid_start + cell_count * 4;
        if grid_end > data.len() {
            return Err(EngineError::InvariantViolated("spawn-group grid runs past end of payload".into()));
        }

        let instance_segment = &data[METADATA_LEN + instance_offset..METADATA_LEN + footer_offset];

        let mut groups = Vec::new();
        let mut claimed_offsets: HashMap<u16, (i32, i32, i32)> = HashMap::new();

        for cell in 0..cell_count {
            let cell_bytes = &data[grid_start + cell * 4..grid_start + cell * 4 + 4];
            let marker = BigEndian::read_u16(&cell_bytes[0..2]);
            let raw_offset = BigEndian::read_u16(&cell_bytes[2..4]);
            if marker == 0 && raw_offset == 0 {
                continue;
            }
            let x = (cell / (gz * gy)) as i32;
            let z = ((cell / gy) % gz) as i32;
            let y = (cell % gy) as i32;

            let group_offset = raw_offset
                .checked_sub(instance_offset as u16)
                .ok_or_else(|| EngineError::InvariantViolated("spawn-group cell offset precedes instance segment".into()))?;
            claimed_offsets.insert(group_offset, (x, z, y));
        }

        // Walk the instance segment linearly so groups come out in on-disk
        // order, which `serialize` must reproduce byte-for-byte.
        let mut cursor = 0usize;
        let mut saw_ungrouped = false;
        while cursor < instance_segment.len() {
            let start_offset = cursor as u16;
            let mut list = Vec::new();
            loop {
                if cursor + INSTANCE_LEN > instance_segment.len() {
                    return Err(EngineError::InvariantViolated("instance array missing zero terminator".into()));
                }
                let mut bytes = [0u8; INSTANCE_LEN];
                bytes.copy_from_slice(&instance_segment[cursor..cursor + INSTANCE_LEN]);
                cursor += INSTANCE_LEN;
                let inst = EntityInstance::from_bytes(bytes);
                if inst.is_all_zero() {
                    break;
                }
                if inst.marker() != 0x0800 {
                    return Err(EngineError::InvariantViolated(format!(
                        "instance marker {:#06x} at segment offset {:#x} is not 0x0800",
                        inst.marker(),
                        start_offset
                    )));
                }
                list.push(inst);
            }
            if let Some(key) = claimed_offsets.get(&start_offset) {
                groups.push(SpawnGroup { key: *key, instances: list });
            } else if start_offset == 0 {
                saw_ungrouped = true;
                groups.push(SpawnGroup {
                    key: UNGROUPED,
                    instances: list,
                });
            } else {
                return Err(EngineError::InvariantViolated(format!(
                    "instance array at segment offset {:#x} has no referencing spawn-group cell",
                    start_offset
                )));
            }
        }
        if !saw_ungrouped {
            groups.push(SpawnGroup {
                key: UNGROUPED,
                instances: Vec::new(),
            });
        }

        Ok(Room {
            metadata,
            definitions,
            groups,
            footer,
        })
    }

    fn parse_definitions(data: &[u8]) -> Result<Vec<EntityDefinition>> {
        let n = data.len() / DEFINITION_LEN;
        let mut defs = Vec::with_capacity(n);
        for i in 0..n {
            let mut bytes = [0u8; DEFINITION_LEN];
            bytes.copy_from_slice(&data[i * DEFINITION_LEN..(i + 1) * DEFINITION_LEN]);
            defs.push(EntityDefinition::from_bytes(bytes));
        }
        Ok(defs)
    }

    /// Serializes the inverse of [`Room::parse`], enforcing the invariants
    /// spec.md §4.4 names fatal: dense definition indices, valid instance
    /// markers, and every non-undefined `definition_index` referencing an
    /// existing definition.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        for (i, group) in self.groups.iter().enumerate() {
            for inst in &group.instances {
                if let Some(idx) = inst.definition_index() {
                    if idx as usize >= self.definitions.len() {
                        return Err(EngineError::InvariantViolated(format!(
                            "instance in group {} references out-of-range definition {}",
                            i, idx
                        )));
                    }
                }
                if inst.marker() != 0x0800 {
                    return Err(EngineError::InvariantViolated("instance marker must be 0x0800 before serialization".into()));
                }
            }
        }

        let mut out = vec![0u8; METADATA_LEN];

        let instance_offset = self.definitions.len() * DEFINITION_LEN;
        for def in &self.definitions {
            out.extend_from_slice(&def.bytes);
        }
        debug_assert_eq!(out.len(), METADATA_LEN + instance_offset);

        let mut group_offsets: Vec<(( i32, i32, i32), u16)> = Vec::new();
        for group in &self.groups {
            let offset_within_instances = (out.len() - METADATA_LEN - instance_offset) as u16;
            group_offsets.push((group.key, offset_within_instances));
            for inst in &group.instances {
                out.extend_from_slice(&inst.bytes);
            }
            out.extend_from_slice(&[0u8; INSTANCE_LEN]);
        }

        let footer_offset = out.len() - METADATA_LEN;
        out.extend_from_slice(&self.footer.bytes);
        let ending_offset = out.len() - METADATA_LEN;

        let (gx, gz, gy) = (
            self.footer.groups_x() as usize,
            self.footer.groups_z() as usize,
            self.footer.groups_y() as usize,
        );
        let mut grid = vec![0u8; gx * gz * gy * 4];
        for (key, group_offset) in &group_offsets {
            if *key == UNGROUPED {
                continue;
            }
            let (x, z, y) = *key;
            if x < 0 || z < 0 || y < 0 {
                continue;
            }
            let cell = (x as usize) * gz * gy + (z as usize) * gy + (y as usize);
            if cell * 4 + 4 > grid.len() {
                return Err(EngineError::InvariantViolated("spawn group key outside grid dimensions".into()));
            }
            let abs_offset = *group_offset + instance_offset as u16;
            BigEndian::write_u16(&mut grid[cell * 4..cell * 4 + 2], 0x0800);
            BigEndian::write_u16(&mut grid[cell * 4 + 2..cell * 4 + 4], abs_offset);
        }
        out.extend_from_slice(&grid);

        let mut meta = self.metadata.bytes;
        BigEndian::write_u16(&mut meta[0..2], instance_offset as u16);
        BigEndian::write_u16(&mut meta[2..4], footer_offset as u16);
        BigEndian::write_u16(&mut meta[4..6], ending_offset as u16);
        out[0..METADATA_LEN].copy_from_slice(&meta);

        Ok(out)
    }
}
