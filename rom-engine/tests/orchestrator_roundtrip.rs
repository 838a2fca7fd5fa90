//! Exercises the full load -> mutate -> save -> reload pipeline against a
//! synthetic in-memory ROM, built directly from `Region::Source`'s
//! compiled-in address table rather than a real cartridge dump.

use byteorder::{BigEndian, ByteOrder};

use rom_engine::addr::Region;
use rom_engine::checksum;
use rom_engine::entity::{EntityDefinition, FieldValue};
use rom_engine::misc::category_for_warp_index;
use rom_engine::orchestrator::Orchestrator;
use rom_engine::room::{Room, RoomMetadata, SpawnGroup, SpawnGroupFooter, FOOTER_LEN, METADATA_LEN, UNGROUPED};
use rom_engine::schema::{EntitySchemaTable, RoomIndex};

const SCHEMA_YAML: &str = r#"
0x1A1:
  name: BronzeLock
  actor_id: { index: [0, 1] }
  lock_type: { index: 4 }
  door_design: { index: 5, enum: { 0: Wood, 4: Iron } }
"#;

const ROOM_UNTOUCHED: u16 = 0x335;
const ROOM_LOCK: u16 = 0x340;

fn grid_footer(gx: u16, gz: u16, gy: u16) -> SpawnGroupFooter {
    let mut bytes = [0u8; FOOTER_LEN];
    BigEndian::write_u16(&mut bytes[0..2], gx);
    BigEndian::write_u16(&mut bytes[2..4], gz);
    BigEndian::write_u16(&mut bytes[4..6], gy);
    SpawnGroupFooter { bytes }
}

fn blank_room() -> Room {
    Room {
        metadata: RoomMetadata { bytes: [0u8; METADATA_LEN] },
        definitions: Vec::new(),
        groups: vec![SpawnGroup { key: UNGROUPED, instances: Vec::new() }],
        footer: grid_footer(1, 1, 1),
    }
}

fn lock_room() -> Room {
    let def = EntityDefinition::from_bytes([0x01, 0xA1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    Room {
        metadata: RoomMetadata { bytes: [0u8; METADATA_LEN] },
        definitions: vec![def],
        groups: vec![SpawnGroup { key: UNGROUPED, instances: Vec::new() }],
        footer: grid_footer(1, 1, 1),
    }
}

/// Lays out root table + seven fixed-stride sections, sized to cover both
/// sample rooms' dense index within their category.
fn misc_buffer() -> Vec<u8> {
    const ROOT_ENTRY_STRIDE: usize = 24;
    const SECTION_STRIDES: [usize; 7] = [20, 8, 8, 4, 4, 2, 2];

    let mut max_index = 0usize;
    for warp in [ROOM_UNTOUCHED, ROOM_LOCK] {
        let (_category, index_in_category) = category_for_warp_index(warp);
        max_index = max_index.max(index_in_category as usize);
    }
    let records = max_index + 1;

    let mut buffer = vec![0u8; ROOT_ENTRY_STRIDE * 7];
    let mut cursor = buffer.len();
    for section in 0..7 {
        BigEndian::write_u32(&mut buffer[section * ROOT_ENTRY_STRIDE..section * ROOT_ENTRY_STRIDE + 4], cursor as u32);
        cursor += SECTION_STRIDES[section] * records;
        buffer.resize(cursor, 0);
    }
    buffer
}

/// Builds a synthetic `Region::Source` ROM: a real pointer table, a
/// main-code payload sized to cover the loading list/thunk regions, `misc`
/// as the room-data payload, and two room payloads. Every other file-table
/// entry is zero-length, sharing its neighbor's running offset -- ascending
/// order only requires non-decreasing offsets, not distinct ones.
fn build_fixture_rom_with_misc(misc: Vec<u8>) -> Vec<u8> {
    let cfg = Region::Source.config();
    let mut rom = vec![0u8; cfg.expected_data_end];
    let mut offsets = vec![0u32; cfg.file_count];
    let (split_lo, split_hi) = cfg.rom_split_indices;

    let mut cursor = cfg.pointer_table_offset + cfg.file_count * 4;

    let main_code_offset = cursor;
    let main_code_len = cfg.loading_thunk_region.1;
    cursor += main_code_len;
    offsets[cfg.main_code_file_index] = main_code_offset as u32;

    offsets[split_lo] = cursor as u32;

    for i in (split_lo + 1)..cfg.file_count {
        if i == split_hi {
            continue;
        }
        offsets[i] = cursor as u32;

        if i == cfg.room_data_file_index {
            rom[cursor..cursor + misc.len()].copy_from_slice(&misc);
            cursor += misc.len();
        } else if i == ROOM_UNTOUCHED as usize {
            let bytes = blank_room().serialize().unwrap();
            rom[cursor..cursor + bytes.len()].copy_from_slice(&bytes);
            cursor += bytes.len();
        } else if i == ROOM_LOCK as usize {
            let bytes = lock_room().serialize().unwrap();
            rom[cursor..cursor + bytes.len()].copy_from_slice(&bytes);
            cursor += bytes.len();
        }
    }

    offsets[split_hi] = cursor as u32;
    offsets[cfg.file_count - 1] = cfg.expected_data_end as u32;

    for (i, &offset) in offsets.iter().enumerate() {
        let off = cfg.pointer_table_offset + i * 4;
        BigEndian::write_u32(&mut rom[off..off + 4], offset);
    }

    rom
}

fn build_fixture_rom() -> Vec<u8> {
    build_fixture_rom_with_misc(misc_buffer())
}

#[test]
fn mutated_room_persists_and_untouched_room_survives_byte_for_byte() {
    let schema = EntitySchemaTable::parse_yaml(SCHEMA_YAML).unwrap();
    let orchestrator = Orchestrator::new(Region::Source);

    let mut rom = orchestrator.load(build_fixture_rom()).unwrap();
    assert_eq!(rom.rooms.len(), 2);

    rom.rooms
        .get_mut(&(ROOM_LOCK as usize))
        .unwrap()
        .definitions[0]
        .set_field(&schema, "lock_type", FieldValue::Number(9))
        .unwrap();
    rom.commit_room(ROOM_LOCK as usize).unwrap();

    orchestrator.save(&mut rom).unwrap();
    let saved_bytes = rom.file_table.rom_bytes().to_vec();

    let reloaded = orchestrator.load(saved_bytes).unwrap();

    let lock_def = &reloaded.rooms[&(ROOM_LOCK as usize)].definitions[0];
    assert_eq!(lock_def.actor_id(), 0x1A1);
    assert_eq!(lock_def.field(&schema, "lock_type").unwrap(), FieldValue::Number(9));

    let untouched = &reloaded.rooms[&(ROOM_UNTOUCHED as usize)];
    assert!(untouched.definitions.is_empty());
    assert_eq!(untouched.groups.len(), 1);
    assert_eq!(untouched.groups[0].key, UNGROUPED);
}

#[test]
fn save_writes_a_checksum_consistent_with_the_saved_bytes() {
    let orchestrator = Orchestrator::new(Region::Source);
    let mut rom = orchestrator.load(build_fixture_rom()).unwrap();

    orchestrator.save(&mut rom).unwrap();

    let bytes = rom.file_table.rom_bytes();
    let written = BigEndian::read_u64(&bytes[0x10..0x18]);
    assert_eq!(written, checksum::compute(bytes));
}

#[test]
fn resaving_without_any_mutation_leaves_room_contents_unchanged() {
    let schema = EntitySchemaTable::parse_yaml(SCHEMA_YAML).unwrap();
    let orchestrator = Orchestrator::new(Region::Source);
    let mut rom = orchestrator.load(build_fixture_rom()).unwrap();

    orchestrator.save(&mut rom).unwrap();
    let reloaded = orchestrator.load(rom.file_table.rom_bytes().to_vec()).unwrap();

    let lock_def = &reloaded.rooms[&(ROOM_LOCK as usize)].definitions[0];
    assert_eq!(lock_def.field(&schema, "lock_type").unwrap(), FieldValue::Number(0));

    let untouched = &reloaded.rooms[&(ROOM_UNTOUCHED as usize)];
    assert!(untouched.definitions.is_empty());
}

/// `ROOM_LOCK`'s warp index is distinct from its file-table index and lands
/// in a different misc-overlay category, so a save that reads the misc
/// overlay by file index instead of the `room_indexes.txt`-mapped warp index
/// would pull the wrong loading-files record into this room's dependency
/// list.
#[test]
fn save_reads_misc_loading_files_by_warp_index_not_file_index() {
    const ROOT_ENTRY_STRIDE: usize = 24;
    const SECTION_STRIDES: [usize; 7] = [20, 8, 8, 4, 4, 2, 2];
    const LOADING_FILES_SECTION: usize = 2;
    const ROOM_LOCK_WARP: u16 = 0x150;

    let (lock_category, lock_index) = category_for_warp_index(ROOM_LOCK_WARP);
    let (file_category, file_index_in_category) = category_for_warp_index(ROOM_LOCK);
    assert_ne!((lock_category, lock_index), (file_category, file_index_in_category));
    let (_, untouched_index) = category_for_warp_index(ROOM_UNTOUCHED);

    let records = lock_index.max(file_index_in_category).max(untouched_index) as usize + 1;
    let mut misc = vec![0u8; ROOT_ENTRY_STRIDE * 7];
    let mut cursor = misc.len();
    for section in 0..7 {
        BigEndian::write_u32(&mut misc[section * ROOT_ENTRY_STRIDE..section * ROOT_ENTRY_STRIDE + 4], cursor as u32);
        cursor += SECTION_STRIDES[section] * records;
        misc.resize(cursor, 0);
    }

    let section_ptr =
        BigEndian::read_u32(&misc[LOADING_FILES_SECTION * ROOT_ENTRY_STRIDE..LOADING_FILES_SECTION * ROOT_ENTRY_STRIDE + 4])
            as usize;
    let stride = SECTION_STRIDES[LOADING_FILES_SECTION];

    let sentinel: u16 = 0xABCD;
    let correct_record = section_ptr + lock_index as usize * stride;
    BigEndian::write_u16(&mut misc[correct_record..correct_record + 2], sentinel);

    let poison: u16 = 0x9999;
    let wrong_record = section_ptr + file_index_in_category as usize * stride;
    BigEndian::write_u16(&mut misc[wrong_record..wrong_record + 2], poison);

    let room_index = RoomIndex::parse(&format!("{:#x} {:#x}\n", ROOM_LOCK_WARP, ROOM_LOCK)).unwrap();
    let orchestrator = Orchestrator::new(Region::Source).with_room_index(room_index);
    let mut rom = orchestrator.load(build_fixture_rom_with_misc(misc)).unwrap();

    orchestrator.save(&mut rom).unwrap();

    let cfg = Region::Source.config();
    let main_code = rom.file_table.decompressed(cfg.main_code_file_index).unwrap();
    let (list_start, list_end) = cfg.loading_list_region;
    let list_bytes = &main_code[list_start..list_end];

    let contains_u16 = |buf: &[u8], v: u16| {
        let needle = [(v >> 8) as u8, (v & 0xff) as u8];
        buf.windows(2).any(|w| w == needle)
    };
    assert!(
        contains_u16(list_bytes, sentinel),
        "loading list should include the record addressed by the true warp index"
    );
    assert!(
        !contains_u16(list_bytes, poison),
        "loading list must not include the record a file-index lookup would have hit instead"
    );
}
