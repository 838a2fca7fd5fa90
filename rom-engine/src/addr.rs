//! Per-region fixed addresses and constants.
//!
//! Two regions share the engine: the content differs only in these numbers
//! and in the identifiers of three entities that got renumbered between
//! releases (`remapped_node_ids`). None of this is runtime configuration in
//! the usual sense — it is a fact about a specific ROM image, baked in at
//! compile time, the same way the teacher's `rommap` module hardcodes SNES
//! bank/offset constants.

/// Which release of the cartridge a ROM image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Source,
    Localized,
}

/// A compiled-in table of addresses and constants for one [`Region`].
#[derive(Debug, Clone, Copy)]
pub struct RegionConfig {
    /// Absolute byte offset of the file-pointer table.
    pub pointer_table_offset: usize,
    /// Number of entries in the file-pointer table, rom-split sentinels
    /// included.
    pub file_count: usize,
    /// File-table indices of the two rom-split sentinels, (low, high).
    pub rom_split_indices: (usize, usize),
    /// [start, end) of the room-index range within the file table.
    pub room_index_range: (usize, usize),
    /// Inclusive index range pinned to their original on-disk location via
    /// `force_allocate`.
    pub force_old_pointer_range: (usize, usize),
    /// First free byte and one-past-last free byte of the ROM image at
    /// load, i.e. the boundary between old-ROM and new-ROM regions.
    pub free_space_start: usize,
    pub free_space_end: usize,
    /// Expected total size of the ROM image.
    pub expected_data_end: usize,
    /// Added to a raw file offset to get the virtual address pointers
    /// inside payloads are expressed in (before the compressed-flag high
    /// bit is applied).
    pub ram_bias: u32,
    /// Masked against a loading-bank byte before indexing `LoadingFiles`.
    pub loading_bank_mask: u8,
    /// File-table index of the never-relocated main code payload that
    /// hosts the loading lists/thunks (§4.7).
    pub main_code_file_index: usize,
    /// File-table index of the distinguished room-data payload that hosts
    /// the misc overlay (§4.6) and whose recompressed form may never grow
    /// past its old compressed length.
    pub room_data_file_index: usize,
    /// [data_start, data_end) for per-room loading lists inside the main
    /// code payload.
    pub loading_list_region: (usize, usize),
    /// [routine_start, routine_end) for per-room loading thunks inside the
    /// main code payload.
    pub loading_thunk_region: (usize, usize),
    /// Entity ids that were renumbered between Source and Localized; engine
    /// code must translate through this table before consulting the
    /// schema or dependency tables.
    pub remapped_node_ids: [(u16, u16); 3],
    /// Inclusive range of memory-flag ids available at load.
    pub memory_flag_range: (u16, u16),
}

pub const SOURCE: RegionConfig = RegionConfig {
    pointer_table_offset: 0x0010_0000,
    file_count: 1331,
    rom_split_indices: (1, 1329),
    room_index_range: (0x335, 0x482),
    force_old_pointer_range: (0x002, 0x034),
    free_space_start: 0x0180_0000,
    free_space_end: 0x01FF_F000,
    expected_data_end: 0x0200_0000,
    ram_bias: 0x8000_0000,
    loading_bank_mask: 0x3F,
    main_code_file_index: 0x000,
    room_data_file_index: 0x040,
    loading_list_region: (0x0021_0000, 0x0021_4000),
    loading_thunk_region: (0x0021_4000, 0x0021_8000),
    remapped_node_ids: [(0x0335, 0x0335), (0x0336, 0x0195), (0x0481, 0x0481)],
    memory_flag_range: (0x0100, 0x01FF),
};

pub const LOCALIZED: RegionConfig = RegionConfig {
    pointer_table_offset: 0x0010_0000,
    file_count: 1331,
    rom_split_indices: (1, 1329),
    room_index_range: (0x335, 0x482),
    force_old_pointer_range: (0x002, 0x034),
    free_space_start: 0x0184_0000,
    free_space_end: 0x01FF_F000,
    expected_data_end: 0x0200_0000,
    ram_bias: 0x8000_0000,
    loading_bank_mask: 0x3F,
    main_code_file_index: 0x000,
    room_data_file_index: 0x040,
    loading_list_region: (0x0021_0000, 0x0021_4000),
    loading_thunk_region: (0x0021_4000, 0x0021_8000),
    remapped_node_ids: [(0x0335, 0x019A), (0x0336, 0x0198), (0x0481, 0x047E)],
    memory_flag_range: (0x0100, 0x01FF),
};

impl Region {
    pub fn config(self) -> &'static RegionConfig {
        match self {
            Region::Source => &SOURCE,
            Region::Localized => &LOCALIZED,
        }
    }
}

impl RegionConfig {
    /// Translate a raw file offset into the payload's virtual address
    /// (before the compressed-flag high bit is applied).
    pub fn to_virtual(&self, raw_offset: u32) -> u32 {
        raw_offset.wrapping_add(self.ram_bias)
    }

    /// Inverse of [`RegionConfig::to_virtual`].
    pub fn to_raw(&self, virtual_addr: u32) -> u32 {
        virtual_addr.wrapping_sub(self.ram_bias)
    }

    pub fn remap_node_id(&self, id: u16) -> u16 {
        for (from, to) in self.remapped_node_ids.iter() {
            if *from == id {
                return *to;
            }
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_address_roundtrips() {
        let cfg = Region::Source.config();
        let raw = 0x0012_3456;
        assert_eq!(cfg.to_raw(cfg.to_virtual(raw)), raw);
    }

    #[test]
    fn remap_is_identity_outside_table() {
        let cfg = Region::Source.config();
        assert_eq!(cfg.remap_node_id(0x0336), 0x0195);
        assert_eq!(cfg.remap_node_id(0x9999), 0x9999);
    }

    #[test]
    fn regions_differ_only_in_documented_fields() {
        let s = Region::Source.config();
        let l = Region::Localized.config();
        assert_eq!(s.file_count, l.file_count);
        assert_eq!(s.room_index_range, l.room_index_range);
        assert_ne!(s.free_space_start, l.free_space_start);
        assert_ne!(s.remapped_node_ids, l.remapped_node_ids);
    }
}
