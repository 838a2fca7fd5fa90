//! The misc overlay: a pointer-of-pointers structure living inside the
//! distinguished room-data payload, indexing seven fixed-stride sub-tables.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{EngineError, Result};

const ROOT_ENTRY_STRIDE: usize = 24;
const SECTION_STRIDES: [usize; 7] = [20, 8, 8, 4, 4, 2, 2];

/// `warp_index` ranges mapped to a room category, used both by the
/// illegal-edit check and to compute a record's dense index within its
/// sub-table (the remainder after subtracting the range's low bound).
const CATEGORY_RANGES: [(u16, u16, u8); 6] = [
    (0x000, 0x03f, 0),
    (0x040, 0x07f, 1),
    (0x080, 0x0ff, 2),
    (0x100, 0x1ff, 3),
    (0x200, 0x2ff, 4),
    (0x300, 0xfff, 5),
];

/// Splits a warp index into (room category, dense index within category).
pub fn category_for_warp_index(warp_index: u16) -> (u8, u16) {
    for (lo, hi, category) in CATEGORY_RANGES.iter() {
        if warp_index >= *lo && warp_index <= *hi {
            return (*category, warp_index - lo);
        }
    }
    (5, warp_index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiscField {
    pub section: usize,
    pub span: (usize, usize),
}

fn recognized_field(name: &str) -> Option<MiscField> {
    match name {
        "graphics1" => Some(MiscField { section: 0, span: (0, 3) }),
        "loading_unknown1" => Some(MiscField { section: 0, span: (4, 7) }),
        "loading_unknown2" => Some(MiscField { section: 0, span: (8, 11) }),
        "loading_unknown3" => Some(MiscField { section: 0, span: (12, 15) }),
        "graphics2" => Some(MiscField { section: 1, span: (0, 3) }),
        "loading_files1" => Some(MiscField { section: 2, span: (0, 1) }),
        "loading_files2" => Some(MiscField { section: 2, span: (2, 3) }),
        "loading_files3" => Some(MiscField { section: 2, span: (4, 5) }),
        "loading_files4" => Some(MiscField { section: 2, span: (6, 7) }),
        "bsp_plane_data" => Some(MiscField { section: 3, span: (0, 3) }),
        "bsp_tree" => Some(MiscField { section: 4, span: (0, 3) }),
        "bgm" => Some(MiscField { section: 6, span: (0, 0) }),
        "skybox_index" => Some(MiscField { section: 6, span: (1, 1) }),
        _ => None,
    }
}

/// A materialized view over the room-data payload's misc overlay. Holds the
/// whole payload in RAM; writes mutate it in place.
pub struct MiscOverlay {
    buffer: Vec<u8>,
    root_offset: usize,
}

impl MiscOverlay {
    pub fn new(buffer: Vec<u8>, root_offset: usize) -> Self {
        MiscOverlay { buffer, root_offset }
    }

    fn section_pointer(&self, section: usize) -> usize {
        let off = self.root_offset + section * ROOT_ENTRY_STRIDE;
        BigEndian::read_u32(&self.buffer[off..off + 4]) as usize
    }

    fn record_offset(&self, section: usize, index_in_category: u16) -> usize {
        self.section_pointer(section) + (index_in_category as usize) * SECTION_STRIDES[section]
    }

    pub fn read(&self, warp_index: u16, field: &str) -> Result<u64> {
        let spec = field_spec(field)?;
        let (_category, index_in_category) = category_for_warp_index(warp_index);
        let record = self.record_offset(spec.section, index_in_category);
        let (lo, hi) = spec.span;
        let mut value = 0u64;
        for b in &self.buffer[record + lo..=record + hi] {
            value = (value << 8) | *b as u64;
        }
        Ok(value)
    }

    pub fn write(&mut self, warp_index: u16, field: &str, value: u64) -> Result<()> {
        let spec = field_spec(field)?;
        let (category, index_in_category) = category_for_warp_index(warp_index);
        if spec.section == 6 && (category == 0 || category == 3) {
            return Err(EngineError::IllegalMiscEdit {
                section: spec.section,
                category,
                field: field.to_string(),
            });
        }
        let record = self.record_offset(spec.section, index_in_category);
        let (lo, hi) = spec.span;
        let width = hi - lo + 1;
        for (n, b) in self.buffer[record + lo..=record + hi].iter_mut().enumerate() {
            let shift = (width - 1 - n) * 8;
            *b = ((value >> shift) & 0xff) as u8;
        }
        Ok(())
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

fn field_spec(name: &str) -> Result<MiscField> {
    recognized_field(name).ok_or_else(|| EngineError::InvariantViolated(format!("no misc field named '{}'", name)))
}
