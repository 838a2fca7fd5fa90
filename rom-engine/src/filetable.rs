//! The indexed collection of payloads: the file-pointer table plus lazy
//! decompression/recompression and the save-time rewrite sequence.

use byteorder::{BigEndian, ByteOrder};
use std::collections::{HashMap, HashSet};

use crate::addr::{Region, RegionConfig};
use crate::codec;
use crate::error::{EngineError, Result};
use crate::freespace::{self, FreeSpaceAllocator};

/// One entry of the on-disk file-pointer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePointerEntry {
    pub compressed: bool,
    pub offset: u32,
}

impl FilePointerEntry {
    fn from_raw(raw: u32) -> Self {
        FilePointerEntry {
            compressed: raw & 0x8000_0000 != 0,
            offset: raw & 0x7fff_ffff,
        }
    }

    fn to_raw(self) -> u32 {
        (self.offset & 0x7fff_ffff) | if self.compressed { 0x8000_0000 } else { 0 }
    }
}

/// Swaps every pair of adjacent bytes in place. Container framing only —
/// never applied inside [`codec`].
pub fn word_flip(data: &mut [u8]) {
    let mut i = 0;
    while i + 1 < data.len() {
        data.swap(i, i + 1);
        i += 2;
    }
}

pub struct FileTable {
    region: Region,
    entries: Vec<FilePointerEntry>,
    rom: Vec<u8>,
    decompressed_cache: HashMap<usize, Vec<u8>>,
    dirty: HashSet<usize>,
}

impl FileTable {
    pub fn load(rom: Vec<u8>, region: Region) -> Result<Self> {
        let cfg = region.config();
        if rom.len() < cfg.expected_data_end {
            return Err(EngineError::InvariantViolated(format!(
                "rom is {:#x} bytes, expected at least {:#x}",
                rom.len(),
                cfg.expected_data_end
            )));
        }

        let mut entries = Vec::with_capacity(cfg.file_count);
        for i in 0..cfg.file_count {
            let off = cfg.pointer_table_offset + i * 4;
            let raw = BigEndian::read_u32(&rom[off..off + 4]);
            entries.push(FilePointerEntry::from_raw(raw));
        }

        let table = FileTable {
            region,
            entries,
            rom,
            decompressed_cache: HashMap::new(),
            dirty: HashSet::new(),
        };
        table.validate_ascending()?;
        Ok(table)
    }

    pub fn region(&self) -> Region {
        self.region
    }

    fn cfg(&self) -> &'static RegionConfig {
        self.region.config()
    }

    pub fn is_rom_split(&self, index: usize) -> bool {
        let (lo, hi) = self.cfg().rom_split_indices;
        index == lo || index == hi
    }

    fn is_pinned(&self, index: usize) -> bool {
        let (lo, hi) = self.cfg().force_old_pointer_range;
        index >= lo && index <= hi
    }

    fn file_region(&self, index: usize) -> freespace::Region {
        let (lo, hi) = self.cfg().rom_split_indices;
        if index > lo && index < hi {
            freespace::Region::NewRom
        } else {
            freespace::Region::OldRom
        }
    }

    fn payload_end(entries: &[FilePointerEntry], index: usize, cfg: &RegionConfig) -> u32 {
        if index + 1 < entries.len() {
            entries[index + 1].offset
        } else {
            cfg.expected_data_end as u32
        }
    }

    fn validate_ascending(&self) -> Result<()> {
        for i in 0..self.entries.len().saturating_sub(1) {
            if self.is_rom_split(i) || self.is_rom_split(i + 1) {
                continue;
            }
            if self.entries[i + 1].offset < self.entries[i].offset {
                return Err(EngineError::PointerOrder {
                    index: i + 1,
                    prev: self.entries[i].offset,
                    next: self.entries[i + 1].offset,
                });
            }
        }
        Ok(())
    }

    fn raw_slice<'a>(rom: &'a [u8], entries: &[FilePointerEntry], index: usize, cfg: &RegionConfig) -> &'a [u8] {
        let start = entries[index].offset as usize;
        let end = Self::payload_end(entries, index, cfg) as usize;
        &rom[start..end]
    }

    pub fn entry(&self, index: usize) -> FilePointerEntry {
        self.entries[index]
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    pub fn iter_rooms(&self) -> impl Iterator<Item = usize> {
        let (start, end) = self.cfg().room_index_range;
        start..end
    }

    fn decode_payload(&self, index: usize) -> Result<Vec<u8>> {
        if self.is_rom_split(index) {
            return Ok(Vec::new());
        }
        let cfg = self.cfg();
        let raw = Self::raw_slice(&self.rom, &self.entries, index, cfg);
        if !self.entries[index].compressed {
            return Ok(raw.to_vec());
        }
        if raw.len() < 4 || raw[0] != 0 {
            return Err(EngineError::InvariantViolated(format!(
                "file {} has a malformed compressed container header",
                index
            )));
        }
        let total_len = ((raw[1] as usize) << 16) | ((raw[2] as usize) << 8) | raw[3] as usize;
        let body_len = total_len.saturating_sub(4).min(raw.len().saturating_sub(4));
        let mut body = raw[4..4 + body_len].to_vec();
        word_flip(&mut body);
        codec::decompress(&body)
    }

    /// Decompress on first access, cache thereafter.
    pub fn decompressed(&mut self, index: usize) -> Result<&[u8]> {
        if !self.decompressed_cache.contains_key(&index) {
            let bytes = self.decode_payload(index)?;
            self.decompressed_cache.insert(index, bytes);
        }
        Ok(self.decompressed_cache.get(&index).unwrap())
    }

    /// Marks `index` dirty and stores `bytes` as its new decompressed
    /// content; subsequent `decompressed(index)` calls return it.
    pub fn set_data(&mut self, index: usize, bytes: Vec<u8>) {
        self.decompressed_cache.insert(index, bytes);
        self.dirty.insert(index);
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.dirty.contains(&index)
    }

    fn final_bytes_for(
        &self,
        index: usize,
        original_rom: &[u8],
        original_entries: &[FilePointerEntry],
        cfg: &RegionConfig,
    ) -> Result<Vec<u8>> {
        if self.is_rom_split(index) {
            return Ok(Vec::new());
        }
        if !self.dirty.contains(&index) {
            return Ok(Self::raw_slice(original_rom, original_entries, index, cfg).to_vec());
        }

        // The trailing zero marker and 16-byte alignment pad are container
        // framing that only means anything to a reader that first consults
        // the compressed-body length header; raw files have no such header
        // and would absorb the padding as literal content on next load.
        let mut container = if self.entries[index].compressed {
            let data = &self.decompressed_cache[&index];
            let mut c = codec::recompress(data)?;
            word_flip(&mut c[4..]);
            c.extend_from_slice(&[0, 0, 0, 0]);
            let pad = (16 - (c.len() % 16)) % 16;
            c.extend(std::iter::repeat(0u8).take(pad));
            c
        } else {
            self.decompressed_cache[&index].clone()
        };

        if index == cfg.room_data_file_index {
            let old_len = Self::raw_slice(original_rom, original_entries, index, cfg).len();
            if container.len() > old_len {
                return Err(EngineError::PinnedOverflow {
                    index,
                    old_len,
                    new_len: container.len(),
                });
            }
            container.extend(std::iter::repeat(0u8).take(old_len - container.len()));
        }

        Ok(container)
    }

    /// Runs the save-time rewrite sequence from spec §4.3: deallocate every
    /// file's current range, then rewrite each (ascending), recompressing
    /// dirty ones, preserving untouched ones byte-for-byte, honoring the
    /// `FORCE_OLD_POINTER` pin and the old/new-ROM split.
    pub fn save(&mut self) -> Result<()> {
        let cfg = *self.cfg();
        let original_rom = self.rom.clone();
        let original_entries = self.entries.clone();

        let mut allocator = FreeSpaceAllocator::new(cfg.free_space_start, cfg.free_space_end, cfg.free_space_start);

        for i in 0..original_entries.len() {
            if self.is_rom_split(i) {
                continue;
            }
            let start = original_entries[i].offset as usize;
            let end = Self::payload_end(&original_entries, i, &cfg) as usize;
            allocator.deallocate(start, end, end);
        }

        let mut prev_pointer: Option<u32> = None;
        for i in 0..original_entries.len() {
            if self.is_rom_split(i) {
                // A rom-split sentinel marks a legitimate address
                // discontinuity (old-ROM address space resumes on the far
                // side); don't compare across it.
                prev_pointer = None;
                continue;
            }

            let bytes = self.final_bytes_for(i, &original_rom, &original_entries, &cfg)?;

            let new_start = if self.is_pinned(i) {
                let old_start = original_entries[i].offset as usize;
                let old_len = Self::payload_end(&original_entries, i, &cfg) as usize - old_start;
                if bytes.len() > old_len {
                    return Err(EngineError::PinnedOverflow {
                        index: i,
                        old_len,
                        new_len: bytes.len(),
                    });
                }
                allocator.force_allocate(old_start, bytes.len())?;
                old_start
            } else {
                allocator.allocate(bytes.len(), self.file_region(i))?
            };

            let new_end = new_start + bytes.len();
            if new_end > self.rom.len() {
                self.rom.resize(new_end, 0);
            }
            self.rom[new_start..new_end].copy_from_slice(&bytes);

            self.entries[i].offset = new_start as u32;
            let raw = self.entries[i].to_raw();
            let off = cfg.pointer_table_offset + i * 4;
            BigEndian::write_u32(&mut self.rom[off..off + 4], raw);

            if let Some(prev) = prev_pointer {
                if (new_start as u32) < prev {
                    return Err(EngineError::PointerOrder {
                        index: i,
                        prev,
                        next: new_start as u32,
                    });
                }
            }
            prev_pointer = Some(new_start as u32);
        }

        self.dirty.clear();
        Ok(())
    }

    pub fn rom_bytes(&self) -> &[u8] {
        &self.rom
    }

    pub fn rom_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.rom
    }

    pub fn into_rom_bytes(self) -> Vec<u8> {
        self.rom
    }
}
