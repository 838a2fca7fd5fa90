//! Ties every module together into the fixed load/save pipeline.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::addr::{Region, RegionConfig};
use crate::checksum;
use crate::diagnostics::{LogSink, Sink};
use crate::error::Result;
use crate::filetable::FileTable;
use crate::loading::{self, RoomLoadingSpec};
use crate::misc::MiscOverlay;
use crate::room::Room;
use crate::schema::{ActorFileIndex, ExtraDependencies, RoomIndex};

/// Everything produced by a load: the file table, every parsed room keyed
/// by file-table index, and the materialized misc overlay.
pub struct Rom {
    pub file_table: FileTable,
    pub rooms: HashMap<usize, Room>,
    pub misc: MiscOverlay,
    region: Region,
    original_room_bytes: HashMap<usize, Vec<u8>>,
}

impl Rom {
    pub fn region(&self) -> Region {
        self.region
    }

    fn cfg(&self) -> &'static RegionConfig {
        self.region.config()
    }

    /// Marks a mutated room dirty and writes its serialized bytes back into
    /// the file table. Call after mutating `self.rooms.get_mut(&index)`.
    pub fn commit_room(&mut self, file_index: usize) -> Result<()> {
        let bytes = self.rooms[&file_index].serialize()?;
        self.file_table.set_data(file_index, bytes);
        Ok(())
    }

    /// Re-serializes every loaded room and stages the ones whose bytes
    /// changed since load. Called by [`Orchestrator::save`] so a caller
    /// that forgot to call `commit_room` still gets correct output, without
    /// forcing untouched rooms through a pointless recompress/reallocate.
    fn commit_changed_rooms(&mut self) -> Result<()> {
        let indices: Vec<usize> = self.rooms.keys().copied().collect();
        for file_index in indices {
            let bytes = self.rooms[&file_index].serialize()?;
            if self.original_room_bytes.get(&file_index) != Some(&bytes) {
                self.file_table.set_data(file_index, bytes);
            }
        }
        Ok(())
    }
}

pub struct Orchestrator {
    region: Region,
    diagnostics: Box<dyn Sink>,
    room_index: RoomIndex,
}

impl Orchestrator {
    pub fn new(region: Region) -> Self {
        Orchestrator {
            region,
            diagnostics: Box::new(LogSink),
            room_index: RoomIndex::default(),
        }
    }

    pub fn with_sink(region: Region, sink: Box<dyn Sink>) -> Self {
        Orchestrator {
            region,
            diagnostics: sink,
            room_index: RoomIndex::default(),
        }
    }

    /// Supplies the `warp_index <-> file_index` translation table
    /// (`room_indexes.txt`). Without one, `save` falls back to treating a
    /// room's file-table index as its own warp index, which only holds for
    /// the (rare) rooms where the two coincide.
    pub fn with_room_index(mut self, room_index: RoomIndex) -> Self {
        self.room_index = room_index;
        self
    }

    /// The externally-visible warp index a room's file-table index
    /// corresponds to, per the loaded `room_indexes.txt` table.
    fn warp_index_for(&self, file_index: usize) -> u16 {
        self.room_index
            .warp_index_for(file_index as u16)
            .unwrap_or(file_index as u16)
    }

    pub fn load(&self, rom_bytes: Vec<u8>) -> Result<Rom> {
        let mut file_table = FileTable::load(rom_bytes, self.region)?;
        let cfg = self.region.config();

        let mut rooms = HashMap::new();
        let mut original_room_bytes = HashMap::new();
        for index in file_table.iter_rooms().collect::<Vec<_>>() {
            let entry = file_table.entry(index);
            if entry.offset == 0 {
                continue;
            }
            let bytes = file_table.decompressed(index)?.to_vec();
            if bytes.is_empty() {
                continue;
            }
            let room = Room::parse(&bytes)?;
            rooms.insert(index, room);
            original_room_bytes.insert(index, bytes);
        }

        let room_data_bytes = file_table.decompressed(cfg.room_data_file_index)?.to_vec();
        let misc = MiscOverlay::new(room_data_bytes, 0);

        Ok(Rom {
            file_table,
            rooms,
            misc,
            region: self.region,
            original_room_bytes,
        })
    }

    pub fn load_from_path(&self, path: impl AsRef<Path>) -> Result<Rom> {
        let bytes = fs::read(path)?;
        self.load(bytes)
    }

    /// Runs the fixed five-step save pipeline. On error, `rom` remains
    /// internally mutated (dirty flags, misc buffer) but no bytes are
    /// written to disk — callers must discard a failed `rom` rather than
    /// retry `save_to_path` on it.
    pub fn save(&self, rom: &mut Rom) -> Result<()> {
        let cfg = rom.cfg();

        // 1. snapshot the misc overlay back into the room-data payload.
        rom.file_table.set_data(cfg.room_data_file_index, rom.misc.buffer().to_vec());

        // 2. loading table writer, against the decompressed main-code payload.
        let mut main_code = rom.file_table.decompressed(cfg.main_code_file_index)?.to_vec();
        let actor_index = ActorFileIndex::default();
        let extra = ExtraDependencies::default();
        let mut room_specs = Vec::new();
        for (&file_index, room) in rom.rooms.iter() {
            let warp_index = self.warp_index_for(file_index);
            let actor_ids: Vec<u16> = room.definitions.iter().map(|d| d.actor_id()).collect();
            let base_files = [
                rom.misc.read(warp_index, "loading_files1").unwrap_or(0) as u16,
                rom.misc.read(warp_index, "loading_files2").unwrap_or(0) as u16,
                rom.misc.read(warp_index, "loading_files3").unwrap_or(0) as u16,
                rom.misc.read(warp_index, "loading_files4").unwrap_or(0) as u16,
            ];
            let dependencies = crate::schema::dependencies_for_room(&base_files, &actor_ids, &actor_index, &extra, warp_index);
            room_specs.push(RoomLoadingSpec {
                warp_index,
                file_index: file_index as u16,
                dependencies,
            });
        }
        room_specs.sort_by_key(|r| r.warp_index);
        let thunk_addresses = loading::write(&mut main_code, cfg, &room_specs, self.diagnostics.as_ref())?;
        rom.file_table.set_data(cfg.main_code_file_index, main_code);

        for (file_index, room) in rom.rooms.iter_mut() {
            if let Some(addr) = thunk_addresses.get(&(*file_index as u16)) {
                room.metadata.set_loading_thunk_address(*addr);
            }
        }
        rom.commit_changed_rooms()?;

        // 3 & 4. deallocate-then-rewrite every file, honoring pins and the
        // old/new-ROM split; implemented as one pass inside `FileTable::save`.
        rom.file_table.save()?;

        // 5. checksum.
        checksum::write_checksum(rom.file_table.rom_bytes_mut());

        Ok(())
    }

    pub fn save_to_path(&self, rom: &mut Rom, path: impl AsRef<Path>) -> Result<()> {
        self.save(rom)?;
        fs::write(path, rom.file_table.rom_bytes())?;
        Ok(())
    }
}
