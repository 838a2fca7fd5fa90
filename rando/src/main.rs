//! Thin client: load a ROM, apply a handful of entity-graph edits, save it
//! back out. Not a randomizer — just enough to exercise the engine end to
//! end (door/key solving and full randomization policy live elsewhere).

use std::error::Error;
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use rom_engine::addr::Region;
use rom_engine::orchestrator::Orchestrator;
use rom_engine::schema::{EntitySchemaTable, RoomIndex};

#[derive(Debug, StructOpt)]
#[structopt(name = "rando", about = "apply entity-graph edits to a ROM image")]
struct Opt {
    /// Source ROM image to read.
    #[structopt(long, parse(from_os_str))]
    rom: PathBuf,

    /// Where to write the patched ROM image.
    #[structopt(long, parse(from_os_str))]
    out: PathBuf,

    /// `entity_structures.yaml`, mapping actor ids to field schemas.
    #[structopt(long, parse(from_os_str))]
    schema: PathBuf,

    /// `room_indexes.txt`, mapping each room's warp index to its file-table
    /// index. Without one, rooms whose warp index differs from their
    /// file-table index get the wrong misc-overlay loading-files record.
    #[structopt(long, parse(from_os_str))]
    room_index: Option<PathBuf>,

    /// Which release the input ROM belongs to.
    #[structopt(long, default_value = "source")]
    region: String,

    /// Convert every lock actor found into an unlocked door of a compatible
    /// design, freeing its key's memory flag.
    #[structopt(long)]
    unlock_all_locks: bool,
}

fn parse_region(s: &str) -> Result<Region, Box<dyn Error>> {
    match s {
        "source" => Ok(Region::Source),
        "localized" => Ok(Region::Localized),
        other => Err(format!("unknown region '{}', expected 'source' or 'localized'", other).into()),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opt = Opt::from_args();

    let region = parse_region(&opt.region)?;
    let schema = EntitySchemaTable::load_yaml(&opt.schema)?;
    let mut orchestrator = Orchestrator::new(region);
    if let Some(path) = &opt.room_index {
        orchestrator = orchestrator.with_room_index(RoomIndex::load(path)?);
    }

    let mut rom = orchestrator.load_from_path(&opt.rom)?;
    info!("loaded {} rooms from {}", rom.rooms.len(), opt.rom.display());

    if opt.unlock_all_locks {
        let mut touched = Vec::new();
        let mut edited = 0;
        for (&file_index, room) in rom.rooms.iter_mut() {
            let mut changed = false;
            for def in room.definitions.iter_mut() {
                if def.is_lock(&schema) {
                    let old_design = match def.field(&schema, "door_design") {
                        Ok(rom_engine::entity::FieldValue::Number(n)) => n as u8,
                        _ => 0,
                    };
                    def.unlock_into_door(&schema, old_design)?;
                    edited += 1;
                    changed = true;
                }
            }
            if changed {
                touched.push(file_index);
            }
        }
        info!("converted {} locks into unlocked doors", edited);
        for file_index in touched {
            rom.commit_room(file_index)?;
        }
    }

    orchestrator.save_to_path(&mut rom, &opt.out)?;
    info!("wrote {}", opt.out.display());

    Ok(())
}
