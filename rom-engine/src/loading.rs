//! Per-room loading lists and thunks embedded in the main code payload.

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;

use crate::addr::RegionConfig;
use crate::diagnostics::Sink;
use crate::error::{EngineError, Result};

const LIST_ALIGN: usize = 4;
const THUNK_ALIGN: usize = 4;

/// Opaque fixed code bytes surrounding a loading thunk's list-offset field.
/// Never interpreted, only ever copied and deduplicated whole.
const THUNK_HEADER: [u8; 18] = [
    0x02, 0x00, 0x3f, 0x80, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00,
];
const THUNK_FOOTER: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

pub struct RoomLoadingSpec {
    pub warp_index: u16,
    pub file_index: u16,
    pub dependencies: Vec<u16>,
}

/// `file_index -> thunk virtual address`, to be patched into each room's
/// metadata (+0x18) by the orchestrator.
pub type ThunkAddresses = HashMap<u16, u32>;

fn encode_list(deps: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(deps.len() * 2 + 2);
    for d in deps {
        let mut b = [0u8; 2];
        BigEndian::write_u16(&mut b, *d);
        bytes.extend_from_slice(&b);
    }
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

fn encode_thunk(list_offset: u16) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(THUNK_HEADER.len() + 2 + THUNK_FOOTER.len());
    bytes.extend_from_slice(&THUNK_HEADER);
    let mut off = [0u8; 2];
    BigEndian::write_u16(&mut off, list_offset);
    bytes.extend_from_slice(&off);
    bytes.extend_from_slice(&THUNK_FOOTER);
    bytes
}

/// Finds `needle` as a substring of `haystack` starting only at a multiple
/// of `align`, returning its offset if present.
fn find_aligned(haystack: &[u8], needle: &[u8], align: usize) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    let mut offset = 0;
    while offset + needle.len() <= haystack.len() {
        if &haystack[offset..offset + needle.len()] == needle {
            return Some(offset);
        }
        offset += align;
    }
    None
}

fn pad_to(buf: &mut Vec<u8>, align: usize) {
    let rem = buf.len() % align;
    if rem != 0 {
        buf.extend(std::iter::repeat(0u8).take(align - rem));
    }
}

/// Runs the save-time writer procedure from spec.md §4.7 against the
/// decompressed main-code buffer. Returns each room's thunk virtual address
/// for the caller to patch back into room metadata.
pub fn write(
    main_code: &mut [u8],
    cfg: &RegionConfig,
    rooms: &[RoomLoadingSpec],
    diagnostics: &dyn Sink,
) -> Result<ThunkAddresses> {
    let (list_start, list_end) = cfg.loading_list_region;
    let (thunk_start, thunk_end) = cfg.loading_thunk_region;

    if list_end > main_code.len() || thunk_end > main_code.len() {
        return Err(EngineError::InvariantViolated(
            "main code buffer too small for configured loading regions".into(),
        ));
    }

    for b in &mut main_code[list_start..list_end] {
        *b = 0;
    }
    for b in &mut main_code[thunk_start..thunk_end] {
        *b = 0;
    }

    let mut list_buf: Vec<u8> = Vec::new();
    let mut thunk_buf: Vec<u8> = Vec::new();
    let mut thunk_addresses = ThunkAddresses::new();

    for room in rooms {
        let mut seen = std::collections::HashSet::new();
        let mut deduped = Vec::new();
        for dep in &room.dependencies {
            if !seen.insert(*dep) {
                diagnostics.warn(&format!(
                    "room {:#x}: duplicate loading-file entry {:#x} dropped",
                    room.warp_index, dep
                ));
                continue;
            }
            deduped.push(*dep);
        }

        let list_bytes = encode_list(&deduped);
        let list_offset = match find_aligned(&list_buf, &list_bytes, LIST_ALIGN) {
            Some(off) => off,
            None => {
                let off = list_buf.len();
                list_buf.extend_from_slice(&list_bytes);
                pad_to(&mut list_buf, LIST_ALIGN);
                off
            }
        };

        let thunk_bytes = encode_thunk(list_offset as u16);
        let thunk_offset = match find_aligned(&thunk_buf, &thunk_bytes, THUNK_ALIGN) {
            Some(off) => off,
            None => {
                let off = thunk_buf.len();
                thunk_buf.extend_from_slice(&thunk_bytes);
                pad_to(&mut thunk_buf, THUNK_ALIGN);
                off
            }
        };

        let thunk_virtual = cfg.to_virtual((thunk_start + thunk_offset) as u32);
        thunk_addresses.insert(room.file_index, thunk_virtual);
    }

    if list_buf.len() > list_end - list_start {
        return Err(EngineError::InvariantViolated(format!(
            "loading-list buffer grew to {:#x} bytes, region only holds {:#x}",
            list_buf.len(),
            list_end - list_start
        )));
    }
    if thunk_buf.len() > thunk_end - thunk_start {
        return Err(EngineError::InvariantViolated(format!(
            "loading-thunk buffer grew to {:#x} bytes, region only holds {:#x}",
            thunk_buf.len(),
            thunk_end - thunk_start
        )));
    }

    main_code[list_start..list_start + list_buf.len()].copy_from_slice(&list_buf);
    main_code[thunk_start..thunk_start + thunk_buf.len()].copy_from_slice(&thunk_buf);

    Ok(thunk_addresses)
}
