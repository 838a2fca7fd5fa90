use thiserror::Error;

/// The closed set of fatal failures the engine can produce.
///
/// Recoverable conditions (duplicate loading-file entries, auto-added file
/// dependencies) never appear here; they go through [`crate::diagnostics`]
/// instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("codec ran out of input at byte {offset} decoding opcode {opcode:#04x}")]
    Truncated { offset: usize, opcode: u8 },

    #[error("unrecognized opcode {opcode:#04x} at byte {offset}")]
    BadOpcode { offset: usize, opcode: u8 },

    #[error("decompression diverged from validation data at output byte {offset}")]
    Mismatch { offset: usize },

    #[error("no schema entry for actor {actor_id:#06x}")]
    SchemaMissing { actor_id: u16 },

    #[error("no field named '{field}' in schema for actor {actor_id:#06x}")]
    SchemaFieldMissing { actor_id: u16, field: String },

    #[error("file {index}'s new pointer {next:#08x} is less than predecessor's {prev:#08x}")]
    PointerOrder { index: usize, prev: u32, next: u32 },

    #[error("no free range of length {length:#x} available in region {region:?}")]
    NoSpace {
        length: usize,
        region: crate::freespace::Region,
    },

    #[error("pinned file {index} grew from {old_len:#x} to {new_len:#x} bytes, past its fixed slot")]
    PinnedOverflow {
        index: usize,
        old_len: usize,
        new_len: usize,
    },

    #[error("field '{field}' of misc section {section} is not editable for room category {category}")]
    IllegalMiscEdit {
        section: usize,
        category: u8,
        field: String,
    },

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("memory-flag pool exhausted")]
    NoFlags,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
