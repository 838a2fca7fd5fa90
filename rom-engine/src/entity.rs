//! Schema-driven entity records: 16-byte definitions and 20-byte instances.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{EngineError, Result};
use crate::schema::{EntitySchemaTable, FieldSpec};

pub const DEFINITION_LEN: usize = 16;
pub const INSTANCE_LEN: usize = 20;

/// A fixed compatibility table: door_design id -> design id to use once the
/// lock guarding it is converted to an unlocked door.
const DOOR_DESIGN_COMPATIBILITY: &[(u8, u8)] = &[(0x00, 0x04), (0x01, 0x05), (0x02, 0x06), (0x03, 0x07)];

fn read_unsigned(data: &[u8], lo: usize, hi: usize) -> u64 {
    let mut value = 0u64;
    for b in &data[lo..=hi] {
        value = (value << 8) | *b as u64;
    }
    value
}

fn write_unsigned(data: &mut [u8], lo: usize, hi: usize, value: u64) {
    let width = hi - lo + 1;
    for (n, b) in data[lo..=hi].iter_mut().enumerate() {
        let shift = (width - 1 - n) * 8;
        *b = ((value >> shift) & 0xff) as u8;
    }
}

/// A field value as exposed to clients: either its raw integer, or (if the
/// schema names an enum dictionary and the value matches an entry) its
/// label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Number(u64),
    Label(String),
}

fn decode_field(spec: &FieldSpec, raw: u64) -> FieldValue {
    if let Some(enums) = &spec.enum_values {
        if let Some(label) = enums.get(&raw) {
            return FieldValue::Label(label.clone());
        }
    }
    FieldValue::Number(raw)
}

fn encode_field(spec: &FieldSpec, value: &FieldValue) -> Result<u64> {
    match value {
        FieldValue::Number(n) => Ok(*n),
        FieldValue::Label(label) => spec
            .enum_values
            .as_ref()
            .and_then(|enums| enums.iter().find(|(_, v)| *v == label).map(|(k, _)| *k))
            .ok_or_else(|| EngineError::InvariantViolated(format!("no enum value named '{}'", label))),
    }
}

/// A 16-byte actor definition. Its first two bytes (big-endian) select the
/// schema that interprets the remaining fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDefinition {
    pub bytes: [u8; DEFINITION_LEN],
}

impl EntityDefinition {
    pub fn from_bytes(bytes: [u8; DEFINITION_LEN]) -> Self {
        EntityDefinition { bytes }
    }

    pub fn actor_id(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[0..2])
    }

    pub fn field(&self, schema: &EntitySchemaTable, name: &str) -> Result<FieldValue> {
        let actor_id = self.actor_id();
        let spec = schema.field(actor_id, name)?;
        let (lo, hi) = spec.index.span();
        Ok(decode_field(spec, read_unsigned(&self.bytes, lo, hi)))
    }

    pub fn set_field(&mut self, schema: &EntitySchemaTable, name: &str, value: FieldValue) -> Result<()> {
        let actor_id = self.actor_id();
        let spec = schema.field(actor_id, name)?;
        let raw = encode_field(spec, &value)?;
        let (lo, hi) = spec.index.span();
        write_unsigned(&mut self.bytes, lo, hi, raw);
        Ok(())
    }

    fn has_field(&self, schema: &EntitySchemaTable, name: &str) -> bool {
        schema
            .get(self.actor_id())
            .map(|s| s.field(name).is_some())
            .unwrap_or(false)
    }

    pub fn is_exit(&self, schema: &EntitySchemaTable) -> bool {
        self.has_field(schema, "exit_destination")
    }

    pub fn is_door(&self, schema: &EntitySchemaTable) -> bool {
        self.has_field(schema, "door_design")
    }

    pub fn is_lock(&self, schema: &EntitySchemaTable) -> bool {
        self.has_field(schema, "lock_type")
    }

    pub fn is_key(&self, schema: &EntitySchemaTable) -> bool {
        self.has_field(schema, "key_id")
    }

    pub fn is_pickup(&self, schema: &EntitySchemaTable) -> bool {
        self.has_field(schema, "pickup_kind")
    }

    pub fn is_enemy(&self, schema: &EntitySchemaTable) -> bool {
        self.has_field(schema, "enemy_id")
    }

    pub fn is_pot(&self, schema: &EntitySchemaTable) -> bool {
        self.has_field(schema, "pot_contents")
    }

    pub fn is_cat(&self, schema: &EntitySchemaTable) -> bool {
        self.has_field(schema, "cat_breed")
    }

    /// Turns a lock into an unlocked door, picking a design id compatible
    /// with `old_door_design` from the fixed compatibility table.
    pub fn unlock_into_door(&mut self, schema: &EntitySchemaTable, old_door_design: u8) -> Result<()> {
        let design = DOOR_DESIGN_COMPATIBILITY
            .iter()
            .find(|(old, _)| *old == old_door_design)
            .map(|(_, new)| *new)
            .unwrap_or(old_door_design);
        self.set_field(schema, "door_design", FieldValue::Number(design as u64))?;
        Ok(())
    }

    pub fn clone_definition(&self) -> Self {
        EntityDefinition { bytes: self.bytes }
    }
}

/// A 20-byte placed instance: position (x,z,y), rotation (rx,rz,ry), and a
/// reference to its owning definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInstance {
    pub bytes: [u8; INSTANCE_LEN],
}

impl EntityInstance {
    pub fn from_bytes(bytes: [u8; INSTANCE_LEN]) -> Self {
        EntityInstance { bytes }
    }

    pub fn new(x: u16, z: u16, y: u16, rx: u16, rz: u16, ry: u16, definition_index: u16) -> Self {
        let mut bytes = [0u8; INSTANCE_LEN];
        BigEndian::write_u16(&mut bytes[0..2], x);
        BigEndian::write_u16(&mut bytes[2..4], z);
        BigEndian::write_u16(&mut bytes[4..6], y);
        BigEndian::write_u16(&mut bytes[6..8], rx);
        BigEndian::write_u16(&mut bytes[8..10], rz);
        BigEndian::write_u16(&mut bytes[10..12], ry);
        BigEndian::write_u16(&mut bytes[12..14], 0x0800);
        bytes[14] = (definition_index as u8) << 4;
        EntityInstance { bytes }
    }

    pub fn position(&self) -> (u16, u16, u16) {
        (
            BigEndian::read_u16(&self.bytes[0..2]),
            BigEndian::read_u16(&self.bytes[2..4]),
            BigEndian::read_u16(&self.bytes[4..6]),
        )
    }

    pub fn rotation(&self) -> (u16, u16, u16) {
        (
            BigEndian::read_u16(&self.bytes[6..8]),
            BigEndian::read_u16(&self.bytes[8..10]),
            BigEndian::read_u16(&self.bytes[10..12]),
        )
    }

    pub fn marker(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[12..14])
    }

    /// `definition_index = byte[14] >> 4` iff its low nibble is clear, else
    /// the instance has no resolvable definition. Byte 15 is unrelated
    /// padding.
    pub fn definition_index(&self) -> Option<u16> {
        if self.bytes[14] & 0xf == 0 {
            Some((self.bytes[14] >> 4) as u16)
        } else {
            None
        }
    }

    pub fn set_definition_index(&mut self, index: u16) {
        self.bytes[14] = (index as u8) << 4;
    }

    pub fn is_all_zero(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

/// The fixed-size pool of persistent save-game bits.
#[derive(Debug, Clone)]
pub struct MemoryFlagPool {
    available: Vec<u16>,
}

impl MemoryFlagPool {
    pub fn new(range: (u16, u16)) -> Self {
        let mut available: Vec<u16> = (range.0..=range.1).collect();
        available.sort_unstable_by(|a, b| b.cmp(a));
        MemoryFlagPool { available }
    }

    pub fn acquire(&mut self) -> Result<u16> {
        self.available.pop().ok_or(EngineError::NoFlags)
    }

    pub fn free(&mut self, id: u16) {
        if !self.available.contains(&id) {
            self.available.push(id);
            self.available.sort_unstable_by(|a, b| b.cmp(a));
        }
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_with_fields() -> EntitySchemaTable {
        let yaml = r#"
0x1A1:
  name: BronzeLock
  actor_id: { index: [0, 1] }
  lock_type: { index: 4 }
  door_design: { index: 5, enum: { 0: Wood, 4: Iron } }
"#;
        EntitySchemaTable::parse_yaml(yaml).unwrap()
    }

    #[test]
    fn field_read_write_roundtrips() {
        let schema = schema_with_fields();
        let mut def = EntityDefinition::from_bytes([0x01, 0xA1, 0, 0, 0x02, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(def.actor_id(), 0x1A1);
        assert_eq!(def.field(&schema, "lock_type").unwrap(), FieldValue::Number(2));

        def.set_field(&schema, "lock_type", FieldValue::Number(9)).unwrap();
        assert_eq!(def.field(&schema, "lock_type").unwrap(), FieldValue::Number(9));
    }

    #[test]
    fn enum_field_decodes_to_label() {
        let schema = schema_with_fields();
        let mut def = EntityDefinition::from_bytes([0x01, 0xA1, 0, 0, 0, 0x04, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(def.field(&schema, "door_design").unwrap(), FieldValue::Label("Iron".to_string()));

        def.set_field(&schema, "door_design", FieldValue::Label("Wood".to_string()))
            .unwrap();
        assert_eq!(def.bytes[5], 0);
    }

    #[test]
    fn predicates_follow_schema_field_presence() {
        let schema = schema_with_fields();
        let def = EntityDefinition::from_bytes([0x01, 0xA1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(def.is_lock(&schema));
        assert!(def.is_door(&schema));
        assert!(!def.is_key(&schema));
    }

    #[test]
    fn unlock_into_door_uses_compatibility_table() {
        let schema = schema_with_fields();
        let mut def = EntityDefinition::from_bytes([0x01, 0xA1, 0, 0, 0, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        def.unlock_into_door(&schema, 0x01).unwrap();
        assert_eq!(def.bytes[5], 0x05);
    }

    #[test]
    fn instance_definition_index_requires_zero_low_nibble() {
        let inst = EntityInstance::new(1, 2, 3, 0, 0, 0, 7);
        assert_eq!(inst.definition_index(), Some(7));

        let mut raw = inst.bytes;
        raw[14] |= 1;
        let inst2 = EntityInstance::from_bytes(raw);
        assert_eq!(inst2.definition_index(), None);
    }

    #[test]
    fn instance_definition_index_ignores_byte_15() {
        // Byte 15 is unrelated padding; only byte 14 selects the definition.
        let inst = EntityInstance::new(1, 2, 3, 0, 0, 0, 7);
        assert_eq!(inst.bytes[14], 7 << 4);

        let mut raw = inst.bytes;
        raw[15] = 0xff;
        let inst2 = EntityInstance::from_bytes(raw);
        assert_eq!(inst2.definition_index(), Some(7));
    }

    #[test]
    fn instance_marker_is_0800_by_construction() {
        let inst = EntityInstance::new(0, 0, 0, 0, 0, 0, 0);
        assert_eq!(inst.marker(), 0x0800);
    }

    #[test]
    fn memory_flag_pool_acquires_lowest_and_frees() {
        let mut pool = MemoryFlagPool::new((0x100, 0x102));
        assert_eq!(pool.acquire().unwrap(), 0x100);
        assert_eq!(pool.acquire().unwrap(), 0x101);
        pool.free(0x100);
        assert_eq!(pool.acquire().unwrap(), 0x100);
        assert_eq!(pool.acquire().unwrap(), 0x102);
        assert!(matches!(pool.acquire().unwrap_err(), EngineError::NoFlags));
    }
}
