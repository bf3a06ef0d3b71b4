//! Handle and classification types shared by every engine implementation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a context inside an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Opaque handle to an engine-resident value.
///
/// The low half addresses an arena slot, the high half is the slot generation
/// at allocation time. A handle whose slot has since been reused no longer
/// resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(u64);

impl ValueRef {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index(), self.generation())
    }
}

/// Category of an engine value.
///
/// Every value exposed to native code belongs to exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Array,
    Function,
    TypedArray,
    ArrayBuffer,
    Date,
    Error,
    RegExp,
}

impl ValueKind {
    /// Whether the value is an object of any flavour
    pub fn is_object(self) -> bool {
        !matches!(
            self,
            Self::Undefined | Self::Null | Self::Boolean | Self::Number | Self::String
        )
    }

    /// Whether the value has a `length` and indexable elements
    pub fn is_array_like(self) -> bool {
        matches!(self, Self::Array | Self::TypedArray)
    }

    pub fn is_nullish(self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Name used in type errors and `typeof`-style diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
            Self::Function => "function",
            Self::TypedArray => "typed-array",
            Self::ArrayBuffer => "array-buffer",
            Self::Date => "date",
            Self::Error => "error",
            Self::RegExp => "regexp",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type of a typed array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl TypedArrayKind {
    pub const ALL: [TypedArrayKind; 9] = [
        Self::Int8,
        Self::Uint8,
        Self::Uint8Clamped,
        Self::Int16,
        Self::Uint16,
        Self::Int32,
        Self::Uint32,
        Self::Float32,
        Self::Float64,
    ];

    /// Size of one element in bytes (`BYTES_PER_ELEMENT`)
    pub fn bytes_per_element(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Script-side constructor name
    pub fn constructor_name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
        }
    }

    pub fn from_constructor_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.constructor_name() == name)
    }

    /// Decode one element from exactly `bytes_per_element` little-endian bytes
    pub fn read(self, bytes: &[u8]) -> f64 {
        match self {
            Self::Int8 => bytes[0] as i8 as f64,
            Self::Uint8 | Self::Uint8Clamped => bytes[0] as f64,
            Self::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::Uint16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::Int32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::Uint32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::Float64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(raw)
            }
        }
    }

    /// Encode one element into `out`, which holds `bytes_per_element` bytes.
    ///
    /// Integer kinds wrap modulo their width, `Uint8Clamped` clamps and
    /// rounds half to even.
    pub fn write(self, value: f64, out: &mut [u8]) {
        match self {
            Self::Int8 => out[0] = wrap_integer(value, 8) as u8,
            Self::Uint8 => out[0] = wrap_integer(value, 8) as u8,
            Self::Uint8Clamped => out[0] = clamp_u8(value),
            Self::Int16 | Self::Uint16 => {
                out[..2].copy_from_slice(&(wrap_integer(value, 16) as u16).to_le_bytes())
            }
            Self::Int32 | Self::Uint32 => {
                out[..4].copy_from_slice(&(wrap_integer(value, 32) as u32).to_le_bytes())
            }
            Self::Float32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            Self::Float64 => out[..8].copy_from_slice(&value.to_le_bytes()),
        }
    }
}

impl fmt::Display for TypedArrayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.constructor_name())
    }
}

fn wrap_integer(value: f64, bits: u32) -> u64 {
    if !value.is_finite() {
        return 0;
    }
    let modulus = 2f64.powi(bits as i32);
    value.trunc().rem_euclid(modulus) as u64
}

fn clamp_u8(value: f64) -> u8 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    if value >= 255.0 {
        return 255;
    }
    let floor = value.floor();
    let rounded = match value - floor {
        d if d < 0.5 => floor,
        d if d > 0.5 => floor + 1.0,
        _ if floor % 2.0 == 0.0 => floor,
        _ => floor + 1.0,
    };
    rounded as u8
}

/// Layout of a typed array view over its buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedArrayInfo {
    pub kind: TypedArrayKind,
    pub buffer: ValueRef,
    pub byte_offset: usize,
    pub length: usize,
}

impl TypedArrayInfo {
    pub fn byte_length(&self) -> usize {
        self.length * self.kind.bytes_per_element()
    }
}
