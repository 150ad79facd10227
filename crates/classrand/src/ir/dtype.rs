use crate::HashMap;
use crate::ir::ClassId;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DTypeId(pub usize);

impl fmt::Display for DTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dtype{}", self.0)
    }
}

/// Data types as resolved by the width pass. Every width is concrete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DType {
    /// Packed bit vector (`bit [7:0]`, `int`, `logic signed [99:0]`).
    Basic { width: usize, signed: bool },
    Struct(StructDType),
    Enum(EnumDType),
    /// Handle to an instance of a class.
    ClassRef(ClassId),
    UnpackArray { elem: DTypeId, len: usize },
    /// Types the randomize pass has no strategy for (`string`, `real`, queues).
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDType {
    pub name: String,
    pub members: Vec<StructMember>,
}

/// A packed struct member. `lsb` is the member's offset inside the struct word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub name: String,
    pub dtype: DTypeId,
    pub lsb: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDType {
    pub name: String,
    pub base: DTypeId,
    pub items: Vec<EnumItem>,
}

impl EnumDType {
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

/// `value` is `None` until constant folding has run on the item initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumItem {
    pub name: String,
    pub value: Option<BigUint>,
}

/// Global type table. Basic types are interned by (width, signedness).
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: Vec<DType>,
    basic_cache: HashMap<(usize, bool), DTypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, dtype: DType) -> DTypeId {
        if let DType::Basic { width, signed } = dtype {
            return self.basic(width, signed);
        }
        let id = DTypeId(self.types.len());
        self.types.push(dtype);
        id
    }

    pub fn basic(&mut self, width: usize, signed: bool) -> DTypeId {
        if let Some(id) = self.basic_cache.get(&(width, signed)) {
            return *id;
        }
        let id = DTypeId(self.types.len());
        self.types.push(DType::Basic { width, signed });
        self.basic_cache.insert((width, signed), id);
        id
    }

    /// 32-bit signed `int`, the return type of every `randomize` method.
    pub fn int(&mut self) -> DTypeId {
        self.basic(32, true)
    }

    pub fn get(&self, id: DTypeId) -> &DType {
        &self.types[id.0]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn width(&self, id: DTypeId) -> usize {
        match self.get(id) {
            DType::Basic { width, .. } => *width,
            DType::Struct(s) => s
                .members
                .iter()
                .map(|m| m.lsb + self.width(m.dtype))
                .max()
                .unwrap_or(0),
            DType::Enum(e) => self.width(e.base),
            DType::UnpackArray { elem, len } => self.width(*elem) * len,
            DType::ClassRef(_) | DType::Other(_) => 0,
        }
    }

    pub fn is_signed(&self, id: DTypeId) -> bool {
        match self.get(id) {
            DType::Basic { signed, .. } => *signed,
            DType::Enum(e) => self.is_signed(e.base),
            _ => false,
        }
    }

    pub fn as_enum(&self, id: DTypeId) -> Option<&EnumDType> {
        match self.get(id) {
            DType::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_class(&self, id: DTypeId) -> Option<ClassId> {
        match self.get(id) {
            DType::ClassRef(class) => Some(*class),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DTypeId, &DType)> {
        self.types.iter().enumerate().map(|(i, t)| (DTypeId(i), t))
    }
}

pub fn mask(width: usize) -> BigUint {
    (BigUint::one() << width) - BigUint::one()
}

/// Smallest value representable by a `width`-bit vector.
pub fn type_min(width: usize, signed: bool) -> BigInt {
    if signed && width > 0 {
        -(BigInt::one() << (width - 1))
    } else {
        BigInt::zero()
    }
}

/// Largest value representable by a `width`-bit vector.
pub fn type_max(width: usize, signed: bool) -> BigInt {
    if width == 0 {
        BigInt::zero()
    } else if signed {
        (BigInt::one() << (width - 1)) - BigInt::one()
    } else {
        (BigInt::one() << width) - BigInt::one()
    }
}

/// Reads a raw bit pattern as an integer of the given width and signedness.
pub fn bits_to_int(bits: &BigUint, width: usize, signed: bool) -> BigInt {
    let bits = bits & mask(width);
    if signed && width > 0 && bits.bit((width - 1) as u64) {
        BigInt::from_biguint(Sign::Plus, bits) - (BigInt::one() << width)
    } else {
        BigInt::from_biguint(Sign::Plus, bits)
    }
}

/// Two's-complement encoding of `value` truncated to `width` bits.
pub fn int_to_bits(value: &BigInt, width: usize) -> BigUint {
    let modulus = BigInt::one() << width;
    let wrapped = ((value % &modulus) + &modulus) % &modulus;
    wrapped.to_biguint().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_types_are_interned() {
        let mut table = TypeTable::new();
        let a = table.basic(8, false);
        let b = table.add(DType::Basic {
            width: 8,
            signed: false,
        });
        let c = table.basic(8, true);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_struct_width_follows_layout() {
        let mut table = TypeTable::new();
        let u4 = table.basic(4, false);
        let u8 = table.basic(8, false);
        let s = table.add(DType::Struct(StructDType {
            name: "hdr_t".into(),
            members: vec![
                StructMember {
                    name: "kind".into(),
                    dtype: u4,
                    lsb: 8,
                },
                StructMember {
                    name: "len".into(),
                    dtype: u8,
                    lsb: 0,
                },
            ],
        }));
        assert_eq!(table.width(s), 12);
    }

    #[test]
    fn test_signed_round_trip_at_width() {
        let bits = int_to_bits(&BigInt::from(-3), 8);
        assert_eq!(bits, BigUint::from(0xfdu32));
        assert_eq!(bits_to_int(&bits, 8, true), BigInt::from(-3));
        assert_eq!(bits_to_int(&bits, 8, false), BigInt::from(253));
    }

    #[test]
    fn test_type_extremes() {
        assert_eq!(type_min(8, true), BigInt::from(-128));
        assert_eq!(type_max(8, true), BigInt::from(127));
        assert_eq!(type_max(8, false), BigInt::from(255));
        assert_eq!(type_max(100, false), (BigInt::one() << 100) - 1);
    }
}
