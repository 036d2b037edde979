// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Wire decoders layered on [`Cursor`].
//!
//! Every decoder is context-free: it needs nothing beyond the byte stream.
//! Constructs whose decoding is entangled with validation (init
//! expressions, whole segments) are assembled by the parser instead.

use num_enum::TryFromPrimitive;

use crate::cursor::Cursor;
use crate::error::{Error, ParseError};
use crate::leb128::S33;
use crate::types::{
    BlockType, BrTableOperands, BulkOpcode, CallIndirectOperands, ElemIdx, Export,
    ExportDescriptor, FuncIdx, FunctionType, GlobalIdx, GlobalType, GlobalTypeMutability, Import,
    ImportDescriptor, LabelIdx, Limits, LocalsGroup, MemArg, MemIdx, MemType, Opcode, RefType,
    SectionId, TableCopyOperands, TableIdx, TableInitOperands, TableType, TypeIdx, ValType,
};

// Upper bound on speculative `Vec` reservations driven by wire counts.
pub(crate) const PREALLOC_LIMIT: u32 = 0x1000;

// Types that can be decoded from the byte stream.
pub(crate) trait Decode: Sized {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error>;
}

macro_rules! impl_decode_for_u8_enum {
    ($type:ty, $make_err:path) => {
        impl Decode for $type {
            fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
                let byte = cursor.read_byte()?;
                Self::try_from(byte).map_err(|_| $make_err(byte).into())
            }
        }
    };
}

macro_rules! impl_decode_for_index {
    ($type:ty) => {
        impl Decode for $type {
            fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
                Ok(Self::new(cursor.read_leb::<u32>()?))
            }
        }
    };
}

impl_decode_for_u8_enum!(GlobalTypeMutability, ParseError::InvalidMutabilityFlag);
impl_decode_for_u8_enum!(RefType, ParseError::ExpectedReferenceType);
impl_decode_for_u8_enum!(SectionId, ParseError::InvalidSectionId);

impl_decode_for_index!(ElemIdx);
impl_decode_for_index!(FuncIdx);
impl_decode_for_index!(GlobalIdx);
impl_decode_for_index!(LabelIdx);
impl_decode_for_index!(MemIdx);
impl_decode_for_index!(TableIdx);
impl_decode_for_index!(TypeIdx);

/// Reads a `vec(T)`: a u32 count followed by that many elements.
pub(crate) fn read_vec<T: Decode>(cursor: &mut Cursor) -> Result<Vec<T>, Error> {
    let count: u32 = cursor.read_leb()?;
    let mut items = Vec::with_capacity(count.min(PREALLOC_LIMIT) as usize);
    for _ in 0..count {
        items.push(T::decode(cursor)?);
    }
    Ok(items)
}

/// Reads a `vec(byte)` as a contiguous copy.
pub(crate) fn read_byte_vec(cursor: &mut Cursor) -> Result<Vec<u8>, Error> {
    let count: u32 = cursor.read_leb()?;
    Ok(cursor.read_exact(count as usize)?.to_vec())
}

impl Decode for ValType {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        let byte = cursor.read_byte()?;
        match Self::try_from(byte) {
            // v128 never appears on the wire in the validated subset; it
            // exists only as an internal value type.
            Ok(Self::Vec) | Err(_) => Err(ParseError::InvalidValueTypeTag(byte).into()),
            Ok(ty) => Ok(ty),
        }
    }
}

impl Decode for BlockType {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        let start = cursor.pos();
        let byte = cursor.read_byte()?;
        if byte == 0x40 {
            return Ok(Self::Empty);
        }
        if let Ok(ty) = ValType::try_from(byte)
            && !ty.is_vector()
        {
            return Ok(Self::Result(ty));
        }

        // Not a single-byte form: re-read as a signed 33-bit type index.
        cursor.rewind_to(start);
        let value = cursor.read_leb::<S33>()?.0;
        if value < 0 {
            return Err(ParseError::InvalidValueTypeTag(byte).into());
        }
        // The 33-bit budget bounds non-negative values to u32 range.
        Ok(Self::TypeIndex(TypeIdx::new(value as u32)))
    }
}

impl Decode for String {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        let len: u32 = cursor.read_leb()?;
        let bytes = cursor.read_exact(len as usize)?;
        str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ParseError::InvalidUtf8.into())
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, TryFromPrimitive)]
enum FunctionTypeToken {
    Value = 0x60,
}
impl_decode_for_u8_enum!(FunctionTypeToken, ParseError::InvalidFunctionTypeTag);

impl Decode for FunctionType {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        FunctionTypeToken::decode(cursor)?;
        Ok(Self {
            parameters: read_vec(cursor)?,
            results: read_vec(cursor)?,
        })
    }
}

#[derive(Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
enum LimitsToken {
    WithoutMax = 0x00,
    WithMax = 0x01,
}
impl_decode_for_u8_enum!(LimitsToken, ParseError::InvalidLimitsFlag);

impl Decode for Limits {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        let token = LimitsToken::decode(cursor)?;
        let min: u32 = cursor.read_leb()?;
        let max = match token {
            LimitsToken::WithoutMax => None,
            LimitsToken::WithMax => Some(cursor.read_leb()?),
        };
        Ok(Self { min, max })
    }
}

impl Decode for TableType {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            reftype: RefType::decode(cursor)?,
            limits: Limits::decode(cursor)?,
        })
    }
}

impl Decode for MemType {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self::new(Limits::decode(cursor)?))
    }
}

impl Decode for GlobalType {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            value: ValType::decode(cursor)?,
            mutability: GlobalTypeMutability::decode(cursor)?,
        })
    }
}

#[derive(Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
enum ImportDescriptorToken {
    Function = 0x0,
    Table = 0x1,
    Memory = 0x2,
    Global = 0x3,
}
impl_decode_for_u8_enum!(ImportDescriptorToken, ParseError::InvalidExternTag);

impl Decode for ImportDescriptor {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        type Token = ImportDescriptorToken;

        match Token::decode(cursor)? {
            Token::Function => Ok(Self::Function(TypeIdx::decode(cursor)?)),
            Token::Table => Ok(Self::Table(TableType::decode(cursor)?)),
            Token::Memory => Ok(Self::Memory(MemType::decode(cursor)?)),
            Token::Global => Ok(Self::Global(GlobalType::decode(cursor)?)),
        }
    }
}

impl Decode for Import {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            module: String::decode(cursor)?,
            field: String::decode(cursor)?,
            descriptor: ImportDescriptor::decode(cursor)?,
        })
    }
}

#[derive(Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
enum ExportDescriptorToken {
    Function = 0x0,
    Table = 0x1,
    Memory = 0x2,
    Global = 0x3,
}
impl_decode_for_u8_enum!(ExportDescriptorToken, ParseError::InvalidExternTag);

impl Decode for ExportDescriptor {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        type Token = ExportDescriptorToken;

        match Token::decode(cursor)? {
            Token::Function => Ok(Self::Function(FuncIdx::decode(cursor)?)),
            Token::Table => Ok(Self::Table(TableIdx::decode(cursor)?)),
            Token::Memory => Ok(Self::Memory(MemIdx::decode(cursor)?)),
            Token::Global => Ok(Self::Global(GlobalIdx::decode(cursor)?)),
        }
    }
}

impl Decode for Export {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            field: String::decode(cursor)?,
            descriptor: ExportDescriptor::decode(cursor)?,
        })
    }
}

impl Decode for LocalsGroup {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            count: cursor.read_leb()?,
            ty: ValType::decode(cursor)?,
        })
    }
}

impl Decode for MemArg {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        // Bit 6 of the alignment flags signals an explicit memory index.
        const MEMORY_INDEX_FLAG: u32 = 1 << 6;

        let mut align: u32 = cursor.read_leb()?;
        let memory = if align & MEMORY_INDEX_FLAG != 0 {
            align &= !MEMORY_INDEX_FLAG;
            cursor.read_leb()?
        } else {
            0
        };
        let offset: u32 = cursor.read_leb()?;
        Ok(Self {
            align,
            memory,
            offset,
        })
    }
}

impl Decode for BrTableOperands {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            labels: read_vec(cursor)?,
            default: LabelIdx::decode(cursor)?,
        })
    }
}

impl Decode for CallIndirectOperands {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            ty: TypeIdx::decode(cursor)?,
            table: TableIdx::decode(cursor)?,
        })
    }
}

impl Decode for TableCopyOperands {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            dst: TableIdx::decode(cursor)?,
            src: TableIdx::decode(cursor)?,
        })
    }
}

impl Decode for TableInitOperands {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            elem: ElemIdx::decode(cursor)?,
            table: TableIdx::decode(cursor)?,
        })
    }
}

impl Decode for Opcode {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        let byte = cursor.read_byte()?;
        Self::try_from(byte).map_err(|_| {
            ParseError::UnknownOpcode {
                opcode: byte,
                extension: None,
            }
            .into()
        })
    }
}

impl Decode for BulkOpcode {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        let value: u32 = cursor.read_leb()?;
        Self::try_from(value).map_err(|_| {
            ParseError::UnknownOpcode {
                opcode: 0xfc,
                extension: Some(value),
            }
            .into()
        })
    }
}

#[derive(Clone, Copy, TryFromPrimitive)]
#[repr(u32)]
pub(crate) enum ElementSegmentToken {
    ActiveElemIndices = 0,
    PassiveElemIndices = 1,
    ActiveTableIndexElemIndices = 2,
    DeclarativeElemIndices = 3,
    ActiveElemExprs = 4,
    PassiveElemExprs = 5,
    ActiveTableIndexElemExprs = 6,
    DeclarativeElemExprs = 7,
}

impl Decode for ElementSegmentToken {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        let value: u32 = cursor.read_leb()?;
        Self::try_from(value).map_err(|_| ParseError::InvalidElementTag(value).into())
    }
}

#[derive(Clone, Copy, Debug, TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum ElementKind {
    FuncRef = 0x00,
}

impl Decode for ElementKind {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        let byte = cursor.read_byte()?;
        Self::try_from(byte).map_err(|_| ParseError::InvalidElementTag(u32::from(byte)).into())
    }
}

impl From<ElementKind> for RefType {
    fn from(value: ElementKind) -> Self {
        match value {
            ElementKind::FuncRef => Self::Func,
        }
    }
}

#[derive(Clone, Copy, TryFromPrimitive)]
#[repr(u32)]
pub(crate) enum DataSegmentToken {
    ActiveNoMemIdx = 0,
    Passive = 1,
    ActiveWithMemIdx = 2,
}

impl Decode for DataSegmentToken {
    fn decode(cursor: &mut Cursor) -> Result<Self, Error> {
        let value: u32 = cursor.read_leb()?;
        Self::try_from(value).map_err(|_| ParseError::InvalidDataTag(value).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(bytes: &[u8]) -> Cursor {
        Cursor::from(bytes.to_vec())
    }

    #[test]
    fn test_valtype_tags() {
        assert_eq!(
            ValType::decode(&mut cursor(&[0x7f])).unwrap(),
            ValType::I32
        );
        assert_eq!(
            ValType::decode(&mut cursor(&[0x70])).unwrap(),
            ValType::FuncRef
        );
        assert_eq!(
            ValType::decode(&mut cursor(&[0x7b])).unwrap_err(),
            Error::Parse(ParseError::InvalidValueTypeTag(0x7b))
        );
        assert_eq!(
            ValType::decode(&mut cursor(&[0x6e])).unwrap_err(),
            Error::Parse(ParseError::InvalidValueTypeTag(0x6e))
        );
    }

    #[test]
    fn test_block_type() {
        assert_eq!(
            BlockType::decode(&mut cursor(&[0x40])).unwrap(),
            BlockType::Empty
        );
        assert_eq!(
            BlockType::decode(&mut cursor(&[0x7e])).unwrap(),
            BlockType::Result(ValType::I64)
        );
        assert_eq!(
            BlockType::decode(&mut cursor(&[0x01])).unwrap(),
            BlockType::TypeIndex(TypeIdx::new(1))
        );
        // Non-minimally encoded type index.
        assert_eq!(
            BlockType::decode(&mut cursor(&[0x81, 0x00])).unwrap(),
            BlockType::TypeIndex(TypeIdx::new(1))
        );
        // A negative index is not a block type.
        assert_eq!(
            BlockType::decode(&mut cursor(&[0x41])).unwrap_err(),
            Error::Parse(ParseError::InvalidValueTypeTag(0x41))
        );
    }

    #[test]
    fn test_limits_flags() {
        assert_eq!(
            Limits::decode(&mut cursor(&[0x00, 0x01])).unwrap(),
            Limits { min: 1, max: None }
        );
        assert_eq!(
            Limits::decode(&mut cursor(&[0x01, 0x01, 0x02])).unwrap(),
            Limits {
                min: 1,
                max: Some(2)
            }
        );
        assert_eq!(
            Limits::decode(&mut cursor(&[0x02, 0x01])).unwrap_err(),
            Error::Parse(ParseError::InvalidLimitsFlag(0x02))
        );
    }

    #[test]
    fn test_global_mutability_flag() {
        assert_eq!(
            GlobalType::decode(&mut cursor(&[0x7f, 0x02])).unwrap_err(),
            Error::Parse(ParseError::InvalidMutabilityFlag(0x02))
        );
    }

    #[test]
    fn test_memarg() {
        // Plain alignment and offset address memory zero.
        assert_eq!(
            MemArg::decode(&mut cursor(&[0x02, 0x0a])).unwrap(),
            MemArg {
                align: 2,
                memory: 0,
                offset: 10
            }
        );

        // Bit 6 of the flags selects an explicit memory index.
        assert_eq!(
            MemArg::decode(&mut cursor(&[0x41, 0x03, 0x0a])).unwrap(),
            MemArg {
                align: 1,
                memory: 3,
                offset: 10
            }
        );
    }

    #[test]
    fn test_opcode_dispatch() {
        assert_eq!(
            Opcode::decode(&mut cursor(&[0x41])).unwrap(),
            Opcode::I32Const
        );
        assert_eq!(
            Opcode::decode(&mut cursor(&[0x06])).unwrap_err(),
            Error::Parse(ParseError::UnknownOpcode {
                opcode: 0x06,
                extension: None
            })
        );
        assert_eq!(
            BulkOpcode::decode(&mut cursor(&[0x08])).unwrap(),
            BulkOpcode::MemoryInit
        );
        assert_eq!(
            BulkOpcode::decode(&mut cursor(&[0x12])).unwrap_err(),
            Error::Parse(ParseError::UnknownOpcode {
                opcode: 0xfc,
                extension: Some(18)
            })
        );
    }

    #[test]
    fn test_name_utf8() {
        assert_eq!(
            String::decode(&mut cursor(&[0x02, b'h', b'i'])).unwrap(),
            "hi"
        );
        assert_eq!(
            String::decode(&mut cursor(&[0x01, 0xff])).unwrap_err(),
            Error::Parse(ParseError::InvalidUtf8)
        );
    }
}
