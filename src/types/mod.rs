// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! WebAssembly type definitions.
//!
//! This module contains all the WebAssembly type definitions used for parsing
//! and representing WASM modules, including value types, function signatures,
//! imports, exports, and other WASM constructs.

mod instr;
pub use instr::*;

use core::cmp;

use num_enum::TryFromPrimitive;

// Defines a public newtype without public mutable access to the underlying
// type, along with some convenience trait implementations like Deref and
// AsRef.
macro_rules! newtype {
    (
        $(#[$meta:meta])*
        pub struct $type:ident($underlying:ty);
    ) => {
        $(#[$meta])*
        pub struct $type(pub(crate) $underlying);

        impl $type {
            pub fn new(value: $underlying) -> Self {
                Self(value)
            }
        }

        impl ::core::ops::Deref for $type {
            type Target = $underlying;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl AsRef<$underlying> for $type {
            fn as_ref(&self) -> &$underlying {
                &self.0
            }
        }
    };
}
pub(crate) use newtype;

/// WebAssembly module version.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum Version {
    #[default]
    V1 = 1,
}

/// The type of a reference to an object in the runtime store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum RefType {
    /// Function reference type.
    Func = 0x70,
    /// External reference type.
    Extern = 0x6f,
}

/// Value types classify the individual values that WebAssembly code can
/// compute with and the values that a variable accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ValType {
    /// 32-bit signed integer.
    I32 = 0x7f,
    /// 64-bit signed integer.
    I64 = 0x7e,
    /// 32-bit floating point number.
    F32 = 0x7d,
    /// 64-bit floating point number.
    F64 = 0x7c,
    /// 128-bit SIMD vector.
    Vec = 0x7b,
    /// Function reference.
    FuncRef = RefType::Func as u8,
    /// External reference.
    ExternRef = RefType::Extern as u8,
}

impl ValType {
    /// Whether this is a reference type.
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::FuncRef | Self::ExternRef)
    }

    /// Whether this is the 128-bit vector type.
    pub const fn is_vector(self) -> bool {
        matches!(self, Self::Vec)
    }

    /// Whether this is a numeric (integer or float) type.
    pub const fn is_numeric(self) -> bool {
        !self.is_reference() && !self.is_vector()
    }

    /// The width of the type's values in bits, if it has one.
    pub const fn bit_width(self) -> Option<u32> {
        match self {
            Self::I32 | Self::F32 => Some(32),
            Self::I64 | Self::F64 => Some(64),
            Self::Vec => Some(128),
            Self::FuncRef | Self::ExternRef => None,
        }
    }
}

impl From<RefType> for ValType {
    fn from(value: RefType) -> Self {
        match value {
            RefType::Func => Self::FuncRef,
            RefType::Extern => Self::ExternRef,
        }
    }
}

/// The signature of a function, mapping parameters to results. They are also
/// used to classify the inputs and outputs of instructions.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FunctionType {
    pub parameters: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FunctionType {
    /// The empty signature, `[] -> []`.
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// The signature `[] -> [ty]`.
    pub(crate) fn returning(ty: ValType) -> Self {
        Self {
            parameters: Vec::new(),
            results: vec![ty],
        }
    }
}

/// The size range of the resizeable storage associated with memory (# of
/// pages) and table types (# of elements).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limits {
    /// Minimum size.
    pub min: u32,
    /// Maximum size, with None indicating that there is no upper limit.
    pub max: Option<u32>,
}

newtype!(
    /// A linear memory type with its size limits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct MemType(Limits);
);

impl MemType {
    /// The WebAssembly page size.
    pub const PAGE_SIZE: usize = 0x1_0000; // 64 KiB

    /// The maximum number of pages a memory may span.
    pub const MAX_PAGES: u32 = (u16::MAX as u32) + 1;

    /// The minimum size in bytes of the linear memory region.
    pub const fn min_size_bytes(&self) -> usize {
        (self.0.min as usize) * Self::PAGE_SIZE
    }

    /// The maximum size in bytes of the linear memory region, if any.
    pub fn max_size_bytes(&self) -> Option<usize> {
        self.0.max.map(|max| (max as usize) * Self::PAGE_SIZE)
    }
}

/// WebAssembly table type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TableType {
    /// Type of references stored in table.
    pub reftype: RefType,
    /// Table size limits.
    pub limits: Limits,
}

/// The mutability of a global variable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum GlobalTypeMutability {
    /// Immutable.
    Const = 0x00,
    /// Mutable.
    Var = 0x01,
}

/// Represents a global variable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GlobalType {
    /// The type of the global.
    pub value: ValType,

    /// The mutability of the global.
    pub mutability: GlobalTypeMutability,
}

newtype!(
    /// An index into the type section.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct TypeIdx(u32);
);

newtype!(
    /// An index into the function index space.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct FuncIdx(u32);
);

newtype!(
    /// An index into the table index space.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct TableIdx(u32);
);

newtype!(
    /// An index into the memory index space.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct MemIdx(u32);
);

newtype!(
    /// An index into the global index space.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct GlobalIdx(u32);
);

newtype!(
    /// An index into the element section.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ElemIdx(u32);
);

newtype!(
    /// An index referencing structured control instructions inside an
    /// instruction sequence.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct LabelIdx(u32);
);

newtype!(
    /// A validated initialization expression, stored as the exact slice of
    /// wire bytes, including the terminating `end` opcode.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct Expression(Box<[u8]>);
);

/// Section identifier within a module.
///
/// `PartialOrd` is implemented so that, for non-custom section IDs, an ID is
/// less than another precisely when the former must appear in a module
/// before the latter when both are present.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum SectionId {
    /// Custom section with arbitrary data.
    Custom = 0,
    /// Function type declarations.
    Type = 1,
    /// Import declarations.
    Import = 2,
    /// Function type indices for module functions.
    Function = 3,
    /// Table declarations.
    Table = 4,
    /// Memory declarations.
    Memory = 5,
    /// Global declarations.
    Global = 6,
    /// Export declarations.
    Export = 7,
    /// Start function index.
    Start = 8,
    /// Element segments for table initialization.
    Element = 9,
    /// Function bodies.
    Code = 10,
    /// Data segments for memory initialization.
    Data = 11,
    /// Data segment count (for bulk memory operations).
    DataCount = 12,
}

// The logical order, as documented above.
impl PartialOrd for SectionId {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        use SectionId::{Code, Data, DataCount};

        match (self, other) {
            // DataCount comes before Code and Data in the logical ordering.
            (DataCount, Code | Data) => Some(cmp::Ordering::Less),
            (Code | Data, DataCount) => Some(cmp::Ordering::Greater),

            // For all other cases, use the numeric ordering.
            _ => (*self as u8).partial_cmp(&(*other as u8)),
        }
    }
}

/// Import descriptor types.
#[derive(Clone, Copy, Debug)]
pub enum ImportDescriptor {
    /// Import a function with the given type index.
    Function(TypeIdx),
    /// Import a table with the given type.
    Table(TableType),
    /// Import a memory with the given type.
    Memory(MemType),
    /// Import a global with the given type.
    Global(GlobalType),
}

/// An import declaration.
#[derive(Debug)]
pub struct Import {
    /// Name of the module to import from.
    pub module: String,
    /// Name of the imported entity.
    pub field: String,
    /// Type of the imported entity.
    pub descriptor: ImportDescriptor,
}

/// A global declaration.
#[derive(Clone, Debug)]
pub struct Global {
    /// Global type and mutability.
    pub ty: GlobalType,
    /// Initialization expression.
    pub init: Expression,
}

/// Describes what kind of entity is being exported.
#[derive(Clone, Copy, Debug)]
pub enum ExportDescriptor {
    /// Export a function with the given index.
    Function(FuncIdx),
    /// Export a table with the given index.
    Table(TableIdx),
    /// Export a memory with the given index.
    Memory(MemIdx),
    /// Export a global with the given index.
    Global(GlobalIdx),
}

/// An export declaration.
#[derive(Debug)]
pub struct Export {
    /// Name of the exported entity.
    pub field: String,
    /// Type and index of the exported entity.
    pub descriptor: ExportDescriptor,
}

// [wasm]: 5.5.12 Element Section

/// WebAssembly element segment.
#[derive(Clone, Debug)]
pub struct ElementSegment {
    /// The type of references this element segment contains.
    pub ty: RefType,
    /// The initial values for the element segment.
    pub init: ElementInit,
    /// How this element segment should be placed (active, passive, or
    /// declarative).
    pub mode: ElementMode,
}

/// The initialization data for an element segment.
#[derive(Clone, Debug)]
pub enum ElementInit {
    /// Element segment contains function indices.
    FunctionIndices(Vec<FuncIdx>),
    /// Element segment contains initialization expressions.
    Expressions(Vec<Expression>),
}

/// Active element mode with table and offset.
#[derive(Clone, Debug)]
pub struct ElementModeActive {
    /// Index of the table to initialize.
    pub table: TableIdx,
    /// Expression computing the offset within the table.
    pub offset: Expression,
}

/// Element segment mode.
#[derive(Clone, Debug)]
pub enum ElementMode {
    Passive,
    Active(ElementModeActive),
    Declarative,
}

/// A run of local variables sharing one type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LocalsGroup {
    /// Number of locals in the run.
    pub count: u32,
    /// Their common type.
    pub ty: ValType,
}

/// A function body as it appears in the code section.
#[derive(Clone, Debug)]
pub struct FunctionBody {
    /// The declared byte size of the entry (locals plus body).
    pub declared_size: u32,
    /// Local variable declarations, grouped by type.
    pub locals: Vec<LocalsGroup>,
    /// The body's bytecode, up to and including the final `end`.
    pub body: Vec<u8>,
}

/// A data segment for initializing linear memory.
#[derive(Clone, Debug)]
pub struct DataSegment {
    /// The initial data bytes for this segment.
    pub init: Vec<u8>,
    /// How this data segment should be placed (active or passive).
    pub mode: DataMode,
}

/// The placement mode for a data segment.
#[derive(Clone, Debug)]
pub enum DataMode {
    /// Passive data segment (must be explicitly copied via memory.init).
    Passive,
    /// Active data segment (automatically copied to memory during
    /// instantiation).
    Active(DataModeActive),
}

/// Active placement information for a data segment.
#[derive(Clone, Debug)]
pub struct DataModeActive {
    /// Index of the memory to initialize.
    pub memory: MemIdx,
    /// Expression computing the offset within the memory.
    pub offset: Expression,
}
