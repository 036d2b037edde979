// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Error types for module reading, parsing, and validation.

use crate::types::{Limits, Opcode, SectionId, ValType};

/// Represents low-level errors from reading the input byte stream.
///
/// `UnexpectedEof` doubles as control flow inside [`Parser::push`]: a state
/// transition that runs out of buffered input rewinds and is retried once
/// more bytes arrive. It only becomes fatal at [`Parser::finish`].
///
/// [`Parser::push`]: crate::Parser::push
/// [`Parser::finish`]: crate::Parser::finish
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ReadError {
    /// Ran out of input mid-read.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// A LEB128 encoding uses more bytes than its target width permits.
    #[error("LEB128 encoding exceeds its byte budget")]
    Leb128TooLarge,
    /// A LEB128 encoding carries value bits beyond its target width.
    #[error("LEB128 encoding has value bits past the target width")]
    Leb128TooLong,
}

/// Represents errors that arise from malformed bytes during module parsing.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// Invalid WebAssembly magic number.
    #[error("invalid magic ({0:#x})")]
    InvalidModuleMagic(u32),
    /// Unsupported WebAssembly version number.
    #[error("unknown version ({0:#x})")]
    InvalidVersion(u32),
    /// Invalid section ID byte.
    #[error("invalid section ID ({0:#x})")]
    InvalidSectionId(u8),
    /// A function type did not begin with the 0x60 tag.
    #[error("invalid functype tag ({0:#x})")]
    InvalidFunctionTypeTag(u8),
    /// Invalid value type encoding.
    #[error("invalid valtype ({0:#x})")]
    InvalidValueTypeTag(u8),
    /// Invalid UTF-8 encoding in a name field.
    #[error("invalid UTF-8")]
    InvalidUtf8,
    /// Invalid import/export descriptor tag.
    #[error("invalid extern tag ({0:#x})")]
    InvalidExternTag(u8),
    /// A reference type was required but the byte is not a reftype tag.
    #[error("expected a reftype ({0:#x})")]
    ExpectedReferenceType(u8),
    /// Invalid limits flag byte.
    #[error("invalid limits flag ({0:#x})")]
    InvalidLimitsFlag(u8),
    /// Invalid global mutability flag byte.
    #[error("invalid mutability flag ({0:#x})")]
    InvalidMutabilityFlag(u8),
    /// Invalid element segment tag.
    #[error("invalid element tag ({0:#x})")]
    InvalidElementTag(u32),
    /// Invalid data segment tag.
    #[error("invalid data tag ({0:#x})")]
    InvalidDataTag(u32),
    /// Unknown instruction opcode.
    #[error("unknown opcode ({opcode:#x}, extension {extension:?})")]
    UnknownOpcode {
        opcode: u8,
        extension: Option<u32>,
    },
    /// Section length doesn't match the declared length.
    #[error("invalid section length for {id:?}: expected {expected:#x}; got {actual:#x}")]
    InvalidSectionLength {
        id: SectionId,
        expected: u32,
        actual: u32,
    },
    /// Function body length doesn't match the declared length.
    #[error("invalid func length: expected {expected:#x}; got {actual:#x}")]
    InvalidFunctionLength { expected: u32, actual: u32 },
    /// Function declares more local variables than a 32-bit counter holds.
    #[error("too many locals: at least {0} were specified")]
    TooManyLocals(u64),
    /// A non-custom section appears more than once in the module.
    #[error("duplicate of section ({0:?})")]
    DuplicateSection(SectionId),
    /// Non-custom sections appear in the wrong order.
    #[error("out-of-order sections: {before:?} before {after:?}")]
    OutOfOrderSection { before: SectionId, after: SectionId },
}

/// Represents errors from well-formed but ill-typed or structurally
/// inconsistent modules.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Limits out of range for their table or memory.
    #[error("invalid limits ({0:?})")]
    InvalidLimits(Limits),
    /// Function index out of bounds.
    #[error("invalid funcidx ({0})")]
    InvalidFunctionIndex(u32),
    /// Table index out of bounds.
    #[error("invalid tableidx ({0})")]
    InvalidTableIndex(u32),
    /// Memory index out of bounds.
    #[error("invalid memidx ({0})")]
    InvalidMemoryIndex(u32),
    /// Global index out of bounds.
    #[error("invalid globalidx ({0})")]
    InvalidGlobalIndex(u32),
    /// Type index out of bounds.
    #[error("invalid typeidx ({0})")]
    InvalidTypeIndex(u32),
    /// Data index out of bounds.
    #[error("invalid dataidx ({0})")]
    InvalidDataIndex(u32),
    /// Element index out of bounds.
    #[error("invalid elemidx ({0})")]
    InvalidElementIndex(u32),
    /// The data section disagrees with the data count section.
    #[error("data count mismatch: expected {expected}; got {actual}")]
    DataCountMismatch { expected: u32, actual: u32 },
    /// The code section disagrees with the function section.
    #[error("code count mismatch: {functions} functions but {codes} bodies")]
    CodeCountMismatch { functions: u32, codes: u32 },
    /// Operands left on the stack when a frame exits.
    #[error("stack height mismatch: expected {expected}; got {actual}")]
    StackHeightMismatch { expected: usize, actual: usize },
    /// An operand of the wrong type was popped.
    #[error("unexpected type: expected {expected:?}; got {actual:?}")]
    UnexpectedType { expected: ValType, actual: ValType },
    /// A pop was attempted at the current frame's floor.
    #[error("operand stack exhausted for the current frame")]
    StackEmpty,
    /// An operation required a control frame but none remain.
    #[error("control frame stack exhausted")]
    NoFramesLeft,
    /// Untyped `select` on mismatched or non-numeric operands, or a typed
    /// `select` with an operand count other than one.
    #[error("invalid select operand types")]
    InvalidSelectType,
    /// An `else` outside of any `if` frame.
    #[error("else without a matching if")]
    HangingElse,
    /// Branch label index out of bounds.
    #[error("invalid labelidx ({0})")]
    InvalidLabelIndex(u32),
    /// A `br_table` label whose arity disagrees with the default label.
    #[error("br_table arity mismatch at label {label}")]
    BrTableArityMismatch { label: u32 },
    /// Local index out of bounds.
    #[error("invalid localidx ({0})")]
    InvalidLocalIndex(u32),
    /// `global.set` on an immutable global.
    #[error("cannot set immutable global ({0})")]
    InvalidGlobalSet(u32),
    /// `memory.init` or `data.drop` without a data count section.
    #[error("missing data count section")]
    MissingDataCount,
    /// Alignment exponent exceeds the access width.
    #[error("invalid alignment (2^{align})")]
    InvalidAlignment { align: u32 },
    /// `call_indirect` through a table whose element type is not funcref.
    #[error("call_indirect requires a funcref table ({0})")]
    CanOnlyCallFuncref(u32),
    /// A reference-typed operand was required.
    #[error("expected a reference type")]
    ExpectedReference,
    /// A non-reference operand was required.
    #[error("expected a non-reference type")]
    ExpectedNonReference,
    /// Element types of a table operation's source and destination differ.
    #[error("table value type mismatch")]
    TableValueTypeMismatch,
    /// A non-constant instruction inside an initialization expression.
    #[error("non-constant instruction in init expression ({0:?})")]
    InvalidInitExprInstruction(Opcode),
    /// An `if` without `else` whose parameters and results differ.
    #[error("if without else must have matching parameter and result types")]
    IfWithoutElse,
    /// Two exports share a name.
    #[error("duplicate export name ({0:?})")]
    DuplicateExportName(String),
    /// The start function is not of type `[] -> []`.
    #[error("invalid start function ({0})")]
    InvalidStartFunction(u32),
}

/// Any error that can arise while parsing and validating a module.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// Error reading the raw byte stream.
    #[error(transparent)]
    Read(#[from] ReadError),
    /// Malformed bytes.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Well-formed but invalid module structure or code.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
