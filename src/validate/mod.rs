// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Function body and initialization expression validation.
//!
//! The validator is a stack-polymorphic abstract interpreter over
//! WebAssembly's structured control flow, a transcript of the validation
//! algorithm in the appendix of the WebAssembly specification. Operand
//! types are tracked as [`StackEntry`]: `Unknown` entries appear after
//! stack-polymorphic instructions (`unreachable`, `br`, `br_table`,
//! `return`) and satisfy every type constraint.

mod instr;

use core::cmp;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cursor::Cursor;
use crate::decode::Decode;
use crate::error::{Error, ParseError, ValidationError};
use crate::module::{Module, ModuleContext};
use crate::types::{
    FunctionType, GlobalType, LocalsGroup, Opcode, RefType, TableType, TypeIdx, ValType,
};

/// Read-only module state a body or init expression may consult. The
/// parser implements this for the partially built [`Module`] (whose
/// relevant sections are final by the time init expressions appear), and
/// workers get the frozen [`ModuleContext`] snapshot.
pub(crate) trait ValidationContext {
    fn func_type(&self, index: u32) -> Option<&FunctionType>;
    fn function_type_index(&self, index: u32) -> Option<TypeIdx>;
    fn table_type(&self, index: u32) -> Option<TableType>;
    fn global_type(&self, index: u32) -> Option<GlobalType>;
    fn element_type(&self, index: u32) -> Option<RefType>;
    fn total_memories(&self) -> u32;
    fn data_count(&self) -> Option<u32>;
}

impl ValidationContext for Module {
    fn func_type(&self, index: u32) -> Option<&FunctionType> {
        self.types.get(index as usize)
    }

    fn function_type_index(&self, index: u32) -> Option<TypeIdx> {
        Module::function_type_index(self, index)
    }

    fn table_type(&self, index: u32) -> Option<TableType> {
        Module::table_type(self, index)
    }

    fn global_type(&self, index: u32) -> Option<GlobalType> {
        Module::global_type(self, index)
    }

    fn element_type(&self, index: u32) -> Option<RefType> {
        self.elements.get(index as usize).map(|segment| segment.ty)
    }

    fn total_memories(&self) -> u32 {
        Module::total_memories(self)
    }

    fn data_count(&self) -> Option<u32> {
        self.data_count
    }
}

impl ValidationContext for ModuleContext {
    fn func_type(&self, index: u32) -> Option<&FunctionType> {
        self.types.get(index as usize)
    }

    fn function_type_index(&self, index: u32) -> Option<TypeIdx> {
        self.functions.get(index as usize).copied()
    }

    fn table_type(&self, index: u32) -> Option<TableType> {
        self.tables.get(index as usize).copied()
    }

    fn global_type(&self, index: u32) -> Option<GlobalType> {
        self.globals.get(index as usize).copied()
    }

    fn element_type(&self, index: u32) -> Option<RefType> {
        self.element_types.get(index as usize).copied()
    }

    fn total_memories(&self) -> u32 {
        self.total_memories
    }

    fn data_count(&self) -> Option<u32> {
        self.data_count
    }
}

/// An entry on the validator's value stack: a known type, or one made
/// polymorphic by a preceding stack-polymorphic instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StackEntry {
    Known(ValType),
    Unknown,
}

impl StackEntry {
    // `Unknown` satisfies every constraint.
    fn is_reference(self) -> bool {
        match self {
            Self::Known(ty) => ty.is_reference(),
            Self::Unknown => true,
        }
    }
}

/// The kind of control construct a frame models.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FrameKind {
    Block,
    Loop,
    If,
    Else,
    Function,
}

// A control frame. `height` is the frame's floor: the value stack height
// at entry. Operands below the floor belong to enclosing frames.
#[derive(Clone, Debug)]
struct Frame {
    ty: FunctionType,
    kind: FrameKind,
    height: usize,
    unreachable: bool,
}

// The local types at indices start, start+1, ..< end. Keeping runs instead
// of expanding them keeps a hostile locals count from forcing a huge
// allocation.
struct LocalsRange {
    start: u32,
    end: u32,
    ty: ValType,
}

// Builds the locals ranges for a function: parameters first, then the
// declared groups. The running total must fit a 32-bit counter.
fn make_locals(ty: &FunctionType, groups: &[LocalsGroup]) -> Result<Vec<LocalsRange>, Error> {
    let mut ranges = Vec::with_capacity(ty.parameters.len() + groups.len());
    let mut start = 0u32;
    for &param in &ty.parameters {
        let end = start
            .checked_add(1)
            .ok_or(ParseError::TooManyLocals(u64::from(u32::MAX) + 1))?;
        ranges.push(LocalsRange {
            start,
            end,
            ty: param,
        });
        start = end;
    }
    for group in groups {
        if group.count == 0 {
            continue;
        }
        let end = start.checked_add(group.count).ok_or_else(|| {
            ParseError::TooManyLocals(u64::from(start) + u64::from(group.count))
        })?;
        ranges.push(LocalsRange {
            start,
            end,
            ty: group.ty,
        });
        start = end;
    }
    Ok(ranges)
}

/// Validates a function body against its declared type and locals. `body`
/// is the exact bytecode slice, including the final `end`.
pub(crate) fn validate_function<C: ValidationContext>(
    context: &C,
    ty: &FunctionType,
    locals: &[LocalsGroup],
    body: &[u8],
    cancel: Option<&AtomicBool>,
) -> Result<(), Error> {
    let locals = make_locals(ty, locals)?;
    let mut cursor = Cursor::from(body.to_vec());
    let mut validator = CodeValidator {
        context,
        constant: false,
        locals,
        stack: Vec::new(),
        frames: vec![Frame {
            ty: ty.clone(),
            kind: FrameKind::Function,
            height: 0,
            unreachable: false,
        }],
        cancel,
    };
    validator.run(&mut cursor)?;
    if let Some(cancel) = cancel
        && cancel.load(Ordering::Relaxed)
    {
        return Ok(());
    }
    if !cursor.is_at_eof() {
        return Err(ParseError::InvalidFunctionLength {
            expected: body.len() as u32,
            actual: cursor.pos() as u32,
        }
        .into());
    }
    Ok(())
}

/// Validates a constant-only instruction sequence terminated by `end`,
/// producing a single value of the expected type. Reads directly from the
/// caller's cursor, so the byte count consumed is exactly the expression's
/// wire extent.
pub(crate) fn constant_expression<C: ValidationContext>(
    context: &C,
    cursor: &mut Cursor,
    expected: ValType,
) -> Result<(), Error> {
    let mut validator = CodeValidator {
        context,
        constant: true,
        locals: Vec::new(),
        stack: Vec::new(),
        frames: vec![Frame {
            ty: FunctionType::returning(expected),
            kind: FrameKind::Function,
            height: 0,
            unreachable: false,
        }],
        cancel: None,
    };
    validator.run(cursor)
}

/// A stateful abstract interpreter over one function body or init
/// expression.
pub(crate) struct CodeValidator<'a, C: ValidationContext> {
    context: &'a C,
    constant: bool,
    locals: Vec<LocalsRange>,
    stack: Vec<StackEntry>,
    frames: Vec<Frame>,
    cancel: Option<&'a AtomicBool>,
}

impl<C: ValidationContext> CodeValidator<'_, C> {
    // Runs until the outermost frame is popped by its `end`. If the input
    // runs out first, the cursor's `UnexpectedEof` propagates.
    fn run(&mut self, cursor: &mut Cursor) -> Result<(), Error> {
        while !self.frames.is_empty() {
            if let Some(cancel) = self.cancel
                && cancel.load(Ordering::Relaxed)
            {
                return Ok(());
            }
            let op = Opcode::decode(cursor)?;
            if self.constant && op != Opcode::End && !op.is_constant() {
                return Err(ValidationError::InvalidInitExprInstruction(op).into());
            }
            self.step(op, cursor)?;
        }
        Ok(())
    }

    fn push(&mut self, entry: StackEntry) {
        self.stack.push(entry);
    }

    // Pops one entry. At the frame's floor this yields `Unknown` when the
    // frame is unreachable and fails otherwise.
    fn pop(&mut self) -> Result<StackEntry, ValidationError> {
        let frame = self.frames.last().ok_or(ValidationError::NoFramesLeft)?;
        if self.stack.len() == frame.height {
            if frame.unreachable {
                Ok(StackEntry::Unknown)
            } else {
                Err(ValidationError::StackEmpty)
            }
        } else {
            self.stack.pop().ok_or(ValidationError::StackEmpty)
        }
    }

    // Pops one entry, requiring it to match the expected type. `Unknown`
    // matches anything.
    fn pop_expect(&mut self, expected: ValType) -> Result<(), ValidationError> {
        match self.pop()? {
            StackEntry::Known(actual) if actual != expected => {
                Err(ValidationError::UnexpectedType { expected, actual })
            }
            _ => Ok(()),
        }
    }

    // The types a branch to the given label must provide: the frame's
    // parameters for a loop (a branch re-enters it), its results otherwise.
    fn label_types(&self, label: u32) -> Result<Vec<ValType>, ValidationError> {
        let index = self
            .frames
            .len()
            .checked_sub(1 + label as usize)
            .ok_or(ValidationError::InvalidLabelIndex(label))?;
        let frame = &self.frames[index];
        Ok(match frame.kind {
            FrameKind::Loop => frame.ty.parameters.clone(),
            _ => frame.ty.results.clone(),
        })
    }

    // Truncates the value stack to the current frame's floor and marks the
    // frame unreachable; subsequent pops within it yield `Unknown`.
    fn mark_unreachable(&mut self) -> Result<(), ValidationError> {
        let frame = self.frames.last_mut().ok_or(ValidationError::NoFramesLeft)?;
        self.stack.truncate(frame.height);
        frame.unreachable = true;
        Ok(())
    }

    // Enters a block-like construct: pops its parameters, then makes them
    // visible again inside the new frame.
    fn enter(&mut self, kind: FrameKind, ty: FunctionType) -> Result<(), ValidationError> {
        for &param in ty.parameters.iter().rev() {
            self.pop_expect(param)?;
        }
        self.push_frame(kind, ty);
        Ok(())
    }

    // Pushes a frame whose floor is the current stack height, with the
    // frame's parameters above it.
    fn push_frame(&mut self, kind: FrameKind, ty: FunctionType) {
        let height = self.stack.len();
        for &param in &ty.parameters {
            self.stack.push(StackEntry::Known(param));
        }
        self.frames.push(Frame {
            ty,
            kind,
            height,
            unreachable: false,
        });
    }

    // Pops the current frame: its results must be on top, and the stack
    // must land exactly on the frame's floor.
    fn exit(&mut self) -> Result<Frame, ValidationError> {
        let frame = self.frames.last().ok_or(ValidationError::NoFramesLeft)?;
        let results = frame.ty.results.clone();
        let height = frame.height;
        for &result in results.iter().rev() {
            self.pop_expect(result)?;
        }
        if self.stack.len() != height {
            return Err(ValidationError::StackHeightMismatch {
                expected: height,
                actual: self.stack.len(),
            });
        }
        self.frames.pop().ok_or(ValidationError::NoFramesLeft)
    }

    // Resolves a block type immediate to a full function type.
    fn block_type(&self, cursor: &mut Cursor) -> Result<FunctionType, Error> {
        match crate::types::BlockType::decode(cursor)? {
            crate::types::BlockType::Empty => Ok(FunctionType::empty()),
            crate::types::BlockType::Result(ty) => Ok(FunctionType::returning(ty)),
            crate::types::BlockType::TypeIndex(index) => self
                .context
                .func_type(*index)
                .cloned()
                .ok_or_else(|| ValidationError::InvalidTypeIndex(*index).into()),
        }
    }

    fn func_type(&self, index: u32) -> Result<&FunctionType, ValidationError> {
        self.context
            .func_type(index)
            .ok_or(ValidationError::InvalidTypeIndex(index))
    }

    fn table(&self, index: u32) -> Result<TableType, ValidationError> {
        self.context
            .table_type(index)
            .ok_or(ValidationError::InvalidTableIndex(index))
    }

    fn memory(&self, index: u32) -> Result<(), ValidationError> {
        if index < self.context.total_memories() {
            Ok(())
        } else {
            Err(ValidationError::InvalidMemoryIndex(index))
        }
    }

    // `memory.init` and `data.drop` require the data count section, and an
    // index within it.
    fn data_index(&self, index: u32) -> Result<(), ValidationError> {
        let count = self
            .context
            .data_count()
            .ok_or(ValidationError::MissingDataCount)?;
        if index < count {
            Ok(())
        } else {
            Err(ValidationError::InvalidDataIndex(index))
        }
    }

    fn get_local(&self, index: u32) -> Result<ValType, ValidationError> {
        let found = self.locals.binary_search_by(|range| {
            if range.end <= index {
                cmp::Ordering::Less
            } else if index < range.start {
                cmp::Ordering::Greater
            } else {
                cmp::Ordering::Equal
            }
        });
        match found {
            Ok(position) => Ok(self.locals[position].ty),
            Err(_) => Err(ValidationError::InvalidLocalIndex(index)),
        }
    }
}
