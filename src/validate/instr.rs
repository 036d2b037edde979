// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Per-instruction validation rules.
//!
//! Each rule reads the instruction's immediates from the cursor and edits
//! the abstract value stack per the instruction's type signature.

use crate::cursor::Cursor;
use crate::decode::Decode;
use crate::error::{Error, ValidationError};
use crate::types::{
    BrTableOperands, BulkOpcode, CallIndirectOperands, GlobalTypeMutability, MemArg, Opcode,
    RefType, TableCopyOperands, TableInitOperands, ValType,
};

use super::{CodeValidator, FrameKind, StackEntry, ValidationContext};

impl<C: ValidationContext> CodeValidator<'_, C> {
    // Applies one instruction to the abstract state. Immediates are read
    // from the cursor as needed.
    pub(super) fn step(&mut self, op: Opcode, cursor: &mut Cursor) -> Result<(), Error> {
        use StackEntry::{Known, Unknown};
        use ValType::{F32, F64, I32, I64};

        match op {
            // Control instructions.
            Opcode::Unreachable => self.mark_unreachable()?,
            Opcode::Nop => {}
            Opcode::Block => {
                let ty = self.block_type(cursor)?;
                self.enter(FrameKind::Block, ty)?;
            }
            Opcode::Loop => {
                let ty = self.block_type(cursor)?;
                self.enter(FrameKind::Loop, ty)?;
            }
            Opcode::If => {
                let ty = self.block_type(cursor)?;
                self.pop_expect(I32)?;
                self.enter(FrameKind::If, ty)?;
            }
            Opcode::Else => {
                match self.frames.last().map(|frame| frame.kind) {
                    Some(FrameKind::If) => {}
                    _ => return Err(ValidationError::HangingElse.into()),
                }
                let frame = self.exit()?;
                self.push_frame(FrameKind::Else, frame.ty);
            }
            Opcode::End => {
                let frame = self.exit()?;
                // An `if` frame surviving to `end` never had an `else`; the
                // implicit else arm is the identity, so the block's
                // parameters and results must agree.
                if frame.kind == FrameKind::If && frame.ty.parameters != frame.ty.results {
                    return Err(ValidationError::IfWithoutElse.into());
                }
                if !self.frames.is_empty() {
                    for &result in &frame.ty.results {
                        self.push(Known(result));
                    }
                }
            }
            Opcode::Br => {
                let label: u32 = cursor.read_leb()?;
                let types = self.label_types(label)?;
                for &ty in types.iter().rev() {
                    self.pop_expect(ty)?;
                }
                self.mark_unreachable()?;
            }
            Opcode::BrIf => {
                let label: u32 = cursor.read_leb()?;
                self.pop_expect(I32)?;
                // Fallthrough typing: the label types stay on the stack.
                let types = self.label_types(label)?;
                for &ty in types.iter().rev() {
                    self.pop_expect(ty)?;
                }
                for &ty in &types {
                    self.push(Known(ty));
                }
            }
            Opcode::BrTable => {
                let operands = BrTableOperands::decode(cursor)?;
                self.pop_expect(I32)?;
                let default_types = self.label_types(*operands.default)?;
                for &label in &operands.labels {
                    let types = self.label_types(*label)?;
                    if types.len() != default_types.len() {
                        return Err(
                            ValidationError::BrTableArityMismatch { label: *label }.into()
                        );
                    }
                    // Pop and re-push so the stack is intact for the
                    // remaining labels.
                    for &ty in types.iter().rev() {
                        self.pop_expect(ty)?;
                    }
                    for &ty in &types {
                        self.push(Known(ty));
                    }
                }
                for &ty in default_types.iter().rev() {
                    self.pop_expect(ty)?;
                }
                self.mark_unreachable()?;
            }
            Opcode::Return => {
                let types = self
                    .frames
                    .first()
                    .map(|frame| frame.ty.results.clone())
                    .ok_or(ValidationError::NoFramesLeft)?;
                for &ty in types.iter().rev() {
                    self.pop_expect(ty)?;
                }
                self.mark_unreachable()?;
            }
            Opcode::Call => {
                let index: u32 = cursor.read_leb()?;
                let typeidx = self
                    .context
                    .function_type_index(index)
                    .ok_or(ValidationError::InvalidFunctionIndex(index))?;
                let ty = self.func_type(*typeidx)?.clone();
                for &param in ty.parameters.iter().rev() {
                    self.pop_expect(param)?;
                }
                for &result in &ty.results {
                    self.push(Known(result));
                }
            }
            Opcode::CallIndirect => {
                let operands = CallIndirectOperands::decode(cursor)?;
                let table = self.table(*operands.table)?;
                if table.reftype != RefType::Func {
                    return Err(ValidationError::CanOnlyCallFuncref(*operands.table).into());
                }
                let ty = self.func_type(*operands.ty)?.clone();
                self.pop_expect(I32)?;
                for &param in ty.parameters.iter().rev() {
                    self.pop_expect(param)?;
                }
                for &result in &ty.results {
                    self.push(Known(result));
                }
            }

            // Reference instructions.
            Opcode::RefNull => {
                let reftype = RefType::decode(cursor)?;
                self.push(Known(reftype.into()));
            }
            Opcode::RefIsNull => {
                let entry = self.pop()?;
                if !entry.is_reference() {
                    return Err(ValidationError::ExpectedReference.into());
                }
                self.push(Known(I32));
            }
            Opcode::RefFunc => {
                let index: u32 = cursor.read_leb()?;
                if self.context.function_type_index(index).is_none() {
                    return Err(ValidationError::InvalidFunctionIndex(index).into());
                }
                self.push(Known(ValType::FuncRef));
            }

            // Parametric instructions.
            Opcode::Drop => {
                self.pop()?;
            }
            Opcode::Select => {
                self.pop_expect(I32)?;
                let first = self.pop()?;
                let second = self.pop()?;
                let merged = match (first, second) {
                    (Known(a), Known(b)) => {
                        if a.is_reference() || b.is_reference() {
                            return Err(ValidationError::ExpectedNonReference.into());
                        }
                        if a != b {
                            return Err(ValidationError::InvalidSelectType.into());
                        }
                        Known(a)
                    }
                    (Known(ty), Unknown) | (Unknown, Known(ty)) => {
                        if ty.is_reference() {
                            return Err(ValidationError::ExpectedNonReference.into());
                        }
                        Known(ty)
                    }
                    (Unknown, Unknown) => Unknown,
                };
                self.push(merged);
            }
            Opcode::SelectT => {
                let count: u32 = cursor.read_leb()?;
                if count != 1 {
                    return Err(ValidationError::InvalidSelectType.into());
                }
                let ty = ValType::decode(cursor)?;
                self.pop_expect(I32)?;
                self.pop_expect(ty)?;
                self.pop_expect(ty)?;
                self.push(Known(ty));
            }

            // Variable instructions.
            Opcode::LocalGet => {
                let ty = self.get_local(cursor.read_leb()?)?;
                self.push(Known(ty));
            }
            Opcode::LocalSet => {
                let ty = self.get_local(cursor.read_leb()?)?;
                self.pop_expect(ty)?;
            }
            Opcode::LocalTee => {
                let ty = self.get_local(cursor.read_leb()?)?;
                self.pop_expect(ty)?;
                self.push(Known(ty));
            }
            Opcode::GlobalGet => {
                let index: u32 = cursor.read_leb()?;
                let global = self
                    .context
                    .global_type(index)
                    .ok_or(ValidationError::InvalidGlobalIndex(index))?;
                // In an init expression only immutable globals are
                // constant.
                if self.constant && global.mutability == GlobalTypeMutability::Var {
                    return Err(
                        ValidationError::InvalidInitExprInstruction(Opcode::GlobalGet).into()
                    );
                }
                self.push(Known(global.value));
            }
            Opcode::GlobalSet => {
                let index: u32 = cursor.read_leb()?;
                let global = self
                    .context
                    .global_type(index)
                    .ok_or(ValidationError::InvalidGlobalIndex(index))?;
                if global.mutability != GlobalTypeMutability::Var {
                    return Err(ValidationError::InvalidGlobalSet(index).into());
                }
                self.pop_expect(global.value)?;
            }

            // Table instructions.
            Opcode::TableGet => {
                let table = self.table(cursor.read_leb()?)?;
                self.pop_expect(I32)?;
                self.push(Known(table.reftype.into()));
            }
            Opcode::TableSet => {
                let table = self.table(cursor.read_leb()?)?;
                self.pop_expect(table.reftype.into())?;
                self.pop_expect(I32)?;
            }

            // Memory instructions.
            Opcode::I32Load => self.load(cursor, I32, 4)?,
            Opcode::I64Load => self.load(cursor, I64, 8)?,
            Opcode::F32Load => self.load(cursor, F32, 4)?,
            Opcode::F64Load => self.load(cursor, F64, 8)?,
            Opcode::I32Load8S | Opcode::I32Load8U => self.load(cursor, I32, 1)?,
            Opcode::I32Load16S | Opcode::I32Load16U => self.load(cursor, I32, 2)?,
            Opcode::I64Load8S | Opcode::I64Load8U => self.load(cursor, I64, 1)?,
            Opcode::I64Load16S | Opcode::I64Load16U => self.load(cursor, I64, 2)?,
            Opcode::I64Load32S | Opcode::I64Load32U => self.load(cursor, I64, 4)?,
            Opcode::I32Store => self.store(cursor, I32, 4)?,
            Opcode::I64Store => self.store(cursor, I64, 8)?,
            Opcode::F32Store => self.store(cursor, F32, 4)?,
            Opcode::F64Store => self.store(cursor, F64, 8)?,
            Opcode::I32Store8 => self.store(cursor, I32, 1)?,
            Opcode::I32Store16 => self.store(cursor, I32, 2)?,
            Opcode::I64Store8 => self.store(cursor, I64, 1)?,
            Opcode::I64Store16 => self.store(cursor, I64, 2)?,
            Opcode::I64Store32 => self.store(cursor, I64, 4)?,
            Opcode::MemorySize => {
                let memory: u32 = cursor.read_leb()?;
                self.memory(memory)?;
                self.push(Known(I32));
            }
            Opcode::MemoryGrow => {
                let memory: u32 = cursor.read_leb()?;
                self.memory(memory)?;
                self.pop_expect(I32)?;
                self.push(Known(I32));
            }

            // Numeric instructions.
            Opcode::I32Const => {
                let _: i32 = cursor.read_leb()?;
                self.push(Known(I32));
            }
            Opcode::I64Const => {
                let _: i64 = cursor.read_leb()?;
                self.push(Known(I64));
            }
            Opcode::F32Const => {
                cursor.read_array::<4>()?;
                self.push(Known(F32));
            }
            Opcode::F64Const => {
                cursor.read_array::<8>()?;
                self.push(Known(F64));
            }

            Opcode::I32Eqz => self.testop(I32)?,
            Opcode::I32Eq
            | Opcode::I32Ne
            | Opcode::I32LtS
            | Opcode::I32LtU
            | Opcode::I32GtS
            | Opcode::I32GtU
            | Opcode::I32LeS
            | Opcode::I32LeU
            | Opcode::I32GeS
            | Opcode::I32GeU => self.relop(I32)?,
            Opcode::I64Eqz => self.testop(I64)?,
            Opcode::I64Eq
            | Opcode::I64Ne
            | Opcode::I64LtS
            | Opcode::I64LtU
            | Opcode::I64GtS
            | Opcode::I64GtU
            | Opcode::I64LeS
            | Opcode::I64LeU
            | Opcode::I64GeS
            | Opcode::I64GeU => self.relop(I64)?,
            Opcode::F32Eq
            | Opcode::F32Ne
            | Opcode::F32Lt
            | Opcode::F32Gt
            | Opcode::F32Le
            | Opcode::F32Ge => self.relop(F32)?,
            Opcode::F64Eq
            | Opcode::F64Ne
            | Opcode::F64Lt
            | Opcode::F64Gt
            | Opcode::F64Le
            | Opcode::F64Ge => self.relop(F64)?,

            Opcode::I32Clz | Opcode::I32Ctz | Opcode::I32Popcnt => self.unop(I32)?,
            Opcode::I32Add
            | Opcode::I32Sub
            | Opcode::I32Mul
            | Opcode::I32DivS
            | Opcode::I32DivU
            | Opcode::I32RemS
            | Opcode::I32RemU
            | Opcode::I32And
            | Opcode::I32Or
            | Opcode::I32Xor
            | Opcode::I32Shl
            | Opcode::I32ShrS
            | Opcode::I32ShrU
            | Opcode::I32Rotl
            | Opcode::I32Rotr => self.binop(I32)?,
            Opcode::I64Clz | Opcode::I64Ctz | Opcode::I64Popcnt => self.unop(I64)?,
            Opcode::I64Add
            | Opcode::I64Sub
            | Opcode::I64Mul
            | Opcode::I64DivS
            | Opcode::I64DivU
            | Opcode::I64RemS
            | Opcode::I64RemU
            | Opcode::I64And
            | Opcode::I64Or
            | Opcode::I64Xor
            | Opcode::I64Shl
            | Opcode::I64ShrS
            | Opcode::I64ShrU
            | Opcode::I64Rotl
            | Opcode::I64Rotr => self.binop(I64)?,
            Opcode::F32Abs
            | Opcode::F32Neg
            | Opcode::F32Ceil
            | Opcode::F32Floor
            | Opcode::F32Trunc
            | Opcode::F32Nearest
            | Opcode::F32Sqrt => self.unop(F32)?,
            Opcode::F32Add
            | Opcode::F32Sub
            | Opcode::F32Mul
            | Opcode::F32Div
            | Opcode::F32Min
            | Opcode::F32Max
            | Opcode::F32Copysign => self.binop(F32)?,
            Opcode::F64Abs
            | Opcode::F64Neg
            | Opcode::F64Ceil
            | Opcode::F64Floor
            | Opcode::F64Trunc
            | Opcode::F64Nearest
            | Opcode::F64Sqrt => self.unop(F64)?,
            Opcode::F64Add
            | Opcode::F64Sub
            | Opcode::F64Mul
            | Opcode::F64Div
            | Opcode::F64Min
            | Opcode::F64Max
            | Opcode::F64Copysign => self.binop(F64)?,

            Opcode::I32WrapI64 => self.cvtop(I64, I32)?,
            Opcode::I32TruncF32S | Opcode::I32TruncF32U => self.cvtop(F32, I32)?,
            Opcode::I32TruncF64S | Opcode::I32TruncF64U => self.cvtop(F64, I32)?,
            Opcode::I64ExtendI32S | Opcode::I64ExtendI32U => self.cvtop(I32, I64)?,
            Opcode::I64TruncF32S | Opcode::I64TruncF32U => self.cvtop(F32, I64)?,
            Opcode::I64TruncF64S | Opcode::I64TruncF64U => self.cvtop(F64, I64)?,
            Opcode::F32ConvertI32S | Opcode::F32ConvertI32U => self.cvtop(I32, F32)?,
            Opcode::F32ConvertI64S | Opcode::F32ConvertI64U => self.cvtop(I64, F32)?,
            Opcode::F32DemoteF64 => self.cvtop(F64, F32)?,
            Opcode::F64ConvertI32S | Opcode::F64ConvertI32U => self.cvtop(I32, F64)?,
            Opcode::F64ConvertI64S | Opcode::F64ConvertI64U => self.cvtop(I64, F64)?,
            Opcode::F64PromoteF32 => self.cvtop(F32, F64)?,
            Opcode::I32ReinterpretF32 => self.cvtop(F32, I32)?,
            Opcode::I64ReinterpretF64 => self.cvtop(F64, I64)?,
            Opcode::F32ReinterpretI32 => self.cvtop(I32, F32)?,
            Opcode::F64ReinterpretI64 => self.cvtop(I64, F64)?,
            Opcode::I32Extend8S | Opcode::I32Extend16S => self.unop(I32)?,
            Opcode::I64Extend8S | Opcode::I64Extend16S | Opcode::I64Extend32S => {
                self.unop(I64)?
            }

            Opcode::BulkPrefix => self.step_bulk(cursor)?,
        }
        Ok(())
    }

    // The 0xfc extension family: saturating truncations and bulk
    // memory/table operations.
    fn step_bulk(&mut self, cursor: &mut Cursor) -> Result<(), Error> {
        use StackEntry::Known;
        use ValType::{F32, F64, I32, I64};

        let op = BulkOpcode::decode(cursor)?;
        match op {
            BulkOpcode::I32TruncSatF32S | BulkOpcode::I32TruncSatF32U => self.cvtop(F32, I32)?,
            BulkOpcode::I32TruncSatF64S | BulkOpcode::I32TruncSatF64U => self.cvtop(F64, I32)?,
            BulkOpcode::I64TruncSatF32S | BulkOpcode::I64TruncSatF32U => self.cvtop(F32, I64)?,
            BulkOpcode::I64TruncSatF64S | BulkOpcode::I64TruncSatF64U => self.cvtop(F64, I64)?,

            BulkOpcode::MemoryInit => {
                let data: u32 = cursor.read_leb()?;
                let memory: u32 = cursor.read_leb()?;
                self.data_index(data)?;
                self.memory(memory)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
            }
            BulkOpcode::DataDrop => {
                let data: u32 = cursor.read_leb()?;
                self.data_index(data)?;
            }
            BulkOpcode::MemoryCopy => {
                let dst: u32 = cursor.read_leb()?;
                let src: u32 = cursor.read_leb()?;
                self.memory(dst)?;
                self.memory(src)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
            }
            BulkOpcode::MemoryFill => {
                let memory: u32 = cursor.read_leb()?;
                self.memory(memory)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
            }

            BulkOpcode::TableInit => {
                let operands = TableInitOperands::decode(cursor)?;
                let table = self.table(*operands.table)?;
                let element = self
                    .context
                    .element_type(*operands.elem)
                    .ok_or(ValidationError::InvalidElementIndex(*operands.elem))?;
                if element != table.reftype {
                    return Err(ValidationError::TableValueTypeMismatch.into());
                }
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
            }
            BulkOpcode::ElemDrop => {
                let index: u32 = cursor.read_leb()?;
                if self.context.element_type(index).is_none() {
                    return Err(ValidationError::InvalidElementIndex(index).into());
                }
            }
            BulkOpcode::TableCopy => {
                let operands = TableCopyOperands::decode(cursor)?;
                let dst = self.table(*operands.dst)?;
                let src = self.table(*operands.src)?;
                if dst.reftype != src.reftype {
                    return Err(ValidationError::TableValueTypeMismatch.into());
                }
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
            }
            BulkOpcode::TableGrow => {
                let table = self.table(cursor.read_leb()?)?;
                self.pop_expect(I32)?;
                self.pop_expect(table.reftype.into())?;
                self.push(Known(I32));
            }
            BulkOpcode::TableSize => {
                self.table(cursor.read_leb()?)?;
                self.push(Known(I32));
            }
            BulkOpcode::TableFill => {
                let table = self.table(cursor.read_leb()?)?;
                self.pop_expect(I32)?;
                self.pop_expect(table.reftype.into())?;
                self.pop_expect(I32)?;
            }
        }
        Ok(())
    }

    // [t] -> [t]
    fn unop(&mut self, ty: ValType) -> Result<(), ValidationError> {
        self.pop_expect(ty)?;
        self.push(StackEntry::Known(ty));
        Ok(())
    }

    // [t t] -> [t]
    fn binop(&mut self, ty: ValType) -> Result<(), ValidationError> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push(StackEntry::Known(ty));
        Ok(())
    }

    // [t] -> [i32]
    fn testop(&mut self, ty: ValType) -> Result<(), ValidationError> {
        self.pop_expect(ty)?;
        self.push(StackEntry::Known(ValType::I32));
        Ok(())
    }

    // [t t] -> [i32]
    fn relop(&mut self, ty: ValType) -> Result<(), ValidationError> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push(StackEntry::Known(ValType::I32));
        Ok(())
    }

    // [from] -> [to]
    fn cvtop(&mut self, from: ValType, to: ValType) -> Result<(), ValidationError> {
        self.pop_expect(from)?;
        self.push(StackEntry::Known(to));
        Ok(())
    }

    // Loads pop an address and push the loaded value; the instruction's
    // access width, not the value type's, bounds the alignment.
    fn load(&mut self, cursor: &mut Cursor, ty: ValType, width: u32) -> Result<(), Error> {
        let memarg = MemArg::decode(cursor)?;
        self.check_memarg(&memarg, width)?;
        self.pop_expect(ValType::I32)?;
        self.push(StackEntry::Known(ty));
        Ok(())
    }

    // Stores pop the value, then the address.
    fn store(&mut self, cursor: &mut Cursor, ty: ValType, width: u32) -> Result<(), Error> {
        let memarg = MemArg::decode(cursor)?;
        self.check_memarg(&memarg, width)?;
        self.pop_expect(ty)?;
        self.pop_expect(ValType::I32)?;
        Ok(())
    }

    fn check_memarg(&self, memarg: &MemArg, width: u32) -> Result<(), ValidationError> {
        self.memory(memarg.memory)?;
        if memarg.align >= 32 || (1u64 << memarg.align) > u64::from(width) {
            return Err(ValidationError::InvalidAlignment {
                align: memarg.align,
            });
        }
        Ok(())
    }
}
