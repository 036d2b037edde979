// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The streaming module parser.
//!
//! [`Parser`] consumes a WebAssembly binary incrementally: callers feed
//! arbitrary-sized chunks via [`Parser::push`] and collect the parsed,
//! validated [`Module`] from [`Parser::finish`]. Parsing is a state
//! machine in which every transition is restartable: a transition that
//! runs out of buffered input fails with `UnexpectedEof`, the cursor
//! rewinds to the transition's start, and the outer loop resumes on the
//! next push. Function bodies are handed to a worker pool and validated
//! concurrently with parsing.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, trace};
use num_enum::TryFromPrimitive;

use crate::cursor::Cursor;
use crate::decode::{
    self, DataSegmentToken, Decode, ElementKind, ElementSegmentToken, read_byte_vec, read_vec,
};
use crate::error::{Error, ParseError, ReadError, ValidationError};
use crate::module::{Module, ModuleContext};
use crate::pool::{self, Job, ValidationPool};
use crate::types::{
    DataMode, DataModeActive, DataSegment, ElementInit, ElementMode, ElementModeActive,
    ElementSegment, Export, ExportDescriptor, Expression, FuncIdx, FunctionBody, Global,
    GlobalType, Import, ImportDescriptor, Limits, LocalsGroup, MemIdx, MemType, RefType,
    SectionId, TableIdx, TableType, TypeIdx, ValType, Version,
};
use crate::validate;

// We represent this as an enum with one value to leverage existing "decode
// this u32 enum" machinery to check for a valid magic value.
#[derive(Clone, Copy, Debug, TryFromPrimitive)]
#[repr(u32)]
enum Magic {
    Value = 0x6d_73_61_00, // '\0asm'
}

// The parse state machine. Each variant owns exactly one restartable
// transition.
#[derive(Clone, Copy, Debug)]
enum State {
    Magic,
    Version,
    SectionStart,
    Section {
        id: SectionId,
    },
    SectionWithSize {
        id: SectionId,
        size: u32,
    },
    FuncBody {
        index: u32,
        count: u32,
        section_start: usize,
        section_size: u32,
    },
    FuncBodyWithSize {
        index: u32,
        count: u32,
        size: u32,
        section_start: usize,
        section_size: u32,
    },
}

/// A streaming, push-style WebAssembly module parser and validator.
pub struct Parser {
    cursor: Cursor,
    state: State,
    module: Module,
    pool: ValidationPool,
    code_context: Option<Arc<ModuleContext>>,
    last_section: Option<SectionId>,
    failure: Option<Error>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Creates a parser with a worker count suited to the host.
    pub fn new() -> Self {
        Self::with_workers(pool::default_workers())
    }

    /// Creates a parser validating function bodies on `workers` threads
    /// (at least one).
    pub fn with_workers(workers: usize) -> Self {
        Self {
            cursor: Cursor::new(),
            state: State::Magic,
            module: Module::default(),
            pool: ValidationPool::new(workers),
            code_context: None,
            last_section: None,
            failure: None,
        }
    }

    /// Feeds a chunk of the module binary. Parsing advances as far as the
    /// buffered input allows.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.cursor.push(bytes);
        self.advance_all()
    }

    /// Completes parsing: waits for pending body validations, requires a
    /// clean end of input at a section boundary, and returns the module.
    pub fn finish(mut self) -> Result<Module, Error> {
        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        self.pool.finish()?;
        if !matches!(self.state, State::SectionStart) || !self.cursor.is_at_eof() {
            return Err(ReadError::UnexpectedEof.into());
        }
        if self.module.codes.len() != self.module.functions.len() {
            return Err(ValidationError::CodeCountMismatch {
                functions: self.module.functions.len() as u32,
                codes: self.module.codes.len() as u32,
            }
            .into());
        }
        if let Some(count) = self.module.data_count
            && self.module.datas.len() as u32 != count
        {
            return Err(ValidationError::DataCountMismatch {
                expected: count,
                actual: self.module.datas.len() as u32,
            }
            .into());
        }
        debug!(
            "module complete: {} types, {} functions, {} bodies",
            self.module.types.len(),
            self.module.total_functions(),
            self.module.codes.len()
        );
        Ok(self.module)
    }

    // Runs transitions until the buffered input is exhausted. Bytes read
    // by a transition that hits end-of-input are considered not-read.
    fn advance_all(&mut self) -> Result<(), Error> {
        loop {
            let checkpoint = self.cursor.pos();
            match self.advance() {
                Ok(()) => {}
                Err(Error::Read(ReadError::UnexpectedEof)) => {
                    self.cursor.rewind_to(checkpoint);
                    return Ok(());
                }
                Err(error) => {
                    self.failure = Some(error.clone());
                    return Err(error);
                }
            }
        }
    }

    // One state transition.
    fn advance(&mut self) -> Result<(), Error> {
        match self.state {
            State::Magic => {
                let value = u32::from_le_bytes(self.cursor.read_array()?);
                Magic::try_from(value).map_err(|_| ParseError::InvalidModuleMagic(value))?;
                self.state = State::Version;
            }
            State::Version => {
                let value = u32::from_le_bytes(self.cursor.read_array()?);
                self.module.version =
                    Version::try_from(value).map_err(|_| ParseError::InvalidVersion(value))?;
                self.state = State::SectionStart;
            }
            State::SectionStart => {
                // There is no in-band signal in the WASM format for the
                // end of a module; the EOF this read reports at a section
                // boundary is resolved by finish().
                let id = SectionId::decode(&mut self.cursor)?;

                // Apart from custom sections, which can appear anywhere in
                // the format, sections must appear at most once and in
                // order.
                if id != SectionId::Custom {
                    if let Some(last) = self.last_section {
                        if id == last {
                            return Err(ParseError::DuplicateSection(id).into());
                        }
                        if id <= last {
                            return Err(ParseError::OutOfOrderSection {
                                before: last,
                                after: id,
                            }
                            .into());
                        }
                    }
                    self.last_section = Some(id);
                }
                self.state = State::Section { id };
            }
            State::Section { id } => {
                let size: u32 = self.cursor.read_leb()?;
                // Gate whole-section parsing on the full payload being
                // buffered. The code section instead gates body-by-body.
                if id != SectionId::Code && self.cursor.remaining() < size as usize {
                    return Err(ReadError::UnexpectedEof.into());
                }
                debug!("section {id:?} ({size:#x} bytes)");
                self.state = State::SectionWithSize { id, size };
            }
            State::SectionWithSize { id, size } => self.section(id, size)?,
            State::FuncBody {
                index,
                count,
                section_start,
                section_size,
            } => {
                if index == count {
                    let consumed = self.cursor.pos() - section_start;
                    if consumed != section_size as usize {
                        return Err(ParseError::InvalidSectionLength {
                            id: SectionId::Code,
                            expected: section_size,
                            actual: consumed as u32,
                        }
                        .into());
                    }
                    self.state = State::SectionStart;
                } else {
                    let size: u32 = self.cursor.read_leb()?;
                    self.state = State::FuncBodyWithSize {
                        index,
                        count,
                        size,
                        section_start,
                        section_size,
                    };
                }
            }
            State::FuncBodyWithSize {
                index,
                count,
                size,
                section_start,
                section_size,
            } => {
                self.func_body(index, size)?;
                self.state = State::FuncBody {
                    index: index + 1,
                    count,
                    section_start,
                    section_size,
                };
            }
        }
        Ok(())
    }

    // Parses one section's payload. On return the whole payload must have
    // been consumed, exactly.
    fn section(&mut self, id: SectionId, size: u32) -> Result<(), Error> {
        let start = self.cursor.pos();
        match id {
            SectionId::Custom => self.custom_section(size)?,
            SectionId::Type => self.module.types = read_vec(&mut self.cursor)?,
            SectionId::Import => {
                let imports = self.import_section()?;
                self.module.imports = imports;
                self.module.finalize_imports();
            }
            SectionId::Function => self.module.functions = self.function_section()?,
            SectionId::Table => self.module.tables = self.table_section()?,
            SectionId::Memory => self.module.memories = self.memory_section()?,
            SectionId::Global => self.module.globals = self.global_section()?,
            SectionId::Export => self.module.exports = self.export_section()?,
            SectionId::Start => self.module.start = Some(self.start_section()?),
            SectionId::Element => self.module.elements = self.element_section()?,
            SectionId::DataCount => self.module.data_count = Some(self.cursor.read_leb()?),
            SectionId::Code => {
                let count: u32 = self.cursor.read_leb()?;
                if count as usize != self.module.functions.len() {
                    return Err(ValidationError::CodeCountMismatch {
                        functions: self.module.functions.len() as u32,
                        codes: count,
                    }
                    .into());
                }
                // Every section a body can reference is final here; freeze
                // the snapshot the workers will read.
                self.code_context = Some(Arc::new(ModuleContext::snapshot(&self.module)));
                self.module
                    .codes
                    .reserve(count.min(decode::PREALLOC_LIMIT) as usize);
                self.state = State::FuncBody {
                    index: 0,
                    count,
                    section_start: start,
                    section_size: size,
                };
                return Ok(());
            }
            SectionId::Data => {
                let datas = self.data_section()?;
                if let Some(count) = self.module.data_count
                    && datas.len() as u32 != count
                {
                    return Err(ValidationError::DataCountMismatch {
                        expected: count,
                        actual: datas.len() as u32,
                    }
                    .into());
                }
                self.module.datas = datas;
            }
        }
        let consumed = self.cursor.pos() - start;
        if consumed != size as usize {
            return Err(ParseError::InvalidSectionLength {
                id,
                expected: size,
                actual: consumed as u32,
            }
            .into());
        }
        self.state = State::SectionStart;
        Ok(())
    }

    fn custom_section(&mut self, size: u32) -> Result<(), Error> {
        let start = self.cursor.pos();
        let name = String::decode(&mut self.cursor)?;
        let name_len = self.cursor.pos() - start;
        let size = size as usize;
        if name_len > size {
            return Err(ParseError::InvalidSectionLength {
                id: SectionId::Custom,
                expected: size as u32,
                actual: name_len as u32,
            }
            .into());
        }
        trace!("skipping custom section {name:?} ({} bytes)", size - name_len);
        self.cursor.read_exact(size - name_len)?;
        Ok(())
    }

    fn import_section(&mut self) -> Result<Vec<Import>, Error> {
        let imports: Vec<Import> = read_vec(&mut self.cursor)?;
        for import in &imports {
            match import.descriptor {
                ImportDescriptor::Function(typeidx) => self.check_type_index(typeidx)?,
                ImportDescriptor::Table(table) => check_table_type(&table)?,
                ImportDescriptor::Memory(memory) => check_mem_type(&memory)?,
                // A global type is always valid.
                ImportDescriptor::Global(_) => {}
            }
        }
        Ok(imports)
    }

    fn function_section(&mut self) -> Result<Vec<TypeIdx>, Error> {
        let functions: Vec<TypeIdx> = read_vec(&mut self.cursor)?;
        for &typeidx in &functions {
            self.check_type_index(typeidx)?;
        }
        Ok(functions)
    }

    fn table_section(&mut self) -> Result<Vec<TableType>, Error> {
        let tables: Vec<TableType> = read_vec(&mut self.cursor)?;
        for table in &tables {
            check_table_type(table)?;
        }
        Ok(tables)
    }

    fn memory_section(&mut self) -> Result<Vec<MemType>, Error> {
        let memories: Vec<MemType> = read_vec(&mut self.cursor)?;
        for memory in &memories {
            check_mem_type(memory)?;
        }
        Ok(memories)
    }

    fn global_section(&mut self) -> Result<Vec<Global>, Error> {
        let count: u32 = self.cursor.read_leb()?;
        let mut globals = Vec::with_capacity(count.min(decode::PREALLOC_LIMIT) as usize);
        for _ in 0..count {
            let ty = GlobalType::decode(&mut self.cursor)?;
            // While the global section is being parsed the module's own
            // globals are unpublished, so init expressions here can only
            // name imported globals.
            let init = self.constant_expression(ty.value)?;
            globals.push(Global { ty, init });
        }
        Ok(globals)
    }

    fn export_section(&mut self) -> Result<Vec<Export>, Error> {
        let exports: Vec<Export> = read_vec(&mut self.cursor)?;
        let mut seen = HashSet::with_capacity(exports.len());
        for export in &exports {
            if !seen.insert(export.field.as_str()) {
                return Err(ValidationError::DuplicateExportName(export.field.clone()).into());
            }
            match export.descriptor {
                ExportDescriptor::Function(index) => self.check_function_index(index)?,
                ExportDescriptor::Table(index) => {
                    if *index >= self.module.total_tables() {
                        return Err(ValidationError::InvalidTableIndex(*index).into());
                    }
                }
                ExportDescriptor::Memory(index) => {
                    if *index >= self.module.total_memories() {
                        return Err(ValidationError::InvalidMemoryIndex(*index).into());
                    }
                }
                ExportDescriptor::Global(index) => {
                    if *index >= self.module.total_globals() {
                        return Err(ValidationError::InvalidGlobalIndex(*index).into());
                    }
                }
            }
        }
        Ok(exports)
    }

    fn start_section(&mut self) -> Result<FuncIdx, Error> {
        let index = FuncIdx::decode(&mut self.cursor)?;
        let typeidx = self
            .module
            .function_type_index(*index)
            .ok_or(ValidationError::InvalidFunctionIndex(*index))?;
        let ty = self
            .module
            .types
            .get(*typeidx as usize)
            .ok_or(ValidationError::InvalidTypeIndex(*typeidx))?;
        if !ty.parameters.is_empty() || !ty.results.is_empty() {
            return Err(ValidationError::InvalidStartFunction(*index).into());
        }
        Ok(index)
    }

    fn element_section(&mut self) -> Result<Vec<ElementSegment>, Error> {
        let count: u32 = self.cursor.read_leb()?;
        let mut elements = Vec::with_capacity(count.min(decode::PREALLOC_LIMIT) as usize);
        for _ in 0..count {
            elements.push(self.element_segment()?);
        }
        Ok(elements)
    }

    fn element_segment(&mut self) -> Result<ElementSegment, Error> {
        type Token = ElementSegmentToken;

        let segment = match Token::decode(&mut self.cursor)? {
            Token::ActiveElemIndices => {
                let offset = self.constant_expression(ValType::I32)?;
                ElementSegment {
                    ty: RefType::Func,
                    init: self.func_index_list()?,
                    mode: ElementMode::Active(ElementModeActive {
                        table: TableIdx::new(0),
                        offset,
                    }),
                }
            }
            Token::PassiveElemIndices => {
                let kind = ElementKind::decode(&mut self.cursor)?;
                ElementSegment {
                    ty: kind.into(),
                    init: self.func_index_list()?,
                    mode: ElementMode::Passive,
                }
            }
            Token::ActiveTableIndexElemIndices => {
                let table = TableIdx::decode(&mut self.cursor)?;
                let offset = self.constant_expression(ValType::I32)?;
                let kind = ElementKind::decode(&mut self.cursor)?;
                ElementSegment {
                    ty: kind.into(),
                    init: self.func_index_list()?,
                    mode: ElementMode::Active(ElementModeActive { table, offset }),
                }
            }
            Token::DeclarativeElemIndices => {
                let kind = ElementKind::decode(&mut self.cursor)?;
                ElementSegment {
                    ty: kind.into(),
                    init: self.func_index_list()?,
                    mode: ElementMode::Declarative,
                }
            }
            Token::ActiveElemExprs => {
                let offset = self.constant_expression(ValType::I32)?;
                ElementSegment {
                    ty: RefType::Func,
                    init: self.expression_list(RefType::Func)?,
                    mode: ElementMode::Active(ElementModeActive {
                        table: TableIdx::new(0),
                        offset,
                    }),
                }
            }
            Token::PassiveElemExprs => {
                let reftype = RefType::decode(&mut self.cursor)?;
                ElementSegment {
                    ty: reftype,
                    init: self.expression_list(reftype)?,
                    mode: ElementMode::Passive,
                }
            }
            Token::ActiveTableIndexElemExprs => {
                let table = TableIdx::decode(&mut self.cursor)?;
                let offset = self.constant_expression(ValType::I32)?;
                let reftype = RefType::decode(&mut self.cursor)?;
                ElementSegment {
                    ty: reftype,
                    init: self.expression_list(reftype)?,
                    mode: ElementMode::Active(ElementModeActive { table, offset }),
                }
            }
            Token::DeclarativeElemExprs => {
                let reftype = RefType::decode(&mut self.cursor)?;
                ElementSegment {
                    ty: reftype,
                    init: self.expression_list(reftype)?,
                    mode: ElementMode::Declarative,
                }
            }
        };

        // An active segment initializes its table at instantiation, so
        // the element types must agree.
        if let ElementMode::Active(active) = &segment.mode {
            let table = self
                .module
                .table_type(*active.table)
                .ok_or(ValidationError::InvalidTableIndex(*active.table))?;
            if table.reftype != segment.ty {
                return Err(ValidationError::TableValueTypeMismatch.into());
            }
        }
        Ok(segment)
    }

    fn func_index_list(&mut self) -> Result<ElementInit, Error> {
        let indices: Vec<FuncIdx> = read_vec(&mut self.cursor)?;
        for &index in &indices {
            self.check_function_index(index)?;
        }
        Ok(ElementInit::FunctionIndices(indices))
    }

    fn expression_list(&mut self, reftype: RefType) -> Result<ElementInit, Error> {
        let count: u32 = self.cursor.read_leb()?;
        let mut expressions = Vec::with_capacity(count.min(decode::PREALLOC_LIMIT) as usize);
        for _ in 0..count {
            expressions.push(self.constant_expression(reftype.into())?);
        }
        Ok(ElementInit::Expressions(expressions))
    }

    fn data_section(&mut self) -> Result<Vec<DataSegment>, Error> {
        let count: u32 = self.cursor.read_leb()?;
        let mut datas = Vec::with_capacity(count.min(decode::PREALLOC_LIMIT) as usize);
        for _ in 0..count {
            datas.push(self.data_segment()?);
        }
        Ok(datas)
    }

    fn data_segment(&mut self) -> Result<DataSegment, Error> {
        type Token = DataSegmentToken;

        match Token::decode(&mut self.cursor)? {
            Token::ActiveNoMemIdx => {
                let memory = MemIdx::new(0);
                self.check_memory_index(memory)?;
                let offset = self.constant_expression(ValType::I32)?;
                Ok(DataSegment {
                    init: read_byte_vec(&mut self.cursor)?,
                    mode: DataMode::Active(DataModeActive { memory, offset }),
                })
            }
            Token::Passive => Ok(DataSegment {
                init: read_byte_vec(&mut self.cursor)?,
                mode: DataMode::Passive,
            }),
            Token::ActiveWithMemIdx => {
                let memory = MemIdx::decode(&mut self.cursor)?;
                self.check_memory_index(memory)?;
                let offset = self.constant_expression(ValType::I32)?;
                Ok(DataSegment {
                    init: read_byte_vec(&mut self.cursor)?,
                    mode: DataMode::Active(DataModeActive { memory, offset }),
                })
            }
        }
    }

    // Slices one code entry: locals groups, then exactly
    // `size - locals bytes` of body. The body is enqueued for validation
    // against the frozen snapshot.
    fn func_body(&mut self, index: u32, size: u32) -> Result<(), Error> {
        if self.cursor.remaining() < size as usize {
            return Err(ReadError::UnexpectedEof.into());
        }
        let start = self.cursor.pos();
        let locals: Vec<LocalsGroup> = read_vec(&mut self.cursor)?;
        let locals_len = self.cursor.pos() - start;
        let Some(body_len) = (size as usize).checked_sub(locals_len) else {
            return Err(ParseError::InvalidFunctionLength {
                expected: size,
                actual: locals_len as u32,
            }
            .into());
        };
        let body = self.cursor.read_exact(body_len)?.to_vec();

        let typeidx = self
            .module
            .functions
            .get(index as usize)
            .copied()
            .ok_or(ValidationError::InvalidFunctionIndex(index))?;
        let ty = self
            .module
            .types
            .get(*typeidx as usize)
            .cloned()
            .ok_or(ValidationError::InvalidTypeIndex(*typeidx))?;
        let context = match &self.code_context {
            Some(context) => Arc::clone(context),
            None => {
                let context = Arc::new(ModuleContext::snapshot(&self.module));
                self.code_context = Some(Arc::clone(&context));
                context
            }
        };

        trace!("function body {index}: {body_len} bytes");
        self.pool.submit(Job {
            index,
            ty,
            locals: locals.clone(),
            body: body.clone(),
            context,
        });
        self.module.codes.push(FunctionBody {
            declared_size: size,
            locals,
            body,
        });
        Ok(())
    }

    // Validates a constant instruction sequence at the cursor and slices
    // its exact wire extent.
    fn constant_expression(&mut self, expected: ValType) -> Result<Expression, Error> {
        let start = self.cursor.pos();
        validate::constant_expression(&self.module, &mut self.cursor, expected)?;
        let end = self.cursor.pos();
        Ok(Expression::new(
            self.cursor.slice(start, end).to_vec().into_boxed_slice(),
        ))
    }

    fn check_type_index(&self, index: TypeIdx) -> Result<(), Error> {
        if (*index as usize) < self.module.types.len() {
            Ok(())
        } else {
            Err(ValidationError::InvalidTypeIndex(*index).into())
        }
    }

    fn check_function_index(&self, index: FuncIdx) -> Result<(), Error> {
        if *index < self.module.total_functions() {
            Ok(())
        } else {
            Err(ValidationError::InvalidFunctionIndex(*index).into())
        }
    }

    fn check_memory_index(&self, index: MemIdx) -> Result<(), Error> {
        if *index < self.module.total_memories() {
            Ok(())
        } else {
            Err(ValidationError::InvalidMemoryIndex(*index).into())
        }
    }
}

fn check_table_type(table: &TableType) -> Result<(), Error> {
    let limits = table.limits;
    if let Some(max) = limits.max
        && limits.min > max
    {
        return Err(ValidationError::InvalidLimits(limits).into());
    }
    Ok(())
}

fn check_mem_type(memory: &MemType) -> Result<(), Error> {
    let limits: Limits = **memory;
    let max = limits.max.unwrap_or(MemType::MAX_PAGES);
    if limits.min > MemType::MAX_PAGES || max > MemType::MAX_PAGES || limits.min > max {
        return Err(ValidationError::InvalidLimits(limits).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    fn encode_u32(mut value: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            bytes.push(byte);
            if value == 0 {
                break;
            }
        }
        bytes
    }

    fn section(id: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![id];
        bytes.extend_from_slice(&encode_u32(payload.len() as u32));
        bytes.extend_from_slice(payload);
        bytes
    }

    fn module_bytes(sections: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = HEADER.to_vec();
        for section in sections {
            bytes.extend_from_slice(section);
        }
        bytes
    }

    // Type [i32] -> [i32], one function, body `local.get 0; end`.
    fn identity_module() -> Vec<u8> {
        module_bytes(&[
            section(1, &[0x01, 0x60, 0x01, 0x7f, 0x01, 0x7f]),
            section(3, &[0x01, 0x00]),
            section(10, &[0x01, 0x04, 0x00, 0x20, 0x00, 0x0b]),
        ])
    }

    #[test]
    fn test_empty_module() {
        let module = parse(&HEADER).unwrap();
        assert_eq!(module.types.len(), 0);
        assert_eq!(module.total_functions(), 0);
        assert_eq!(module.codes.len(), 0);
        assert_eq!(module.data_count, None);
    }

    #[test]
    fn test_bad_magic() {
        let bytes = [0x00, 0x61, 0x73, 0x6e, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Parse(ParseError::InvalidModuleMagic(0x6e73_6100))
        );
    }

    #[test]
    fn test_bad_version() {
        let bytes = [0x00, 0x61, 0x73, 0x6d, 0x02, 0x00, 0x00, 0x00];
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Parse(ParseError::InvalidVersion(2))
        );
    }

    #[test]
    fn test_identity_function() {
        let module = parse(&identity_module()).unwrap();
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.functions, vec![TypeIdx::new(0)]);
        assert_eq!(module.codes.len(), 1);
        assert_eq!(module.codes[0].declared_size, 4);
        assert_eq!(module.codes[0].body, vec![0x20, 0x00, 0x0b]);
    }

    #[test]
    fn test_type_mismatch_body() {
        // Same prelude, but the body is `i64.const 0; end`.
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x01, 0x7f, 0x01, 0x7f]),
            section(3, &[0x01, 0x00]),
            section(10, &[0x01, 0x04, 0x00, 0x42, 0x00, 0x0b]),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::UnexpectedType {
                expected: ValType::I32,
                actual: ValType::I64
            })
        );
    }

    #[test]
    fn test_hanging_else_body() {
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x00, 0x00]),
            section(3, &[0x01, 0x00]),
            section(10, &[0x01, 0x03, 0x00, 0x05, 0x0b]),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::HangingElse)
        );
    }

    #[test]
    fn test_memory_init_without_data_count() {
        let body = [
            0x00, // no locals
            0x41, 0x00, 0x41, 0x00, 0x41, 0x00, // three i32.const 0
            0xfc, 0x08, 0x00, 0x00, // memory.init data 0, memory 0
            0x0b,
        ];
        let mut code = vec![0x01, body.len() as u8];
        code.extend_from_slice(&body);
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x00, 0x00]),
            section(3, &[0x01, 0x00]),
            section(5, &[0x01, 0x00, 0x00]),
            section(10, &code),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::MissingDataCount)
        );
    }

    #[test]
    fn test_chunk_size_invariance() {
        let bytes = identity_module();
        let whole = parse(&bytes).unwrap();
        for chunk_size in [1, 2, 3, 5, 7] {
            let mut parser = Parser::with_workers(2);
            for chunk in bytes.chunks(chunk_size) {
                parser.push(chunk).unwrap();
            }
            let module = parser.finish().unwrap();
            assert_eq!(module.types.len(), whole.types.len());
            assert_eq!(module.functions, whole.functions);
            assert_eq!(module.codes[0].body, whole.codes[0].body);
        }
    }

    #[test]
    fn test_chunk_size_invariance_on_errors() {
        // The type-mismatch module must fail identically at every
        // chunking.
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x01, 0x7f, 0x01, 0x7f]),
            section(3, &[0x01, 0x00]),
            section(10, &[0x01, 0x04, 0x00, 0x42, 0x00, 0x0b]),
        ]);
        let whole = parse(&bytes).unwrap_err();
        for chunk_size in [1, 3, 5] {
            let mut parser = Parser::with_workers(2);
            let mut error = None;
            for chunk in bytes.chunks(chunk_size) {
                if let Err(err) = parser.push(chunk) {
                    error = Some(err);
                    break;
                }
            }
            let error = error.unwrap_or_else(|| parser.finish().unwrap_err());
            assert_eq!(error, whole);
        }
    }

    #[test]
    fn test_truncated_input() {
        let bytes = identity_module();
        let mut parser = Parser::with_workers(1);
        parser.push(&bytes[..bytes.len() - 2]).unwrap();
        assert_eq!(
            parser.finish().unwrap_err(),
            Error::Read(ReadError::UnexpectedEof)
        );
    }

    #[test]
    fn test_duplicate_section() {
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x00, 0x00]),
            section(1, &[0x01, 0x60, 0x00, 0x00]),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Parse(ParseError::DuplicateSection(SectionId::Type))
        );
    }

    #[test]
    fn test_out_of_order_section() {
        let bytes = module_bytes(&[
            section(3, &[0x00]),
            section(1, &[0x01, 0x60, 0x00, 0x00]),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Parse(ParseError::OutOfOrderSection {
                before: SectionId::Function,
                after: SectionId::Type
            })
        );
    }

    #[test]
    fn test_data_count_ordering() {
        // DataCount (id 12) is permitted between Element and Code.
        let bytes = module_bytes(&[
            section(5, &[0x01, 0x00, 0x01]),
            section(12, &[0x01]),
            section(11, &[0x01, 0x00, 0x41, 0x00, 0x0b, 0x02, 0xaa, 0xbb]),
        ]);
        let module = parse(&bytes).unwrap();
        assert_eq!(module.data_count, Some(1));
        assert_eq!(module.datas.len(), 1);
        assert_eq!(module.datas[0].init, vec![0xaa, 0xbb]);
    }

    #[test]
    fn test_data_count_mismatch() {
        let bytes = module_bytes(&[section(12, &[0x01]), section(11, &[0x00])]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::DataCountMismatch {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_data_count_without_data_section() {
        let bytes = module_bytes(&[section(12, &[0x02])]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::DataCountMismatch {
                expected: 2,
                actual: 0
            })
        );
    }

    #[test]
    fn test_code_count_mismatch() {
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x00, 0x00]),
            section(3, &[0x01, 0x00]),
            section(10, &[0x00]),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::CodeCountMismatch {
                functions: 1,
                codes: 0
            })
        );
    }

    #[test]
    fn test_missing_code_section() {
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x00, 0x00]),
            section(3, &[0x01, 0x00]),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::CodeCountMismatch {
                functions: 1,
                codes: 0
            })
        );
    }

    #[test]
    fn test_global_section() {
        // global (mut i32) = i32.const 42.
        let bytes = module_bytes(&[section(6, &[0x01, 0x7f, 0x01, 0x41, 0x2a, 0x0b])]);
        let module = parse(&bytes).unwrap();
        assert_eq!(module.globals.len(), 1);
        assert_eq!(*module.globals[0].init, vec![0x41, 0x2a, 0x0b].into());
    }

    #[test]
    fn test_global_init_type_mismatch() {
        // global i32 = i64.const 0.
        let bytes = module_bytes(&[section(6, &[0x01, 0x7f, 0x00, 0x42, 0x00, 0x0b])]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::UnexpectedType {
                expected: ValType::I32,
                actual: ValType::I64
            })
        );
    }

    #[test]
    fn test_global_init_non_constant() {
        // global i32 = i32.const 1; i32.const 1; i32.add.
        let bytes = module_bytes(&[section(
            6,
            &[0x01, 0x7f, 0x00, 0x41, 0x01, 0x41, 0x01, 0x6a, 0x0b],
        )]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::InvalidInitExprInstruction(
                crate::types::Opcode::I32Add
            ))
        );
    }

    #[test]
    fn test_duplicate_export_name() {
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x00, 0x00]),
            section(3, &[0x01, 0x00]),
            section(
                7,
                &[0x02, 0x01, b'f', 0x00, 0x00, 0x01, b'f', 0x00, 0x00],
            ),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::DuplicateExportName("f".to_owned()))
        );
    }

    #[test]
    fn test_export_index_bounds() {
        let bytes = module_bytes(&[section(7, &[0x01, 0x01, b'f', 0x00, 0x05])]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::InvalidFunctionIndex(5))
        );
    }

    #[test]
    fn test_start_function_signature() {
        // The identity function is [i32] -> [i32]; not a start function.
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x01, 0x7f, 0x01, 0x7f]),
            section(3, &[0x01, 0x00]),
            section(8, &[0x00]),
            section(10, &[0x01, 0x04, 0x00, 0x20, 0x00, 0x0b]),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::InvalidStartFunction(0))
        );
    }

    #[test]
    fn test_element_segment() {
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x00, 0x00]),
            section(3, &[0x01, 0x00]),
            section(4, &[0x01, 0x70, 0x00, 0x01]),
            // Active funcref segment: offset i32.const 0, one function.
            section(9, &[0x01, 0x00, 0x41, 0x00, 0x0b, 0x01, 0x00]),
            section(10, &[0x01, 0x02, 0x00, 0x0b]),
        ]);
        let module = parse(&bytes).unwrap();
        assert_eq!(module.elements.len(), 1);
        assert_eq!(module.elements[0].ty, RefType::Func);
    }

    #[test]
    fn test_element_segment_bad_function_index() {
        let bytes = module_bytes(&[
            section(4, &[0x01, 0x70, 0x00, 0x01]),
            section(9, &[0x01, 0x00, 0x41, 0x00, 0x0b, 0x01, 0x03]),
        ]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::InvalidFunctionIndex(3))
        );
    }

    #[test]
    fn test_import_section() {
        // import "env" "f" (func (type 0)); import "env" "g" (global i64).
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x00, 0x00]),
            section(
                2,
                &[
                    0x02, //
                    0x03, b'e', b'n', b'v', 0x01, b'f', 0x00, 0x00, //
                    0x03, b'e', b'n', b'v', 0x01, b'g', 0x03, 0x7e, 0x00,
                ],
            ),
        ]);
        let module = parse(&bytes).unwrap();
        assert_eq!(module.imported_functions(), 1);
        assert_eq!(module.imported_globals(), 1);
        assert_eq!(module.total_functions(), 1);
    }

    #[test]
    fn test_import_bad_type_index() {
        let bytes = module_bytes(&[section(
            2,
            &[0x01, 0x03, b'e', b'n', b'v', 0x01, b'f', 0x00, 0x07],
        )]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::InvalidTypeIndex(7))
        );
    }

    #[test]
    fn test_memory_limits_bound() {
        // min = 0x1_0001 pages exceeds the 2^16 page bound.
        let bytes = module_bytes(&[section(5, &[0x01, 0x00, 0x81, 0x80, 0x04])]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::InvalidLimits(Limits {
                min: 0x1_0001,
                max: None
            }))
        );
    }

    #[test]
    fn test_table_limits_inverted() {
        let bytes = module_bytes(&[section(4, &[0x01, 0x70, 0x01, 0x02, 0x01])]);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Validation(ValidationError::InvalidLimits(Limits {
                min: 2,
                max: Some(1)
            }))
        );
    }

    #[test]
    fn test_custom_sections_are_skipped() {
        let mut custom = vec![0x04];
        custom.extend_from_slice(b"meta");
        custom.extend_from_slice(&[0xde, 0xad]);
        let bytes = module_bytes(&[
            section(0, &custom),
            section(1, &[0x01, 0x60, 0x00, 0x00]),
            section(0, &custom),
        ]);
        let module = parse(&bytes).unwrap();
        assert_eq!(module.types.len(), 1);
    }

    #[test]
    fn test_section_length_mismatch() {
        let mut bytes = module_bytes(&[section(1, &[0x01, 0x60, 0x00, 0x00])]);
        // Corrupt the declared size upward and supply trailing ballast so
        // the gate passes.
        bytes[9] = 0x05;
        bytes.push(0x00);
        assert_eq!(
            parse(&bytes).unwrap_err(),
            Error::Parse(ParseError::InvalidSectionLength {
                id: SectionId::Type,
                expected: 5,
                actual: 4
            })
        );
    }

    #[test]
    fn test_many_bodies_through_pool() {
        let bytes = module_bytes(&[
            section(1, &[0x01, 0x60, 0x01, 0x7f, 0x01, 0x7f]),
            section(3, &[0x03, 0x00, 0x00, 0x00]),
            section(
                10,
                &[
                    0x03, //
                    0x04, 0x00, 0x20, 0x00, 0x0b, //
                    0x04, 0x00, 0x20, 0x00, 0x0b, //
                    0x04, 0x00, 0x20, 0x00, 0x0b,
                ],
            ),
        ]);
        let module = parse(&bytes).unwrap();
        assert_eq!(module.codes.len(), 3);
    }

    #[test]
    fn test_push_after_failure_returns_same_error() {
        let mut parser = Parser::with_workers(1);
        let error = parser
            .push(&[0x00, 0x61, 0x73, 0x6e, 0x01, 0x00, 0x00, 0x00])
            .unwrap_err();
        assert_eq!(parser.push(&[0x00]).unwrap_err(), error);
    }
}
