// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The in-memory representation of a decoded module.

use crate::types::{
    DataSegment, ElementSegment, Export, FuncIdx, FunctionBody, FunctionType, Global, GlobalType,
    Import, ImportDescriptor, MemType, RefType, TableType, TypeIdx, Version,
};

/// The number of imports of each kind, computed once when the import
/// section is finalized. Every subsequent index-space check needs these.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImportTotals {
    pub functions: u32,
    pub tables: u32,
    pub memories: u32,
    pub globals: u32,
}

/// A WebAssembly module.
///
/// In each index space, imported entities are numbered before locally
/// declared ones, in import declaration order.
#[derive(Debug, Default)]
pub struct Module {
    /// Module version.
    pub version: Version,
    /// Function type declarations.
    pub types: Vec<FunctionType>,
    /// Import declarations.
    pub imports: Vec<Import>,
    /// Function type indices for locally declared functions.
    pub functions: Vec<TypeIdx>,
    /// Table declarations.
    pub tables: Vec<TableType>,
    /// Memory declarations.
    pub memories: Vec<MemType>,
    /// Global variable declarations.
    pub globals: Vec<Global>,
    /// Export declarations.
    pub exports: Vec<Export>,
    /// Start function index.
    pub start: Option<FuncIdx>,
    /// Element segments.
    pub elements: Vec<ElementSegment>,
    /// Data segment count (for bulk memory operations).
    pub data_count: Option<u32>,
    /// Function bodies.
    pub codes: Vec<FunctionBody>,
    /// Data segments.
    pub datas: Vec<DataSegment>,

    import_totals: ImportTotals,
}

impl Module {
    /// The number of imported functions.
    pub fn imported_functions(&self) -> u32 {
        self.import_totals.functions
    }

    /// The number of imported tables.
    pub fn imported_tables(&self) -> u32 {
        self.import_totals.tables
    }

    /// The number of imported memories.
    pub fn imported_memories(&self) -> u32 {
        self.import_totals.memories
    }

    /// The number of imported globals.
    pub fn imported_globals(&self) -> u32 {
        self.import_totals.globals
    }

    /// The size of the function index space.
    pub fn total_functions(&self) -> u32 {
        self.import_totals.functions + self.functions.len() as u32
    }

    /// The size of the table index space.
    pub fn total_tables(&self) -> u32 {
        self.import_totals.tables + self.tables.len() as u32
    }

    /// The size of the memory index space.
    pub fn total_memories(&self) -> u32 {
        self.import_totals.memories + self.memories.len() as u32
    }

    /// The size of the global index space.
    pub fn total_globals(&self) -> u32 {
        self.import_totals.globals + self.globals.len() as u32
    }

    /// The type index of the `index`-th imported function, in import
    /// declaration order.
    pub fn get_imported_function(&self, index: u32) -> Option<TypeIdx> {
        self.imports
            .iter()
            .filter_map(|import| match import.descriptor {
                ImportDescriptor::Function(typeidx) => Some(typeidx),
                _ => None,
            })
            .nth(index as usize)
    }

    /// The type of the `index`-th imported table.
    pub fn get_imported_table(&self, index: u32) -> Option<TableType> {
        self.imports
            .iter()
            .filter_map(|import| match import.descriptor {
                ImportDescriptor::Table(table) => Some(table),
                _ => None,
            })
            .nth(index as usize)
    }

    /// The type of the `index`-th imported memory.
    pub fn get_imported_memory(&self, index: u32) -> Option<MemType> {
        self.imports
            .iter()
            .filter_map(|import| match import.descriptor {
                ImportDescriptor::Memory(memory) => Some(memory),
                _ => None,
            })
            .nth(index as usize)
    }

    /// The type of the `index`-th imported global.
    pub fn get_imported_global(&self, index: u32) -> Option<GlobalType> {
        self.imports
            .iter()
            .filter_map(|import| match import.descriptor {
                ImportDescriptor::Global(global) => Some(global),
                _ => None,
            })
            .nth(index as usize)
    }

    /// Resolves a function index (imports first) to its type index.
    pub fn function_type_index(&self, index: u32) -> Option<TypeIdx> {
        if index < self.import_totals.functions {
            self.get_imported_function(index)
        } else {
            let local = (index - self.import_totals.functions) as usize;
            self.functions.get(local).copied()
        }
    }

    /// Resolves a table index (imports first) to its table type.
    pub fn table_type(&self, index: u32) -> Option<TableType> {
        if index < self.import_totals.tables {
            self.get_imported_table(index)
        } else {
            let local = (index - self.import_totals.tables) as usize;
            self.tables.get(local).copied()
        }
    }

    /// Resolves a global index (imports first) to its global type.
    pub fn global_type(&self, index: u32) -> Option<GlobalType> {
        if index < self.import_totals.globals {
            self.get_imported_global(index)
        } else {
            let local = (index - self.import_totals.globals) as usize;
            self.globals.get(local).map(|global| global.ty)
        }
    }

    // Computes the per-kind import counts. Must be called once the import
    // section is complete, before any index-space arithmetic.
    pub(crate) fn finalize_imports(&mut self) {
        let mut totals = ImportTotals::default();
        for import in &self.imports {
            match import.descriptor {
                ImportDescriptor::Function(_) => totals.functions += 1,
                ImportDescriptor::Table(_) => totals.tables += 1,
                ImportDescriptor::Memory(_) => totals.memories += 1,
                ImportDescriptor::Global(_) => totals.globals += 1,
            }
        }
        self.import_totals = totals;
    }
}

/// A frozen, worker-visible snapshot of the module state a function body
/// can observe. Built once the sections preceding the code section are
/// final, so workers never race the parser.
#[derive(Debug)]
pub(crate) struct ModuleContext {
    /// Function type declarations.
    pub(crate) types: Vec<FunctionType>,
    /// Type indices for the whole function index space, imports first.
    pub(crate) functions: Vec<TypeIdx>,
    /// The whole table index space, imports first.
    pub(crate) tables: Vec<TableType>,
    /// The whole global index space, imports first.
    pub(crate) globals: Vec<GlobalType>,
    /// Element types of the element segments, in declaration order.
    pub(crate) element_types: Vec<RefType>,
    /// Size of the memory index space.
    pub(crate) total_memories: u32,
    /// The data count section's value, if present.
    pub(crate) data_count: Option<u32>,
}

impl ModuleContext {
    pub(crate) fn snapshot(module: &Module) -> Self {
        let mut functions = Vec::with_capacity(module.total_functions() as usize);
        let mut tables = Vec::with_capacity(module.total_tables() as usize);
        let mut globals = Vec::with_capacity(module.total_globals() as usize);
        for import in &module.imports {
            match import.descriptor {
                ImportDescriptor::Function(typeidx) => functions.push(typeidx),
                ImportDescriptor::Table(table) => tables.push(table),
                ImportDescriptor::Memory(_) => {}
                ImportDescriptor::Global(global) => globals.push(global),
            }
        }
        functions.extend_from_slice(&module.functions);
        tables.extend_from_slice(&module.tables);
        globals.extend(module.globals.iter().map(|global| global.ty));

        Self {
            types: module.types.clone(),
            functions,
            tables,
            globals,
            element_types: module.elements.iter().map(|segment| segment.ty).collect(),
            total_memories: module.total_memories(),
            data_count: module.data_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GlobalTypeMutability, Limits, ValType};

    fn import(descriptor: ImportDescriptor) -> Import {
        Import {
            module: "env".to_owned(),
            field: "x".to_owned(),
            descriptor,
        }
    }

    #[test]
    fn test_import_totals_and_index_spaces() {
        let mut module = Module::default();
        module.types = vec![
            FunctionType::empty(),
            FunctionType::returning(ValType::I32),
        ];
        module.imports = vec![
            import(ImportDescriptor::Function(TypeIdx::new(1))),
            import(ImportDescriptor::Global(GlobalType {
                value: ValType::I64,
                mutability: GlobalTypeMutability::Const,
            })),
            import(ImportDescriptor::Function(TypeIdx::new(0))),
            import(ImportDescriptor::Table(TableType {
                reftype: RefType::Func,
                limits: Limits { min: 0, max: None },
            })),
        ];
        module.functions = vec![TypeIdx::new(0)];
        module.finalize_imports();

        assert_eq!(module.imported_functions(), 2);
        assert_eq!(module.imported_tables(), 1);
        assert_eq!(module.imported_memories(), 0);
        assert_eq!(module.imported_globals(), 1);
        assert_eq!(module.total_functions(), 3);

        // Imports are numbered before locally declared functions.
        assert_eq!(module.function_type_index(0), Some(TypeIdx::new(1)));
        assert_eq!(module.function_type_index(1), Some(TypeIdx::new(0)));
        assert_eq!(module.function_type_index(2), Some(TypeIdx::new(0)));
        assert_eq!(module.function_type_index(3), None);

        let context = ModuleContext::snapshot(&module);
        assert_eq!(
            context.functions,
            vec![TypeIdx::new(1), TypeIdx::new(0), TypeIdx::new(0)]
        );
        assert_eq!(context.globals.len(), 1);
        assert_eq!(context.tables.len(), 1);
    }
}
