//! WebAssembly backend.
//!
//! Function index space: host imports first (catalogue order), then the
//! runtime helpers, then every monomorphic instance in request order.
//! Address 0 of linear memory holds the bump-allocator pointer; static
//! string data starts at 8 and the heap after it.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;
use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, ElementSection, Elements, EntityType,
    ExportKind, ExportSection, Function, FunctionSection, ImportSection, Instruction, MemArg,
    MemorySection, MemoryType, Module, NameMap, NameSection, RefType, TableSection, TableType,
    TypeSection, ValType,
};

use crate::ast::{BinaryOp, Literal, UnaryOp};
use crate::builtins::{self, Builtin, BuiltinKind, Lowering, HOST_MODULE};
use crate::hir::*;
use crate::layout::{self, LIST_HEADER, STRING_HEADER};
use crate::module_graph::ModuleId;
use crate::monomorphize::MonoProgram;
use crate::span::Span;
use crate::types::{Type, TypeCtx};

const PAGE_SIZE: u32 = 0x10000;
/// Working region reserved beyond static data in the initial memory.
const INITIAL_HEAP: u32 = 0x10000;
const DATA_START: u32 = 8;
/// Export names the runtime claims for itself.
pub const RESERVED_EXPORTS: [&str; 2] = ["memory", "__alloc"];

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("instantiation of `{function}` exceeds the maximum depth; is it polymorphically recursive?")]
    InstantiationDepth { function: String, span: Span },
    #[error("in `{function}`: {source}")]
    InFunction {
        function: String,
        span: Span,
        source: Box<CodegenError>,
    },
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("type `{0}` has no runtime representation")]
    UnsupportedType(String),
    #[error("string literal was not interned")]
    MissingString,
    #[error("generated module is invalid: {0}")]
    Validation(String),
}

impl CodegenError {
    /// Definition site of the function that failed, when known.
    pub fn span(&self) -> Option<Span> {
        match self {
            CodegenError::InstantiationDepth { span, .. } | CodegenError::InFunction { span, .. } => {
                Some(*span)
            }
            _ => None,
        }
    }
}

/// Lower every instance into one module and validate it.
pub fn generate_wasm(
    program: &MonoProgram,
    types: &TypeCtx,
    entry: ModuleId,
) -> Result<Vec<u8>, CodegenError> {
    let usage = Usage::collect(program);
    let strings = StringPool::new(&usage.strings);

    let mut sigs = Signatures::default();
    let mut index: HashMap<String, u32> = HashMap::new();
    let mut names: Vec<String> = Vec::new();

    // host imports
    let hosts: Vec<Builtin> = builtins::builtins()
        .into_iter()
        .filter(|b| b.lowering == Lowering::Host && usage.host.contains(&b.kind))
        .collect();
    let mut import_section = ImportSection::new();
    let mut host_index = HashMap::new();
    for b in &hosts {
        let ty = sigs.index(&b.params, &b.result);
        import_section.import(HOST_MODULE, b.name, EntityType::Function(ty));
        host_index.insert(b.kind, names.len() as u32);
        names.push(b.name.to_string());
    }
    let needs_alloc_export = hosts.iter().any(|b| b.result.is_heap());

    // runtime helpers, then user instances
    let rt = Runtime::new(names.len() as u32);
    let mut func_section = FunctionSection::new();
    let mut code_section = CodeSection::new();
    for (name, params, result, body) in rt.functions() {
        func_section.function(sigs.raw(params, result));
        code_section.function(&body);
        names.push(name.to_string());
    }
    for f in &program.functions {
        index.insert(f.qualified_name.clone(), names.len() as u32);
        names.push(f.qualified_name.clone());
    }

    let slots: HashMap<String, u32> = usage
        .slots
        .iter()
        .enumerate()
        .map(|(i, s)| (s.clone(), i as u32))
        .collect();

    let shared = Shared {
        types,
        index: &index,
        host: &host_index,
        rt: &rt,
        strings: &strings,
        slots: &slots,
    };
    for f in &program.functions {
        let ty = sigs.index(&f.param_types(), &f.result);
        func_section.function(ty);
        let body = FnGen::new(&shared, f, &mut sigs)
            .lower()
            .map_err(|e| CodegenError::InFunction {
                function: f.qualified_name.clone(),
                span: f.span,
                source: Box::new(e),
            })?;
        code_section.function(&body);
    }

    let mut table_section = TableSection::new();
    let mut element_section = ElementSection::new();
    if !usage.slots.is_empty() {
        table_section.table(TableType {
            element_type: RefType::FUNCREF,
            table64: false,
            minimum: usage.slots.len() as u64,
            maximum: Some(usage.slots.len() as u64),
            shared: false,
        });
        let funcs = usage
            .slots
            .iter()
            .map(|s| {
                index
                    .get(s)
                    .copied()
                    .ok_or_else(|| CodegenError::UnknownFunction(s.clone()))
            })
            .collect::<Result<Vec<u32>, _>>()?;
        element_section.active(
            Some(0),
            &ConstExpr::i32_const(0),
            Elements::Functions(funcs.as_slice().into()),
        );
    }

    let mut memory_section = MemorySection::new();
    let pages = (strings.heap_base + INITIAL_HEAP).div_ceil(PAGE_SIZE);
    memory_section.memory(MemoryType {
        minimum: pages as u64,
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });

    let mut export_section = ExportSection::new();
    export_section.export("memory", ExportKind::Memory, 0);
    if needs_alloc_export {
        export_section.export("__alloc", ExportKind::Func, rt.alloc);
    }
    for f in &program.functions {
        if f.module == entry && f.exported {
            export_section.export(&f.name, ExportKind::Func, index[&f.qualified_name]);
        }
    }

    let mut data_section = DataSection::new();
    data_section.active(
        0,
        &ConstExpr::i32_const(0),
        strings.heap_base.to_le_bytes().to_vec(),
    );
    for (offset, bytes) in &strings.segments {
        data_section.active(0, &ConstExpr::i32_const(*offset as i32), bytes.clone());
    }

    let mut name_map = NameMap::new();
    for (i, n) in names.iter().enumerate() {
        name_map.append(i as u32, n);
    }
    let mut name_section = NameSection::new();
    name_section.functions(&name_map);

    let mut module = Module::new();
    module.section(&sigs.section);
    if !hosts.is_empty() {
        module.section(&import_section);
    }
    module.section(&func_section);
    if !usage.slots.is_empty() {
        module.section(&table_section);
    }
    module.section(&memory_section);
    module.section(&export_section);
    if !usage.slots.is_empty() {
        module.section(&element_section);
    }
    module.section(&code_section);
    module.section(&data_section);
    module.section(&name_section);

    let bytes = module.finish();
    wasmparser::validate(&bytes).map_err(|e| CodegenError::Validation(e.to_string()))?;
    log::debug!(
        "codegen: {} function(s), {} import(s), {} byte(s)",
        program.functions.len(),
        hosts.len(),
        bytes.len()
    );
    Ok(bytes)
}

// ---------------------------------------------------------------------
// Module-wide tables
// ---------------------------------------------------------------------

/// Deduplicated function signatures.
#[derive(Default)]
struct Signatures {
    section: TypeSection,
    map: BTreeMap<(Vec<ValType>, Vec<ValType>), u32>,
}

impl Signatures {
    fn index(&mut self, params: &[Type], result: &Type) -> u32 {
        let params: Vec<ValType> = params.iter().filter_map(layout::val_type).collect();
        let results: Vec<ValType> = layout::val_type(result).into_iter().collect();
        self.raw(params, results)
    }

    fn raw(&mut self, params: Vec<ValType>, results: Vec<ValType>) -> u32 {
        let section = &mut self.section;
        *self
            .map
            .entry((params.clone(), results.clone()))
            .or_insert_with(|| {
                let idx = section.len();
                section.ty().function(params, results);
                idx
            })
    }
}

/// What the program actually uses: host built-ins, string literals and
/// functions referenced as values (table slots, first-use order).
#[derive(Default)]
struct Usage {
    host: HashSet<BuiltinKind>,
    strings: Vec<String>,
    seen_strings: HashSet<String>,
    slots: Vec<String>,
}

impl Usage {
    fn collect(program: &MonoProgram) -> Self {
        let mut usage = Usage::default();
        for f in &program.functions {
            usage.expr(&f.body);
        }
        usage
    }

    fn string(&mut self, s: &str) {
        if self.seen_strings.insert(s.to_string()) {
            self.strings.push(s.to_string());
        }
    }

    fn pattern(&mut self, pat: &HirPattern) {
        match &pat.kind {
            HirPatternKind::Literal(Literal::Str(s)) => self.string(s),
            HirPatternKind::Variant { fields, .. } => {
                for f in fields {
                    self.pattern(f);
                }
            }
            _ => {}
        }
    }

    fn expr(&mut self, expr: &HirExpr) {
        match &expr.kind {
            HirExprKind::Literal(Literal::Str(s)) => self.string(s),
            HirExprKind::Literal(_) | HirExprKind::Local(_) => {}
            HirExprKind::FuncRef { symbol, .. } => {
                if !self.slots.contains(symbol) {
                    self.slots.push(symbol.clone());
                }
            }
            HirExprKind::Call { target, args } => {
                match target {
                    CallTarget::Builtin { kind, .. } => {
                        self.host.insert(*kind);
                    }
                    CallTarget::Indirect(callee) => self.expr(callee),
                    CallTarget::Function { .. } | CallTarget::Constructor { .. } => {}
                }
                for a in args {
                    self.expr(a);
                }
            }
            HirExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            HirExprKind::Unary { operand, .. } => self.expr(operand),
            HirExprKind::Field { base, .. } => self.expr(base),
            HirExprKind::Block { stmts, tail } => {
                for s in stmts {
                    match s {
                        HirStmt::Let { value, .. } => self.expr(value),
                        HirStmt::Expr(e) => self.expr(e),
                    }
                }
                if let Some(t) = tail {
                    self.expr(t);
                }
            }
            HirExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond);
                self.expr(then_branch);
                if let Some(e) = else_branch {
                    self.expr(e);
                }
            }
            HirExprKind::Match { scrutinee, arms } => {
                self.expr(scrutinee);
                for arm in arms {
                    self.pattern(&arm.pattern);
                    self.expr(&arm.body);
                }
            }
            HirExprKind::List(items) => {
                for i in items {
                    self.expr(i);
                }
            }
            HirExprKind::Record { fields } => {
                for (_, e) in fields {
                    self.expr(e);
                }
            }
        }
    }
}

/// Interned string literals laid out as `[len][bytes]` from [`DATA_START`].
struct StringPool {
    offsets: HashMap<String, u32>,
    segments: Vec<(u32, Vec<u8>)>,
    heap_base: u32,
}

impl StringPool {
    fn new(strings: &[String]) -> Self {
        let mut offsets = HashMap::new();
        let mut segments = Vec::new();
        let mut cursor = DATA_START;
        for s in strings {
            cursor = layout::align_to(cursor, 4);
            let bytes = s.as_bytes();
            let mut data = Vec::with_capacity(bytes.len() + 4);
            data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            data.extend_from_slice(bytes);
            offsets.insert(s.clone(), cursor);
            segments.push((cursor, data));
            cursor += STRING_HEADER + bytes.len() as u32;
        }
        StringPool {
            offsets,
            segments,
            heap_base: layout::align_to(cursor, 8),
        }
    }
}

// ---------------------------------------------------------------------
// Runtime helpers
// ---------------------------------------------------------------------

/// Indices of the internal support functions.
struct Runtime {
    alloc: u32,
    memcpy: u32,
    str_concat: u32,
    str_eq: u32,
    list_append: u32,
    list_tail: u32,
}

fn word(offset: u32) -> MemArg {
    MemArg {
        offset: offset as u64,
        align: 2,
        memory_index: 0,
    }
}

fn byte(offset: u32) -> MemArg {
    MemArg {
        offset: offset as u64,
        align: 0,
        memory_index: 0,
    }
}

fn body(locals: u32, insts: &[Instruction<'_>]) -> Function {
    let mut f = Function::new(if locals > 0 {
        vec![(locals, ValType::I32)]
    } else {
        Vec::new()
    });
    for i in insts {
        f.instruction(i);
    }
    f.instruction(&Instruction::End);
    f
}

impl Runtime {
    fn new(base: u32) -> Self {
        Runtime {
            alloc: base,
            memcpy: base + 1,
            str_concat: base + 2,
            str_eq: base + 3,
            list_append: base + 4,
            list_tail: base + 5,
        }
    }

    /// `(name, params, results, body)` in index order.
    fn functions(&self) -> Vec<(&'static str, Vec<ValType>, Vec<ValType>, Function)> {
        use Instruction as I;
        use ValType::I32;
        vec![
            (
                "__alloc",
                vec![I32],
                vec![I32],
                // (size) locals: 1 ptr, 2 end
                body(
                    2,
                    &[
                        I::I32Const(0),
                        I::I32Load(word(0)),
                        I::LocalSet(1),
                        I::LocalGet(1),
                        I::LocalGet(0),
                        I::I32Add,
                        I::I32Const(7),
                        I::I32Add,
                        I::I32Const(-8),
                        I::I32And,
                        I::LocalSet(2),
                        I::LocalGet(2),
                        I::MemorySize(0),
                        I::I32Const(16),
                        I::I32Shl,
                        I::I32GtU,
                        I::If(BlockType::Empty),
                        I::LocalGet(2),
                        I::MemorySize(0),
                        I::I32Const(16),
                        I::I32Shl,
                        I::I32Sub,
                        I::I32Const(0xFFFF),
                        I::I32Add,
                        I::I32Const(16),
                        I::I32ShrU,
                        I::MemoryGrow(0),
                        I::I32Const(-1),
                        I::I32Eq,
                        I::If(BlockType::Empty),
                        I::Unreachable,
                        I::End,
                        I::End,
                        I::I32Const(0),
                        I::LocalGet(2),
                        I::I32Store(word(0)),
                        I::LocalGet(1),
                    ],
                ),
            ),
            (
                "__memcpy",
                vec![I32, I32, I32],
                vec![],
                // (dst, src, len) locals: 3 i
                body(
                    1,
                    &[
                        I::Block(BlockType::Empty),
                        I::Loop(BlockType::Empty),
                        I::LocalGet(3),
                        I::LocalGet(2),
                        I::I32GeU,
                        I::BrIf(1),
                        I::LocalGet(0),
                        I::LocalGet(3),
                        I::I32Add,
                        I::LocalGet(1),
                        I::LocalGet(3),
                        I::I32Add,
                        I::I32Load8U(byte(0)),
                        I::I32Store8(byte(0)),
                        I::LocalGet(3),
                        I::I32Const(1),
                        I::I32Add,
                        I::LocalSet(3),
                        I::Br(0),
                        I::End,
                        I::End,
                    ],
                ),
            ),
            (
                "__str_concat",
                vec![I32, I32],
                vec![I32],
                // (a, b) locals: 2 len a, 3 len b, 4 result
                body(
                    3,
                    &[
                        I::LocalGet(0),
                        I::I32Load(word(0)),
                        I::LocalSet(2),
                        I::LocalGet(1),
                        I::I32Load(word(0)),
                        I::LocalSet(3),
                        I::I32Const(STRING_HEADER as i32),
                        I::LocalGet(2),
                        I::I32Add,
                        I::LocalGet(3),
                        I::I32Add,
                        I::Call(self.alloc),
                        I::LocalSet(4),
                        I::LocalGet(4),
                        I::LocalGet(2),
                        I::LocalGet(3),
                        I::I32Add,
                        I::I32Store(word(0)),
                        I::LocalGet(4),
                        I::I32Const(STRING_HEADER as i32),
                        I::I32Add,
                        I::LocalGet(0),
                        I::I32Const(STRING_HEADER as i32),
                        I::I32Add,
                        I::LocalGet(2),
                        I::Call(self.memcpy),
                        I::LocalGet(4),
                        I::I32Const(STRING_HEADER as i32),
                        I::I32Add,
                        I::LocalGet(2),
                        I::I32Add,
                        I::LocalGet(1),
                        I::I32Const(STRING_HEADER as i32),
                        I::I32Add,
                        I::LocalGet(3),
                        I::Call(self.memcpy),
                        I::LocalGet(4),
                    ],
                ),
            ),
            (
                "__str_eq",
                vec![I32, I32],
                vec![I32],
                // (a, b) locals: 2 len, 3 i
                body(
                    2,
                    &[
                        I::LocalGet(0),
                        I::LocalGet(1),
                        I::I32Eq,
                        I::If(BlockType::Empty),
                        I::I32Const(1),
                        I::Return,
                        I::End,
                        I::LocalGet(0),
                        I::I32Load(word(0)),
                        I::LocalTee(2),
                        I::LocalGet(1),
                        I::I32Load(word(0)),
                        I::I32Ne,
                        I::If(BlockType::Empty),
                        I::I32Const(0),
                        I::Return,
                        I::End,
                        I::Block(BlockType::Empty),
                        I::Loop(BlockType::Empty),
                        I::LocalGet(3),
                        I::LocalGet(2),
                        I::I32GeU,
                        I::BrIf(1),
                        I::LocalGet(0),
                        I::LocalGet(3),
                        I::I32Add,
                        I::I32Load8U(byte(STRING_HEADER)),
                        I::LocalGet(1),
                        I::LocalGet(3),
                        I::I32Add,
                        I::I32Load8U(byte(STRING_HEADER)),
                        I::I32Ne,
                        I::If(BlockType::Empty),
                        I::I32Const(0),
                        I::Return,
                        I::End,
                        I::LocalGet(3),
                        I::I32Const(1),
                        I::I32Add,
                        I::LocalSet(3),
                        I::Br(0),
                        I::End,
                        I::End,
                        I::I32Const(1),
                    ],
                ),
            ),
            (
                "__list_append",
                vec![I32, I32],
                vec![I32],
                // (list, elem size) locals: 2 len, 3 result; the caller
                // stores the new element into the last slot
                body(
                    2,
                    &[
                        I::LocalGet(0),
                        I::I32Load(word(0)),
                        I::LocalSet(2),
                        I::I32Const(LIST_HEADER as i32),
                        I::LocalGet(2),
                        I::I32Const(1),
                        I::I32Add,
                        I::LocalGet(1),
                        I::I32Mul,
                        I::I32Add,
                        I::Call(self.alloc),
                        I::LocalSet(3),
                        I::LocalGet(3),
                        I::LocalGet(2),
                        I::I32Const(1),
                        I::I32Add,
                        I::I32Store(word(0)),
                        I::LocalGet(3),
                        I::I32Const(LIST_HEADER as i32),
                        I::I32Add,
                        I::LocalGet(0),
                        I::I32Const(LIST_HEADER as i32),
                        I::I32Add,
                        I::LocalGet(2),
                        I::LocalGet(1),
                        I::I32Mul,
                        I::Call(self.memcpy),
                        I::LocalGet(3),
                    ],
                ),
            ),
            (
                "__list_tail",
                vec![I32, I32],
                vec![I32],
                // (list, elem size) locals: 2 len, 3 result
                body(
                    2,
                    &[
                        I::LocalGet(0),
                        I::I32Load(word(0)),
                        I::LocalTee(2),
                        I::I32Eqz,
                        I::If(BlockType::Empty),
                        I::Unreachable,
                        I::End,
                        I::I32Const(LIST_HEADER as i32),
                        I::LocalGet(2),
                        I::I32Const(1),
                        I::I32Sub,
                        I::LocalGet(1),
                        I::I32Mul,
                        I::I32Add,
                        I::Call(self.alloc),
                        I::LocalSet(3),
                        I::LocalGet(3),
                        I::LocalGet(2),
                        I::I32Const(1),
                        I::I32Sub,
                        I::I32Store(word(0)),
                        I::LocalGet(3),
                        I::I32Const(LIST_HEADER as i32),
                        I::I32Add,
                        I::LocalGet(0),
                        I::I32Const(LIST_HEADER as i32),
                        I::I32Add,
                        I::LocalGet(1),
                        I::I32Add,
                        I::LocalGet(2),
                        I::I32Const(1),
                        I::I32Sub,
                        I::LocalGet(1),
                        I::I32Mul,
                        I::Call(self.memcpy),
                        I::LocalGet(3),
                    ],
                ),
            ),
        ]
    }
}

// ---------------------------------------------------------------------
// Function lowering
// ---------------------------------------------------------------------

struct Shared<'a> {
    types: &'a TypeCtx,
    index: &'a HashMap<String, u32>,
    host: &'a HashMap<BuiltinKind, u32>,
    rt: &'a Runtime,
    strings: &'a StringPool,
    slots: &'a HashMap<String, u32>,
}

fn block_type(ty: &Type) -> BlockType {
    layout::val_type(ty).map_or(BlockType::Empty, BlockType::Result)
}

fn load(ty: &Type, offset: u32) -> Option<Instruction<'static>> {
    let arg = layout::mem_arg(ty, offset);
    layout::val_type(ty).map(|vt| match vt {
        ValType::I64 => Instruction::I64Load(arg),
        ValType::F64 => Instruction::F64Load(arg),
        _ => Instruction::I32Load(arg),
    })
}

fn store(ty: &Type, offset: u32) -> Option<Instruction<'static>> {
    let arg = layout::mem_arg(ty, offset);
    layout::val_type(ty).map(|vt| match vt {
        ValType::I64 => Instruction::I64Store(arg),
        ValType::F64 => Instruction::F64Store(arg),
        _ => Instruction::I32Store(arg),
    })
}

/// True if `expr` contains a call to `name` in tail position.
fn has_tail_self_call(expr: &HirExpr, name: &str) -> bool {
    match &expr.kind {
        HirExprKind::Call {
            target: CallTarget::Function { symbol, .. },
            ..
        } => symbol == name,
        HirExprKind::Block { tail, .. } => tail
            .as_ref()
            .is_some_and(|t| has_tail_self_call(t, name)),
        HirExprKind::If {
            then_branch,
            else_branch,
            ..
        } => {
            has_tail_self_call(then_branch, name)
                || else_branch
                    .as_ref()
                    .is_some_and(|e| has_tail_self_call(e, name))
        }
        HirExprKind::Match { arms, .. } => arms.iter().any(|a| has_tail_self_call(&a.body, name)),
        _ => false,
    }
}

struct FnGen<'a> {
    cx: &'a Shared<'a>,
    sigs: &'a mut Signatures,
    func: &'a HirFunction,
    /// Wasm local index per [`LocalId`]; `None` for Unit locals.
    locals: Vec<Option<u32>>,
    param_count: u32,
    extra: Vec<ValType>,
    insts: Vec<Instruction<'static>>,
    /// Open structured-control constructs.
    blocks: u32,
    /// Level of the loop that tail self-calls branch back to.
    loop_level: Option<u32>,
}

impl<'a> FnGen<'a> {
    fn new(cx: &'a Shared<'a>, func: &'a HirFunction, sigs: &'a mut Signatures) -> Self {
        let mut locals = vec![None; func.locals.len()];
        let mut param_count = 0;
        for p in &func.params {
            if layout::val_type(&func.local(*p).ty).is_some() {
                locals[p.0 as usize] = Some(param_count);
                param_count += 1;
            }
        }
        let mut extra = Vec::new();
        for (i, local) in func.locals.iter().enumerate() {
            if func.params.contains(&LocalId(i as u32)) {
                continue;
            }
            if let Some(vt) = layout::val_type(&local.ty) {
                locals[i] = Some(param_count + extra.len() as u32);
                extra.push(vt);
            }
        }
        FnGen {
            cx,
            sigs,
            func,
            locals,
            param_count,
            extra,
            insts: Vec::new(),
            blocks: 0,
            loop_level: None,
        }
    }

    fn lower(mut self) -> Result<Function, CodegenError> {
        let func = self.func;
        let tail_loop = has_tail_self_call(&func.body, &func.qualified_name);
        if tail_loop {
            self.open(Instruction::Loop(block_type(&func.result)));
            self.loop_level = Some(self.blocks);
        }
        self.expr(&func.body, tail_loop)?;
        if tail_loop {
            self.close();
        }
        let mut f = Function::new(self.extra.iter().map(|t| (1, *t)));
        for inst in &self.insts {
            f.instruction(inst);
        }
        f.instruction(&Instruction::End);
        Ok(f)
    }

    fn emit(&mut self, inst: Instruction<'static>) {
        self.insts.push(inst);
    }

    fn open(&mut self, inst: Instruction<'static>) {
        self.insts.push(inst);
        self.blocks += 1;
    }

    fn close(&mut self) {
        self.insts.push(Instruction::End);
        self.blocks -= 1;
    }

    fn temp(&mut self, vt: ValType) -> u32 {
        let idx = self.param_count + self.extra.len() as u32;
        self.extra.push(vt);
        idx
    }

    fn local(&self, id: LocalId) -> Option<u32> {
        self.locals.get(id.0 as usize).copied().flatten()
    }

    fn function_index(&self, name: &str) -> Result<u32, CodegenError> {
        self.cx
            .index
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::UnknownFunction(name.to_string()))
    }

    fn unsupported(&self, ty: &Type) -> CodegenError {
        CodegenError::UnsupportedType(self.cx.types.display(ty))
    }

    /// Allocate `size` bytes and keep the pointer in a fresh local.
    fn alloc(&mut self, size: Instruction<'static>) -> u32 {
        self.emit(size);
        self.emit(Instruction::Call(self.cx.rt.alloc));
        let ptr = self.temp(ValType::I32);
        self.emit(Instruction::LocalSet(ptr));
        ptr
    }

    /// Evaluate `value` and store it at `ptr + offset`.
    fn store_at(&mut self, ptr: u32, offset: u32, value: &HirExpr) -> Result<(), CodegenError> {
        match store(&value.ty, offset) {
            Some(inst) => {
                self.emit(Instruction::LocalGet(ptr));
                self.expr(value, false)?;
                self.emit(inst);
            }
            None => self.expr(value, false)?,
        }
        Ok(())
    }

    fn expr(&mut self, expr: &HirExpr, tail: bool) -> Result<(), CodegenError> {
        match &expr.kind {
            HirExprKind::Literal(lit) => match lit {
                Literal::Int(v) => self.emit(Instruction::I64Const(*v)),
                Literal::Float(v) => self.emit(Instruction::F64Const((*v).into())),
                Literal::Bool(b) => self.emit(Instruction::I32Const(*b as i32)),
                Literal::Str(s) => {
                    let off = self
                        .cx
                        .strings
                        .offsets
                        .get(s)
                        .copied()
                        .ok_or(CodegenError::MissingString)?;
                    self.emit(Instruction::I32Const(off as i32));
                }
                Literal::Unit => {}
            },
            HirExprKind::Local(id) => {
                if let Some(idx) = self.local(*id) {
                    self.emit(Instruction::LocalGet(idx));
                }
            }
            HirExprKind::FuncRef { symbol, .. } => {
                let slot = self
                    .cx
                    .slots
                    .get(symbol)
                    .copied()
                    .ok_or_else(|| CodegenError::UnknownFunction(symbol.clone()))?;
                self.emit(Instruction::I32Const(slot as i32));
            }
            HirExprKind::Call { target, args } => self.call(expr, target, args, tail)?,
            HirExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs)?,
            HirExprKind::Unary { op, operand } => match op {
                UnaryOp::Neg if operand.ty == Type::Float64 => {
                    self.expr(operand, false)?;
                    self.emit(Instruction::F64Neg);
                }
                UnaryOp::Neg => {
                    self.emit(Instruction::I64Const(0));
                    self.expr(operand, false)?;
                    self.emit(Instruction::I64Sub);
                }
                UnaryOp::Not => {
                    self.expr(operand, false)?;
                    self.emit(Instruction::I32Eqz);
                }
            },
            HirExprKind::Field { base, index } => {
                let Type::Record { decl, args } = &base.ty else {
                    return Err(self.unsupported(&base.ty));
                };
                let offset = layout::record_layout(self.cx.types, *decl, args).offsets[*index];
                self.expr(base, false)?;
                match load(&expr.ty, offset) {
                    Some(inst) => self.emit(inst),
                    None => self.emit(Instruction::Drop),
                }
            }
            HirExprKind::Block { stmts, tail: value } => {
                for stmt in stmts {
                    match stmt {
                        HirStmt::Let { local, value } => {
                            self.expr(value, false)?;
                            if let Some(idx) = self.local(*local) {
                                self.emit(Instruction::LocalSet(idx));
                            }
                        }
                        HirStmt::Expr(e) => {
                            self.expr(e, false)?;
                            if layout::val_type(&e.ty).is_some() {
                                self.emit(Instruction::Drop);
                            }
                        }
                    }
                }
                if let Some(v) = value {
                    self.expr(v, tail)?;
                }
            }
            HirExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond, false)?;
                self.open(Instruction::If(block_type(&expr.ty)));
                self.expr(then_branch, tail)?;
                if let Some(e) = else_branch {
                    self.emit(Instruction::Else);
                    self.expr(e, tail)?;
                }
                self.close();
            }
            HirExprKind::Match { scrutinee, arms } => self.lower_match(expr, scrutinee, arms, tail)?,
            HirExprKind::List(items) => {
                let Type::List(elem) = &expr.ty else {
                    return Err(self.unsupported(&expr.ty));
                };
                let size = layout::size_of(elem);
                let n = items.len() as u32;
                let ptr = self.alloc(Instruction::I32Const((LIST_HEADER + n * size) as i32));
                self.emit(Instruction::LocalGet(ptr));
                self.emit(Instruction::I32Const(n as i32));
                self.emit(Instruction::I32Store(word(0)));
                for (i, item) in items.iter().enumerate() {
                    self.store_at(ptr, LIST_HEADER + i as u32 * size, item)?;
                }
                self.emit(Instruction::LocalGet(ptr));
            }
            HirExprKind::Record { fields } => {
                let Type::Record { decl, args } = &expr.ty else {
                    return Err(self.unsupported(&expr.ty));
                };
                let layout = layout::record_layout(self.cx.types, *decl, args);
                let ptr = self.alloc(Instruction::I32Const(layout.size as i32));
                for (index, value) in fields {
                    self.store_at(ptr, layout.offsets[*index], value)?;
                }
                self.emit(Instruction::LocalGet(ptr));
            }
        }
        Ok(())
    }

    fn call(
        &mut self,
        expr: &HirExpr,
        target: &CallTarget,
        args: &[HirExpr],
        tail: bool,
    ) -> Result<(), CodegenError> {
        match target {
            CallTarget::Function { symbol, .. } => {
                let is_self = *symbol == self.func.qualified_name;
                for a in args {
                    self.expr(a, false)?;
                }
                match self.loop_level {
                    Some(level) if tail && is_self => {
                        let func = self.func;
                        for p in func.params.iter().rev() {
                            if let Some(idx) = self.local(*p) {
                                self.emit(Instruction::LocalSet(idx));
                            }
                        }
                        self.emit(Instruction::Br(self.blocks - level));
                    }
                    _ => {
                        let idx = self.function_index(symbol)?;
                        self.emit(Instruction::Call(idx));
                    }
                }
            }
            CallTarget::Builtin { kind, .. } => self.builtin(*kind, expr, args)?,
            CallTarget::Constructor { decl, variant } => {
                let Type::Union { args: type_args, .. } = &expr.ty else {
                    return Err(self.unsupported(&expr.ty));
                };
                let layout = layout::union_layout(self.cx.types, *decl, type_args);
                let ptr = self.alloc(Instruction::I32Const(layout.size as i32));
                self.emit(Instruction::LocalGet(ptr));
                self.emit(Instruction::I32Const(*variant as i32));
                self.emit(Instruction::I32Store(word(0)));
                let offsets = layout.variants[*variant].offsets.clone();
                for (a, offset) in args.iter().zip(offsets) {
                    self.store_at(ptr, offset, a)?;
                }
                self.emit(Instruction::LocalGet(ptr));
            }
            CallTarget::Indirect(callee) => {
                let Type::Function { params, result } = &callee.ty else {
                    return Err(self.unsupported(&callee.ty));
                };
                self.expr(callee, false)?;
                let slot = self.temp(ValType::I32);
                self.emit(Instruction::LocalSet(slot));
                for a in args {
                    self.expr(a, false)?;
                }
                self.emit(Instruction::LocalGet(slot));
                let type_index = self.sigs.index(params, result);
                self.emit(Instruction::CallIndirect {
                    type_index,
                    table_index: 0,
                });
            }
        }
        Ok(())
    }

    fn builtin(&mut self, kind: BuiltinKind, expr: &HirExpr, args: &[HirExpr]) -> Result<(), CodegenError> {
        use BuiltinKind as K;
        if let Some(idx) = self.cx.host.get(&kind).copied() {
            for a in args {
                self.expr(a, false)?;
            }
            self.emit(Instruction::Call(idx));
            return Ok(());
        }
        let list_elem = |ty: &Type| match ty {
            Type::List(e) => Some((**e).clone()),
            _ => None,
        };
        match kind {
            K::StringLength | K::Length => {
                self.expr(&args[0], false)?;
                self.emit(Instruction::I32Load(word(0)));
                self.emit(Instruction::I64ExtendI32U);
            }
            K::IsEmpty => {
                self.expr(&args[0], false)?;
                self.emit(Instruction::I32Load(word(0)));
                self.emit(Instruction::I32Eqz);
            }
            K::Head => {
                self.expr(&args[0], false)?;
                let list = self.temp(ValType::I32);
                self.emit(Instruction::LocalTee(list));
                self.emit(Instruction::I32Load(word(0)));
                self.emit(Instruction::I32Eqz);
                self.open(Instruction::If(BlockType::Empty));
                self.emit(Instruction::Unreachable);
                self.close();
                if let Some(inst) = load(&expr.ty, LIST_HEADER) {
                    self.emit(Instruction::LocalGet(list));
                    self.emit(inst);
                }
            }
            K::Tail => {
                let elem = list_elem(&expr.ty).ok_or_else(|| self.unsupported(&expr.ty))?;
                self.expr(&args[0], false)?;
                self.emit(Instruction::I32Const(layout::size_of(&elem) as i32));
                self.emit(Instruction::Call(self.cx.rt.list_tail));
            }
            K::Append => {
                let elem = &args[1];
                let size = layout::size_of(&elem.ty);
                self.expr(&args[0], false)?;
                self.emit(Instruction::I32Const(size as i32));
                self.emit(Instruction::Call(self.cx.rt.list_append));
                let list = self.temp(ValType::I32);
                self.emit(Instruction::LocalSet(list));
                match store(&elem.ty, LIST_HEADER) {
                    Some(inst) => {
                        // address of the last slot: list + (len - 1) * size
                        self.emit(Instruction::LocalGet(list));
                        self.emit(Instruction::LocalGet(list));
                        self.emit(Instruction::I32Load(word(0)));
                        self.emit(Instruction::I32Const(1));
                        self.emit(Instruction::I32Sub);
                        self.emit(Instruction::I32Const(size as i32));
                        self.emit(Instruction::I32Mul);
                        self.emit(Instruction::I32Add);
                        self.expr(elem, false)?;
                        self.emit(inst);
                    }
                    None => self.expr(elem, false)?,
                }
                self.emit(Instruction::LocalGet(list));
            }
            K::IntToFloat => {
                self.expr(&args[0], false)?;
                self.emit(Instruction::F64ConvertI64S);
            }
            K::FloatToInt => {
                self.expr(&args[0], false)?;
                self.emit(Instruction::I64TruncF64S);
            }
            other => {
                return Err(CodegenError::UnknownFunction(format!("{other:?}")));
            }
        }
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp, lhs: &HirExpr, rhs: &HirExpr) -> Result<(), CodegenError> {
        use Instruction as I;
        match op {
            BinaryOp::And | BinaryOp::Or => {
                self.expr(lhs, false)?;
                self.open(I::If(BlockType::Result(ValType::I32)));
                if op == BinaryOp::And {
                    self.expr(rhs, false)?;
                    self.emit(I::Else);
                    self.emit(I::I32Const(0));
                } else {
                    self.emit(I::I32Const(1));
                    self.emit(I::Else);
                    self.expr(rhs, false)?;
                }
                self.close();
                return Ok(());
            }
            BinaryOp::Concat => {
                self.expr(lhs, false)?;
                self.expr(rhs, false)?;
                self.emit(I::Call(self.cx.rt.str_concat));
                return Ok(());
            }
            _ => {}
        }
        self.expr(lhs, false)?;
        self.expr(rhs, false)?;
        let inst = match (&lhs.ty, op) {
            (Type::String, BinaryOp::Eq) => I::Call(self.cx.rt.str_eq),
            (Type::String, BinaryOp::Ne) => {
                self.emit(I::Call(self.cx.rt.str_eq));
                I::I32Eqz
            }
            (Type::Int64, BinaryOp::Add) => I::I64Add,
            (Type::Int64, BinaryOp::Sub) => I::I64Sub,
            (Type::Int64, BinaryOp::Mul) => I::I64Mul,
            (Type::Int64, BinaryOp::Div) => I::I64DivS,
            (Type::Int64, BinaryOp::Rem) => I::I64RemS,
            (Type::Int64, BinaryOp::Eq) => I::I64Eq,
            (Type::Int64, BinaryOp::Ne) => I::I64Ne,
            (Type::Int64, BinaryOp::Lt) => I::I64LtS,
            (Type::Int64, BinaryOp::Le) => I::I64LeS,
            (Type::Int64, BinaryOp::Gt) => I::I64GtS,
            (Type::Int64, BinaryOp::Ge) => I::I64GeS,
            (Type::Float64, BinaryOp::Add) => I::F64Add,
            (Type::Float64, BinaryOp::Sub) => I::F64Sub,
            (Type::Float64, BinaryOp::Mul) => I::F64Mul,
            (Type::Float64, BinaryOp::Div) => I::F64Div,
            (Type::Float64, BinaryOp::Eq) => I::F64Eq,
            (Type::Float64, BinaryOp::Ne) => I::F64Ne,
            (Type::Float64, BinaryOp::Lt) => I::F64Lt,
            (Type::Float64, BinaryOp::Le) => I::F64Le,
            (Type::Float64, BinaryOp::Gt) => I::F64Gt,
            (Type::Float64, BinaryOp::Ge) => I::F64Ge,
            (Type::Bool, BinaryOp::Eq) => I::I32Eq,
            (Type::Bool, BinaryOp::Ne) => I::I32Ne,
            (other, _) => return Err(self.unsupported(other)),
        };
        self.emit(inst);
        Ok(())
    }

    fn lower_match(
        &mut self,
        expr: &HirExpr,
        scrutinee: &HirExpr,
        arms: &[HirArm],
        tail: bool,
    ) -> Result<(), CodegenError> {
        self.expr(scrutinee, false)?;
        let value = layout::val_type(&scrutinee.ty).map(|vt| {
            let t = self.temp(vt);
            self.emit(Instruction::LocalSet(t));
            t
        });
        self.open(Instruction::Block(block_type(&expr.ty)));
        let done = self.blocks;
        for arm in arms {
            self.open(Instruction::Block(BlockType::Empty));
            let next = self.blocks;
            self.pattern(&arm.pattern, value, next)?;
            self.expr(&arm.body, tail)?;
            self.emit(Instruction::Br(self.blocks - done));
            self.close();
        }
        // checked matches are exhaustive; this is only reached on a bug
        self.emit(Instruction::Unreachable);
        self.close();
        Ok(())
    }

    /// Test `pat` against the value in local `value`, branching to the
    /// block at level `next` on mismatch, and bind its variables.
    fn pattern(&mut self, pat: &HirPattern, value: Option<u32>, next: u32) -> Result<(), CodegenError> {
        use Instruction as I;
        match &pat.kind {
            HirPatternKind::Wildcard => {}
            HirPatternKind::Bind(id) => {
                if let (Some(v), Some(dst)) = (value, self.local(*id)) {
                    self.emit(I::LocalGet(v));
                    self.emit(I::LocalSet(dst));
                }
            }
            HirPatternKind::Literal(lit) => {
                let Some(v) = value else {
                    return Ok(());
                };
                self.emit(I::LocalGet(v));
                match lit {
                    Literal::Int(n) => {
                        self.emit(I::I64Const(*n));
                        self.emit(I::I64Ne);
                    }
                    Literal::Float(x) => {
                        self.emit(I::F64Const((*x).into()));
                        self.emit(I::F64Ne);
                    }
                    Literal::Bool(b) => {
                        self.emit(I::I32Const(*b as i32));
                        self.emit(I::I32Ne);
                    }
                    Literal::Str(s) => {
                        let off = self
                            .cx
                            .strings
                            .offsets
                            .get(s)
                            .copied()
                            .ok_or(CodegenError::MissingString)?;
                        self.emit(I::I32Const(off as i32));
                        self.emit(I::Call(self.cx.rt.str_eq));
                        self.emit(I::I32Eqz);
                    }
                    Literal::Unit => {
                        self.emit(I::Drop);
                        return Ok(());
                    }
                }
                self.emit(I::BrIf(self.blocks - next));
            }
            HirPatternKind::Variant {
                decl,
                variant,
                fields,
            } => {
                let (Some(v), Type::Union { args, .. }) = (value, &pat.ty) else {
                    return Err(self.unsupported(&pat.ty));
                };
                self.emit(I::LocalGet(v));
                self.emit(I::I32Load(word(0)));
                self.emit(I::I32Const(*variant as i32));
                self.emit(I::I32Ne);
                self.emit(I::BrIf(self.blocks - next));

                let layout = layout::union_layout(self.cx.types, *decl, args);
                let field_tys = self.cx.types.variant_fields(*decl, args, *variant);
                for ((sub, ty), offset) in fields
                    .iter()
                    .zip(&field_tys)
                    .zip(&layout.variants[*variant].offsets)
                {
                    if matches!(sub.kind, HirPatternKind::Wildcard) {
                        continue;
                    }
                    let (Some(vt), Some(inst)) = (layout::val_type(ty), load(ty, *offset)) else {
                        self.pattern(sub, None, next)?;
                        continue;
                    };
                    self.emit(I::LocalGet(v));
                    self.emit(inst);
                    let direct = match &sub.kind {
                        HirPatternKind::Bind(id) => self.local(*id),
                        _ => None,
                    };
                    match direct {
                        Some(dst) => self.emit(I::LocalSet(dst)),
                        None => {
                            let t = self.temp(vt);
                            self.emit(I::LocalSet(t));
                            self.pattern(sub, Some(t), next)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
