//! Value representation and linear-memory layout.
//!
//! Scalars map to wasm value types; every heap value (string, list,
//! record, union) and every function value is an `i32`. Blocks:
//!
//! - String: `[len: u32][utf-8 bytes]`
//! - List: `[len: u32][pad: u32][elements]`, element slot = element size
//! - Record: fields in declaration order, each aligned to its size
//! - Union: `[tag: u32][pad][payload]`, payload at [`UNION_PAYLOAD_OFFSET`]

use wasm_encoder::{MemArg, ValType};

use crate::types::{DeclId, Type, TypeCtx};

pub const STRING_HEADER: u32 = 4;
pub const LIST_HEADER: u32 = 8;
pub const UNION_PAYLOAD_OFFSET: u32 = 8;

/// Wasm type of a value, `None` for Unit.
pub fn val_type(ty: &Type) -> Option<ValType> {
    match ty {
        Type::Unit => None,
        Type::Int64 => Some(ValType::I64),
        Type::Float64 => Some(ValType::F64),
        _ => Some(ValType::I32),
    }
}

pub fn size_of(ty: &Type) -> u32 {
    match val_type(ty) {
        None => 0,
        Some(ValType::I64) | Some(ValType::F64) => 8,
        Some(_) => 4,
    }
}

pub fn align_of(ty: &Type) -> u32 {
    size_of(ty).max(1)
}

pub fn align_to(x: u32, align: u32) -> u32 {
    let mask = align - 1;
    (x + mask) & !mask
}

/// Memory immediate for a value of `ty` at `offset`.
pub fn mem_arg(ty: &Type, offset: u32) -> MemArg {
    MemArg {
        offset: offset as u64,
        align: align_of(ty).trailing_zeros(),
        memory_index: 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    /// Byte offset of each field, in declaration order.
    pub offsets: Vec<u32>,
    pub size: u32,
}

/// Lay fields out one after another, each aligned to its own size.
pub fn struct_layout(fields: &[Type]) -> StructLayout {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut cursor = 0;
    for ty in fields {
        cursor = align_to(cursor, align_of(ty));
        offsets.push(cursor);
        cursor += size_of(ty);
    }
    StructLayout {
        offsets,
        size: cursor,
    }
}

pub fn record_layout(types: &TypeCtx, decl: DeclId, args: &[Type]) -> StructLayout {
    let fields: Vec<Type> = types
        .record_fields(decl, args)
        .into_iter()
        .map(|f| f.ty)
        .collect();
    struct_layout(&fields)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionLayout {
    /// Per variant: field offsets relative to the start of the block.
    pub variants: Vec<StructLayout>,
    pub size: u32,
}

pub fn union_layout(types: &TypeCtx, decl: DeclId, args: &[Type]) -> UnionLayout {
    let count = types.def(decl).variants().len();
    let mut variants = Vec::with_capacity(count);
    let mut payload = 0;
    for index in 0..count {
        let mut layout = struct_layout(&types.variant_fields(decl, args, index));
        payload = payload.max(layout.size);
        for off in &mut layout.offsets {
            *off += UNION_PAYLOAD_OFFSET;
        }
        layout.size += UNION_PAYLOAD_OFFSET;
        variants.push(layout);
    }
    UnionLayout {
        variants,
        size: UNION_PAYLOAD_OFFSET + payload,
    }
}
