//! Host side of the `env` import module.
//!
//! Strings are `[len: u32][utf-8 bytes]` blocks in the exported memory.
//! Strings handed back to the module are allocated through its exported
//! `__alloc`.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rand::Rng;
use wasmi::core::{Trap, F64};
use wasmi::{Caller, Extern, Linker, Memory};

use clarity_core::builtins::HOST_MODULE;

fn memory(caller: &Caller<'_, ()>) -> Result<Memory, Trap> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| Trap::new("module does not export `memory`"))
}

pub fn read_string(caller: &Caller<'_, ()>, ptr: i32) -> Result<String, Trap> {
    let data = memory(caller)?.data(caller);
    let start = ptr as u32 as usize;
    let header = data
        .get(start..start + 4)
        .ok_or_else(|| Trap::new(format!("string pointer {ptr} is out of bounds")))?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let bytes = data
        .get(start + 4..start + 4 + len)
        .ok_or_else(|| Trap::new(format!("string at {ptr} runs past the end of memory")))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

pub fn alloc_string(caller: &mut Caller<'_, ()>, text: &str) -> Result<i32, Trap> {
    let alloc = caller
        .get_export("__alloc")
        .and_then(Extern::into_func)
        .ok_or_else(|| Trap::new("module does not export `__alloc`"))?
        .typed::<i32, i32>(&*caller)
        .map_err(|e| Trap::new(e.to_string()))?;
    let ptr = alloc
        .call(&mut *caller, 4 + text.len() as i32)
        .map_err(|e| Trap::new(e.to_string()))?;
    let mem = memory(caller)?;
    let data = mem.data_mut(&mut *caller);
    let start = ptr as u32 as usize;
    let block = data
        .get_mut(start..start + 4 + text.len())
        .ok_or_else(|| Trap::new("`__alloc` returned a block outside memory"))?;
    block[..4].copy_from_slice(&(text.len() as u32).to_le_bytes());
    block[4..].copy_from_slice(text.as_bytes());
    Ok(ptr)
}

/// Register every host built-in. Definitions the module does not import
/// are ignored by the linker.
pub fn define(linker: &mut Linker<()>) -> Result<()> {
    linker.func_wrap(HOST_MODULE, "print_string", |caller: Caller<'_, ()>, s: i32| {
        println!("{}", read_string(&caller, s)?);
        Ok::<(), Trap>(())
    })?;
    linker.func_wrap(HOST_MODULE, "print_int", |v: i64| println!("{v}"))?;
    linker.func_wrap(HOST_MODULE, "print_float", |v: F64| println!("{}", f64::from(v)))?;
    linker.func_wrap(HOST_MODULE, "log_info", |caller: Caller<'_, ()>, s: i32| {
        log::info!("{}", read_string(&caller, s)?);
        Ok::<(), Trap>(())
    })?;
    linker.func_wrap(HOST_MODULE, "read_file", |mut caller: Caller<'_, ()>, path: i32| {
        let path = read_string(&caller, path)?;
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Trap::new(format!("read_file `{path}`: {e}")))?;
        alloc_string(&mut caller, &text)
    })?;
    linker.func_wrap(
        HOST_MODULE,
        "write_file",
        |caller: Caller<'_, ()>, path: i32, text: i32| {
            let path = read_string(&caller, path)?;
            let text = read_string(&caller, text)?;
            std::fs::write(&path, text).map_err(|e| Trap::new(format!("write_file `{path}`: {e}")))
        },
    )?;
    linker.func_wrap(HOST_MODULE, "file_exists", |caller: Caller<'_, ()>, path: i32| {
        let path = read_string(&caller, path)?;
        Ok::<i32, Trap>(std::path::Path::new(&path).exists() as i32)
    })?;
    linker.func_wrap(HOST_MODULE, "random_int", |lo: i64, hi: i64| {
        if lo > hi {
            return Err(Trap::new(format!("random_int: empty range {lo}..={hi}")));
        }
        Ok(rand::thread_rng().gen_range(lo..=hi))
    })?;
    linker.func_wrap(HOST_MODULE, "now_millis", || {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64)
    })?;
    linker.func_wrap(HOST_MODULE, "get_secret", |mut caller: Caller<'_, ()>, name: i32| {
        let name = read_string(&caller, name)?;
        let value = std::env::var(&name).map_err(|_| Trap::new(format!("secret `{name}` is not set")))?;
        alloc_string(&mut caller, &value)
    })?;
    linker.func_wrap(HOST_MODULE, "assert_eq_int", |expected: i64, actual: i64| {
        if expected == actual {
            Ok(())
        } else {
            Err(Trap::new(format!("assertion failed: expected {expected}, got {actual}")))
        }
    })?;
    linker.func_wrap(HOST_MODULE, "int_to_string", |mut caller: Caller<'_, ()>, v: i64| {
        alloc_string(&mut caller, &v.to_string())
    })?;
    linker.func_wrap(HOST_MODULE, "float_to_string", |mut caller: Caller<'_, ()>, v: F64| {
        alloc_string(&mut caller, &f64::from(v).to_string())
    })?;
    Ok(())
}
