#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use clarity_core::{compile_file, compile_source, CompileOptions, Diagnostic};
use wasmi::core::{Trap, F64};
use wasmi::{Caller, Engine, Extern, Instance, Linker, Module, Store, WasmParams, WasmResults};

/// State shared with the host functions of one instance.
#[derive(Default)]
pub struct Host {
    /// Every line printed through `print_*` and `log_info`.
    pub output: Vec<String>,
    pub secrets: HashMap<String, String>,
    pub random: i64,
}

/// Compile a single source text, panicking with the diagnostics on error.
pub fn compile_src(src: &str) -> Vec<u8> {
    let out = compile_source(src, "main.clarity", CompileOptions::default());
    assert!(!out.has_errors(), "compile failure: {:#?}", out.diagnostics);
    out.binary.expect("binary")
}

pub fn compile_path(path: &Path) -> Vec<u8> {
    let out = compile_file(path, CompileOptions::default());
    assert!(!out.has_errors(), "compile failure: {:#?}", out.diagnostics);
    out.binary.expect("binary")
}

/// Diagnostics of a source text that is expected not to compile.
pub fn compile_errors(src: &str) -> Vec<Diagnostic> {
    let out = compile_source(src, "main.clarity", CompileOptions::default());
    assert!(out.has_errors(), "expected a compile failure");
    out.diagnostics
}

pub struct Program {
    pub store: Store<Host>,
    pub instance: Instance,
}

impl Program {
    pub fn new(src: &str) -> Program {
        Program::from_bytes(&compile_src(src), Host::default())
    }

    pub fn with_host(src: &str, host: Host) -> Program {
        Program::from_bytes(&compile_src(src), host)
    }

    pub fn from_bytes(wasm: &[u8], host: Host) -> Program {
        let engine = Engine::default();
        let module = Module::new(&engine, wasm).expect("module");
        let mut linker = Linker::new(&engine);
        define_host(&mut linker);
        let mut store = Store::new(&engine, host);
        let instance = linker
            .instantiate(&mut store, &module)
            .and_then(|pre| pre.start(&mut store))
            .expect("instantiate");
        Program { store, instance }
    }

    pub fn call<P: WasmParams, R: WasmResults>(&mut self, name: &str, params: P) -> R {
        self.try_call(name, params)
            .unwrap_or_else(|e| panic!("call to `{name}` failed: {e}"))
    }

    pub fn try_call<P: WasmParams, R: WasmResults>(&mut self, name: &str, params: P) -> Result<R, String> {
        let func = self
            .instance
            .get_typed_func::<P, R>(&self.store, name)
            .map_err(|e| format!("export `{name}`: {e}"))?;
        func.call(&mut self.store, params).map_err(|e| e.to_string())
    }

    pub fn output(&self) -> &[String] {
        &self.store.data().output
    }

    /// Read a `[len][bytes]` string block out of the instance memory.
    pub fn string_at(&self, ptr: i32) -> String {
        let memory = self
            .instance
            .get_memory(&self.store, "memory")
            .expect("memory export");
        let data = memory.data(&self.store);
        let start = ptr as usize;
        let len = u32::from_le_bytes(data[start..start + 4].try_into().unwrap()) as usize;
        String::from_utf8(data[start + 4..start + 4 + len].to_vec()).unwrap()
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.instance.get_export(&self.store, name).is_some()
    }
}

fn read_string(caller: &Caller<'_, Host>, ptr: i32) -> Result<String, Trap> {
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| Trap::new("no memory export"))?;
    let data = memory.data(caller);
    let start = ptr as usize;
    let header = data
        .get(start..start + 4)
        .ok_or_else(|| Trap::new("string pointer out of bounds"))?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let bytes = data
        .get(start + 4..start + 4 + len)
        .ok_or_else(|| Trap::new("string out of bounds"))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn alloc_string(caller: &mut Caller<'_, Host>, text: &str) -> Result<i32, Trap> {
    let alloc = caller
        .get_export("__alloc")
        .and_then(Extern::into_func)
        .ok_or_else(|| Trap::new("no __alloc export"))?
        .typed::<i32, i32>(&*caller)
        .map_err(|e| Trap::new(e.to_string()))?;
    let ptr = alloc
        .call(&mut *caller, 4 + text.len() as i32)
        .map_err(|e| Trap::new(e.to_string()))?;
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| Trap::new("no memory export"))?;
    let data = memory.data_mut(&mut *caller);
    let start = ptr as usize;
    data[start..start + 4].copy_from_slice(&(text.len() as u32).to_le_bytes());
    data[start + 4..start + 4 + text.len()].copy_from_slice(text.as_bytes());
    Ok(ptr)
}

fn define_host(linker: &mut Linker<Host>) {
    linker
        .func_wrap("env", "print_string", |mut caller: Caller<'_, Host>, s: i32| {
            let text = read_string(&caller, s)?;
            caller.data_mut().output.push(text);
            Ok::<(), Trap>(())
        })
        .unwrap();
    linker
        .func_wrap("env", "print_int", |mut caller: Caller<'_, Host>, v: i64| {
            caller.data_mut().output.push(v.to_string());
        })
        .unwrap();
    linker
        .func_wrap("env", "print_float", |mut caller: Caller<'_, Host>, v: F64| {
            caller.data_mut().output.push(f64::from(v).to_string());
        })
        .unwrap();
    linker
        .func_wrap("env", "log_info", |mut caller: Caller<'_, Host>, s: i32| {
            let text = read_string(&caller, s)?;
            caller.data_mut().output.push(format!("[info] {text}"));
            Ok::<(), Trap>(())
        })
        .unwrap();
    linker
        .func_wrap("env", "read_file", |mut caller: Caller<'_, Host>, path: i32| {
            let path = read_string(&caller, path)?;
            let text = std::fs::read_to_string(&path).map_err(|e| Trap::new(e.to_string()))?;
            alloc_string(&mut caller, &text)
        })
        .unwrap();
    linker
        .func_wrap(
            "env",
            "write_file",
            |caller: Caller<'_, Host>, path: i32, text: i32| {
                let path = read_string(&caller, path)?;
                let text = read_string(&caller, text)?;
                std::fs::write(path, text).map_err(|e| Trap::new(e.to_string()))
            },
        )
        .unwrap();
    linker
        .func_wrap("env", "file_exists", |caller: Caller<'_, Host>, path: i32| {
            let path = read_string(&caller, path)?;
            Ok::<i32, Trap>(Path::new(&path).exists() as i32)
        })
        .unwrap();
    linker
        .func_wrap("env", "random_int", |caller: Caller<'_, Host>, lo: i64, hi: i64| {
            caller.data().random.clamp(lo, hi)
        })
        .unwrap();
    linker
        .func_wrap("env", "now_millis", || 1_700_000_000_000_i64)
        .unwrap();
    linker
        .func_wrap("env", "get_secret", |mut caller: Caller<'_, Host>, name: i32| {
            let name = read_string(&caller, name)?;
            let value = caller
                .data()
                .secrets
                .get(&name)
                .cloned()
                .ok_or_else(|| Trap::new(format!("no secret `{name}`")))?;
            alloc_string(&mut caller, &value)
        })
        .unwrap();
    linker
        .func_wrap("env", "assert_eq_int", |expected: i64, actual: i64| {
            if expected == actual {
                Ok(())
            } else {
                Err(Trap::new(format!("expected {expected}, got {actual}")))
            }
        })
        .unwrap();
    linker
        .func_wrap("env", "int_to_string", |mut caller: Caller<'_, Host>, v: i64| {
            alloc_string(&mut caller, &v.to_string())
        })
        .unwrap();
    linker
        .func_wrap("env", "float_to_string", |mut caller: Caller<'_, Host>, v: F64| {
            alloc_string(&mut caller, &f64::from(v).to_string())
        })
        .unwrap();
}
