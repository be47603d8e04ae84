//! The tarn virtual machine: value stack, call frames, upvalue chain,
//! globals, and the collector driver.

pub mod error;
pub mod frame;
mod interp;

use crate::chunk::CodeBlock;
use crate::gc::{
    Closure, GcIdx, Heap, NativeFn, UpVal, UpValState, UserData,
};
use crate::object::type_name;
use crate::string::{Interner, StringId};
use crate::table::{KeyError, Table, TableKey};
use crate::value::Value;
use error::{ExitCode, VmError};
use frame::CallFrame;
use std::time::Instant;

/// Maximum call depth.
pub const FRAMES_MAX: usize = 64;
/// Value-stack slots reserved per frame.
pub const FRAME_SLOTS: usize = 256;
/// Total value-stack size.
pub const STACK_MAX: usize = FRAMES_MAX * FRAME_SLOTS;

/// Hook invoked once per unrecoverable runtime error with the formatted
/// stack trace.
pub type ErrorFn = fn(&Vm, &str);

/// The default error hook prints to stderr.
pub fn default_error_fn(_vm: &Vm, message: &str) {
    eprintln!("{message}");
}

/// A single-threaded tarn VM. Owns every mutable runtime structure:
/// stack, frames, heap, interner, globals, and the open-upvalue list.
pub struct Vm {
    pub heap: Heap,
    pub strings: Interner,
    /// The global variable table. Part of the GC root set.
    pub globals: Table,
    /// Value of the last successful top-level run.
    pub return_value: Value,
    pub on_error: ErrorFn,

    pub(crate) stack: Vec<Value>,
    pub(crate) sp: usize,
    pub(crate) frames: Vec<CallFrame>,
    /// Open upvalues, sorted ascending by stack slot; each slot appears
    /// at most once.
    pub(crate) open_upvals: Vec<(usize, GcIdx<UpVal>)>,
    /// Live instruction pointer of the active frame.
    pub(crate) ip: usize,
    /// Codeblock of the active frame. Only meaningful while frames exist.
    pub(crate) block: GcIdx<CodeBlock>,
    /// Stack index of the first argument of the running host function.
    pub(crate) native_base: usize,

    start_time: Instant,
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            heap: Heap::new(),
            strings: Interner::new(),
            globals: Table::new(),
            return_value: Value::nil(),
            on_error: default_error_fn,
            stack: vec![Value::undefined(); STACK_MAX],
            sp: 0,
            frames: Vec::new(),
            open_upvals: Vec::new(),
            ip: 0,
            block: GcIdx::new(0),
            native_base: 0,
            start_time: Instant::now(),
        }
    }

    // ---- Value stack ----

    #[inline]
    pub fn push(&mut self, val: Value) {
        debug_assert!(self.sp < STACK_MAX, "value stack overflow");
        self.stack[self.sp] = val;
        self.sp += 1;
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        debug_assert!(self.sp > 0, "value stack underflow");
        self.sp -= 1;
        self.stack[self.sp]
    }

    /// `peek(0)` is the top of the stack.
    #[inline]
    pub fn peek(&self, depth: usize) -> Value {
        self.stack[self.sp - 1 - depth]
    }

    /// Overwrite the top of the stack in place.
    #[inline]
    pub(crate) fn set_top(&mut self, val: Value) {
        self.stack[self.sp - 1] = val;
    }

    /// Current stack height, for tests and stack-discipline checks.
    pub fn stack_size(&self) -> usize {
        self.sp
    }

    /// Read argument `i` of the running host function. Out-of-range
    /// arguments read as nil.
    pub fn arg(&self, i: usize) -> Value {
        let at = self.native_base + i;
        if at < self.sp {
            self.stack[at]
        } else {
            Value::nil()
        }
    }

    /// Seconds since this VM was created (for the `clock` host function).
    pub fn uptime(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    // ---- Allocation ----
    //
    // Every path that creates an object first gives the collector a
    // chance to run. Callers must keep any object they still need
    // reachable: on the value stack, in the globals, or protected.

    /// Intern bytes, returning the canonical string value.
    pub fn intern(&mut self, bytes: &[u8]) -> Value {
        Value::from_string(self.intern_id(bytes))
    }

    /// Intern bytes, returning the canonical id.
    pub fn intern_id(&mut self, bytes: &[u8]) -> StringId {
        if let Some(id) = self.strings.lookup(bytes) {
            return id;
        }
        self.maybe_collect();
        let id = self.strings.insert(bytes);
        let size = self.strings.get(id).approx_size();
        self.heap.account_string(size);
        id
    }

    pub fn new_table(&mut self) -> GcIdx<Table> {
        self.maybe_collect();
        self.heap.alloc_table()
    }

    pub fn new_closure(
        &mut self,
        codeblock: GcIdx<CodeBlock>,
        upvals: Vec<GcIdx<UpVal>>,
    ) -> GcIdx<Closure> {
        self.maybe_collect();
        self.heap.alloc_closure(codeblock, upvals)
    }

    pub fn new_upval(&mut self, state: UpValState) -> GcIdx<UpVal> {
        self.maybe_collect();
        self.heap.alloc_upval(state)
    }

    pub fn new_codeblock(&mut self, cb: CodeBlock) -> GcIdx<CodeBlock> {
        self.maybe_collect();
        self.heap.alloc_codeblock(cb)
    }

    pub fn new_native(&mut self, func: NativeFn, name: &'static str) -> GcIdx<crate::gc::CClosure> {
        self.maybe_collect();
        self.heap.alloc_native(func, name)
    }

    pub fn new_userdata(&mut self, data: Box<dyn std::any::Any>) -> GcIdx<UserData> {
        self.maybe_collect();
        self.heap.alloc_userdata(data)
    }

    /// Register a host function or other value under a global name.
    pub fn define_global(&mut self, name: &str, val: Value) {
        let key = self.intern(name.as_bytes());
        self.globals
            .set(key, val)
            .expect("global names are never nil");
    }

    // ---- Garbage collection ----

    #[inline]
    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    /// Run a full stop-the-world collection cycle.
    pub fn collect_garbage(&mut self) {
        self.heap.prepare_marks(self.strings.slot_count());

        // 1. Every value on the stack.
        for i in 0..self.sp {
            let v = self.stack[i];
            self.heap.mark_value(v);
        }
        // 2. Every callee in the frame stack.
        for i in 0..self.frames.len() {
            let closure = self.frames[i].closure;
            self.heap.mark_value(Value::from_closure(closure));
        }
        // 3. The open-upvalue chain.
        for i in 0..self.open_upvals.len() {
            let (_, uv) = self.open_upvals[i];
            self.heap.mark_value(Value::from_upval(uv));
        }
        // 4. The global table.
        for (key, val) in self.globals.iter() {
            match key {
                TableKey::Str(id) => self.heap.mark_string(*id),
                TableKey::Obj(bits) => self.heap.mark_value(Value::from_raw_bits(*bits)),
                _ => {}
            }
            self.heap.mark_value(*val);
        }
        if let Some(proto) = self.globals.proto {
            self.heap.mark_value(Value::from_table(proto));
        }
        // 5. Explicitly protected objects.
        for v in self.heap.protected_values() {
            self.heap.mark_value(v);
        }

        self.heap.propagate();
        self.heap.sweep(&mut self.strings);
    }

    // ---- Upvalues ----

    /// Find the open upvalue for `slot`, or create one at its sorted
    /// position in the list.
    pub fn capture_upvalue(&mut self, slot: usize) -> GcIdx<UpVal> {
        match self.open_upvals.binary_search_by_key(&slot, |&(s, _)| s) {
            Ok(i) => self.open_upvals[i].1,
            Err(i) => {
                let uv = self.new_upval(UpValState::Open(slot));
                self.open_upvals.insert(i, (slot, uv));
                uv
            }
        }
    }

    /// Close every open upvalue whose slot is at or above `limit`:
    /// copy the stack value into the upvalue and unlink it. The list is
    /// sorted ascending, so this drains a suffix.
    pub fn close_upvalues_upto(&mut self, limit: usize) {
        while let Some(&(slot, uv)) = self.open_upvals.last() {
            if slot < limit {
                break;
            }
            let val = self.stack[slot];
            self.heap.get_upval_mut(uv).state = UpValState::Closed(val);
            self.open_upvals.pop();
        }
    }

    /// Read through an upvalue.
    pub fn upval_get(&self, uv: GcIdx<UpVal>) -> Value {
        match self.heap.get_upval(uv).state {
            UpValState::Open(slot) => self.stack[slot],
            UpValState::Closed(v) => v,
        }
    }

    /// Write through an upvalue.
    pub fn upval_set(&mut self, uv: GcIdx<UpVal>, val: Value) {
        match self.heap.get_upval(uv).state {
            UpValState::Open(slot) => self.stack[slot] = val,
            UpValState::Closed(_) => {
                self.heap.get_upval_mut(uv).state = UpValState::Closed(val);
            }
        }
    }

    // ---- Tables ----

    /// Look up a key, following the proto chain on misses.
    pub fn table_get(&self, idx: GcIdx<Table>, key: Value) -> Result<Value, VmError> {
        let mut cur = idx;
        loop {
            let table = self.heap.get_table(cur);
            let val = table.get(key).map_err(key_error)?;
            if !val.is_nil() {
                return Ok(val);
            }
            match table.proto {
                Some(p) => cur = p,
                None => return Ok(Value::nil()),
            }
        }
    }

    /// Store into a table. Writes never consult the proto chain.
    pub fn table_set(
        &mut self,
        idx: GcIdx<Table>,
        key: Value,
        val: Value,
    ) -> Result<(), VmError> {
        self.heap.get_table_mut(idx).set(key, val).map_err(key_error)
    }

    // ---- Calls ----

    /// Call the given value with `argc` arguments already on the stack
    /// (callee below them).
    pub(crate) fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), VmError> {
        if let Some(closure) = callee.as_closure() {
            self.callfunc(closure, argc)
        } else if let Some(native) = callee.as_native() {
            self.call_native(native, argc)
        } else {
            Err(VmError::type_err(format!(
                "Attempt to call a {} value.",
                type_name(callee)
            )))
        }
    }

    /// Push a frame for a closure call. Normalizes arity first: missing
    /// arguments become nil, extras are dropped.
    pub(crate) fn callfunc(&mut self, closure: GcIdx<Closure>, argc: usize) -> Result<(), VmError> {
        let codeblock = self.heap.get_closure(closure).codeblock;
        let (num_params, max_stack) = {
            let cb = self.heap.get_codeblock(codeblock);
            (cb.num_params as usize, cb.max_stack as usize)
        };

        let mut argc = argc;
        while argc < num_params {
            self.push(Value::nil());
            argc += 1;
        }
        while argc > num_params {
            self.pop();
            argc -= 1;
        }

        if self.frames.len() >= FRAMES_MAX {
            return Err(VmError::limit("Stack overflow."));
        }
        let base = self.sp - argc - 1;
        if base + 1 + max_stack > STACK_MAX {
            return Err(VmError::limit("Stack overflow."));
        }

        if let Some(caller) = self.frames.last_mut() {
            caller.ip = self.ip;
        }
        self.frames.push(CallFrame::new(closure, base));
        self.ip = 0;
        self.block = codeblock;
        Ok(())
    }

    /// Call a host function: run it, then tear down its arguments and
    /// push its result.
    pub(crate) fn call_native(
        &mut self,
        native: GcIdx<crate::gc::CClosure>,
        argc: usize,
    ) -> Result<(), VmError> {
        let func = self.heap.get_native(native).func;
        let saved_base = self.native_base;
        self.native_base = self.sp - argc;
        let result = func(self, argc);
        self.native_base = saved_base;
        let result = result?;
        self.sp = self.sp - argc - 1;
        self.push(result);
        Ok(())
    }

    /// Call a callable value with the given arguments and run it to
    /// completion, returning its result. Reentrant: host functions may
    /// use this to call back into the VM.
    pub fn call_function(&mut self, callee: Value, args: &[Value]) -> Result<Value, VmError> {
        let depth = self.frames.len();
        self.push(callee);
        for &a in args {
            self.push(a);
        }
        self.call_value(callee, args.len())?;
        if self.frames.len() > depth {
            let result = interp::run(self, depth)?;
            self.pop();
            Ok(result)
        } else {
            // Host function: its result is already on the stack.
            Ok(self.pop())
        }
    }

    /// Wrap a top-level codeblock in a zero-upvalue closure and run it.
    pub fn run_block(&mut self, codeblock: GcIdx<CodeBlock>) -> Result<Value, VmError> {
        // The codeblock is only reachable through this local until the
        // closure exists, and allocating the closure may collect.
        let cb_val = Value::from_codeblock(codeblock);
        self.heap.protect(cb_val);
        let closure = self.new_closure(codeblock, Vec::new());
        self.heap.unprotect(cb_val);

        self.call_function(Value::from_closure(closure), &[])
    }

    /// Run a top-level codeblock, reporting any runtime error through
    /// the error hook. On success the result is stored in
    /// `return_value`.
    pub fn execute(&mut self, codeblock: GcIdx<CodeBlock>) -> ExitCode {
        match self.run_block(codeblock) {
            Ok(val) => {
                self.return_value = val;
                ExitCode::Success
            }
            Err(err) => {
                let msg = self.format_trace(&err);
                (self.on_error)(self, &msg);
                self.reset();
                ExitCode::RuntimeError
            }
        }
    }

    // ---- Error reporting ----

    /// Source line of the instruction that just executed.
    fn line_for_frame(&self, frame_index: usize) -> u32 {
        let frame = &self.frames[frame_index];
        let ip = if frame_index + 1 == self.frames.len() {
            self.ip
        } else {
            frame.ip
        };
        let cb = self.heap.get_closure(frame.closure).codeblock;
        self.heap
            .get_codeblock(cb)
            .block
            .line_at(ip.saturating_sub(1))
    }

    fn frame_name(&self, frame_index: usize) -> String {
        let cb = self.heap.get_closure(self.frames[frame_index].closure).codeblock;
        let name = self.heap.get_codeblock(cb).name;
        String::from_utf8_lossy(self.strings.get_bytes(name)).into_owned()
    }

    /// Format the multi-line error message with a stack trace,
    /// innermost frame first.
    pub fn format_trace(&self, err: &VmError) -> String {
        if self.frames.is_empty() {
            return err.message.clone();
        }
        let top = self.frames.len() - 1;
        let mut out = format!("[line {}]: {}\n", self.line_for_frame(top), err.message);
        out.push_str("stack trace:\n");
        for i in (0..self.frames.len()).rev() {
            let line = self.line_for_frame(i);
            let name = self.frame_name(i);
            if i == 0 {
                out.push_str(&format!("\t[line {line}] in {name}"));
            } else {
                out.push_str(&format!("\t[line {line}] in function {name}.\n"));
            }
        }
        out
    }

    /// Discard all execution state after an error. Globals, heap, and
    /// interner survive so the VM can be reused (e.g. by the REPL).
    pub fn reset(&mut self) {
        self.frames.clear();
        self.open_upvals.clear();
        self.sp = 0;
        self.ip = 0;
    }

    // ---- Display ----

    /// Render a value the way `print` and `tostring` do.
    pub fn format_value(&self, val: Value) -> String {
        if val.is_nil() {
            "nil".to_string()
        } else if val.is_undefined() {
            "undefined".to_string()
        } else if let Some(b) = val.as_bool() {
            b.to_string()
        } else if let Some(n) = val.as_num() {
            format!("{n}")
        } else if let Some(id) = val.as_string() {
            String::from_utf8_lossy(self.strings.get_bytes(id)).into_owned()
        } else if let Some(idx) = val.as_table() {
            format!("table: 0x{:x}", idx.index())
        } else if let Some(idx) = val.as_closure() {
            let cb = self.heap.get_closure(idx).codeblock;
            let name = self.heap.get_codeblock(cb).name;
            format!(
                "function: {}",
                String::from_utf8_lossy(self.strings.get_bytes(name))
            )
        } else if let Some(idx) = val.as_native() {
            format!("function: builtin {}", self.heap.get_native(idx).name)
        } else if let Some(idx) = val.as_userdata() {
            format!("userdata: 0x{:x}", idx.index())
        } else {
            format!("{val:?}")
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn key_error(err: KeyError) -> VmError {
    match err {
        KeyError::NilKey => VmError::key("Table key cannot be nil."),
        KeyError::NanKey => VmError::key("Table key cannot be NaN."),
    }
}
