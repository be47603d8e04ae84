//! Base library: printing, type inspection, module loading, and
//! prototype installation.

use std::path::PathBuf;
use tarn_core::object::type_name;
use tarn_core::value::Value;
use tarn_core::vm::error::VmError;
use tarn_core::vm::Vm;

pub fn register(vm: &mut Vm) {
    define(vm, "print", native_print);
    define(vm, "type", native_type);
    define(vm, "tostring", native_tostring);
    define(vm, "clock", native_clock);
    define(vm, "require", native_require);
    define(vm, "setproto", native_setproto);
}

fn define(vm: &mut Vm, name: &'static str, func: tarn_core::gc::NativeFn) {
    let idx = vm.new_native(func, name);
    vm.define_global(name, Value::from_native(idx));
}

/// `print(...)` writes its arguments separated by tabs, then a newline.
fn native_print(vm: &mut Vm, argc: usize) -> Result<Value, VmError> {
    let mut out = String::new();
    for i in 0..argc {
        if i > 0 {
            out.push('\t');
        }
        out.push_str(&vm.format_value(vm.arg(i)));
    }
    println!("{out}");
    Ok(Value::nil())
}

/// `type(v)` returns the value's type name as a string.
fn native_type(vm: &mut Vm, _argc: usize) -> Result<Value, VmError> {
    let name = type_name(vm.arg(0));
    Ok(vm.intern(name.as_bytes()))
}

/// `tostring(v)` renders a value the way `print` does.
fn native_tostring(vm: &mut Vm, _argc: usize) -> Result<Value, VmError> {
    let text = vm.format_value(vm.arg(0));
    Ok(vm.intern(text.as_bytes()))
}

/// `clock()` returns seconds since the VM started.
fn native_clock(vm: &mut Vm, _argc: usize) -> Result<Value, VmError> {
    Ok(Value::from_num(vm.uptime()))
}

/// `require(name)` reads, compiles, and evaluates a module file,
/// returning its top-level return value. `.tn` is appended when the
/// name carries no extension. There is no module cache: every call
/// evaluates the file again.
fn native_require(vm: &mut Vm, _argc: usize) -> Result<Value, VmError> {
    let name_val = vm.arg(0);
    let Some(id) = name_val.as_string() else {
        return Err(VmError::type_err(format!(
            "require: expected a module name string, got a {} value.",
            type_name(name_val)
        )));
    };
    let name = String::from_utf8_lossy(vm.strings.get_bytes(id)).into_owned();

    let mut path = PathBuf::from(&name);
    if path.extension().is_none() {
        path.set_extension("tn");
    }
    let source = std::fs::read_to_string(&path).map_err(|e| {
        VmError::limit(format!("require: cannot open module '{name}': {e}."))
    })?;

    let codeblock = tarn_compiler::compile(vm, &source, &name)
        .map_err(|e| VmError::limit(format!("require: error in module '{name}': {e}")))?;
    vm.run_block(codeblock)
}

/// `setproto(tbl, proto)` installs `proto` (a table, or nil to clear)
/// as `tbl`'s prototype and returns `tbl`.
fn native_setproto(vm: &mut Vm, _argc: usize) -> Result<Value, VmError> {
    let target_val = vm.arg(0);
    let Some(target) = target_val.as_table() else {
        return Err(VmError::type_err(format!(
            "setproto: expected a table, got a {} value.",
            type_name(target_val)
        )));
    };

    let proto_val = vm.arg(1);
    let proto = if proto_val.is_nil() {
        None
    } else if let Some(p) = proto_val.as_table() {
        // Reject chains that would loop back to the target; lookups
        // walk the chain and must terminate.
        let mut cursor = Some(p);
        while let Some(t) = cursor {
            if t == target {
                return Err(VmError::type_err("setproto: cyclic proto chain."));
            }
            cursor = vm.heap.get_table(t).proto;
        }
        Some(p)
    } else {
        return Err(VmError::type_err(format!(
            "setproto: expected a table or nil as proto, got a {} value.",
            type_name(proto_val)
        )));
    };

    vm.heap.get_table_mut(target).proto = proto;
    Ok(target_val)
}
