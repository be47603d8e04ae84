//! The fetch-decode-dispatch loop.

use super::error::VmError;
use super::{key_error, Vm};
use crate::object::type_name;
use crate::opcode::Op;
use crate::value::Value;

#[inline]
fn fetch_byte(vm: &mut Vm) -> u8 {
    let byte = vm.heap.get_codeblock(vm.block).block.code[vm.ip];
    vm.ip += 1;
    byte
}

#[inline]
fn fetch_short(vm: &mut Vm) -> u16 {
    let hi = fetch_byte(vm);
    let lo = fetch_byte(vm);
    ((hi as u16) << 8) | lo as u16
}

#[inline]
fn read_constant(vm: &mut Vm) -> Value {
    let k = fetch_byte(vm);
    vm.heap.get_codeblock(vm.block).block.constants[k as usize]
}

#[inline]
fn frame_base(vm: &Vm) -> usize {
    vm.frames.last().expect("active frame").base
}

fn binop_error(op: &str, a: Value, b: Value) -> VmError {
    VmError::type_err(format!(
        "Cannot use operator '{}' on operands of type '{}' and '{}'.",
        op,
        type_name(a),
        type_name(b)
    ))
}

fn unop_error(op: &str, v: Value) -> VmError {
    VmError::type_err(format!(
        "Cannot use operator '{}' on type '{}'.",
        op,
        type_name(v)
    ))
}

fn index_error(v: Value) -> VmError {
    VmError::type_err(format!("Attempt to index a {} value.", type_name(v)))
}

macro_rules! arith_binop {
    ($vm:expr, $opstr:expr, $op:tt) => {{
        let b = $vm.peek(0);
        let a = $vm.peek(1);
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => {
                $vm.pop();
                $vm.set_top(Value::from_num(x $op y));
            }
            _ => return Err(binop_error($opstr, a, b)),
        }
    }};
}

macro_rules! cmp_binop {
    ($vm:expr, $opstr:expr, $op:tt) => {{
        let b = $vm.pop();
        let a = $vm.pop();
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => $vm.push(Value::from_bool(x $op y)),
            _ => return Err(binop_error($opstr, a, b)),
        }
    }};
}

// Bitwise operators work on the operands cast to 64-bit signed integers.
macro_rules! bit_binop {
    ($vm:expr, $opstr:expr, $f:expr) => {{
        let b = $vm.peek(0);
        let a = $vm.peek(1);
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => {
                let result = $f(x as i64, y as i64);
                $vm.pop();
                $vm.set_top(Value::from_num(result as f64));
            }
            _ => return Err(binop_error($opstr, a, b)),
        }
    }};
}

/// Execute until the frame stack shrinks back to `exit_depth`, returning
/// the value produced by the final `return_val`.
pub(crate) fn run(vm: &mut Vm, exit_depth: usize) -> Result<Value, VmError> {
    loop {
        if vm.ip >= vm.heap.get_codeblock(vm.block).block.code.len() {
            return Err(VmError::limit("Instruction pointer out of range."));
        }
        let byte = fetch_byte(vm);
        let op = match Op::from_byte(byte) {
            Some(op) => op,
            None => return Err(VmError::limit(format!("Unknown opcode {byte}."))),
        };

        match op {
            Op::LoadConst => {
                let k = read_constant(vm);
                vm.push(k);
            }
            Op::LoadNil => vm.push(Value::nil()),
            Op::Pop => {
                vm.pop();
            }

            Op::Add => arith_binop!(vm, "+", +),
            Op::Sub => arith_binop!(vm, "-", -),
            Op::Mult => arith_binop!(vm, "*", *),

            Op::Div => {
                let b = vm.peek(0);
                let a = vm.peek(1);
                match (a.as_num(), b.as_num()) {
                    (Some(x), Some(y)) => {
                        if y == 0.0 {
                            return Err(VmError::arithmetic("Attempt to divide by 0."));
                        }
                        vm.pop();
                        vm.set_top(Value::from_num(x / y));
                    }
                    _ => return Err(binop_error("/", a, b)),
                }
            }

            Op::Mod => {
                let b = vm.peek(0);
                let a = vm.peek(1);
                match (a.as_num(), b.as_num()) {
                    (Some(x), Some(y)) => {
                        if y == 0.0 {
                            return Err(VmError::arithmetic("Attempt to take modulo by 0."));
                        }
                        vm.pop();
                        vm.set_top(Value::from_num(x % y));
                    }
                    _ => return Err(binop_error("%", a, b)),
                }
            }

            Op::Lshift => bit_binop!(vm, "<<", |x: i64, y: i64| x.wrapping_shl(y as u32)),
            Op::Rshift => bit_binop!(vm, ">>", |x: i64, y: i64| x.wrapping_shr(y as u32)),
            Op::Band => bit_binop!(vm, "&", |x: i64, y: i64| x & y),
            Op::Bor => bit_binop!(vm, "|", |x: i64, y: i64| x | y),

            Op::Eq => {
                let b = vm.pop();
                let a = vm.pop();
                vm.push(Value::from_bool(a == b));
            }
            Op::Neq => {
                let b = vm.pop();
                let a = vm.pop();
                vm.push(Value::from_bool(a != b));
            }

            Op::Gt => cmp_binop!(vm, ">", >),
            Op::Lt => cmp_binop!(vm, "<", <),
            Op::Gte => cmp_binop!(vm, ">=", >=),
            Op::Lte => cmp_binop!(vm, "<=", <=),

            Op::Negate => {
                let v = vm.peek(0);
                match v.as_num() {
                    Some(n) => vm.set_top(Value::from_num(-n)),
                    None => return Err(unop_error("-", v)),
                }
            }

            Op::Lnot => {
                let a = vm.pop();
                vm.push(Value::from_bool(a.is_falsy()));
            }

            Op::Concat => {
                let b = vm.peek(0);
                let a = vm.peek(1);
                match (a.as_string(), b.as_string()) {
                    (Some(left), Some(right)) => {
                        let lb = vm.strings.get_bytes(left);
                        let rb = vm.strings.get_bytes(right);
                        let mut buf = Vec::with_capacity(lb.len() + rb.len());
                        buf.extend_from_slice(lb);
                        buf.extend_from_slice(rb);
                        // Both operands stay on the stack across the
                        // allocation, keeping them rooted.
                        let result = vm.intern(&buf);
                        vm.pop();
                        vm.set_top(result);
                    }
                    _ => return Err(binop_error("..", a, b)),
                }
            }

            Op::Jmp => {
                let d = fetch_short(vm);
                vm.ip += d as usize;
            }
            Op::JmpBack => {
                let d = fetch_short(vm);
                vm.ip -= d as usize;
            }
            Op::JmpIfTrueOrPop => {
                let d = fetch_short(vm);
                if vm.peek(0).is_truthy() {
                    vm.ip += d as usize;
                } else {
                    vm.pop();
                }
            }
            Op::JmpIfFalseOrPop => {
                let d = fetch_short(vm);
                if vm.peek(0).is_falsy() {
                    vm.ip += d as usize;
                } else {
                    vm.pop();
                }
            }
            Op::PopJmpIfFalse => {
                let d = fetch_short(vm);
                if vm.peek(0).is_falsy() {
                    vm.ip += d as usize;
                }
                vm.pop();
            }

            Op::GetVar => {
                let idx = fetch_byte(vm) as usize;
                let base = frame_base(vm);
                let v = vm.stack[base + idx];
                vm.push(v);
            }
            Op::SetVar => {
                let idx = fetch_byte(vm) as usize;
                let base = frame_base(vm);
                vm.stack[base + idx] = vm.peek(0);
            }

            Op::GetUpval => {
                let idx = fetch_byte(vm) as usize;
                let closure = vm.frames.last().expect("active frame").closure;
                let uv = vm.heap.get_closure(closure).upvals[idx];
                let v = vm.upval_get(uv);
                vm.push(v);
            }
            Op::SetUpval => {
                let idx = fetch_byte(vm) as usize;
                let closure = vm.frames.last().expect("active frame").closure;
                let uv = vm.heap.get_closure(closure).upvals[idx];
                let v = vm.peek(0);
                vm.upval_set(uv, v);
            }
            Op::CloseUpval => {
                vm.close_upvalues_upto(vm.sp - 1);
                vm.pop();
            }

            Op::GetGlobal => {
                let name = read_constant(vm);
                let val = vm.globals.get(name).map_err(key_error)?;
                if val.is_nil() {
                    return Err(VmError::limit(format!(
                        "Undefined variable '{}'.",
                        vm.format_value(name)
                    )));
                }
                vm.push(val);
            }
            Op::SetGlobal => {
                let name = read_constant(vm);
                let val = vm.peek(0);
                vm.globals.set(name, val).map_err(key_error)?;
            }

            Op::NewTable => {
                let t = vm.new_table();
                vm.push(Value::from_table(t));
            }

            Op::TableAddField => {
                let value = vm.pop();
                let key = vm.pop();
                let target = vm.peek(0);
                match target.as_table() {
                    Some(t) => vm.table_set(t, key, value)?,
                    None => return Err(index_error(target)),
                }
            }

            // table.key = value; the assignment yields its RHS.
            Op::TableSet => {
                let key = read_constant(vm);
                let value = vm.pop();
                let target = vm.peek(0);
                match target.as_table() {
                    Some(t) => {
                        vm.table_set(t, key, value)?;
                        vm.set_top(value);
                    }
                    None => return Err(index_error(target)),
                }
            }

            // table.key
            Op::TableGet => {
                let key = read_constant(vm);
                let target = vm.peek(0);
                match target.as_table() {
                    Some(t) => {
                        let v = vm.table_get(t, key)?;
                        vm.set_top(v);
                    }
                    None => return Err(index_error(target)),
                }
            }

            // table.key, keeping the table (compound field assignment).
            Op::TableGetNoPop => {
                let key = read_constant(vm);
                let target = vm.peek(0);
                match target.as_table() {
                    Some(t) => {
                        let v = vm.table_get(t, key)?;
                        vm.push(v);
                    }
                    None => return Err(index_error(target)),
                }
            }

            // table[key] = value; the assignment yields its RHS.
            Op::IndexSet => {
                let value = vm.pop();
                let key = vm.pop();
                let target = vm.peek(0);
                match target.as_table() {
                    Some(t) => {
                        vm.table_set(t, key, value)?;
                        vm.set_top(value);
                    }
                    None => return Err(index_error(target)),
                }
            }

            // table[key]
            Op::Index => {
                let key = vm.pop();
                let target = vm.peek(0);
                match target.as_table() {
                    Some(t) => {
                        let v = vm.table_get(t, key)?;
                        vm.set_top(v);
                    }
                    None => return Err(index_error(target)),
                }
            }

            // table[key], keeping table and key (compound index assignment).
            Op::IndexNoPop => {
                let target = vm.peek(1);
                let key = vm.peek(0);
                match target.as_table() {
                    Some(t) => {
                        let v = vm.table_get(t, key)?;
                        vm.push(v);
                    }
                    None => return Err(index_error(target)),
                }
            }

            Op::CallFunc => {
                let argc = fetch_byte(vm) as usize;
                let callee = vm.peek(argc);
                vm.call_value(callee, argc)?;
            }

            Op::ReturnVal => {
                let result = vm.pop();
                let frame = *vm.frames.last().expect("active frame");
                vm.close_upvalues_upto(frame.base);
                vm.sp = frame.base;
                vm.push(result);
                vm.frames.pop();
                // Restore the caller before possibly returning: a
                // reentrant caller (host function) continues in the
                // frame below this one.
                if let Some(caller) = vm.frames.last().copied() {
                    vm.ip = caller.ip;
                    vm.block = vm.heap.get_closure(caller.closure).codeblock;
                }
                if vm.frames.len() == exit_depth {
                    return Ok(result);
                }
            }

            Op::MakeFunc => {
                let k = read_constant(vm);
                let cb = match k.as_codeblock() {
                    Some(cb) => cb,
                    None => {
                        return Err(VmError::limit(
                            "make_func constant is not a codeblock.",
                        ))
                    }
                };
                let num_upvals = fetch_byte(vm) as usize;
                let closure = vm.new_closure(cb, Vec::with_capacity(num_upvals));
                // Push first so the closure is rooted while its upvalues
                // are captured (capturing can allocate).
                vm.push(Value::from_closure(closure));
                let base = frame_base(vm);
                let enclosing = vm.frames.last().expect("active frame").closure;
                for _ in 0..num_upvals {
                    let is_local = fetch_byte(vm) == 1;
                    let index = fetch_byte(vm) as usize;
                    let uv = if is_local {
                        vm.capture_upvalue(base + index)
                    } else {
                        vm.heap.get_closure(enclosing).upvals[index]
                    };
                    vm.heap.get_closure_mut(closure).upvals.push(uv);
                }
            }
        }
    }
}
