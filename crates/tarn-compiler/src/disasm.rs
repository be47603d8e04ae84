//! Bytecode pretty-printer.

use std::fmt::Write;
use tarn_core::chunk::CodeBlock;
use tarn_core::gc::GcIdx;
use tarn_core::opcode::Op;
use tarn_core::vm::Vm;

/// Render a codeblock and every nested codeblock in its constant pool.
pub fn disassemble(vm: &Vm, cb: GcIdx<CodeBlock>) -> String {
    let mut out = String::new();
    disassemble_into(vm, cb, &mut out);
    out
}

fn disassemble_into(vm: &Vm, cb_idx: GcIdx<CodeBlock>, out: &mut String) {
    let cb = vm.heap.get_codeblock(cb_idx);
    let name = String::from_utf8_lossy(vm.strings.get_bytes(cb.name)).into_owned();
    let _ = writeln!(
        out,
        "== {} (params: {}, upvals: {}, max stack: {}) ==",
        name, cb.num_params, cb.num_upvals, cb.max_stack
    );

    let code = &cb.block.code;
    let mut offset = 0;
    while offset < code.len() {
        let line = cb.block.line_at(offset);
        let Some(op) = Op::from_byte(code[offset]) else {
            let _ = writeln!(out, "{offset:04} {line:4} <bad opcode {}>", code[offset]);
            offset += 1;
            continue;
        };
        let _ = write!(out, "{offset:04} {line:4} {:<20}", op.name());
        offset += 1;

        match op.operand_bytes() {
            1 => {
                let operand = code[offset];
                offset += 1;
                if matches!(
                    op,
                    Op::LoadConst
                        | Op::GetGlobal
                        | Op::SetGlobal
                        | Op::TableSet
                        | Op::TableGet
                        | Op::TableGetNoPop
                        | Op::MakeFunc
                ) {
                    let k = cb.block.constants[operand as usize];
                    let _ = write!(out, "{operand} '{}'", vm.format_value(k));
                } else {
                    let _ = write!(out, "{operand}");
                }
                if op == Op::MakeFunc {
                    let num_upvals = code[offset];
                    offset += 1;
                    let _ = write!(out, " upvals: {num_upvals}");
                    for _ in 0..num_upvals {
                        let is_local = code[offset];
                        let index = code[offset + 1];
                        offset += 2;
                        let kind = if is_local == 1 { "local" } else { "upval" };
                        let _ = write!(out, " ({kind} {index})");
                    }
                }
            }
            2 => {
                let d = ((code[offset] as u16) << 8) | code[offset + 1] as u16;
                offset += 2;
                let target = if op == Op::JmpBack {
                    offset - d as usize
                } else {
                    offset + d as usize
                };
                let _ = write!(out, "{d} -> {target:04}");
            }
            _ => {}
        }
        let _ = writeln!(out);
    }

    // Nested functions live in the constant pool.
    for k in &cb.block.constants {
        if let Some(nested) = k.as_codeblock() {
            let _ = writeln!(out);
            disassemble_into(vm, nested, out);
        }
    }
}
