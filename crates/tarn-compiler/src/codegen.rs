//! Bytecode emission with lexical scope analysis.
//!
//! Codeblocks are allocated in the VM heap as compilation proceeds and
//! kept alive through the GC protect set until they become reachable as
//! a constant of their enclosing block (or, for the top level, until the
//! caller wraps them in a closure).

use crate::ast::{BinOp, Expr, FieldKey, LogOp, Stmt, UnOp};
use crate::parser::Parser;
use crate::CompileError;
use tarn_core::chunk::CodeBlock;
use tarn_core::gc::GcIdx;
use tarn_core::opcode::Op;
use tarn_core::value::Value;
use tarn_core::vm::Vm;

/// Compile source text into a top-level codeblock named `<script>`.
///
/// The returned codeblock is unprotected: the caller must root it (the
/// usual pattern is `vm.run_block`, which protects it across the closure
/// allocation) before anything else allocates.
pub fn compile(vm: &mut Vm, source: &str, _chunk_name: &str) -> Result<GcIdx<CodeBlock>, CompileError> {
    let program = Parser::new(source)?.parse_program()?;
    let mut gen = Codegen {
        vm,
        fns: Vec::new(),
    };
    let result = gen.compile_program(&program);
    if result.is_err() {
        // Release any in-progress codeblocks still pinned for the GC.
        let blocks: Vec<_> = gen.fns.iter().map(|f| f.block).collect();
        for block in blocks {
            gen.vm.heap.unprotect(Value::from_codeblock(block));
        }
    }
    result
}

struct Local {
    name: String,
    depth: u32,
    initialized: bool,
    is_captured: bool,
}

/// A compile-time upvalue descriptor, emitted verbatim after `make_func`.
#[derive(Clone, Copy, PartialEq, Eq)]
struct UpvalDesc {
    is_local: bool,
    index: u8,
}

struct FnState {
    block: GcIdx<CodeBlock>,
    locals: Vec<Local>,
    upvals: Vec<UpvalDesc>,
    num_params: u8,
    scope_depth: u32,
    /// Current and maximum `sp - base` while emitting.
    cur_stack: isize,
    max_stack: isize,
    last_line: u32,
}

struct Codegen<'vm> {
    vm: &'vm mut Vm,
    fns: Vec<FnState>,
}

type CResult<T> = Result<T, CompileError>;

impl<'vm> Codegen<'vm> {
    fn compile_program(&mut self, program: &[Stmt]) -> CResult<GcIdx<CodeBlock>> {
        self.begin_function("<script>", &[], 1)?;
        for stmt in program {
            self.statement(stmt)?;
        }
        let block = self.end_function()?;
        self.vm.heap.unprotect(Value::from_codeblock(block));
        Ok(block)
    }

    // ---- Function boundaries ----

    fn begin_function(&mut self, name: &str, params: &[String], line: u32) -> CResult<()> {
        let name_id = self.vm.intern_id(name.as_bytes());
        let block = self.vm.new_codeblock(CodeBlock::new(name_id));
        self.vm.heap.protect(Value::from_codeblock(block));

        let mut locals = Vec::new();
        // Slot 0 holds the callee itself.
        locals.push(Local {
            name: String::new(),
            depth: 0,
            initialized: true,
            is_captured: false,
        });
        if params.len() >= 256 {
            return Err(CompileError::new("Too many parameters.", line));
        }
        let mut state = FnState {
            block,
            locals,
            upvals: Vec::new(),
            num_params: params.len() as u8,
            scope_depth: 1,
            cur_stack: 1,
            max_stack: 1,
            last_line: line,
        };
        for param in params {
            state.locals.push(Local {
                name: param.clone(),
                depth: 1,
                initialized: true,
                is_captured: false,
            });
            state.cur_stack += 1;
        }
        state.max_stack = state.cur_stack;
        self.fns.push(state);
        Ok(())
    }

    /// Emit the implicit `return nil`, finalize the codeblock's metadata,
    /// and pop the function state. The codeblock stays protected; the
    /// caller decides when it is reachable.
    fn end_function(&mut self) -> CResult<GcIdx<CodeBlock>> {
        let line = self.state().last_line;
        self.emit_simple(Op::LoadNil, line);
        self.emit_simple(Op::ReturnVal, line);

        let state = self.fns.pop().expect("function state");
        if state.max_stack > 255 {
            return Err(CompileError::new(
                "Function needs too much stack.",
                state.last_line,
            ));
        }
        let cb = self.vm.heap.get_codeblock_mut(state.block);
        cb.num_params = state.num_params;
        cb.num_upvals = state.upvals.len() as u8;
        cb.max_stack = state.max_stack as u8;
        Ok(state.block)
    }

    fn state(&mut self) -> &mut FnState {
        self.fns.last_mut().expect("function state")
    }

    // ---- Emission ----

    fn adjust(&mut self, delta: isize) {
        let state = self.state();
        state.cur_stack += delta;
        if state.cur_stack > state.max_stack {
            state.max_stack = state.cur_stack;
        }
    }

    fn push_byte(&mut self, byte: u8, line: u32) {
        let block = self.state().block;
        self.state().last_line = line;
        self.vm
            .heap
            .get_codeblock_mut(block)
            .block
            .push_byte(byte, line);
    }

    /// Emit an operand-less opcode, applying its fixed stack effect.
    fn emit_simple(&mut self, op: Op, line: u32) {
        let delta: isize = match op {
            Op::LoadNil | Op::NewTable | Op::IndexNoPop => 1,
            Op::Pop
            | Op::Add
            | Op::Sub
            | Op::Mult
            | Op::Div
            | Op::Mod
            | Op::Lshift
            | Op::Rshift
            | Op::Band
            | Op::Bor
            | Op::Eq
            | Op::Neq
            | Op::Gt
            | Op::Lt
            | Op::Gte
            | Op::Lte
            | Op::Concat
            | Op::CloseUpval
            | Op::Index
            | Op::ReturnVal => -1,
            Op::Negate | Op::Lnot => 0,
            Op::TableAddField | Op::IndexSet => -2,
            _ => 0,
        };
        let block = self.state().block;
        self.state().last_line = line;
        self.vm.heap.get_codeblock_mut(block).block.push_op(op, line);
        self.adjust(delta);
    }

    /// Emit an opcode with a one-byte operand.
    fn emit_with_byte(&mut self, op: Op, operand: u8, line: u32) {
        let delta: isize = match op {
            Op::LoadConst
            | Op::GetVar
            | Op::GetUpval
            | Op::GetGlobal
            | Op::TableGetNoPop
            | Op::MakeFunc => 1,
            Op::SetVar | Op::SetUpval | Op::SetGlobal | Op::TableGet => 0,
            Op::TableSet => -1,
            Op::CallFunc => -(operand as isize),
            _ => 0,
        };
        let block = self.state().block;
        self.state().last_line = line;
        let b = &mut self.vm.heap.get_codeblock_mut(block).block;
        b.push_op(op, line);
        b.push_byte(operand, line);
        self.adjust(delta);
    }

    /// Emit a forward jump with a placeholder distance; returns the
    /// operand offset for patching.
    fn emit_jump(&mut self, op: Op, line: u32) -> usize {
        let delta: isize = match op {
            Op::PopJmpIfFalse | Op::JmpIfTrueOrPop | Op::JmpIfFalseOrPop => -1,
            _ => 0,
        };
        let block = self.state().block;
        self.state().last_line = line;
        let b = &mut self.vm.heap.get_codeblock_mut(block).block;
        b.push_op(op, line);
        let at = b.push_short(0xffff, line);
        self.adjust(delta);
        at
    }

    fn patch_jump(&mut self, at: usize, line: u32) -> CResult<()> {
        let block = self.state().block;
        let b = &mut self.vm.heap.get_codeblock_mut(block).block;
        let distance = b.len() - (at + 2);
        if distance > u16::MAX as usize {
            return Err(CompileError::new("Too much code to jump over.", line));
        }
        b.patch_short(at, distance as u16);
        Ok(())
    }

    /// Emit a backward jump to `target` (a code offset).
    fn emit_loop(&mut self, target: usize, line: u32) -> CResult<()> {
        let block = self.state().block;
        let here = self.vm.heap.get_codeblock(block).block.len();
        // The operand is read before the jump executes.
        let distance = here + 3 - target;
        if distance > u16::MAX as usize {
            return Err(CompileError::new("Loop body is too large.", line));
        }
        self.state().last_line = line;
        let b = &mut self.vm.heap.get_codeblock_mut(block).block;
        b.push_op(Op::JmpBack, line);
        b.push_short(distance as u16, line);
        Ok(())
    }

    fn add_constant(&mut self, val: Value, line: u32) -> CResult<u8> {
        let block = self.state().block;
        self.vm
            .heap
            .get_codeblock_mut(block)
            .block
            .add_constant(val)
            .ok_or_else(|| CompileError::new("Too many constants in one block.", line))
    }

    fn string_constant(&mut self, text: &str, line: u32) -> CResult<u8> {
        let val = self.vm.intern(text.as_bytes());
        self.add_constant(val, line)
    }

    fn emit_constant(&mut self, val: Value, line: u32) -> CResult<()> {
        let k = self.add_constant(val, line)?;
        self.emit_with_byte(Op::LoadConst, k, line);
        Ok(())
    }

    // ---- Scopes and name resolution ----

    fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    fn end_scope(&mut self, line: u32) {
        self.state().scope_depth -= 1;
        let depth = self.state().scope_depth;
        loop {
            let captured = match self.state().locals.last() {
                Some(local) if local.depth > depth => local.is_captured,
                _ => break,
            };
            if captured {
                self.emit_simple(Op::CloseUpval, line);
            } else {
                self.emit_simple(Op::Pop, line);
            }
            self.state().locals.pop();
        }
    }

    fn declare_local(&mut self, name: &str, line: u32) -> CResult<()> {
        let state = self.state();
        if state.locals.len() >= 256 {
            return Err(CompileError::new(
                "Too many local variables in function.",
                line,
            ));
        }
        for local in state.locals.iter().rev() {
            if local.depth < state.scope_depth {
                break;
            }
            if local.name == name {
                return Err(CompileError::new(
                    format!("A variable named '{name}' already exists in this scope."),
                    line,
                ));
            }
        }
        let depth = state.scope_depth;
        state.locals.push(Local {
            name: name.to_string(),
            depth,
            initialized: false,
            is_captured: false,
        });
        Ok(())
    }

    fn mark_initialized(&mut self) {
        self.state()
            .locals
            .last_mut()
            .expect("a declared local")
            .initialized = true;
    }

    fn resolve_local(&self, fn_idx: usize, name: &str, line: u32) -> CResult<Option<u8>> {
        for (i, local) in self.fns[fn_idx].locals.iter().enumerate().rev() {
            if local.name == name {
                if !local.initialized {
                    return Err(CompileError::new(
                        format!("Cannot read variable '{name}' in its own initializer."),
                        line,
                    ));
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn resolve_upvalue(&mut self, fn_idx: usize, name: &str, line: u32) -> CResult<Option<u8>> {
        if fn_idx == 0 {
            return Ok(None);
        }
        if let Some(local) = self.resolve_local(fn_idx - 1, name, line)? {
            self.fns[fn_idx - 1].locals[local as usize].is_captured = true;
            return Ok(Some(self.add_upvalue(
                fn_idx,
                UpvalDesc {
                    is_local: true,
                    index: local,
                },
                line,
            )?));
        }
        if let Some(upval) = self.resolve_upvalue(fn_idx - 1, name, line)? {
            return Ok(Some(self.add_upvalue(
                fn_idx,
                UpvalDesc {
                    is_local: false,
                    index: upval,
                },
                line,
            )?));
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, fn_idx: usize, desc: UpvalDesc, line: u32) -> CResult<u8> {
        for (i, existing) in self.fns[fn_idx].upvals.iter().enumerate() {
            if *existing == desc {
                return Ok(i as u8);
            }
        }
        if self.fns[fn_idx].upvals.len() >= 256 {
            return Err(CompileError::new(
                "Too many captured variables in function.",
                line,
            ));
        }
        self.fns[fn_idx].upvals.push(desc);
        Ok((self.fns[fn_idx].upvals.len() - 1) as u8)
    }

    fn named_get(&mut self, name: &str, line: u32) -> CResult<()> {
        let top = self.fns.len() - 1;
        if let Some(slot) = self.resolve_local(top, name, line)? {
            self.emit_with_byte(Op::GetVar, slot, line);
        } else if let Some(upval) = self.resolve_upvalue(top, name, line)? {
            self.emit_with_byte(Op::GetUpval, upval, line);
        } else {
            let k = self.string_constant(name, line)?;
            self.emit_with_byte(Op::GetGlobal, k, line);
        }
        Ok(())
    }

    fn named_set(&mut self, name: &str, line: u32) -> CResult<()> {
        let top = self.fns.len() - 1;
        if let Some(slot) = self.resolve_local(top, name, line)? {
            self.emit_with_byte(Op::SetVar, slot, line);
        } else if let Some(upval) = self.resolve_upvalue(top, name, line)? {
            self.emit_with_byte(Op::SetUpval, upval, line);
        } else {
            let k = self.string_constant(name, line)?;
            self.emit_with_byte(Op::SetGlobal, k, line);
        }
        Ok(())
    }

    // ---- Statements ----

    fn statement(&mut self, stmt: &Stmt) -> CResult<()> {
        match stmt {
            Stmt::Let { name, init, line } => {
                self.declare_local(name, *line)?;
                match init {
                    // Name the function after the variable binding it, and
                    // mark the slot early so the function can recurse.
                    Some(Expr::Func { params, body, line }) => {
                        self.mark_initialized();
                        self.function(name, params, body, *line)?;
                    }
                    Some(expr) => {
                        self.expr(expr)?;
                        self.mark_initialized();
                    }
                    None => {
                        self.emit_simple(Op::LoadNil, *line);
                        self.mark_initialized();
                    }
                }
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.expr(expr)?;
                self.emit_simple(Op::Pop, expr.line());
                Ok(())
            }
            Stmt::Return { value, line } => {
                match value {
                    Some(expr) => self.expr(expr)?,
                    None => self.emit_simple(Op::LoadNil, *line),
                }
                self.emit_simple(Op::ReturnVal, *line);
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                line,
            } => {
                self.expr(cond)?;
                let else_jump = self.emit_jump(Op::PopJmpIfFalse, *line);
                self.block_stmts(then_branch, *line)?;
                if let Some(else_stmts) = else_branch {
                    let end_jump = self.emit_jump(Op::Jmp, *line);
                    self.patch_jump(else_jump, *line)?;
                    self.block_stmts(else_stmts, *line)?;
                    self.patch_jump(end_jump, *line)?;
                } else {
                    self.patch_jump(else_jump, *line)?;
                }
                Ok(())
            }
            Stmt::While { cond, body, line } => {
                let block = self.state().block;
                let loop_start = self.vm.heap.get_codeblock(block).block.len();
                self.expr(cond)?;
                let exit_jump = self.emit_jump(Op::PopJmpIfFalse, *line);
                self.block_stmts(body, *line)?;
                self.emit_loop(loop_start, *line)?;
                self.patch_jump(exit_jump, *line)?;
                Ok(())
            }
            Stmt::Block(stmts, line) => self.block_stmts(stmts, *line),
        }
    }

    fn block_stmts(&mut self, stmts: &[Stmt], line: u32) -> CResult<()> {
        self.begin_scope();
        for stmt in stmts {
            self.statement(stmt)?;
        }
        self.end_scope(line);
        Ok(())
    }

    // ---- Expressions ----

    fn expr(&mut self, expr: &Expr) -> CResult<()> {
        match expr {
            Expr::Num(n, line) => self.emit_constant(Value::from_num(*n), *line),
            Expr::Str(text, line) => {
                let k = self.string_constant(text, *line)?;
                self.emit_with_byte(Op::LoadConst, k, *line);
                Ok(())
            }
            Expr::Bool(b, line) => self.emit_constant(Value::from_bool(*b), *line),
            Expr::Nil(line) => {
                self.emit_simple(Op::LoadNil, *line);
                Ok(())
            }
            Expr::Name(name, line) => self.named_get(name, *line),

            Expr::Unary { op, rhs, line } => {
                self.expr(rhs)?;
                match op {
                    UnOp::Neg => self.emit_simple(Op::Negate, *line),
                    UnOp::Not => self.emit_simple(Op::Lnot, *line),
                }
                Ok(())
            }

            Expr::Binary { op, lhs, rhs, line } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.binary_op(*op, *line);
                Ok(())
            }

            Expr::Logical { op, lhs, rhs, line } => {
                self.expr(lhs)?;
                let jump = match op {
                    LogOp::And => self.emit_jump(Op::JmpIfFalseOrPop, *line),
                    LogOp::Or => self.emit_jump(Op::JmpIfTrueOrPop, *line),
                };
                self.expr(rhs)?;
                self.patch_jump(jump, *line)
            }

            Expr::Assign {
                target,
                op,
                value,
                line,
            } => self.assignment(target, *op, value, *line),

            Expr::Call { callee, args, line } => {
                self.expr(callee)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit_with_byte(Op::CallFunc, args.len() as u8, *line);
                Ok(())
            }

            Expr::Field { obj, name, line } => {
                self.expr(obj)?;
                let k = self.string_constant(name, *line)?;
                self.emit_with_byte(Op::TableGet, k, *line);
                Ok(())
            }

            Expr::Index { obj, key, line } => {
                self.expr(obj)?;
                self.expr(key)?;
                self.emit_simple(Op::Index, *line);
                Ok(())
            }

            Expr::Func { params, body, line } => self.function("<anonymous>", params, body, *line),

            Expr::TableLit { fields, line } => {
                self.emit_simple(Op::NewTable, *line);
                for (key, value) in fields {
                    match key {
                        FieldKey::Name(name) => {
                            let k = self.string_constant(name, *line)?;
                            self.emit_with_byte(Op::LoadConst, k, *line);
                        }
                        FieldKey::Expr(key_expr) => self.expr(key_expr)?,
                    }
                    self.expr(value)?;
                    self.emit_simple(Op::TableAddField, *line);
                }
                Ok(())
            }
        }
    }

    fn binary_op(&mut self, op: BinOp, line: u32) {
        let opcode = match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mult,
            BinOp::Div => Op::Div,
            BinOp::Mod => Op::Mod,
            BinOp::Shl => Op::Lshift,
            BinOp::Shr => Op::Rshift,
            BinOp::BAnd => Op::Band,
            BinOp::BOr => Op::Bor,
            BinOp::Eq => Op::Eq,
            BinOp::Ne => Op::Neq,
            BinOp::Gt => Op::Gt,
            BinOp::Lt => Op::Lt,
            BinOp::Ge => Op::Gte,
            BinOp::Le => Op::Lte,
            BinOp::Concat => Op::Concat,
        };
        self.emit_simple(opcode, line);
    }

    fn assignment(
        &mut self,
        target: &Expr,
        op: Option<BinOp>,
        value: &Expr,
        line: u32,
    ) -> CResult<()> {
        match target {
            Expr::Name(name, _) => {
                if let Some(binop) = op {
                    self.named_get(name, line)?;
                    self.expr(value)?;
                    self.binary_op(binop, line);
                } else {
                    self.expr(value)?;
                }
                self.named_set(name, line)
            }
            Expr::Field { obj, name, .. } => {
                self.expr(obj)?;
                let k = self.string_constant(name, line)?;
                if let Some(binop) = op {
                    self.emit_with_byte(Op::TableGetNoPop, k, line);
                    self.expr(value)?;
                    self.binary_op(binop, line);
                } else {
                    self.expr(value)?;
                }
                self.emit_with_byte(Op::TableSet, k, line);
                Ok(())
            }
            Expr::Index { obj, key, .. } => {
                self.expr(obj)?;
                self.expr(key)?;
                if let Some(binop) = op {
                    self.emit_simple(Op::IndexNoPop, line);
                    self.expr(value)?;
                    self.binary_op(binop, line);
                } else {
                    self.expr(value)?;
                }
                self.emit_simple(Op::IndexSet, line);
                Ok(())
            }
            _ => Err(CompileError::new("Invalid assignment target.", line)),
        }
    }

    /// Compile a nested function and emit `make_func` with its upvalue
    /// descriptors.
    fn function(&mut self, name: &str, params: &[String], body: &[Stmt], line: u32) -> CResult<()> {
        self.begin_function(name, params, line)?;
        for stmt in body {
            self.statement(stmt)?;
        }
        let upvals = {
            // Captured before end_function pops the state.
            self.fns.last().expect("function state").upvals.clone()
        };
        let block = self.end_function()?;

        let block_val = Value::from_codeblock(block);
        let k = self.add_constant(block_val, line)?;
        self.emit_with_byte(Op::MakeFunc, k, line);
        self.push_byte(upvals.len() as u8, line);
        for desc in &upvals {
            self.push_byte(desc.is_local as u8, line);
            self.push_byte(desc.index, line);
        }
        // Now reachable as a constant of the enclosing (protected) block.
        self.vm.heap.unprotect(block_val);
        Ok(())
    }
}
