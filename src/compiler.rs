//! Bytecode compiler.
//!
//! Compiles a parsed [`Program`] into a stack-based [`Chunk`]. Chunks are
//! plain serde-serializable data so they can round-trip through the
//! bytecode cache (see [`crate::cache`]).
//!
//! Name resolution is deliberately simple: function parameters, local
//! declarations inside functions, and `catch` bindings become indexed local
//! slots; everything else resolves dynamically through the context's global
//! table. Functions do not capture enclosing locals.

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, Expr, ExprKind, LogicalOp, Program, Stmt, StmtKind, UnaryOp};
use crate::error::HostError;
use crate::lexer::Span;

/// Constant pool index.
pub type ConstantIndex = u16;

/// Local variable slot.
pub type LocalSlot = u8;

/// Jump target (absolute instruction offset).
pub type JumpTarget = u32;

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Number(f64),
    String(String),
}

/// A bytecode instruction for the stack VM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Push constants[idx].
    Const(ConstantIndex),
    /// Push a small integer without going through the pool.
    Int(i32),
    Undefined,
    Null,
    True,
    False,

    Pop,
    Dup,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    TypeOf,

    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    /// Push the global named by constants[idx]; throws ReferenceError if
    /// the name is not defined.
    GetGlobal(ConstantIndex),
    /// Push the global named by constants[idx], or undefined when the name
    /// is not defined. Emitted for the operand of `typeof` on a bare
    /// identifier, which must not throw.
    GetGlobalOrUndefined(ConstantIndex),
    /// Pop a value into the global named by constants[idx].
    SetGlobal(ConstantIndex),
    GetLocal(LocalSlot),
    SetLocal(LocalSlot),

    Jump(JumpTarget),
    /// Pop the condition; jump when falsy.
    JumpIfFalse(JumpTarget),
    /// Peek the condition; jump when falsy, leaving it on the stack (`&&`).
    JumpIfFalseKeep(JumpTarget),
    /// Peek the condition; jump when truthy, leaving it on the stack (`||`).
    JumpIfTrueKeep(JumpTarget),

    /// Pop n elements, push a new array.
    NewArray(u16),
    NewObject,
    /// Pop a value, define it on the object below as constants[idx].
    DefineProp(ConstantIndex),
    /// Pop an object, push its property constants[idx].
    GetProp(ConstantIndex),
    /// Pop value and object, set property, push the value back.
    SetProp(ConstantIndex),
    /// Pop index and object, push the element.
    GetIndex,
    /// Pop value, index, and object; set; push the value back.
    SetIndex,

    /// Pop argc args and the callee, push the call result.
    Call(u8),
    /// Constructor call (`new`).
    New(u8),
    /// Instantiate functions[idx] of the current chunk and push it.
    Closure(u16),

    /// Install an exception handler at catch_ip; the thrown value lands in
    /// the given local slot.
    PushHandler { catch_ip: JumpTarget, slot: LocalSlot },
    PopHandler,
    /// Pop and throw.
    Throw,

    Return,
    ReturnUndefined,
    /// Pop into the script completion value (top-level expression statements).
    StoreCompletion,
}

/// A compiled unit: top-level script or one function body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Function name; empty for the top-level chunk.
    pub name: String,
    /// Source filename, for stack traces.
    pub filename: String,
    pub arity: u8,
    pub n_locals: u8,
    pub code: Vec<Op>,
    /// Source line per instruction, parallel to `code`.
    pub lines: Vec<u32>,
    pub constants: Vec<Constant>,
    /// Nested function chunks, referenced by `Op::Closure`.
    pub functions: Vec<Chunk>,
}

/// Compile a program to a top-level chunk.
pub fn compile_program(program: &Program, filename: &str) -> Result<Chunk, HostError> {
    let mut c = FnCompiler::new(String::new(), filename.to_string(), &[], false);
    for stmt in &program.body {
        c.compile_stmt(stmt)?;
    }
    Ok(c.finish())
}

struct LoopCtx {
    start: usize,
    breaks: Vec<usize>,
    /// Handlers lexically open at loop entry; `break`/`continue` must pop
    /// back down to this depth before jumping out.
    open_handlers: usize,
}

struct FnCompiler {
    chunk: Chunk,
    /// Lexical scopes of named local slots; empty stack at the top level
    /// except inside catch blocks.
    scopes: Vec<Vec<(String, LocalSlot)>>,
    loops: Vec<LoopCtx>,
    /// Count of `try` handlers open at the current emit point.
    open_handlers: usize,
    in_function: bool,
}

impl FnCompiler {
    fn new(name: String, filename: String, params: &[String], in_function: bool) -> Self {
        let mut c = FnCompiler {
            chunk: Chunk {
                name,
                filename,
                arity: params.len().min(u8::MAX as usize) as u8,
                n_locals: 0,
                code: Vec::new(),
                lines: Vec::new(),
                constants: Vec::new(),
                functions: Vec::new(),
            },
            scopes: vec![Vec::new()],
            loops: Vec::new(),
            open_handlers: 0,
            in_function,
        };
        for param in params {
            // parameters occupy the first local slots
            let slot = c.chunk.n_locals;
            c.chunk.n_locals = c.chunk.n_locals.saturating_add(1);
            if let Some(scope) = c.scopes.last_mut() {
                scope.push((param.clone(), slot));
            }
        }
        c
    }

    fn finish(mut self) -> Chunk {
        if self.in_function {
            self.emit(Op::ReturnUndefined, 0);
        }
        self.chunk
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), HostError> {
        let line = stmt.span.line;
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.compile_expr(expr)?;
                if self.in_function {
                    self.emit(Op::Pop, line);
                } else {
                    self.emit(Op::StoreCompletion, line);
                }
            }
            StmtKind::VarDecl { name, init, .. } => {
                match init {
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        self.emit(Op::Undefined, line);
                    }
                }
                self.declare(name, stmt.span)?;
            }
            StmtKind::FunctionDecl { name, params, body } => {
                if params.len() > u8::MAX as usize {
                    return Err(HostError::compile(
                        "too many parameters",
                        stmt.span.line,
                        stmt.span.column,
                    ));
                }
                let mut inner = FnCompiler::new(
                    name.clone(),
                    self.chunk.filename.clone(),
                    params,
                    true,
                );
                for s in body {
                    inner.compile_stmt(s)?;
                }
                let idx = self.chunk.functions.len();
                if idx > u16::MAX as usize {
                    return Err(HostError::compile(
                        "too many functions",
                        stmt.span.line,
                        stmt.span.column,
                    ));
                }
                self.chunk.functions.push(inner.finish());
                self.emit(Op::Closure(idx as u16), line);
                self.declare(name, stmt.span)?;
            }
            StmtKind::Return(value) => {
                if !self.in_function {
                    return Err(HostError::compile(
                        "return outside of function",
                        stmt.span.line,
                        stmt.span.column,
                    ));
                }
                match value {
                    Some(expr) => {
                        self.compile_expr(expr)?;
                        self.emit_handler_pops(0, line);
                        self.emit(Op::Return, line);
                    }
                    None => {
                        self.emit_handler_pops(0, line);
                        self.emit(Op::ReturnUndefined, line);
                    }
                }
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(condition)?;
                let to_else = self.emit(Op::JumpIfFalse(0), line);
                self.compile_scoped(then_branch)?;
                match else_branch {
                    Some(else_body) => {
                        let to_end = self.emit(Op::Jump(0), line);
                        self.patch_jump(to_else);
                        self.compile_scoped(else_body)?;
                        self.patch_jump(to_end);
                    }
                    None => self.patch_jump(to_else),
                }
            }
            StmtKind::While { condition, body } => {
                let start = self.chunk.code.len();
                self.compile_expr(condition)?;
                let exit = self.emit(Op::JumpIfFalse(0), line);
                self.loops.push(LoopCtx {
                    start,
                    breaks: Vec::new(),
                    open_handlers: self.open_handlers,
                });
                self.compile_scoped(body)?;
                self.emit(Op::Jump(start as JumpTarget), line);
                self.patch_jump(exit);
                if let Some(ctx) = self.loops.pop() {
                    for b in ctx.breaks {
                        self.patch_jump(b);
                    }
                }
            }
            StmtKind::Block(body) => {
                self.compile_scoped(body)?;
            }
            StmtKind::Break => {
                let entry = match self.loops.last() {
                    Some(ctx) => ctx.open_handlers,
                    None => {
                        return Err(HostError::compile(
                            "break outside of loop",
                            stmt.span.line,
                            stmt.span.column,
                        ));
                    }
                };
                // Close every handler opened inside the loop before
                // jumping out, or it would outlive the try block.
                self.emit_handler_pops(entry, line);
                let jump = self.emit(Op::Jump(0), line);
                if let Some(ctx) = self.loops.last_mut() {
                    ctx.breaks.push(jump);
                }
            }
            StmtKind::Continue => {
                let (start, entry) = match self.loops.last() {
                    Some(ctx) => (ctx.start as JumpTarget, ctx.open_handlers),
                    None => {
                        return Err(HostError::compile(
                            "continue outside of loop",
                            stmt.span.line,
                            stmt.span.column,
                        ));
                    }
                };
                self.emit_handler_pops(entry, line);
                self.emit(Op::Jump(start), line);
            }
            StmtKind::Throw(expr) => {
                self.compile_expr(expr)?;
                self.emit(Op::Throw, line);
            }
            StmtKind::Try {
                block,
                param,
                handler,
            } => {
                let slot = self.alloc_local(stmt.span)?;
                let push = self.emit(Op::PushHandler { catch_ip: 0, slot }, line);
                self.open_handlers += 1;
                self.compile_scoped(block)?;
                self.emit(Op::PopHandler, line);
                self.open_handlers -= 1;
                let to_end = self.emit(Op::Jump(0), line);

                let catch_ip = self.chunk.code.len() as JumpTarget;
                if let Some(Op::PushHandler { catch_ip: t, .. }) = self.chunk.code.get_mut(push) {
                    *t = catch_ip;
                }
                self.scopes.push(Vec::new());
                if let Some(name) = param {
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.push((name.clone(), slot));
                    }
                }
                for s in handler {
                    self.compile_stmt(s)?;
                }
                self.scopes.pop();
                self.patch_jump(to_end);
            }
        }
        Ok(())
    }

    fn compile_scoped(&mut self, body: &[Stmt]) -> Result<(), HostError> {
        self.scopes.push(Vec::new());
        let result = body.iter().try_for_each(|s| self.compile_stmt(s));
        self.scopes.pop();
        result
    }

    /// Bind a declaration: a local slot inside functions, a global at the
    /// top level. The initializer value is on the stack.
    fn declare(&mut self, name: &str, span: Span) -> Result<(), HostError> {
        if self.in_function {
            let slot = match self.resolve_in_current_scope(name) {
                Some(slot) => slot,
                None => {
                    let slot = self.alloc_local(span)?;
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.push((name.to_string(), slot));
                    }
                    slot
                }
            };
            self.emit(Op::SetLocal(slot), span.line);
        } else {
            let idx = self.string_constant(name, span)?;
            self.emit(Op::SetGlobal(idx), span.line);
        }
        Ok(())
    }

    fn alloc_local(&mut self, span: Span) -> Result<LocalSlot, HostError> {
        if self.chunk.n_locals == u8::MAX {
            return Err(HostError::compile(
                "too many local variables",
                span.line,
                span.column,
            ));
        }
        let slot = self.chunk.n_locals;
        self.chunk.n_locals += 1;
        Ok(slot)
    }

    fn resolve(&self, name: &str) -> Option<LocalSlot> {
        for scope in self.scopes.iter().rev() {
            if let Some((_, slot)) = scope.iter().rev().find(|(n, _)| n == name) {
                return Some(*slot);
            }
        }
        None
    }

    fn resolve_in_current_scope(&self, name: &str) -> Option<LocalSlot> {
        self.scopes
            .last()
            .and_then(|scope| scope.iter().rev().find(|(n, _)| n == name))
            .map(|(_, slot)| *slot)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), HostError> {
        let line = expr.span.line;
        match &expr.kind {
            ExprKind::Number(n) => {
                if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                    self.emit(Op::Int(*n as i32), line);
                } else {
                    let idx = self.number_constant(*n, expr.span)?;
                    self.emit(Op::Const(idx), line);
                }
            }
            ExprKind::String(s) => {
                let idx = self.string_constant(s, expr.span)?;
                self.emit(Op::Const(idx), line);
            }
            ExprKind::Boolean(true) => {
                self.emit(Op::True, line);
            }
            ExprKind::Boolean(false) => {
                self.emit(Op::False, line);
            }
            ExprKind::Null => {
                self.emit(Op::Null, line);
            }
            ExprKind::Ident(name) => match self.resolve(name) {
                Some(slot) => {
                    self.emit(Op::GetLocal(slot), line);
                }
                None => {
                    let idx = self.string_constant(name, expr.span)?;
                    self.emit(Op::GetGlobal(idx), line);
                }
            },
            ExprKind::Array(elements) => {
                if elements.len() > u16::MAX as usize {
                    return Err(HostError::compile(
                        "array literal too large",
                        expr.span.line,
                        expr.span.column,
                    ));
                }
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit(Op::NewArray(elements.len() as u16), line);
            }
            ExprKind::Object(entries) => {
                self.emit(Op::NewObject, line);
                for (key, value) in entries {
                    self.compile_expr(value)?;
                    let idx = self.string_constant(key, expr.span)?;
                    self.emit(Op::DefineProp(idx), line);
                }
            }
            ExprKind::Unary { op, operand } => {
                // `typeof name` on an unresolved identifier must yield
                // "undefined" rather than throw a ReferenceError.
                if let (UnaryOp::Typeof, ExprKind::Ident(name)) = (op, &operand.kind) {
                    if self.resolve(name).is_none() {
                        let idx = self.string_constant(name, operand.span)?;
                        self.emit(Op::GetGlobalOrUndefined(idx), line);
                        self.emit(Op::TypeOf, line);
                        return Ok(());
                    }
                }
                self.compile_expr(operand)?;
                let op = match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                    UnaryOp::Typeof => Op::TypeOf,
                };
                self.emit(op, line);
            }
            ExprKind::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                let op = match op {
                    BinaryOp::Add => Op::Add,
                    BinaryOp::Sub => Op::Sub,
                    BinaryOp::Mul => Op::Mul,
                    BinaryOp::Div => Op::Div,
                    BinaryOp::Mod => Op::Mod,
                    BinaryOp::Eq => Op::Eq,
                    BinaryOp::NotEq => Op::NotEq,
                    BinaryOp::StrictEq => Op::StrictEq,
                    BinaryOp::StrictNotEq => Op::StrictNotEq,
                    BinaryOp::Lt => Op::Lt,
                    BinaryOp::LtEq => Op::LtEq,
                    BinaryOp::Gt => Op::Gt,
                    BinaryOp::GtEq => Op::GtEq,
                };
                self.emit(op, line);
            }
            ExprKind::Logical { op, left, right } => {
                self.compile_expr(left)?;
                let short = match op {
                    LogicalOp::And => self.emit(Op::JumpIfFalseKeep(0), line),
                    LogicalOp::Or => self.emit(Op::JumpIfTrueKeep(0), line),
                };
                self.emit(Op::Pop, line);
                self.compile_expr(right)?;
                self.patch_jump(short);
            }
            ExprKind::Assign { target, value } => match &target.kind {
                ExprKind::Ident(name) => {
                    self.compile_expr(value)?;
                    self.emit(Op::Dup, line);
                    match self.resolve(name) {
                        Some(slot) => {
                            self.emit(Op::SetLocal(slot), line);
                        }
                        None => {
                            let idx = self.string_constant(name, expr.span)?;
                            self.emit(Op::SetGlobal(idx), line);
                        }
                    }
                }
                ExprKind::Member { object, property } => {
                    self.compile_expr(object)?;
                    self.compile_expr(value)?;
                    let idx = self.string_constant(property, expr.span)?;
                    self.emit(Op::SetProp(idx), line);
                }
                ExprKind::Index { object, index } => {
                    self.compile_expr(object)?;
                    self.compile_expr(index)?;
                    self.compile_expr(value)?;
                    self.emit(Op::SetIndex, line);
                }
                _ => {
                    return Err(HostError::compile(
                        "invalid assignment target",
                        expr.span.line,
                        expr.span.column,
                    ));
                }
            },
            ExprKind::Call { callee, args } => {
                self.compile_call(callee, args, expr.span, false)?;
            }
            ExprKind::New { callee, args } => {
                self.compile_call(callee, args, expr.span, true)?;
            }
            ExprKind::Member { object, property } => {
                self.compile_expr(object)?;
                let idx = self.string_constant(property, expr.span)?;
                self.emit(Op::GetProp(idx), line);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(Op::GetIndex, line);
            }
        }
        Ok(())
    }

    fn compile_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
        is_new: bool,
    ) -> Result<(), HostError> {
        if args.len() > u8::MAX as usize {
            return Err(HostError::compile(
                "too many arguments",
                span.line,
                span.column,
            ));
        }
        self.compile_expr(callee)?;
        for arg in args {
            self.compile_expr(arg)?;
        }
        let argc = args.len() as u8;
        let op = if is_new { Op::New(argc) } else { Op::Call(argc) };
        self.emit(op, span.line);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Emit helpers
    // ------------------------------------------------------------------

    fn emit(&mut self, op: Op, line: u32) -> usize {
        self.chunk.code.push(op);
        self.chunk.lines.push(line);
        self.chunk.code.len() - 1
    }

    /// Emit `PopHandler` for every handler open above `down_to`. Used for
    /// control flow that leaves try blocks early (`break`, `continue`,
    /// `return`); the lexical count is untouched since code after the
    /// jump is still inside the try.
    fn emit_handler_pops(&mut self, down_to: usize, line: u32) {
        for _ in down_to..self.open_handlers {
            self.emit(Op::PopHandler, line);
        }
    }

    fn patch_jump(&mut self, at: usize) {
        let target = self.chunk.code.len() as JumpTarget;
        if let Some(op) = self.chunk.code.get_mut(at) {
            match op {
                Op::Jump(t)
                | Op::JumpIfFalse(t)
                | Op::JumpIfFalseKeep(t)
                | Op::JumpIfTrueKeep(t) => *t = target,
                _ => {}
            }
        }
    }

    fn string_constant(&mut self, s: &str, span: Span) -> Result<ConstantIndex, HostError> {
        let existing = self.chunk.constants.iter().position(|c| {
            matches!(c, Constant::String(existing) if existing == s)
        });
        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.chunk.constants.push(Constant::String(s.to_string()));
                self.chunk.constants.len() - 1
            }
        };
        self.constant_index(idx, span)
    }

    fn number_constant(&mut self, n: f64, span: Span) -> Result<ConstantIndex, HostError> {
        self.chunk.constants.push(Constant::Number(n));
        self.constant_index(self.chunk.constants.len() - 1, span)
    }

    fn constant_index(&self, idx: usize, span: Span) -> Result<ConstantIndex, HostError> {
        if idx > ConstantIndex::MAX as usize {
            Err(HostError::compile(
                "too many constants",
                span.line,
                span.column,
            ))
        } else {
            Ok(idx as ConstantIndex)
        }
    }
}
