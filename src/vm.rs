//! Stack-based bytecode VM.
//!
//! Runs chunks against a context's global environment. The interrupt flag
//! is polled at every instruction boundary and the optional interrupt
//! handler every [`HANDLER_POLL_INTERVAL`] instructions, so cancellation of
//! a running script is prompt but strictly cooperative. Heap growth is
//! charged against the engine's memory gauge at allocation sites.

use std::rc::Rc;
use std::sync::atomic::Ordering;

use crate::bridge;
use crate::compiler::{Chunk, Constant, Op};
use crate::context::Context;
use crate::engine::{CallScope, RunEnv};
use crate::error::{ExceptionInfo, FrameInfo, HostError};
use crate::value::{CheapClone, ExoticObject, JsFunction, JsObject, JsString, JsValue};

/// Script call-stack limit.
const MAX_FRAMES: usize = 256;
/// Interval, in executed instructions, between interrupt-handler polls.
const HANDLER_POLL_INTERVAL: u32 = 1024;

/// Rough per-allocation heap cost estimates, in bytes.
mod cost {
    pub const STRING_BASE: usize = 24;
    pub const OBJECT: usize = 64;
    pub const ARRAY_BASE: usize = 48;
    pub const ARRAY_ELEMENT: usize = 16;
    pub const PROPERTY: usize = 32;
    pub const ERROR: usize = 96;
    pub const FRAME: usize = 64;
    pub const CLOSURE: usize = 64;
}

/// Run a top-level chunk to completion and return its completion value.
pub(crate) fn run_chunk(
    ctx: &mut Context,
    chunk: Rc<Chunk>,
    env: &RunEnv,
) -> Result<JsValue, HostError> {
    let mut vm = Vm::new(ctx, env);
    vm.stack
        .resize(chunk.n_locals as usize, JsValue::Undefined);
    vm.frames.push(Frame {
        chunk,
        ip: 0,
        base: 0,
    });
    vm.run()
}

/// Call a callable value with the given arguments.
pub(crate) fn call_value(
    ctx: &mut Context,
    func: &JsValue,
    args: &[JsValue],
    env: &RunEnv,
) -> Result<JsValue, HostError> {
    if args.len() > u8::MAX as usize {
        return Err(HostError::marshal("too many call arguments"));
    }
    let mut vm = Vm::new(ctx, env);
    vm.stack.push(func.clone());
    vm.stack.extend(args.iter().cloned());
    match vm.exec(Op::Call(args.len() as u8)) {
        Ok(()) => {}
        Err(unwind) => vm.handle_unwind(unwind)?,
    }
    if let Some(value) = vm.result.take() {
        return Ok(value);
    }
    if vm.frames.is_empty() {
        // Native or constructor call: the result is on the stack.
        return vm
            .stack
            .pop()
            .ok_or_else(|| HostError::Internal("call left no result".to_string()));
    }
    vm.run()
}

struct Frame {
    chunk: Rc<Chunk>,
    ip: usize,
    base: usize,
}

struct Handler {
    frame_idx: usize,
    stack_len: usize,
    catch_ip: usize,
    slot: u8,
}

/// Non-local exits from an instruction.
enum Unwind {
    /// A script-visible thrown value, catchable by `try`/`catch`.
    Throw(JsValue),
    /// A host-level failure (OOM, interrupt, internal); never catchable.
    Fatal(HostError),
}

struct Vm<'c> {
    ctx: &'c mut Context,
    env: &'c RunEnv,
    stack: Vec<JsValue>,
    frames: Vec<Frame>,
    handlers: Vec<Handler>,
    completion: JsValue,
    result: Option<JsValue>,
    ops_executed: u32,
}

impl<'c> Vm<'c> {
    fn new(ctx: &'c mut Context, env: &'c RunEnv) -> Self {
        Vm {
            ctx,
            env,
            stack: Vec::new(),
            frames: Vec::new(),
            handlers: Vec::new(),
            completion: JsValue::Undefined,
            result: None,
            ops_executed: 0,
        }
    }

    fn run(&mut self) -> Result<JsValue, HostError> {
        loop {
            if self.env.interrupt.load(Ordering::Relaxed) {
                return Err(HostError::Interrupted);
            }
            self.ops_executed = self.ops_executed.wrapping_add(1);
            if self.ops_executed % HANDLER_POLL_INTERVAL == 0 {
                if let Some(handler) = &self.env.handler {
                    if handler() {
                        return Err(HostError::Interrupted);
                    }
                }
            }

            let op = {
                let depth = self.frames.len();
                let frame = match self.frames.last_mut() {
                    Some(f) => f,
                    None => {
                        return Err(HostError::Internal("vm ran out of frames".to_string()));
                    }
                };
                match frame.chunk.code.get(frame.ip) {
                    Some(op) => {
                        frame.ip += 1;
                        *op
                    }
                    None if depth == 1 => {
                        // Top-level chunks have no trailing return; reaching
                        // the end completes the script.
                        return Ok(std::mem::take(&mut self.completion));
                    }
                    None => {
                        return Err(HostError::Internal(
                            "function chunk fell off the end".to_string(),
                        ));
                    }
                }
            };

            match self.exec(op) {
                Ok(()) => {}
                Err(unwind) => self.handle_unwind(unwind)?,
            }

            if let Some(value) = self.result.take() {
                return Ok(value);
            }
        }
    }

    fn exec(&mut self, op: Op) -> Result<(), Unwind> {
        match op {
            Op::Const(idx) => {
                let value = match self.constant(idx)? {
                    Constant::Number(n) => JsValue::Number(n),
                    Constant::String(s) => {
                        self.charge(cost::STRING_BASE + s.len())?;
                        JsValue::String(JsString::from(s))
                    }
                };
                self.stack.push(value);
            }
            Op::Int(n) => self.stack.push(JsValue::Number(n as f64)),
            Op::Undefined => self.stack.push(JsValue::Undefined),
            Op::Null => self.stack.push(JsValue::Null),
            Op::True => self.stack.push(JsValue::Boolean(true)),
            Op::False => self.stack.push(JsValue::Boolean(false)),

            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let top = self.peek()?.clone();
                self.stack.push(top);
            }

            Op::Add => {
                let right = self.pop()?;
                let left = self.pop()?;
                let value = match (&left, &right) {
                    (JsValue::String(_), _) | (_, JsValue::String(_)) => {
                        let a = left.to_js_string();
                        let b = right.to_js_string();
                        self.charge(cost::STRING_BASE + a.len() + b.len())?;
                        JsValue::String(JsString::from(format!("{}{}", a, b)))
                    }
                    _ => JsValue::Number(left.to_number() + right.to_number()),
                };
                self.stack.push(value);
            }
            Op::Sub => self.numeric_binop(|a, b| a - b)?,
            Op::Mul => self.numeric_binop(|a, b| a * b)?,
            Op::Div => self.numeric_binop(|a, b| a / b)?,
            Op::Mod => self.numeric_binop(|a, b| a % b)?,
            Op::Neg => {
                let v = self.pop()?;
                self.stack.push(JsValue::Number(-v.to_number()));
            }
            Op::Not => {
                let v = self.pop()?;
                self.stack.push(JsValue::Boolean(!v.to_boolean()));
            }
            Op::TypeOf => {
                let v = self.pop()?;
                self.stack.push(JsValue::from(v.type_of()));
            }

            Op::Eq => self.equality(true, false)?,
            Op::NotEq => self.equality(true, true)?,
            Op::StrictEq => self.equality(false, false)?,
            Op::StrictNotEq => self.equality(false, true)?,
            Op::Lt => self.comparison(|o| o == std::cmp::Ordering::Less)?,
            Op::LtEq => self.comparison(|o| o != std::cmp::Ordering::Greater)?,
            Op::Gt => self.comparison(|o| o == std::cmp::Ordering::Greater)?,
            Op::GtEq => self.comparison(|o| o != std::cmp::Ordering::Less)?,

            Op::GetGlobal(idx) => {
                let name = self.string_constant(idx)?;
                match self.ctx.globals.get(&name) {
                    Some(value) => {
                        let value = value.clone();
                        self.stack.push(value);
                    }
                    None => {
                        return Err(self.throw_error(
                            "ReferenceError",
                            &format!("{} is not defined", name),
                        )?);
                    }
                }
            }
            Op::GetGlobalOrUndefined(idx) => {
                let name = self.string_constant(idx)?;
                let value = self.ctx.globals.get(&name).cloned().unwrap_or_default();
                self.stack.push(value);
            }
            Op::SetGlobal(idx) => {
                let name = self.string_constant(idx)?;
                let value = self.pop()?;
                self.ctx.globals.insert(name, value);
            }
            Op::GetLocal(slot) => {
                let base = self.frame_base()?;
                let value = self
                    .stack
                    .get(base + slot as usize)
                    .cloned()
                    .ok_or_else(|| internal("local slot out of range"))?;
                self.stack.push(value);
            }
            Op::SetLocal(slot) => {
                let base = self.frame_base()?;
                let value = self.pop()?;
                match self.stack.get_mut(base + slot as usize) {
                    Some(cell) => *cell = value,
                    None => return Err(internal("local slot out of range")),
                }
            }

            Op::Jump(target) => self.jump(target)?,
            Op::JumpIfFalse(target) => {
                let cond = self.pop()?;
                if !cond.to_boolean() {
                    self.jump(target)?;
                }
            }
            Op::JumpIfFalseKeep(target) => {
                if !self.peek()?.to_boolean() {
                    self.jump(target)?;
                }
            }
            Op::JumpIfTrueKeep(target) => {
                if self.peek()?.to_boolean() {
                    self.jump(target)?;
                }
            }

            Op::NewArray(n) => {
                let n = n as usize;
                if self.stack.len() < n {
                    return Err(internal("stack underflow building array"));
                }
                self.charge(cost::ARRAY_BASE + cost::ARRAY_ELEMENT * n)?;
                let elements = self.stack.split_off(self.stack.len() - n);
                self.stack.push(JsValue::object(JsObject::array(elements)));
            }
            Op::NewObject => {
                self.charge(cost::OBJECT)?;
                self.stack.push(JsValue::object(JsObject::ordinary()));
            }
            Op::DefineProp(idx) => {
                let key = self.string_constant(idx)?;
                let value = self.pop()?;
                self.charge(cost::PROPERTY)?;
                let obj = self.peek()?;
                match obj.as_object() {
                    Some(obj) => obj.borrow_mut().set_property(key, value),
                    None => return Err(internal("DefineProp on non-object")),
                }
            }
            Op::GetProp(idx) => {
                let key = self.string_constant(idx)?;
                let target = self.pop()?;
                let value = self.get_property(&target, key.as_str())?;
                self.stack.push(value);
            }
            Op::SetProp(idx) => {
                let key = self.string_constant(idx)?;
                let value = self.pop()?;
                let target = self.pop()?;
                match target.as_object() {
                    Some(obj) => {
                        self.charge(cost::PROPERTY)?;
                        obj.borrow_mut().set_property(key, value.clone());
                        self.stack.push(value);
                    }
                    None => {
                        return Err(self.throw_error(
                            "TypeError",
                            &format!("Cannot set property '{}' on {}", key, target.type_of()),
                        )?);
                    }
                }
            }
            Op::GetIndex => {
                let index = self.pop()?;
                let target = self.pop()?;
                let key = index.to_js_string();
                let value = self.get_property(&target, key.as_str())?;
                self.stack.push(value);
            }
            Op::SetIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                let target = self.pop()?;
                match target.as_object() {
                    Some(obj) => {
                        self.charge(cost::PROPERTY)?;
                        obj.borrow_mut()
                            .set_property(index.to_js_string(), value.clone());
                        self.stack.push(value);
                    }
                    None => {
                        return Err(self.throw_error(
                            "TypeError",
                            &format!("Cannot set index on {}", target.type_of()),
                        )?);
                    }
                }
            }

            Op::Call(argc) => self.call(argc, false)?,
            Op::New(argc) => self.call(argc, true)?,
            Op::Closure(idx) => {
                let proto = {
                    let frame = self.frames.last().ok_or_else(|| internal("no frame"))?;
                    frame
                        .chunk
                        .functions
                        .get(idx as usize)
                        .cloned()
                        .ok_or_else(|| internal("function index out of range"))?
                };
                self.charge(cost::CLOSURE + proto.code.len() * 8)?;
                self.stack
                    .push(JsValue::object(JsObject::function(JsFunction::Script {
                        chunk: Rc::new(proto),
                    })));
            }

            Op::PushHandler { catch_ip, slot } => {
                self.handlers.push(Handler {
                    frame_idx: self.frames.len().saturating_sub(1),
                    stack_len: self.stack.len(),
                    catch_ip: catch_ip as usize,
                    slot,
                });
            }
            Op::PopHandler => {
                self.handlers.pop();
            }
            Op::Throw => {
                let value = self.pop()?;
                return Err(Unwind::Throw(value));
            }

            Op::Return => {
                let value = self.pop()?;
                self.finish_frame(value)?;
            }
            Op::ReturnUndefined => {
                self.finish_frame(JsValue::Undefined)?;
            }
            Op::StoreCompletion => {
                self.completion = self.pop()?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn call(&mut self, argc: u8, is_new: bool) -> Result<(), Unwind> {
        let argc = argc as usize;
        if self.stack.len() < argc + 1 {
            return Err(internal("stack underflow in call"));
        }
        let callee_idx = self.stack.len() - argc - 1;
        let callee = self
            .stack
            .get(callee_idx)
            .cloned()
            .ok_or_else(|| internal("missing callee"))?;

        let func_obj = match callee.as_object() {
            Some(obj) if obj.borrow().is_callable() => obj.cheap_clone(),
            _ => {
                let shown = callee.to_js_string();
                let what = if is_new { "a constructor" } else { "a function" };
                return Err(self.throw_error(
                    "TypeError",
                    &format!("{} is not {}", shown, what),
                )?);
            }
        };

        enum Target {
            Script(Rc<Chunk>),
            Native(u32),
            ErrorCtor(JsString),
        }
        let target = {
            let borrowed = func_obj.borrow();
            match &borrowed.exotic {
                ExoticObject::Function(JsFunction::Script { chunk }) => {
                    Target::Script(chunk.cheap_clone())
                }
                ExoticObject::Function(JsFunction::Native { binding_id, .. }) => {
                    Target::Native(*binding_id)
                }
                ExoticObject::Function(JsFunction::ErrorCtor { name }) => {
                    Target::ErrorCtor(name.cheap_clone())
                }
                _ => return Err(internal("callable without function payload")),
            }
        };

        match target {
            Target::Script(chunk) => {
                if is_new {
                    let name = chunk.name.clone();
                    return Err(
                        self.throw_error("TypeError", &format!("{} is not a constructor", name))?
                    );
                }
                if self.frames.len() >= MAX_FRAMES {
                    return Err(
                        self.throw_error("RangeError", "Maximum call stack size exceeded")?
                    );
                }
                self.charge(cost::FRAME)?;
                self.stack.remove(callee_idx);
                let base = callee_idx;
                let arity = chunk.arity as usize;
                // JS call semantics: missing arguments become undefined,
                // extras are dropped.
                if argc > arity {
                    self.stack.truncate(base + arity);
                }
                while self.stack.len() < base + chunk.n_locals as usize {
                    self.stack.push(JsValue::Undefined);
                }
                self.frames.push(Frame {
                    chunk,
                    ip: 0,
                    base,
                });
            }
            Target::Native(binding_id) => {
                let args = self.stack.split_off(callee_idx + 1);
                self.stack.pop();
                self.call_native(binding_id, &args)?;
            }
            Target::ErrorCtor(name) => {
                let args = self.stack.split_off(callee_idx + 1);
                self.stack.pop();
                self.charge(cost::ERROR)?;
                let message = args
                    .first()
                    .filter(|v| !matches!(v, JsValue::Undefined))
                    .map(|v| v.to_js_string().to_string())
                    .unwrap_or_default();
                self.stack.push(JsValue::object(JsObject::error(
                    name.as_str(),
                    &message,
                    false,
                )));
            }
        }
        Ok(())
    }

    /// Dispatch a host binding. Any error the callback returns is converted
    /// into a script-visible exception; only OOM and interrupts stay fatal.
    fn call_native(&mut self, binding_id: u32, args: &[JsValue]) -> Result<(), Unwind> {
        let (name, func) = match self.ctx.bindings.get(&binding_id) {
            Some(slot) => (slot.name.cheap_clone(), slot.func.cheap_clone()),
            None => return Err(internal("native binding not registered")),
        };

        let mut host_args = Vec::with_capacity(args.len());
        for arg in args {
            match bridge::to_host(self.ctx, arg) {
                Ok(v) => host_args.push(v),
                Err(e) => {
                    return Err(self.throw_error(
                        "TypeError",
                        &format!("could not marshal argument for {}: {}", name, e),
                    )?);
                }
            }
        }

        let result = match func.try_borrow_mut() {
            Ok(mut f) => {
                let mut scope = CallScope {
                    ctx: &mut *self.ctx,
                    env: self.env,
                };
                (*f)(&mut scope, &host_args)
            }
            Err(_) => {
                return Err(
                    self.throw_error("TypeError", &format!("{} is already executing", name))?
                );
            }
        };

        match result {
            Ok(value) => match bridge::to_engine(self.ctx, &value, &self.env.gauge) {
                Ok(engine_value) => {
                    self.stack.push(engine_value);
                    Ok(())
                }
                Err(e) => Err(self.throw_error(
                    "TypeError",
                    &format!("could not marshal result of {}: {}", name, e),
                )?),
            },
            Err(e @ (HostError::Interrupted | HostError::OutOfMemory { .. })) => {
                Err(Unwind::Fatal(e))
            }
            Err(HostError::Exception(info)) => {
                // Re-throw a script exception from re-entrant evaluation.
                self.charge(cost::ERROR)?;
                Err(Unwind::Throw(JsValue::object(JsObject::error(
                    "Error",
                    &info.message,
                    info.native_origin,
                ))))
            }
            Err(e) => {
                self.charge(cost::ERROR)?;
                Err(Unwind::Throw(JsValue::object(JsObject::error(
                    "Error",
                    &e.to_string(),
                    true,
                ))))
            }
        }
    }

    fn finish_frame(&mut self, value: JsValue) -> Result<(), Unwind> {
        let frame = self.frames.pop().ok_or_else(|| internal("no frame"))?;
        let live = self.frames.len();
        self.handlers.retain(|h| h.frame_idx < live);
        self.stack.truncate(frame.base);
        if self.frames.is_empty() {
            self.result = Some(value);
        } else {
            self.stack.push(value);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exception unwinding
    // ------------------------------------------------------------------

    fn handle_unwind(&mut self, unwind: Unwind) -> Result<(), HostError> {
        match unwind {
            Unwind::Fatal(e) => Err(e),
            Unwind::Throw(value) => match self.handlers.pop() {
                Some(handler) => {
                    self.frames.truncate(handler.frame_idx + 1);
                    self.stack.truncate(handler.stack_len);
                    let base = match self.frames.last_mut() {
                        Some(frame) => {
                            frame.ip = handler.catch_ip;
                            frame.base
                        }
                        None => {
                            return Err(HostError::Internal(
                                "handler without owning frame".to_string(),
                            ));
                        }
                    };
                    match self.stack.get_mut(base + handler.slot as usize) {
                        Some(slot) => *slot = value,
                        None => {
                            return Err(HostError::Internal(
                                "catch slot out of range".to_string(),
                            ));
                        }
                    }
                    Ok(())
                }
                None => Err(HostError::Exception(self.exception_info(&value))),
            },
        }
    }

    /// Build the structured exception record for an uncaught thrown value.
    fn exception_info(&self, value: &JsValue) -> ExceptionInfo {
        let mut native_origin = false;
        let message = match value.as_object() {
            Some(obj) => {
                let obj = obj.borrow();
                if let ExoticObject::Error { native_origin: n } = obj.exotic {
                    native_origin = n;
                    obj.get_property("message")
                        .map(|m| m.to_js_string().to_string())
                        .unwrap_or_default()
                } else {
                    drop(obj);
                    value.to_js_string().to_string()
                }
            }
            None => value.to_js_string().to_string(),
        };

        let stack = self
            .frames
            .iter()
            .rev()
            .map(|frame| FrameInfo {
                function: if frame.chunk.name.is_empty() {
                    None
                } else {
                    Some(frame.chunk.name.clone())
                },
                filename: if frame.chunk.filename.is_empty() {
                    None
                } else {
                    Some(frame.chunk.filename.clone())
                },
                line: frame
                    .chunk
                    .lines
                    .get(frame.ip.saturating_sub(1))
                    .copied()
                    .unwrap_or(0),
            })
            .collect();

        ExceptionInfo {
            message,
            stack,
            native_origin,
        }
    }

    // ------------------------------------------------------------------
    // Operand helpers
    // ------------------------------------------------------------------

    fn pop(&mut self) -> Result<JsValue, Unwind> {
        self.stack
            .pop()
            .ok_or_else(|| internal("operand stack underflow"))
    }

    fn peek(&self) -> Result<&JsValue, Unwind> {
        self.stack
            .last()
            .ok_or_else(|| internal("operand stack underflow"))
    }

    fn frame_base(&self) -> Result<usize, Unwind> {
        self.frames
            .last()
            .map(|f| f.base)
            .ok_or_else(|| internal("no frame"))
    }

    fn jump(&mut self, target: u32) -> Result<(), Unwind> {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.ip = target as usize;
                Ok(())
            }
            None => Err(internal("no frame")),
        }
    }

    fn constant(&self, idx: u16) -> Result<Constant, Unwind> {
        self.frames
            .last()
            .and_then(|f| f.chunk.constants.get(idx as usize))
            .cloned()
            .ok_or_else(|| internal("constant index out of range"))
    }

    fn string_constant(&self, idx: u16) -> Result<JsString, Unwind> {
        match self.constant(idx)? {
            Constant::String(s) => Ok(JsString::from(s)),
            Constant::Number(_) => Err(internal("expected string constant")),
        }
    }

    fn charge(&self, bytes: usize) -> Result<(), Unwind> {
        self.env.gauge.charge(bytes).map_err(Unwind::Fatal)
    }

    /// Construct and raise a builtin error. Returns the `Unwind` to
    /// propagate so call sites read `return Err(self.throw_error(..)?)`.
    fn throw_error(&self, name: &str, message: &str) -> Result<Unwind, Unwind> {
        self.charge(cost::ERROR)?;
        Ok(Unwind::Throw(JsValue::object(JsObject::error(
            name, message, false,
        ))))
    }

    fn get_property(&mut self, target: &JsValue, key: &str) -> Result<JsValue, Unwind> {
        match target {
            JsValue::Object(obj) => Ok(obj.borrow().get_property(key).unwrap_or_default()),
            JsValue::String(s) => {
                if key == "length" {
                    Ok(JsValue::Number(s.as_str().chars().count() as f64))
                } else if let Ok(index) = key.parse::<usize>() {
                    match s.as_str().chars().nth(index) {
                        Some(c) => {
                            self.charge(cost::STRING_BASE + c.len_utf8())?;
                            Ok(JsValue::from(c.to_string().as_str()))
                        }
                        None => Ok(JsValue::Undefined),
                    }
                } else {
                    Ok(JsValue::Undefined)
                }
            }
            JsValue::Undefined | JsValue::Null => Err(self.throw_error(
                "TypeError",
                &format!(
                    "Cannot read properties of {} (reading '{}')",
                    target.type_of(),
                    key
                ),
            )?),
            _ => Ok(JsValue::Undefined),
        }
    }

    fn numeric_binop(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), Unwind> {
        let right = self.pop()?.to_number();
        let left = self.pop()?.to_number();
        self.stack.push(JsValue::Number(f(left, right)));
        Ok(())
    }

    fn equality(&mut self, loose: bool, negate: bool) -> Result<(), Unwind> {
        let right = self.pop()?;
        let left = self.pop()?;
        let eq = if loose {
            left.loose_equals(&right)
        } else {
            left.strict_equals(&right)
        };
        self.stack.push(JsValue::Boolean(eq != negate));
        Ok(())
    }

    fn comparison(&mut self, f: impl Fn(std::cmp::Ordering) -> bool) -> Result<(), Unwind> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (&left, &right) {
            (JsValue::String(a), JsValue::String(b)) => f(a.as_str().cmp(b.as_str())),
            _ => {
                let (a, b) = (left.to_number(), right.to_number());
                match a.partial_cmp(&b) {
                    Some(ordering) => f(ordering),
                    None => false, // NaN compares false
                }
            }
        };
        self.stack.push(JsValue::Boolean(result));
        Ok(())
    }
}

fn internal(msg: &str) -> Unwind {
    Unwind::Fatal(HostError::Internal(msg.to_string()))
}
