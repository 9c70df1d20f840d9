/// AST → CFG lowering, then assembly of each function into a prototype.
pub mod expr;
pub mod scope;

use crate::assembler::{assemble, ProtoHeader};
use crate::ast::{Block, BinOp, Chunk, Expr, ExprKind, FuncName, FunctionBody, SourceSpan, Stat, StatKind};
use crate::ir::{FunctionIr, InstrId, Instruction, Operand, VarId, VarKind};
use crate::literal::{LiteralError, Literals, Materializer};
use crate::proto::{Constant, FunctionProto, UpvalueDesc};
use crate::unit::ResultCount;
use expr::{MultiValue, NameRef, Place};
use lunet_core::string::{StringId, StringInterner};
use scope::ScopeManager;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub enum CompileErrorKind {
    MalformedLiteral(LiteralError),
    BreakOutsideLoop,
    /// Name and the span of the earlier definition.
    DuplicateLabel(StringId, SourceSpan),
    UnresolvedGoto(StringId),
    CodeTooLarge(usize),
    /// A count that does not fit an instruction field.
    FieldOverflow(&'static str, usize),
    VarargOutsideVararg,
    InvalidAssignTarget,
    NotAStatement,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileErrorKind::MalformedLiteral(e) => write!(f, "{e}"),
            CompileErrorKind::BreakOutsideLoop => write!(f, "break outside a loop"),
            CompileErrorKind::DuplicateLabel(name, previous) => {
                write!(f, "label {name} already defined on line {}", previous.line)
            }
            CompileErrorKind::UnresolvedGoto(name) => {
                write!(f, "no visible label {name} for goto")
            }
            CompileErrorKind::CodeTooLarge(size) => {
                write!(f, "function too large ({size} bytes of code)")
            }
            CompileErrorKind::FieldOverflow(what, n) => write!(f, "too many {what} ({n})"),
            CompileErrorKind::VarargOutsideVararg => {
                write!(f, "cannot use '...' outside a vararg function")
            }
            CompileErrorKind::InvalidAssignTarget => write!(f, "cannot assign to this expression"),
            CompileErrorKind::NotAStatement => write!(f, "expression is not a statement"),
        }
    }
}

/// Compiler error.
#[derive(Clone, Debug, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: SourceSpan,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, span: SourceSpan) -> Self {
        CompileError { kind, span }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.kind)
    }
}

impl std::error::Error for CompileError {}

/// State for a single function being lowered.
struct FuncState {
    ir: FunctionIr,
    scope: ScopeManager,
    /// (variable in the enclosing function, local alias), in upvalue order.
    captured: Vec<(VarId, VarId)>,
    children: Vec<Arc<FunctionProto>>,
    num_params: u16,
    is_vararg: bool,
    name: String,
    span: SourceSpan,
}

impl FuncState {
    fn new(name: String, is_vararg: bool, span: SourceSpan) -> Self {
        let mut scope = ScopeManager::new();
        scope.push_scope();
        FuncState {
            ir: FunctionIr::new(),
            scope,
            captured: Vec::new(),
            children: Vec::new(),
            num_params: 0,
            is_vararg,
            name,
            span,
        }
    }

    fn assemble(self) -> Result<FunctionProto, CompileError> {
        let upvalues = self
            .captured
            .iter()
            .map(|(_, var)| UpvalueDesc {
                name: self.ir.var(*var).name,
            })
            .collect();
        let header = ProtoHeader {
            name: self.name,
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            upvalues,
            protos: self.children,
            span: self.span,
        };
        assemble(&self.ir, header)
    }
}

pub struct Compiler<'l, L: Literals> {
    literals: &'l mut L,
    func_stack: Vec<FuncState>,
}

impl<'l, L: Literals> Compiler<'l, L> {
    fn new(literals: &'l mut L) -> Self {
        Compiler {
            literals,
            func_stack: Vec::new(),
        }
    }

    fn fs(&self) -> &FuncState {
        self.func_stack.last().expect("no active function")
    }

    fn fs_mut(&mut self) -> &mut FuncState {
        self.func_stack.last_mut().expect("no active function")
    }

    fn ir(&mut self) -> &mut FunctionIr {
        &mut self.fs_mut().ir
    }

    // ---- functions ----

    /// Lower the main chunk, leaving its state closed but unassembled.
    fn main(&mut self, chunk: &Chunk, name: &str) -> Result<FuncState, CompileError> {
        self.func_stack
            .push(FuncState::new(name.to_string(), true, SourceSpan::UNAVAILABLE));
        self.block(&chunk.body)?;
        self.close_function(SourceSpan::UNAVAILABLE)
    }

    /// Emit the implicit return, close the function scope and pop its state.
    fn close_function(&mut self, end: SourceSpan) -> Result<FuncState, CompileError> {
        if !self.ir().is_terminated() {
            self.emit(Instruction::ReturnNil, end);
        }
        self.fs_mut().scope.pop_scope()?;
        Ok(self.func_stack.pop().expect("no active function"))
    }

    /// Lower a nested function and emit the closure creating it.
    fn function(
        &mut self,
        body: &FunctionBody,
        name: String,
        is_method: bool,
    ) -> Result<InstrId, CompileError> {
        self.func_stack
            .push(FuncState::new(name, body.is_vararg, body.span));
        let params = is_method
            .then_some("self")
            .into_iter()
            .chain(body.params.iter().map(String::as_str));
        let mut count = 0usize;
        for (index, param) in params.enumerate() {
            let arg = self.emit(Instruction::Argument { index: index as u16 }, body.span);
            let var = self.declare_var(param);
            self.emit(
                Instruction::Store {
                    var,
                    value: arg.into(),
                    declare: true,
                },
                body.span,
            );
            count += 1;
        }
        if count > u16::MAX as usize {
            return Err(CompileError::new(
                CompileErrorKind::FieldOverflow("parameters", count),
                body.span,
            ));
        }
        self.fs_mut().num_params = count as u16;
        self.block(&body.body)?;

        let fs = self.close_function(body.span)?;
        let captures: Vec<VarId> = fs.captured.iter().map(|(src, _)| *src).collect();
        let proto = fs.assemble()?;
        let parent = self.fs_mut();
        let child = parent.children.len();
        if child >= u16::MAX as usize {
            return Err(CompileError::new(
                CompileErrorKind::FieldOverflow("nested functions", child + 1),
                body.span,
            ));
        }
        parent.children.push(Arc::new(proto));
        Ok(self.emit(
            Instruction::Closure {
                child: child as u16,
                captures,
            },
            body.span,
        ))
    }

    /// New local variable, visible from now on.
    fn declare_var(&mut self, name: &str) -> VarId {
        let id = self.intern(name);
        let fs = self.fs_mut();
        let var = fs.ir.new_var(id, VarKind::Local, false);
        fs.scope.declare_local(id, var);
        var
    }

    fn hidden_var(&mut self, name: &str) -> VarId {
        let id = self.intern(name);
        self.ir().new_var(id, VarKind::Local, true)
    }

    // ---- statements ----

    fn block(&mut self, stats: &Block) -> Result<(), CompileError> {
        for stat in stats {
            self.stat(stat)?;
        }
        Ok(())
    }

    fn scoped_block(&mut self, stats: &Block) -> Result<(), CompileError> {
        self.fs_mut().scope.push_scope();
        self.block(stats)?;
        self.fs_mut().scope.pop_scope()
    }

    /// Lower code that can never run into a block nothing branches to. It is
    /// still resolved and checked like live code.
    pub(crate) fn lower_unreachable<T>(
        &mut self,
        span: SourceSpan,
        lower: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        let skip = self.ir().new_block();
        if !self.ir().is_terminated() {
            self.emit(Instruction::Jump(skip), span);
        }
        let out = lower(self)?;
        self.ir().append_block(skip);
        Ok(out)
    }

    fn stat(&mut self, stat: &Stat) -> Result<(), CompileError> {
        let span = stat.span;
        match &stat.kind {
            StatKind::Empty => Ok(()),
            StatKind::Assign { targets, values } => self.stat_assign(targets, values, span),
            StatKind::Call(call) => match call.kind {
                ExprKind::Call { .. } | ExprKind::MethodCall { .. } => {
                    self.call(call, ResultCount::Fixed(0))?;
                    Ok(())
                }
                _ => Err(CompileError::new(CompileErrorKind::NotAStatement, call.span)),
            },
            StatKind::Label(name) => {
                let id = self.intern(name);
                let fs = self.fs_mut();
                fs.scope.declare_label(&mut fs.ir, id, span)?;
                Ok(())
            }
            StatKind::Break => {
                let target = self.fs().scope.break_target(span)?;
                self.emit(Instruction::Jump(target), span);
                Ok(())
            }
            StatKind::Goto(name) => {
                let label = self.intern(name);
                let goto = self.emit(Instruction::Goto { label }, span);
                let fs = self.fs_mut();
                fs.scope.resolve_goto(&mut fs.ir, goto, label, span);
                Ok(())
            }
            StatKind::Do(body) => self.scoped_block(body),
            StatKind::While { cond, body } => self.stat_while(cond, body, span),
            StatKind::Repeat { body, cond } => self.stat_repeat(body, cond, span),
            StatKind::If {
                clauses,
                else_block,
            } => self.stat_if(clauses, else_block.as_ref(), span),
            StatKind::NumericFor {
                var,
                start,
                stop,
                step,
                body,
            } => self.stat_numeric_for(var, start, stop, step.as_ref(), body, span),
            StatKind::GenericFor { names, exprs, body } => {
                self.stat_generic_for(names, exprs, body, span)
            }
            StatKind::Function { name, body } => self.stat_function(name, body, span),
            StatKind::LocalFunction { name, body } => {
                let var = self.declare_var(name);
                self.emit(
                    Instruction::Store {
                        var,
                        value: Operand::Constant(Constant::Nil),
                        declare: true,
                    },
                    span,
                );
                let closure = self.function(body, name.clone(), false)?;
                self.emit(
                    Instruction::Store {
                        var,
                        value: closure.into(),
                        declare: false,
                    },
                    span,
                );
                Ok(())
            }
            StatKind::Local { names, values } => {
                // Values are evaluated before the new names come into scope.
                let values = self.expr_list_adjusted(values, names.len())?;
                let vars: Vec<VarId> = names
                    .iter()
                    .map(|n| {
                        let id = self.intern(n);
                        self.ir().new_var(id, VarKind::Local, false)
                    })
                    .collect();
                for (var, value) in vars.iter().zip(values) {
                    self.emit(
                        Instruction::Store {
                            var: *var,
                            value,
                            declare: true,
                        },
                        span,
                    );
                }
                for (name, var) in names.iter().zip(vars) {
                    let id = self.intern(name);
                    self.fs_mut().scope.declare_local(id, var);
                }
                Ok(())
            }
            StatKind::Return(values) => self.stat_return(values, span),
        }
    }

    fn stat_assign(
        &mut self,
        targets: &[Expr],
        values: &[Expr],
        span: SourceSpan,
    ) -> Result<(), CompileError> {
        let places = targets
            .iter()
            .map(|t| self.place(t))
            .collect::<Result<Vec<Place>, _>>()?;
        let values = self.expr_list_adjusted(values, places.len())?;
        for (place, value) in places.into_iter().zip(values) {
            self.store(place, value, span);
        }
        Ok(())
    }

    fn stat_function(
        &mut self,
        name: &FuncName,
        body: &FunctionBody,
        span: SourceSpan,
    ) -> Result<(), CompileError> {
        let mut display = name.path.join(".");
        if let Some(m) = &name.method {
            display.push(':');
            display.push_str(m);
        }
        let is_method = name.method.is_some();
        let (first, rest) = name.path.split_first().expect("function name without a path");
        let place = if rest.is_empty() && !is_method {
            match self.resolve_name(first) {
                NameRef::Var(var) => Place::Var(var),
                NameRef::Global(id) => Place::Global(id),
            }
        } else {
            let mut object: Operand = match self.resolve_name(first) {
                NameRef::Var(var) => self.emit(Instruction::Load(var), span).into(),
                NameRef::Global(id) => self.emit(Instruction::LoadGlobal(id), span).into(),
            };
            let mut keys: Vec<&String> = rest.iter().collect();
            if let Some(m) = &name.method {
                keys.push(m);
            }
            let (last, middle) = keys.split_last().expect("checked above");
            for key in middle {
                let key = Operand::Constant(Constant::String(self.intern(key)));
                object = self.emit(Instruction::Index { object, key }, span).into();
            }
            let key = Operand::Constant(Constant::String(self.intern(last)));
            Place::Index { object, key }
        };
        let closure = self.function(body, display, is_method)?;
        self.store(place, closure.into(), span);
        Ok(())
    }

    fn stat_return(&mut self, values: &[Expr], span: SourceSpan) -> Result<(), CompileError> {
        match values {
            [] => {
                self.emit(Instruction::ReturnNil, span);
            }
            [single] if matches!(single.kind, ExprKind::Call { .. } | ExprKind::MethodCall { .. }) => {
                let (callee, args, spread) = self.call_parts(single)?;
                self.emit(
                    Instruction::TailCall {
                        callee,
                        args,
                        spread,
                    },
                    span,
                );
            }
            [single] => match self.expr_multi(single)? {
                MultiValue::Single(op) => {
                    self.emit(Instruction::ReturnSingle(op), span);
                }
                MultiValue::Spread(id) => {
                    self.emit(
                        Instruction::ReturnMulti {
                            values: Vec::new(),
                            spread: Some(id),
                        },
                        span,
                    );
                }
            },
            _ => {
                let (values, spread) = self.expr_list(values)?;
                self.emit(Instruction::ReturnMulti { values, spread }, span);
            }
        }
        Ok(())
    }

    fn stat_if(
        &mut self,
        clauses: &[(Expr, Block)],
        else_block: Option<&Block>,
        span: SourceSpan,
    ) -> Result<(), CompileError> {
        let end = self.ir().new_block();
        let mut taken = false;
        for (i, (cond, body)) in clauses.iter().enumerate() {
            let cond = self.expr(cond)?;
            match cond.as_constant() {
                Some(c) if c.is_falsy() => {
                    if !body.is_empty() {
                        self.lower_unreachable(span, |this| this.scoped_block(body))?;
                    }
                    continue;
                }
                Some(_) => {
                    // Always taken: later clauses never run.
                    self.scoped_block(body)?;
                    let rest = &clauses[i + 1..];
                    if !rest.is_empty() || else_block.is_some() {
                        self.lower_unreachable(span, |this| {
                            for (cond, body) in rest {
                                this.expr(cond)?;
                                this.scoped_block(body)?;
                            }
                            else_block.map_or(Ok(()), |body| this.scoped_block(body))
                        })?;
                    }
                    taken = true;
                    break;
                }
                None => {}
            }
            let last = i + 1 == clauses.len() && else_block.is_none();
            let alt = if last { end } else { self.ir().new_block() };
            self.emit(
                Instruction::BranchIf {
                    cond,
                    else_block: alt,
                },
                span,
            );
            self.scoped_block(body)?;
            if !last {
                self.emit(Instruction::Jump(end), span);
                self.ir().append_block(alt);
            }
        }
        if !taken {
            if let Some(body) = else_block {
                self.scoped_block(body)?;
            }
        }
        self.ir().append_block(end);
        Ok(())
    }

    fn stat_while(&mut self, cond: &Expr, body: &Block, span: SourceSpan) -> Result<(), CompileError> {
        let head = self.ir().new_block();
        self.ir().append_block(head);
        let exit = self.ir().new_block();
        let cond = self.expr(cond)?;
        match cond.as_constant() {
            Some(c) if c.is_falsy() => {
                self.emit(Instruction::Jump(exit), span);
            }
            Some(_) => {}
            None => {
                self.emit(Instruction::BranchWhile { cond, exit }, span);
            }
        }
        self.fs_mut().scope.enter_loop(exit);
        self.scoped_block(body)?;
        self.fs_mut().scope.exit_loop();
        self.emit(Instruction::Jump(head), span);
        self.ir().append_block(exit);
        Ok(())
    }

    fn stat_repeat(&mut self, body: &Block, cond: &Expr, span: SourceSpan) -> Result<(), CompileError> {
        let head = self.ir().new_block();
        self.ir().append_block(head);
        let exit = self.ir().new_block();
        self.fs_mut().scope.enter_loop(exit);
        // The condition sees the body's locals.
        self.fs_mut().scope.push_scope();
        self.block(body)?;
        let cond = self.expr(cond)?;
        match cond.as_constant() {
            Some(c) if c.is_falsy() => {
                self.emit(Instruction::Jump(head), span);
            }
            Some(_) => {}
            None => {
                self.emit(
                    Instruction::BranchRepeat {
                        cond,
                        loop_head: head,
                    },
                    span,
                );
            }
        }
        self.fs_mut().scope.pop_scope()?;
        self.fs_mut().scope.exit_loop();
        self.ir().append_block(exit);
        Ok(())
    }

    fn stat_numeric_for(
        &mut self,
        var: &str,
        start: &Expr,
        stop: &Expr,
        step: Option<&Expr>,
        body: &Block,
        span: SourceSpan,
    ) -> Result<(), CompileError> {
        let start = self.expr(start)?;
        let stop = self.expr(stop)?;
        let step = match step {
            Some(e) => self.expr(e)?,
            None => Operand::Constant(Constant::Integer(1)),
        };
        self.fs_mut().scope.push_scope();
        let index = self.hidden_var("(for index)");
        let limit = self.hidden_var("(for limit)");
        let step_var = self.hidden_var("(for step)");
        let enter = self.emit(
            Instruction::ForPrep {
                start,
                stop,
                step,
                index,
                limit,
                step_var,
            },
            span,
        );
        let exit = self.ir().new_block();
        self.emit(
            Instruction::BranchWhile {
                cond: enter.into(),
                exit,
            },
            span,
        );
        let body_head = self.ir().new_block();
        self.ir().append_block(body_head);

        self.fs_mut().scope.enter_loop(exit);
        self.fs_mut().scope.push_scope();
        let current = self.emit(Instruction::Load(index), span);
        let v = self.declare_var(var);
        self.emit(
            Instruction::Store {
                var: v,
                value: current.into(),
                declare: true,
            },
            span,
        );
        self.block(body)?;
        self.fs_mut().scope.pop_scope()?;
        self.fs_mut().scope.exit_loop();

        let done = self.emit(
            Instruction::ForStep {
                index,
                limit,
                step: step_var,
            },
            span,
        );
        self.emit(
            Instruction::BranchRepeat {
                cond: done.into(),
                loop_head: body_head,
            },
            span,
        );
        self.fs_mut().scope.pop_scope()?;
        self.ir().append_block(exit);
        Ok(())
    }

    fn stat_generic_for(
        &mut self,
        names: &[String],
        exprs: &[Expr],
        body: &Block,
        span: SourceSpan,
    ) -> Result<(), CompileError> {
        let init = self.expr_list_adjusted(exprs, 3)?;
        self.fs_mut().scope.push_scope();
        let state: Vec<VarId> = ["(for generator)", "(for state)", "(for control)"]
            .iter()
            .map(|n| self.hidden_var(n))
            .collect();
        for (var, value) in state.iter().zip(init) {
            self.emit(
                Instruction::Store {
                    var: *var,
                    value,
                    declare: true,
                },
                span,
            );
        }
        let (generator, invariant, control) = (state[0], state[1], state[2]);

        let exit = self.ir().new_block();
        let head = self.ir().new_block();
        self.ir().append_block(head);
        let n = names.len().max(1);
        if n > u16::MAX as usize {
            return Err(CompileError::new(
                CompileErrorKind::FieldOverflow("loop variables", n),
                span,
            ));
        }
        let callee = self.emit(Instruction::Load(generator), span);
        let s = self.emit(Instruction::Load(invariant), span);
        let c = self.emit(Instruction::Load(control), span);
        let call = self.emit(
            Instruction::Call {
                callee: callee.into(),
                args: vec![s.into(), c.into()],
                spread: None,
                results: ResultCount::Fixed(n as u16),
            },
            span,
        );
        let first = if n == 1 {
            call
        } else {
            self.emit(
                Instruction::Select {
                    source: call,
                    index: 0,
                },
                span,
            )
        };
        self.emit(
            Instruction::Store {
                var: control,
                value: first.into(),
                declare: false,
            },
            span,
        );
        let cond = self.emit(
            Instruction::Binary {
                op: BinOp::Ne,
                lhs: first.into(),
                rhs: Operand::Constant(Constant::Nil),
            },
            span,
        );
        self.emit(
            Instruction::BranchWhile {
                cond: cond.into(),
                exit,
            },
            span,
        );

        self.fs_mut().scope.enter_loop(exit);
        self.fs_mut().scope.push_scope();
        for (i, name) in names.iter().enumerate() {
            let value = if i == 0 {
                first
            } else {
                self.emit(
                    Instruction::Select {
                        source: call,
                        index: i as u16,
                    },
                    span,
                )
            };
            let var = self.declare_var(name);
            self.emit(
                Instruction::Store {
                    var,
                    value: value.into(),
                    declare: true,
                },
                span,
            );
        }
        self.block(body)?;
        self.fs_mut().scope.pop_scope()?;
        self.fs_mut().scope.exit_loop();
        self.emit(Instruction::Jump(head), span);
        self.fs_mut().scope.pop_scope()?;
        self.ir().append_block(exit);
        Ok(())
    }
}

/// Compile a chunk into its main function prototype.
pub fn compile(
    chunk: &Chunk,
    name: &str,
    strings: &mut StringInterner,
) -> Result<FunctionProto, CompileError> {
    let mut literals = Materializer::new(strings);
    compile_with(chunk, name, &mut literals)
}

/// Compile with a caller-supplied literal materializer.
pub fn compile_with<L: Literals>(
    chunk: &Chunk,
    name: &str,
    literals: &mut L,
) -> Result<FunctionProto, CompileError> {
    debug!(chunk = name, statements = chunk.body.len(), "compiling chunk");
    let mut compiler = Compiler::new(literals);
    let main = compiler.main(chunk, name)?;
    main.assemble()
}

/// Lower a chunk and return the CFG of its main function without assembling it.
pub fn lower(chunk: &Chunk, strings: &mut StringInterner) -> Result<FunctionIr, CompileError> {
    let mut literals = Materializer::new(strings);
    let mut compiler = Compiler::new(&mut literals);
    Ok(compiler.main(chunk, "main")?.ir)
}
