/// Expression lowering: each expression becomes an operand, with calls and
/// varargs able to deliver several values in last position.
use super::{CompileError, CompileErrorKind, Compiler};
use crate::ast::{BinOp, Expr, ExprKind, SourceSpan, TableField, UnOp};
use crate::ir::{InstrId, Instruction, Operand, VarId};
use crate::literal::Literals;
use crate::proto::Constant;
use crate::unit::ResultCount;
use lunet_core::string::StringId;

/// A possibly multi-valued expression result.
#[derive(Clone, Debug)]
pub enum MultiValue {
    Single(Operand),
    /// Every value of a call or `...`, consumed by the next spread consumer.
    Spread(InstrId),
}

/// What a name refers to.
#[derive(Clone, Copy, Debug)]
pub enum NameRef {
    Var(VarId),
    Global(StringId),
}

/// An assignment target with its subexpressions already evaluated.
#[derive(Clone, Debug)]
pub enum Place {
    Var(VarId),
    Global(StringId),
    Index { object: Operand, key: Operand },
}

const NIL: Operand = Operand::Constant(Constant::Nil);

impl<L: Literals> Compiler<'_, L> {
    pub(crate) fn emit(&mut self, kind: Instruction, span: SourceSpan) -> InstrId {
        self.fs_mut().ir.emit(kind, span)
    }

    pub(crate) fn intern(&mut self, name: &str) -> StringId {
        self.literals.intern(name.as_bytes())
    }

    fn string_constant(&mut self, s: &str) -> Operand {
        Operand::Constant(Constant::String(self.intern(s)))
    }

    /// Lower `expr` to exactly one value.
    pub(crate) fn expr(&mut self, expr: &Expr) -> Result<Operand, CompileError> {
        let span = expr.span;
        Ok(match &expr.kind {
            ExprKind::Literal(lit) => {
                let c = self
                    .literals
                    .materialize(lit)
                    .map_err(|e| CompileError::new(CompileErrorKind::MalformedLiteral(e), span))?;
                Operand::Constant(c)
            }
            ExprKind::VarArgs => self.varargs(ResultCount::Fixed(1), span)?.into(),
            ExprKind::Name(name) => self.load_name(name, span).into(),
            ExprKind::Index { object, key } => {
                let object = self.expr(object)?;
                let key = self.expr(key)?;
                self.emit(Instruction::Index { object, key }, span).into()
            }
            ExprKind::Member { object, name } => {
                let object = self.expr(object)?;
                let key = self.string_constant(name);
                self.emit(Instruction::Index { object, key }, span).into()
            }
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } => {
                self.call(expr, ResultCount::Fixed(1))?.into()
            }
            ExprKind::Table(fields) => self.table(fields, span)?.into(),
            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                if let Some(folded) = fold_unary(*op, &operand) {
                    return Ok(folded);
                }
                self.emit(Instruction::Unary { op: *op, operand }, span).into()
            }
            ExprKind::Binary { op: BinOp::And, lhs, rhs } => self.short_circuit(true, lhs, rhs, span)?,
            ExprKind::Binary { op: BinOp::Or, lhs, rhs } => self.short_circuit(false, lhs, rhs, span)?,
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                self.emit(Instruction::Binary { op: *op, lhs, rhs }, span).into()
            }
            ExprKind::Paren(inner) => self.expr(inner)?,
            ExprKind::Function(body) => self.function(body, "anonymous".to_string(), false)?.into(),
        })
    }

    /// Lower `expr` keeping every value if it is a call or `...`.
    pub(crate) fn expr_multi(&mut self, expr: &Expr) -> Result<MultiValue, CompileError> {
        Ok(match &expr.kind {
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } => {
                MultiValue::Spread(self.call(expr, ResultCount::Spread)?)
            }
            ExprKind::VarArgs => MultiValue::Spread(self.varargs(ResultCount::Spread, expr.span)?),
            _ => MultiValue::Single(self.expr(expr)?),
        })
    }

    /// Lower a list where only the last expression may expand.
    pub(crate) fn expr_list(
        &mut self,
        exprs: &[Expr],
    ) -> Result<(Vec<Operand>, Option<InstrId>), CompileError> {
        let mut values = Vec::with_capacity(exprs.len());
        let Some((last, init)) = exprs.split_last() else {
            return Ok((values, None));
        };
        for e in init {
            values.push(self.expr(e)?);
        }
        match self.expr_multi(last)? {
            MultiValue::Single(op) => {
                values.push(op);
                Ok((values, None))
            }
            MultiValue::Spread(id) => Ok((values, Some(id))),
        }
    }

    /// Lower a list adjusted to exactly `want` values: a trailing call or
    /// `...` fills the remainder, extra expressions are evaluated and
    /// dropped, missing values are nil.
    pub(crate) fn expr_list_adjusted(
        &mut self,
        exprs: &[Expr],
        want: usize,
    ) -> Result<Vec<Operand>, CompileError> {
        let mut values = Vec::with_capacity(want);
        for (i, e) in exprs.iter().enumerate() {
            let last = i + 1 == exprs.len();
            if last && e.is_multi() && want > i {
                let n = want - i;
                let producer = self.multi_fixed(e, n)?;
                if n == 1 {
                    values.push(producer.into());
                } else {
                    for k in 0..n {
                        let sel = self.emit(
                            Instruction::Select {
                                source: producer,
                                index: k as u16,
                            },
                            e.span,
                        );
                        values.push(sel.into());
                    }
                }
            } else if i < want {
                values.push(self.expr(e)?);
            } else if matches!(e.kind, ExprKind::Call { .. } | ExprKind::MethodCall { .. }) {
                self.call(e, ResultCount::Fixed(0))?;
            } else {
                self.expr(e)?;
            }
        }
        values.resize(want, NIL);
        Ok(values)
    }

    fn multi_fixed(&mut self, e: &Expr, n: usize) -> Result<InstrId, CompileError> {
        let results = ResultCount::Fixed(n as u16);
        match e.kind {
            ExprKind::VarArgs => self.varargs(results, e.span),
            _ => self.call(e, results),
        }
    }

    fn varargs(&mut self, results: ResultCount, span: SourceSpan) -> Result<InstrId, CompileError> {
        if !self.fs().is_vararg {
            return Err(CompileError::new(CompileErrorKind::VarargOutsideVararg, span));
        }
        Ok(self.emit(Instruction::VarArgs { results }, span))
    }

    /// Callee, arguments and trailing spread of a call or method call.
    pub(crate) fn call_parts(
        &mut self,
        expr: &Expr,
    ) -> Result<(Operand, Vec<Operand>, Option<InstrId>), CompileError> {
        match &expr.kind {
            ExprKind::Call { callee, args } => {
                let callee = self.expr(callee)?;
                let (args, spread) = self.expr_list(args)?;
                Ok((callee, args, spread))
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => {
                // The receiver is evaluated once and passed as `self`.
                let object = self.expr(receiver)?;
                let key = self.string_constant(method);
                let callee = self.emit(
                    Instruction::Index {
                        object: object.clone(),
                        key,
                    },
                    expr.span,
                );
                let (rest, spread) = self.expr_list(args)?;
                let mut all = Vec::with_capacity(rest.len() + 1);
                all.push(object);
                all.extend(rest);
                Ok((callee.into(), all, spread))
            }
            _ => unreachable!("call_parts on a non-call expression"),
        }
    }

    pub(crate) fn call(&mut self, expr: &Expr, results: ResultCount) -> Result<InstrId, CompileError> {
        let (callee, args, spread) = self.call_parts(expr)?;
        Ok(self.emit(
            Instruction::Call {
                callee,
                args,
                spread,
                results,
            },
            expr.span,
        ))
    }

    fn table(&mut self, fields: &[TableField], span: SourceSpan) -> Result<InstrId, CompileError> {
        let positional = fields
            .iter()
            .filter(|f| matches!(f, TableField::Positional(_)))
            .count();
        let hashed = fields.len() - positional;
        let table = self.emit(
            Instruction::NewTable {
                array_hint: positional.min(u16::MAX as usize) as u16,
                hash_hint: hashed.min(u16::MAX as usize) as u16,
            },
            span,
        );
        let mut values = Vec::with_capacity(positional);
        let mut spread = None;
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(e) => {
                    if i + 1 == fields.len() {
                        match self.expr_multi(e)? {
                            MultiValue::Single(op) => values.push(op),
                            MultiValue::Spread(id) => spread = Some(id),
                        }
                    } else {
                        values.push(self.expr(e)?);
                    }
                }
                TableField::Named(name, e) => {
                    let key = self.string_constant(name);
                    let value = self.expr(e)?;
                    self.emit(
                        Instruction::IndexStore {
                            object: table.into(),
                            key,
                            value,
                        },
                        e.span,
                    );
                }
                TableField::Keyed(k, e) => {
                    let key = self.expr(k)?;
                    let value = self.expr(e)?;
                    self.emit(
                        Instruction::IndexStore {
                            object: table.into(),
                            key,
                            value,
                        },
                        e.span,
                    );
                }
            }
        }
        if !values.is_empty() || spread.is_some() {
            self.emit(
                Instruction::SetList {
                    table: table.into(),
                    values,
                    spread,
                },
                span,
            );
        }
        Ok(table)
    }

    /// `a and b` / `a or b`. The left value flows to the join unless the
    /// right side runs, in which case `Merge` overwrites it.
    fn short_circuit(
        &mut self,
        is_and: bool,
        lhs: &Expr,
        rhs: &Expr,
        span: SourceSpan,
    ) -> Result<Operand, CompileError> {
        let left = self.expr(lhs)?;
        let left_id = match left {
            Operand::Constant(ref c) => {
                // Constant left side decides statically.
                if c.is_falsy() != is_and {
                    return self.expr(rhs);
                }
                self.lower_unreachable(span, |this| this.expr(rhs))?;
                return Ok(left);
            }
            Operand::Instr(id) => id,
        };
        let join = self.fs_mut().ir.new_block();
        let cond = if is_and {
            left.clone()
        } else {
            self.emit(
                Instruction::Unary {
                    op: UnOp::Not,
                    operand: left.clone(),
                },
                span,
            )
            .into()
        };
        self.emit(
            Instruction::BranchIf {
                cond,
                else_block: join,
            },
            span,
        );
        let right = self.expr(rhs)?;
        let merged = self.emit(
            Instruction::Merge {
                first: left_id,
                second: right,
            },
            span,
        );
        self.fs_mut().ir.append_block(join);
        Ok(merged.into())
    }

    /// Resolve `name` through the enclosing functions.
    pub(crate) fn resolve_name(&mut self, name: &str) -> NameRef {
        let id = self.intern(name);
        let level = self.func_stack.len() - 1;
        match self.resolve_in(level, id) {
            Some(var) => NameRef::Var(var),
            None => NameRef::Global(id),
        }
    }

    /// Find `name` as a local of function `level`, or capture it from an
    /// enclosing function, chaining through every level in between.
    fn resolve_in(&mut self, level: usize, name: StringId) -> Option<VarId> {
        if let Some(var) = self.func_stack[level].scope.resolve_local(name) {
            return Some(var);
        }
        if level == 0 {
            return None;
        }
        let source = self.resolve_in(level - 1, name)?;
        let fs = &mut self.func_stack[level];
        if let Some(&(_, var)) = fs.captured.iter().find(|(src, _)| *src == source) {
            return Some(var);
        }
        let upvalue = fs.captured.len() as u16;
        let var = fs.ir.new_var(
            name,
            crate::ir::VarKind::Captured { upvalue, source },
            false,
        );
        fs.captured.push((source, var));
        Some(var)
    }

    fn load_name(&mut self, name: &str, span: SourceSpan) -> InstrId {
        match self.resolve_name(name) {
            NameRef::Var(var) => self.emit(Instruction::Load(var), span),
            NameRef::Global(id) => self.emit(Instruction::LoadGlobal(id), span),
        }
    }

    /// Evaluate the subexpressions of an assignment target.
    pub(crate) fn place(&mut self, target: &Expr) -> Result<Place, CompileError> {
        match &target.kind {
            ExprKind::Name(name) => Ok(match self.resolve_name(name) {
                NameRef::Var(var) => Place::Var(var),
                NameRef::Global(id) => Place::Global(id),
            }),
            ExprKind::Index { object, key } => {
                let object = self.expr(object)?;
                let key = self.expr(key)?;
                Ok(Place::Index { object, key })
            }
            ExprKind::Member { object, name } => {
                let object = self.expr(object)?;
                let key = self.string_constant(name);
                Ok(Place::Index { object, key })
            }
            _ => Err(CompileError::new(
                CompileErrorKind::InvalidAssignTarget,
                target.span,
            )),
        }
    }

    pub(crate) fn store(&mut self, place: Place, value: Operand, span: SourceSpan) {
        let kind = match place {
            Place::Var(var) => Instruction::Store {
                var,
                value,
                declare: false,
            },
            Place::Global(name) => Instruction::StoreGlobal { name, value },
            Place::Index { object, key } => Instruction::IndexStore { object, key, value },
        };
        self.emit(kind, span);
    }
}

fn fold_unary(op: UnOp, operand: &Operand) -> Option<Operand> {
    let c = operand.as_constant()?;
    let folded = match (op, c) {
        (UnOp::Neg, Constant::Integer(i)) => Constant::Integer(i.wrapping_neg()),
        (UnOp::Neg, Constant::Float(f)) => Constant::Float(-f),
        (UnOp::Not, c) => Constant::Boolean(c.is_falsy()),
        _ => return None,
    };
    Some(Operand::Constant(folded))
}
