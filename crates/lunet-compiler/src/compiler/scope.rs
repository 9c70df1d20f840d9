/// Lexical scopes, labels, gotos and loop exits for one function.
use super::{CompileError, CompileErrorKind};
use crate::ast::SourceSpan;
use crate::ir::{BlockId, FunctionIr, InstrId, VarId};
use lunet_core::string::StringId;
use smallvec::SmallVec;
use tracing::trace;

/// A local name bound in a scope.
#[derive(Clone, Copy, Debug)]
pub struct LocalBinding {
    pub name: StringId,
    pub var: VarId,
}

/// A label declared in a scope.
#[derive(Clone, Copy, Debug)]
pub struct LabelInfo {
    pub name: StringId,
    pub block: BlockId,
    pub span: SourceSpan,
}

/// A goto waiting for its label.
#[derive(Clone, Copy, Debug)]
pub struct PendingGoto {
    pub name: StringId,
    pub instr: InstrId,
    pub span: SourceSpan,
}

/// Block scope tracking.
#[derive(Clone, Debug, Default)]
pub struct BlockScope {
    pub locals: SmallVec<[LocalBinding; 1]>,
    pub labels: SmallVec<[LabelInfo; 1]>,
    pub pending_gotos: SmallVec<[PendingGoto; 1]>,
}

/// Scope chain of a single function. The first scope pushed is the
/// function scope; closing it with gotos pending is an error.
#[derive(Debug, Default)]
pub struct ScopeManager {
    pub blocks: Vec<BlockScope>,
    /// Innermost loop exit last.
    pub loop_exits: Vec<BlockId>,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scope(&mut self) {
        self.blocks.push(BlockScope::default());
    }

    /// Close the innermost scope. Unresolved gotos move to the parent, or
    /// fail if this was the function scope.
    pub fn pop_scope(&mut self) -> Result<(), CompileError> {
        let block = self.blocks.pop().expect("mismatched scope");
        match self.blocks.last_mut() {
            Some(parent) => {
                parent.pending_gotos.extend(block.pending_gotos);
                Ok(())
            }
            None => match block.pending_gotos.first() {
                Some(goto) => Err(CompileError::new(
                    CompileErrorKind::UnresolvedGoto(goto.name),
                    goto.span,
                )),
                None => Ok(()),
            },
        }
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn declare_local(&mut self, name: StringId, var: VarId) {
        self.blocks
            .last_mut()
            .expect("no open scope")
            .locals
            .push(LocalBinding { name, var });
    }

    /// Innermost visible binding of `name`. Later declarations shadow earlier ones.
    pub fn resolve_local(&self, name: StringId) -> Option<VarId> {
        self.blocks
            .iter()
            .rev()
            .flat_map(|b| b.locals.iter().rev())
            .find(|l| l.name == name)
            .map(|l| l.var)
    }

    fn find_label(&self, name: StringId) -> Option<&LabelInfo> {
        self.blocks
            .iter()
            .rev()
            .flat_map(|b| b.labels.iter())
            .find(|l| l.name == name)
    }

    /// Open and append the label's target block, then link every goto
    /// pending on `name` in the current scope.
    pub fn declare_label(
        &mut self,
        ir: &mut FunctionIr,
        name: StringId,
        span: SourceSpan,
    ) -> Result<BlockId, CompileError> {
        if let Some(existing) = self.find_label(name) {
            return Err(CompileError::new(
                CompileErrorKind::DuplicateLabel(name, existing.span),
                span,
            ));
        }
        let target = ir.new_block();
        ir.append_block(target);
        let scope = self.blocks.last_mut().expect("no open scope");
        scope.labels.push(LabelInfo {
            name,
            block: target,
            span,
        });
        let mut i = 0;
        while i < scope.pending_gotos.len() {
            if scope.pending_gotos[i].name == name {
                let goto = scope.pending_gotos.remove(i);
                trace!(goto = goto.instr.0, target = target.0, "resolved forward goto");
                ir.link_goto(goto.instr, target);
            } else {
                i += 1;
            }
        }
        Ok(target)
    }

    /// Link `goto` to a visible label, or leave it pending in the current scope.
    pub fn resolve_goto(
        &mut self,
        ir: &mut FunctionIr,
        goto: InstrId,
        name: StringId,
        span: SourceSpan,
    ) {
        if let Some(label) = self.find_label(name) {
            let target = label.block;
            trace!(goto = goto.0, target = target.0, "resolved backward goto");
            ir.link_goto(goto, target);
        } else {
            self.blocks
                .last_mut()
                .expect("no open scope")
                .pending_gotos
                .push(PendingGoto {
                    name,
                    instr: goto,
                    span,
                });
        }
    }

    pub fn enter_loop(&mut self, exit: BlockId) {
        self.loop_exits.push(exit);
    }

    pub fn exit_loop(&mut self) {
        self.loop_exits.pop();
    }

    pub fn break_target(&self, span: SourceSpan) -> Result<BlockId, CompileError> {
        self.loop_exits
            .last()
            .copied()
            .ok_or_else(|| CompileError::new(CompileErrorKind::BreakOutsideLoop, span))
    }
}
