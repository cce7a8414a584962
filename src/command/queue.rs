//! 命令日志：合并、撤销、重做
//!
//! 命令严格按到达顺序应用。相邻的同种可合并命令折叠为一个日志条目，
//! 一次撤销即可回退整段交互式编辑（例如一笔连续的地形绘制）。
//!
//! # 示例
//!
//! ```ignore
//! let mut queue = CommandQueue::new(100);
//! queue.register(kind, Box::new(MoveHandler))?;
//! queue.apply(&mut state, MOVE_OBJECT, fields)?;
//! queue.undo(&mut state)?;
//! queue.redo(&mut state)?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::handler::{CommandHandler, UndoStrategy};
use crate::core::error::{CommandError, CommandResult, HandlerError};
use crate::protocol::catalog::{Category, MessageKind};
use crate::protocol::value::{Record, ShareableValue};

/// 合并条目中的一步
#[derive(Debug, Clone)]
struct Step {
    fields: Record,
    pre_image: Option<ShareableValue>,
}

/// 命令日志条目
#[derive(Debug, Clone)]
pub struct CommandLogEntry<S> {
    kind: Arc<MessageKind>,
    sequence: u64,
    steps: Vec<Step>,
    snapshot: Option<S>,
}

impl<S> CommandLogEntry<S> {
    pub fn type_id(&self) -> u32 {
        self.kind.type_id
    }

    pub fn name(&self) -> &str {
        &self.kind.name
    }

    /// 第一步应用时分配的序号
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// 可见字段，即最后一步的字段
    pub fn fields(&self) -> &Record {
        // 条目创建时至少有一步
        &self.steps[self.steps.len() - 1].fields
    }

    /// 合并进来的步骤数
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// 应用结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 新增条目
    Appended { sequence: u64 },
    /// 合并进已有条目
    Merged { sequence: u64 },
}

impl ApplyOutcome {
    pub fn sequence(&self) -> u64 {
        match self {
            ApplyOutcome::Appended { sequence } | ApplyOutcome::Merged { sequence } => *sequence,
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, ApplyOutcome::Merged { .. })
    }
}

struct Registered<S> {
    kind: Arc<MessageKind>,
    handler: Box<dyn CommandHandler<S>>,
}

/// 命令队列
///
/// 只由所属一侧的分发线程修改。
pub struct CommandQueue<S> {
    handlers: HashMap<u32, Registered<S>>,
    /// 撤销栈
    undo_stack: VecDeque<CommandLogEntry<S>>,
    /// 重做栈
    redo_stack: Vec<CommandLogEntry<S>>,
    /// 最大历史长度
    max_history: usize,
    next_sequence: u64,
    /// 为真时下一条命令不与栈顶合并
    sealed: bool,
}

impl<S: Clone> CommandQueue<S> {
    pub fn new(max_history: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            undo_stack: VecDeque::with_capacity(max_history.min(1024)),
            redo_stack: Vec::new(),
            max_history,
            next_sequence: 1,
            sealed: false,
        }
    }

    /// 注册命令处理器
    pub fn register(
        &mut self,
        kind: Arc<MessageKind>,
        handler: Box<dyn CommandHandler<S>>,
    ) -> CommandResult<()> {
        if kind.category != Category::Command {
            return Err(CommandError::NotACommand(kind.type_id));
        }
        if self.handlers.contains_key(&kind.type_id) {
            return Err(CommandError::DuplicateHandler(kind.type_id));
        }
        self.handlers
            .insert(kind.type_id, Registered { kind, handler });
        Ok(())
    }

    pub fn has_handler(&self, type_id: u32) -> bool {
        self.handlers.contains_key(&type_id)
    }

    /// 应用命令
    ///
    /// 失败时状态保持不变，撤销历史不受影响。
    pub fn apply(
        &mut self,
        state: &mut S,
        type_id: u32,
        fields: Record,
    ) -> CommandResult<ApplyOutcome> {
        let registered = self
            .handlers
            .get_mut(&type_id)
            .ok_or_else(|| CommandError::ApplyFailed {
                command: format!("type {}", type_id),
                reason: "no handler registered".to_string(),
            })?;
        let kind = Arc::clone(&registered.kind);
        if !fields.matches(&kind.schema) {
            return Err(CommandError::ApplyFailed {
                command: kind.name.clone(),
                reason: format!("fields do not match schema {}", kind.schema.canonical()),
            });
        }

        let merge = !self.sealed
            && kind.is_mergeable()
            && self.undo_stack.back().map_or(false, |top| {
                top.type_id() == type_id && registered.handler.can_merge(top.fields(), &fields)
            });

        let handler = registered.handler.as_mut();
        let (pre_image, before) = run_step(handler, state, &fields)
            .map_err(|e| apply_failed(&kind, e))?;

        self.redo_stack.clear();
        self.sealed = false;
        let step = Step { fields, pre_image };

        let outcome = match self.undo_stack.back_mut() {
            Some(top) if merge => {
                top.steps.push(step);
                ApplyOutcome::Merged {
                    sequence: top.sequence,
                }
            }
            _ => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.undo_stack.push_back(CommandLogEntry {
                    kind: Arc::clone(&kind),
                    sequence,
                    steps: vec![step],
                    snapshot: before,
                });
                // 限制历史长度
                while self.undo_stack.len() > self.max_history {
                    self.undo_stack.pop_front();
                }
                ApplyOutcome::Appended { sequence }
            }
        };

        tracing::trace!(
            target: "bridge.command",
            command = %kind.name,
            sequence = outcome.sequence(),
            merged = outcome.is_merged(),
            "command applied"
        );
        Ok(outcome)
    }

    /// 撤销最近的条目，返回其序号
    pub fn undo(&mut self, state: &mut S) -> CommandResult<u64> {
        let entry = self.undo_stack.pop_back().ok_or(CommandError::NothingToUndo)?;

        if let Some(snapshot) = &entry.snapshot {
            *state = snapshot.clone();
        } else if let Some(registered) = self.handlers.get_mut(&entry.type_id()) {
            for step in entry.steps.iter().rev() {
                if let Some(pre_image) = &step.pre_image {
                    registered.handler.restore(state, pre_image);
                }
            }
        }

        let sequence = entry.sequence;
        tracing::debug!(
            target: "bridge.command",
            command = %entry.name(),
            sequence,
            steps = entry.step_count(),
            "command undone"
        );
        self.redo_stack.push(entry);
        self.sealed = true;
        Ok(sequence)
    }

    /// 重做最近撤销的条目
    ///
    /// 每一步重新捕获前像后再提交；任何一步失败则整体回滚，条目留在重做栈。
    pub fn redo(&mut self, state: &mut S) -> CommandResult<u64> {
        let mut entry = self.redo_stack.pop().ok_or(CommandError::NothingToRedo)?;
        let registered = match self.handlers.get_mut(&entry.type_id()) {
            Some(registered) => registered,
            None => {
                let name = entry.name().to_string();
                self.redo_stack.push(entry);
                return Err(CommandError::ApplyFailed {
                    command: name,
                    reason: "no handler registered".to_string(),
                });
            }
        };
        let handler = registered.handler.as_mut();

        let result = match handler.undo_strategy() {
            UndoStrategy::Snapshot => {
                let before = state.clone();
                let mut failure = None;
                for step in &entry.steps {
                    if let Err(e) = handler.commit(state, &step.fields) {
                        failure = Some(e);
                        break;
                    }
                }
                match failure {
                    Some(e) => {
                        *state = before;
                        Err(e)
                    }
                    None => {
                        entry.snapshot = Some(before);
                        Ok(())
                    }
                }
            }
            UndoStrategy::PreImage => redo_with_pre_images(handler, state, &mut entry.steps),
        };

        if let Err(e) = result {
            let err = apply_failed(&entry.kind, e);
            self.redo_stack.push(entry);
            return Err(err);
        }

        let sequence = entry.sequence;
        self.undo_stack.push_back(entry);
        while self.undo_stack.len() > self.max_history {
            self.undo_stack.pop_front();
        }
        self.sealed = true;
        Ok(sequence)
    }

    /// 结束当前合并段
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn entries(&self) -> impl Iterator<Item = &CommandLogEntry<S>> {
        self.undo_stack.iter()
    }

    pub fn last(&self) -> Option<&CommandLogEntry<S>> {
        self.undo_stack.back()
    }

    pub fn len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo_stack.is_empty()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// 清空历史
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.sealed = false;
    }
}

type StepResult<S> = Result<(Option<ShareableValue>, Option<S>), HandlerError>;

// 运行一步：返回前像（PreImage）或应用前快照（Snapshot）
fn run_step<S: Clone>(
    handler: &mut dyn CommandHandler<S>,
    state: &mut S,
    fields: &Record,
) -> StepResult<S> {
    match handler.undo_strategy() {
        UndoStrategy::PreImage => {
            let pre_image = handler.capture(state, fields)?;
            if let Err(e) = handler.commit(state, fields) {
                handler.restore(state, &pre_image);
                return Err(e);
            }
            Ok((Some(pre_image), None))
        }
        UndoStrategy::Snapshot => {
            let before = state.clone();
            if let Err(e) = handler.commit(state, fields) {
                *state = before;
                return Err(e);
            }
            Ok((None, Some(before)))
        }
    }
}

fn redo_with_pre_images<S>(
    handler: &mut dyn CommandHandler<S>,
    state: &mut S,
    steps: &mut [Step],
) -> Result<(), HandlerError> {
    let mut captured: Vec<ShareableValue> = Vec::with_capacity(steps.len());
    for step in steps.iter() {
        let outcome = handler.capture(state, &step.fields).and_then(|pre_image| {
            match handler.commit(state, &step.fields) {
                Ok(()) => Ok(pre_image),
                Err(e) => {
                    handler.restore(state, &pre_image);
                    Err(e)
                }
            }
        });
        match outcome {
            Ok(pre_image) => captured.push(pre_image),
            Err(e) => {
                for pre_image in captured.iter().rev() {
                    handler.restore(state, pre_image);
                }
                return Err(e);
            }
        }
    }
    for (step, pre_image) in steps.iter_mut().zip(captured) {
        step.pre_image = Some(pre_image);
    }
    Ok(())
}

fn apply_failed(kind: &MessageKind, err: HandlerError) -> CommandError {
    tracing::warn!(
        target: "bridge.command",
        command = %kind.name,
        reason = %err,
        "edit could not be applied"
    );
    CommandError::ApplyFailed {
        command: kind.name.clone(),
        reason: err.0,
    }
}
