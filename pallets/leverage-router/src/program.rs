//! Action programs: an arena of nodes linked by forward `next` indices.
//!
//! The head is node 0 and every link must point to a later node, so a valid program is a
//! simple path and walking it always terminates. Every node must be on that path.

use crate::types::{Action, ActionNode};
use alloc::{collections::VecDeque, vec::Vec};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgramError {
  /// `next` points outside the arena
  DanglingLink,
  /// `next` points to the node itself or an earlier one
  BackwardLink,
  /// Some node is not reachable from the head
  Unreachable,
}

/// Walk the arena from its head and produce the actions in execution order
pub fn into_chain<AccountId: Clone>(
  nodes: &[ActionNode<AccountId>],
) -> Result<VecDeque<Action<AccountId>>, ProgramError> {
  let mut chain = VecDeque::with_capacity(nodes.len());
  if nodes.is_empty() {
    return Ok(chain);
  }

  let mut cursor = Some(0u32);
  while let Some(index) = cursor {
    let node = nodes
      .get(index as usize)
      .ok_or(ProgramError::DanglingLink)?;
    if let Some(next) = node.next {
      if next <= index {
        return Err(ProgramError::BackwardLink);
      }
    }
    chain.push_back(node.action.clone());
    cursor = node.next;
  }

  if chain.len() != nodes.len() {
    return Err(ProgramError::Unreachable);
  }
  Ok(chain)
}

/// Link `actions` one after another
pub fn linear<AccountId>(actions: Vec<Action<AccountId>>) -> Vec<ActionNode<AccountId>> {
  let len = actions.len() as u32;
  actions
    .into_iter()
    .enumerate()
    .map(|(i, action)| {
      let next = (i as u32 + 1 < len).then_some(i as u32 + 1);
      ActionNode { action, next }
    })
    .collect()
}
