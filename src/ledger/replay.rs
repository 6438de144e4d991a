//! Replay cursor over a directive tree.

use crate::types::RepeatDirective;

/// Directives of one ledger level plus the position of the next sibling to consume.
///
/// Siblings are matched by call order, not by key.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReplayLevel {
  directives: Vec<RepeatDirective>,
  cursor: usize,
}

impl ReplayLevel {
  pub(crate) fn new(directives: Vec<RepeatDirective>) -> Self {
    Self {
      directives,
      cursor: 0,
    }
  }

  /// Takes the next directive; `None` once the level is exhausted (recording resumes).
  pub(crate) fn next(&mut self) -> Option<RepeatDirective> {
    let directive = self.directives.get(self.cursor)?.clone();
    self.cursor += 1;
    Some(directive)
  }

  pub(crate) fn remaining(&self) -> usize {
    self.directives.len().saturating_sub(self.cursor)
  }
}
