//! Execution-group ledger: records the tree of named groups a script runs through and
//! replays a previous run from a checkpoint.
//!
//! - Recording: every [Ledger::start] opens a new group under the innermost open one and
//!   asks the caller to execute it; [Ledger::finish] closes it with a result.
//! - Replay: a ledger built with [Ledger::from_checkpoint] consults the next directive at
//!   the current level on every start. `Skip` re-inserts the recorded node and tells the
//!   caller not to execute; `Again` opens a fresh group whose children are matched
//!   against the directive's children. Once a level runs out of directives it records.
//! - Nested scripts get their own ledger via [Ledger::create_nested], wrapped as an
//!   `is_script` node at the current position; both serialize as one tree.

mod replay;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::JobError;
use crate::types::{GroupNode, RepeatDirective, RepeatMode};
use replay::ReplayLevel;

/// Ledger shared between the site that records into it and the parent that serializes it.
pub type SharedLedger = Arc<Mutex<Ledger>>;

/// Answer to [Ledger::start].
#[derive(Debug, Clone, PartialEq)]
pub enum GroupStart {
  /// Run the group body, then call [Ledger::finish].
  Execute,
  /// Already resolved by a previous run; use `result` instead of running the body.
  Skip { result: Value },
}

impl GroupStart {
  pub fn should_execute(&self) -> bool {
    matches!(self, GroupStart::Execute)
  }

  pub fn cached_result(&self) -> Option<&Value> {
    match self {
      GroupStart::Execute => None,
      GroupStart::Skip { result } => Some(result),
    }
  }
}

#[derive(Debug)]
enum Entry {
  /// Group recorded by this run (open or finished).
  Group(LiveGroup),
  /// Node copied verbatim from a checkpoint because it was skipped.
  Recorded(GroupNode),
  /// Wrapper around the ledger of a nested script.
  Script(NestedScript),
}

#[derive(Debug)]
struct LiveGroup {
  key: String,
  name: Option<String>,
  details: Option<Value>,
  result: Option<Value>,
  children: Vec<Entry>,
}

#[derive(Debug)]
struct NestedScript {
  key: String,
  name: Option<String>,
  ledger: SharedLedger,
}

impl Entry {
  fn snapshot(&self) -> GroupNode {
    match self {
      Entry::Group(group) => GroupNode {
        key: group.key.clone(),
        name: group.name.clone(),
        is_script: false,
        details: group.details.clone(),
        result: group.result.clone(),
        repeat: None,
        children: group.children.iter().map(Entry::snapshot).collect(),
      },
      Entry::Recorded(node) => node.clone(),
      Entry::Script(script) => GroupNode::script(script.key.clone(), script.name.clone())
        .with_children(script.ledger.lock().serialize(false)),
    }
  }
}

/// Fills `repeat` hints top-down: finished nodes skip, open ones run again.
fn annotate(node: &mut GroupNode) {
  node.repeat = Some(if node.is_finished() {
    RepeatMode::Skip
  } else {
    RepeatMode::Again
  });
  for child in &mut node.children {
    annotate(child);
  }
}

/// Tree of execution groups for one script invocation.
#[derive(Debug)]
pub struct Ledger {
  entries: Vec<Entry>,
  /// Child indices from `entries` down to the innermost open group.
  open: Vec<usize>,
  /// One replay level per open group plus the top level.
  replay: Vec<ReplayLevel>,
  used: bool,
}

impl Default for Ledger {
  fn default() -> Self {
    Self::new()
  }
}

impl Ledger {
  /// Fresh ledger in recording mode.
  pub fn new() -> Self {
    Self::from_checkpoint(vec![])
  }

  /// Ledger seeded with a directive tree to replay.
  pub fn from_checkpoint(tree: Vec<RepeatDirective>) -> Self {
    Self {
      entries: vec![],
      open: vec![],
      replay: vec![ReplayLevel::new(tree)],
      used: false,
    }
  }

  pub fn shared(self) -> SharedLedger {
    Arc::new(Mutex::new(self))
  }

  /// Starts group `key`. See [GroupStart] for how to react.
  pub fn start(&mut self, key: &str, name: Option<&str>) -> GroupStart {
    self.start_with_details(key, name, None)
  }

  #[instrument(level = "trace", skip(self, details))]
  pub fn start_with_details(
    &mut self,
    key: &str,
    name: Option<&str>,
    details: Option<Value>,
  ) -> GroupStart {
    self.used = true;
    match self.next_directive(key) {
      Some(directive) if directive.repeat == RepeatMode::Skip => {
        debug!(key, "skipping group recorded by a previous run");
        let result = directive.result.clone().unwrap_or(Value::Null);
        self.open_children().push(Entry::Recorded(directive.to_node()));
        GroupStart::Skip { result }
      }
      directive => {
        let replay_children = directive.map(|d| d.children).unwrap_or_default();
        let siblings = self.open_children();
        siblings.push(Entry::Group(LiveGroup {
          key: key.to_string(),
          name: name.map(str::to_string),
          details,
          result: None,
          children: vec![],
        }));
        let idx = siblings.len() - 1;
        self.open.push(idx);
        self.replay.push(ReplayLevel::new(replay_children));
        GroupStart::Execute
      }
    }
  }

  /// Closes the innermost open group with `result`.
  #[instrument(level = "trace", skip(self, result))]
  pub fn finish(&mut self, result: Value) -> Result<(), JobError> {
    let idx = self.open.pop().ok_or(JobError::LedgerUnderflow)?;
    if let Some(level) = self.replay.pop().filter(|l| l.remaining() > 0) {
      warn!(
        unused = level.remaining(),
        "group finished before all recorded children were replayed"
      );
    }
    if let Some(Entry::Group(group)) = self.open_children().get_mut(idx) {
      group.result = Some(result);
    }
    Ok(())
  }

  /// Creates the ledger of a nested script invocation and inserts it, wrapped as an
  /// `is_script` node, at the current position.
  #[instrument(level = "trace", skip(self))]
  pub fn create_nested(&mut self, key: &str, name: Option<&str>) -> SharedLedger {
    let nested = match self.next_directive(key) {
      Some(directive) if directive.is_script => Ledger::from_checkpoint(directive.children),
      Some(directive) => {
        warn!(
          key,
          recorded = %directive.key,
          "checkpoint recorded a group where a nested script runs now; recording it fresh"
        );
        Ledger::new()
      }
      None => Ledger::new(),
    }
    .shared();
    self.open_children().push(Entry::Script(NestedScript {
      key: key.to_string(),
      name: name.map(str::to_string),
      ledger: nested.clone(),
    }));
    nested
  }

  /// Deep, independent copy of the whole tree, nested ledgers included. With
  /// `include_repeat_metadata` every node carries the `repeat` hint a resume would use.
  pub fn serialize(&self, include_repeat_metadata: bool) -> Vec<GroupNode> {
    let mut nodes: Vec<GroupNode> = self.entries.iter().map(Entry::snapshot).collect();
    if include_repeat_metadata {
      nodes.iter_mut().for_each(annotate);
    }
    nodes
  }

  /// Results in post-order, `Value::Null` for groups still open. `None` when no group
  /// was ever started here or in a nested script.
  pub fn create_flat_results(&self) -> Option<Vec<Value>> {
    if !self.is_used() {
      return None;
    }
    let mut out = vec![];
    for node in self.serialize(false) {
      node.flatten_into(&mut out);
    }
    Some(out)
  }

  /// True once any group was started in this ledger or a nested one.
  pub fn is_used(&self) -> bool {
    self.used
      || self.entries.iter().any(|e| match e {
        Entry::Script(script) => script.ledger.lock().is_used(),
        Entry::Group(_) | Entry::Recorded(_) => false,
      })
  }

  /// Number of currently open groups.
  pub fn open_depth(&self) -> usize {
    self.open.len()
  }

  fn next_directive(&mut self, key: &str) -> Option<RepeatDirective> {
    let directive = self.replay.last_mut()?.next()?;
    if directive.key != key {
      warn!(
        key,
        recorded = %directive.key,
        "replay key differs from checkpoint, matching by call order"
      );
    }
    Some(directive)
  }

  fn open_children(&mut self) -> &mut Vec<Entry> {
    let mut children = &mut self.entries;
    for &idx in &self.open {
      children = match children.get_mut(idx) {
        Some(Entry::Group(group)) => &mut group.children,
        _ => unreachable!("open stack only points at live groups"),
      };
    }
    children
  }
}
