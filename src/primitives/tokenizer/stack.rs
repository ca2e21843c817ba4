use std::fmt;

use crate::primitives::grammar::rule::RuleRef;
use crate::primitives::matcher::Matcher;

/// One open region, or the document root at the bottom of the stack
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    /// Rule that opened the region; the grammar's root rule for the bottom frame
    pub rule: RuleRef,
    /// Scopes applied to the begin and end delimiters
    pub name_scopes: Vec<String>,
    /// Scopes applied between the delimiters
    pub content_scopes: Vec<String>,
    /// End or while pattern with begin backreferences already substituted
    pub end: Option<Matcher>,
    /// The begin match ran to the end of the line, so `\G` is live at the
    /// start of the next one
    pub begin_captured_eol: bool,
    /// `\G` position to restore when this frame is popped
    pub anchor_position: Option<usize>,
    /// Where the region was opened on the current line
    pub enter_position: Option<usize>,
}

/// Tokenizer state carried from one line to the next.
///
/// Equal stacks produce equal tokens for equal lines, which is what lets
/// [`crate::primitives::textmate_engine::TextMateEngine`] stop re-tokenizing
/// once an edit's effect has died out. A stack is only meaningful for the
/// registry snapshot that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct StateStack {
    pub(crate) frames: Vec<Frame>,
}

impl StateStack {
    pub(crate) fn new(root: RuleRef, root_scope: &str) -> Self {
        let scopes = vec![root_scope.to_string()];
        Self {
            frames: vec![Frame {
                rule: root,
                name_scopes: scopes.clone(),
                content_scopes: scopes,
                end: None,
                begin_captured_eol: false,
                anchor_position: None,
                enter_position: None,
            }],
        }
    }

    /// Number of open regions, not counting the document root
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Scopes that apply to text at the current position
    pub fn scopes(&self) -> &[String] {
        &self.top().content_scopes
    }

    pub(crate) fn top(&self) -> &Frame {
        // The root frame is never popped
        &self.frames[self.frames.len() - 1]
    }

    pub(crate) fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Pop the innermost region; the root frame stays
    pub(crate) fn pop(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Drop `index` and every frame above it
    pub(crate) fn truncate_at(&mut self, index: usize) {
        self.frames.truncate(index.max(1));
    }

    /// Whether `rule` was already entered at `position` on this line
    pub(crate) fn entered_at(&self, rule: RuleRef, position: usize) -> bool {
        self.frames
            .iter()
            .any(|f| f.rule == rule && f.enter_position == Some(position))
    }

    /// Forget line-relative positions so that states from different lines compare equal
    pub(crate) fn reset_positions(&mut self) {
        for frame in &mut self.frames {
            frame.enter_position = None;
            frame.anchor_position = None;
        }
    }
}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;
        for (depth, frame) in self.frames.iter().enumerate() {
            write!(
                f,
                "{}grammar={} rule={} name=[{}] content=[{}]",
                "  ".repeat(depth),
                frame.rule.grammar.0,
                frame.rule.rule.0,
                frame.name_scopes.join(", "),
                frame.content_scopes.join(", ")
            )?;
            if let Some(end) = &frame.end {
                write!(f, " end={:?}", end.source())?;
            }
            if frame.begin_captured_eol {
                write!(f, " eol")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
