//! Transition rules for a single slot and the case-level guard around them.
//!
//! | current  | upload     | approve  | reject   |
//! |----------|------------|----------|----------|
//! | empty    | uploaded   | -        | -        |
//! | uploaded | uploaded   | approved | rejected |
//! | approved | -          | -        | -        |
//! | rejected | uploaded   | -        | -        |

use std::fmt;

use serde::Serialize;

use super::domain::{CaseStatus, DocumentKind, SlotStatus};

/// Mutation requested against a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotAction {
    Upload,
    Approve,
    Reject,
}

impl SlotAction {
    pub const ALL: [SlotAction; 3] = [SlotAction::Upload, SlotAction::Approve, SlotAction::Reject];

    pub const fn label(self) -> &'static str {
        match self {
            SlotAction::Upload => "upload",
            SlotAction::Approve => "approve",
            SlotAction::Reject => "reject",
        }
    }
}

impl fmt::Display for SlotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The rule a refused transition ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionRule {
    /// Only uploaded slots can be reviewed.
    ReviewRequiresUpload,
    /// Approved slots are locked.
    ApprovedSlotLocked,
    /// The case is approved and closed for changes.
    CaseClosed,
}

impl fmt::Display for TransitionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransitionRule::ReviewRequiresUpload => "only uploaded slots can be reviewed",
            TransitionRule::ApprovedSlotLocked => "approved slots cannot be changed",
            TransitionRule::CaseClosed => "the case is approved and closed",
        };
        f.write_str(text)
    }
}

/// A requested action that is not valid for the slot's current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("cannot {action} {kind} while it is {current}: {rule}")]
pub struct IllegalTransition {
    pub kind: DocumentKind,
    pub current: SlotStatus,
    pub action: SlotAction,
    pub rule: TransitionRule,
}

/// Next slot status for `action`, or the rule that forbids it.
pub fn next_status(current: SlotStatus, action: SlotAction) -> Result<SlotStatus, TransitionRule> {
    use SlotAction::*;
    use SlotStatus::*;

    match (current, action) {
        (Empty | Uploaded | Rejected, Upload) => Ok(SlotStatus::Uploaded),
        (Uploaded, Approve) => Ok(SlotStatus::Approved),
        (Uploaded, Reject) => Ok(SlotStatus::Rejected),
        (Approved, _) => Err(TransitionRule::ApprovedSlotLocked),
        (Empty | Rejected, Approve | Reject) => Err(TransitionRule::ReviewRequiresUpload),
    }
}

/// Apply the case guard and the slot table in one step.
///
/// A rejected case needs no extra rule: all of its slots are terminal, so the table
/// already limits it to re-uploading the rejected ones.
pub fn check(
    case_status: CaseStatus,
    kind: DocumentKind,
    current: SlotStatus,
    action: SlotAction,
) -> Result<SlotStatus, IllegalTransition> {
    let refuse = |rule| IllegalTransition {
        kind,
        current,
        action,
        rule,
    };

    if case_status == CaseStatus::Approved {
        return Err(refuse(TransitionRule::CaseClosed));
    }

    next_status(current, action).map_err(refuse)
}
