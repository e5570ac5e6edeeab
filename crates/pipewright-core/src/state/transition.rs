//! The explicit transition table.
//!
//! Only the (from, to, source) triples accepted by [`is_legal`] may be
//! applied. Terminal statuses are sticky; the few corrections allowed out of
//! them (intervention wait, mark-success) are single extra transitions
//! raised by an adviser or an interrupt.

use std::fmt;

use pipewright_types::interrupt::InterruptType;
use pipewright_types::status::Status;

/// Who is proposing a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionSource {
    /// The engine's own driving logic (start, dispatch, skip, cleanup).
    Engine,
    /// A synchronous step result, or `on_status_event` from outside.
    Step,
    /// A correlated response resumed the step.
    Response,
    /// The timeout tracker.
    Timeout,
    /// A decision applied by the advising engine.
    Adviser,
    Interrupt(InterruptType),
}

impl fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionSource::Engine => f.write_str("engine"),
            TransitionSource::Step => f.write_str("step"),
            TransitionSource::Response => f.write_str("response"),
            TransitionSource::Timeout => f.write_str("timeout"),
            TransitionSource::Adviser => f.write_str("adviser"),
            TransitionSource::Interrupt(t) => write!(f, "interrupt:{t}"),
        }
    }
}

/// Whether `source` may move a node from `from` to `to`.
pub fn is_legal(from: Status, to: Status, source: TransitionSource) -> bool {
    use Status::*;
    use TransitionSource as Src;

    let interrupt = |t: InterruptType| source == Src::Interrupt(t);
    let abort = interrupt(InterruptType::Abort) || source == Src::Engine;
    let outcome = matches!(source, Src::Step | Src::Response | Src::Engine);

    if from == to {
        return false;
    }

    match (from, to) {
        // Corrections out of failure states.
        (Failed | Errored | Expired, InterventionWaiting) => source == Src::Adviser,
        (Failed | Errored | Expired, Succeeded) => {
            source == Src::Adviser || interrupt(InterruptType::MarkSuccess)
        }
        (Errored, Failed) => {
            interrupt(InterruptType::MarkFailed) || interrupt(InterruptType::Ignore)
        }
        (Errored, Aborted) => abort,

        // Resolving a manual intervention.
        (InterventionWaiting, Succeeded) => interrupt(InterruptType::MarkSuccess),
        (InterventionWaiting, Failed) => {
            interrupt(InterruptType::MarkFailed)
                || interrupt(InterruptType::Ignore)
                || interrupt(InterruptType::Retry)
        }
        (InterventionWaiting, Aborted) => abort || source == Src::Timeout,

        (from, _) if from.is_terminal() => false,

        (Queued, Running | Skipped) => source == Src::Engine,
        // Start-time configuration failure.
        (Queued, Failed) => source == Src::Engine,
        (Queued, Paused) => interrupt(InterruptType::Pause) || source == Src::Engine,

        (Running, Succeeded | Failed | Errored | Skipped) => outcome,
        (Running, AsyncWaiting | TaskWaiting) => source == Src::Engine,
        (Running, Paused) => interrupt(InterruptType::Pause),

        (AsyncWaiting | TaskWaiting, Succeeded | Failed | Errored) => outcome,
        (AsyncWaiting | TaskWaiting, Running) => source == Src::Engine,
        (AsyncWaiting | TaskWaiting, Paused) => interrupt(InterruptType::Pause),

        (Paused, Queued | Running | AsyncWaiting | TaskWaiting) => {
            interrupt(InterruptType::Resume)
        }

        (Queued | Running | AsyncWaiting | TaskWaiting | Paused, Aborted) => abort,
        (Queued | Running | AsyncWaiting | TaskWaiting | Paused, Expired) => {
            source == Src::Timeout
        }

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCES: [TransitionSource; 12] = [
        TransitionSource::Engine,
        TransitionSource::Step,
        TransitionSource::Response,
        TransitionSource::Timeout,
        TransitionSource::Adviser,
        TransitionSource::Interrupt(InterruptType::Abort),
        TransitionSource::Interrupt(InterruptType::Pause),
        TransitionSource::Interrupt(InterruptType::Resume),
        TransitionSource::Interrupt(InterruptType::Retry),
        TransitionSource::Interrupt(InterruptType::MarkSuccess),
        TransitionSource::Interrupt(InterruptType::MarkFailed),
        TransitionSource::Interrupt(InterruptType::Ignore),
    ];

    #[test]
    fn test_happy_path_edges() {
        use Status::*;
        assert!(is_legal(Queued, Running, TransitionSource::Engine));
        for to in [Succeeded, Failed, Errored] {
            assert!(is_legal(Running, to, TransitionSource::Step));
        }
        assert!(is_legal(Running, TaskWaiting, TransitionSource::Engine));
        assert!(is_legal(TaskWaiting, Succeeded, TransitionSource::Response));
        assert!(is_legal(AsyncWaiting, Expired, TransitionSource::Timeout));
    }

    #[test]
    fn test_terminal_states_are_sticky_for_ordinary_sources() {
        let ordinary = [
            TransitionSource::Engine,
            TransitionSource::Step,
            TransitionSource::Response,
            TransitionSource::Timeout,
            TransitionSource::Interrupt(InterruptType::Abort),
            TransitionSource::Interrupt(InterruptType::Pause),
            TransitionSource::Interrupt(InterruptType::Resume),
        ];
        for from in Status::ALL.into_iter().filter(Status::is_terminal) {
            for to in Status::ALL {
                for source in ordinary {
                    assert!(
                        !is_legal(from, to, source),
                        "{from} -> {to} via {source} must be rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn test_abort_and_expire_from_every_active_state() {
        for from in [
            Status::Queued,
            Status::Running,
            Status::AsyncWaiting,
            Status::TaskWaiting,
            Status::Paused,
        ] {
            assert!(is_legal(from, Status::Aborted, TransitionSource::Interrupt(InterruptType::Abort)));
            assert!(is_legal(from, Status::Expired, TransitionSource::Timeout));
            assert!(!is_legal(from, Status::Expired, TransitionSource::Response));
        }
    }

    #[test]
    fn test_corrections_need_the_right_source() {
        assert!(is_legal(
            Status::Failed,
            Status::Succeeded,
            TransitionSource::Interrupt(InterruptType::MarkSuccess)
        ));
        assert!(!is_legal(Status::Failed, Status::Succeeded, TransitionSource::Step));
        assert!(is_legal(Status::Failed, Status::InterventionWaiting, TransitionSource::Adviser));
        assert!(!is_legal(
            Status::Succeeded,
            Status::InterventionWaiting,
            TransitionSource::Adviser
        ));
        assert!(!is_legal(
            Status::Aborted,
            Status::Succeeded,
            TransitionSource::Interrupt(InterruptType::MarkSuccess)
        ));
    }

    #[test]
    fn test_resume_only_from_paused() {
        let resume = TransitionSource::Interrupt(InterruptType::Resume);
        assert!(is_legal(Status::Paused, Status::TaskWaiting, resume));
        for from in Status::ALL.into_iter().filter(|s| *s != Status::Paused) {
            for to in Status::ALL {
                assert!(!is_legal(from, to, resume), "{from} -> {to} via resume");
            }
        }
    }

    #[test]
    fn test_self_transitions_never_legal() {
        for status in Status::ALL {
            for source in SOURCES {
                assert!(!is_legal(status, status, source));
            }
        }
    }
}
