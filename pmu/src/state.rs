use std::fmt;

/// Lifecycle of a single event descriptor.
///
/// `Created -> Armed -> Running -> Stopped -> Read -> Closed`. Counts are
/// only readable once the descriptor has been disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    Created,
    Armed,
    Running,
    Stopped,
    Read,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Reset,
    Enable,
    Disable,
    Read,
    Decode,
    Close,
}

/// What applying an [`Operation`] requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Issue the kernel call, then move to the given state.
    Issue(DescriptorState),
    /// Already in the requested state, nothing to do.
    Noop,
}

impl DescriptorState {
    /// Returns `None` when `op` is not permitted in this state.
    pub fn step(self, op: Operation) -> Option<Step> {
        use DescriptorState::*;

        match (op, self) {
            (Operation::Close, Closed) => Some(Step::Noop),
            (Operation::Close, _) => Some(Step::Issue(Closed)),
            (_, Closed) => None,

            (Operation::Reset, Running) => None,
            (Operation::Reset, _) => Some(Step::Issue(Armed)),

            (Operation::Enable, Armed) => Some(Step::Issue(Running)),
            (Operation::Enable, Running) => Some(Step::Noop),
            (Operation::Enable, _) => None,

            (Operation::Disable, Running) => Some(Step::Issue(Stopped)),
            (Operation::Disable, _) => Some(Step::Noop),

            (Operation::Read, Stopped | Read) => Some(Step::Issue(Read)),
            (Operation::Read, _) => None,

            (Operation::Decode, Stopped | Read) => Some(Step::Noop),
            (Operation::Decode, _) => None,
        }
    }
}

impl fmt::Display for DescriptorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptorState::Created => "created",
            DescriptorState::Armed => "armed",
            DescriptorState::Running => "running",
            DescriptorState::Stopped => "stopped",
            DescriptorState::Read => "read",
            DescriptorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Reset => "reset",
            Operation::Enable => "enable",
            Operation::Disable => "disable",
            Operation::Read => "read",
            Operation::Decode => "decode",
            Operation::Close => "close",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ops: &[Operation]) -> Option<DescriptorState> {
        let mut state = DescriptorState::Created;
        for op in ops {
            if let Step::Issue(next) = state.step(*op)? {
                state = next;
            }
        }
        Some(state)
    }

    #[test]
    fn measured_window_lifecycle() {
        use Operation::*;

        assert_eq!(run(&[Reset]), Some(DescriptorState::Armed));
        assert_eq!(run(&[Reset, Enable]), Some(DescriptorState::Running));
        assert_eq!(
            run(&[Reset, Enable, Disable]),
            Some(DescriptorState::Stopped)
        );
        assert_eq!(
            run(&[Reset, Enable, Disable, Read, Decode]),
            Some(DescriptorState::Read)
        );
    }

    #[test]
    fn transitions_are_idempotent() {
        use Operation::*;

        assert_eq!(DescriptorState::Running.step(Enable), Some(Step::Noop));
        assert_eq!(DescriptorState::Stopped.step(Disable), Some(Step::Noop));
        assert_eq!(DescriptorState::Created.step(Disable), Some(Step::Noop));
        assert_eq!(
            run(&[Reset, Reset, Enable, Enable, Disable, Disable]),
            Some(DescriptorState::Stopped)
        );
        // a stopped counter can be re-armed for another window
        assert_eq!(
            run(&[Reset, Enable, Disable, Read, Reset, Enable]),
            Some(DescriptorState::Running)
        );
    }

    #[test]
    fn reads_require_a_disabled_counter() {
        use Operation::*;

        assert_eq!(run(&[Read]), None);
        assert_eq!(run(&[Reset, Read]), None);
        assert_eq!(run(&[Reset, Enable, Read]), None);
        assert_eq!(run(&[Reset, Enable, Decode]), None);
        assert_eq!(run(&[Reset, Enable, Reset]), None);
        assert_eq!(run(&[Enable]), None);
    }

    #[test]
    fn any_descriptor_can_be_closed_once() {
        use Operation::*;

        assert_eq!(run(&[Close]), Some(DescriptorState::Closed));
        assert_eq!(run(&[Reset, Enable, Close]), Some(DescriptorState::Closed));
        assert_eq!(
            run(&[Reset, Enable, Disable, Read, Close]),
            Some(DescriptorState::Closed)
        );
        assert_eq!(DescriptorState::Closed.step(Close), Some(Step::Noop));
        assert_eq!(run(&[Close, Read]), None);
    }

    #[test]
    fn closed_descriptors_reject_everything() {
        for op in [
            Operation::Reset,
            Operation::Enable,
            Operation::Disable,
            Operation::Read,
            Operation::Decode,
        ] {
            assert_eq!(DescriptorState::Closed.step(op), None);
        }
    }
}
