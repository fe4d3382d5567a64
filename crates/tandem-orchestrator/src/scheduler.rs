//! Pure navigation-rule functions for process admissibility within a
//! schedule (spec.md §4.1 "Process selection and navigation"). No side
//! effects, no I/O — the Orchestrator consults these before ever asking a
//! model to choose.

use crate::session::{ProcessId, Session, ScheduleId};

/// What a process navigation request may resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextProcess {
    Run(ProcessId),
    TerminateSchedule,
}

/// Navigation rules, kept as free functions on a marker type so call sites
/// read `ProcessNavigator::admissible(...)` rather than bare free functions.
pub struct ProcessNavigator;

impl ProcessNavigator {
    /// The admissible set of next processes given the last-terminated
    /// process in the current schedule (`None` if the schedule has not run
    /// yet this session). Mirrors the table in spec.md §4.1 exactly.
    pub fn admissible(p_last: Option<ProcessId>) -> Vec<NextProcess> {
        match p_last {
            None => vec![NextProcess::Run(ProcessId::P1)],
            Some(ProcessId::P1) => {
                vec![NextProcess::Run(ProcessId::P1), NextProcess::Run(ProcessId::P2)]
            }
            Some(ProcessId::P2) => vec![
                NextProcess::Run(ProcessId::P1),
                NextProcess::Run(ProcessId::P2),
                NextProcess::Run(ProcessId::P3),
            ],
            Some(ProcessId::P3) => vec![
                NextProcess::Run(ProcessId::P2),
                NextProcess::Run(ProcessId::P3),
                NextProcess::TerminateSchedule,
            ],
        }
    }

    /// P1->P3 and P3->P1 are the only forbidden direct transitions.
    pub fn is_forbidden_transition(p_last: Option<ProcessId>, requested: ProcessId) -> bool {
        matches!(
            (p_last, requested),
            (Some(ProcessId::P1), ProcessId::P3) | (Some(ProcessId::P3), ProcessId::P1)
        )
    }

    pub fn is_admissible(p_last: Option<ProcessId>, requested: ProcessId) -> bool {
        Self::admissible(p_last).contains(&NextProcess::Run(requested))
    }

    /// Whether terminating the current schedule is admissible from `p_last`.
    pub fn may_terminate_schedule(p_last: Option<ProcessId>) -> bool {
        Self::admissible(p_last).contains(&NextProcess::TerminateSchedule)
    }

    /// Lowest-run-count schedule wins schedule selection ambiguity, ties
    /// broken by ascending id (spec.md §4.1 "Schedule selection").
    pub fn least_run_schedule(session: &Session) -> ScheduleId {
        let mut counts: std::collections::HashMap<ScheduleId, u32> = ScheduleId::ALL
            .iter()
            .map(|s| (*s, 0))
            .collect();
        for state in &session.states {
            *counts.entry(state.schedule).or_insert(0) += 1;
        }
        ScheduleId::ALL
            .iter()
            .copied()
            .min_by_key(|s| (counts[s], s.number()))
            .expect("ScheduleId::ALL is non-empty")
    }

    /// Whether prompt termination may even be offered to the model
    /// (spec.md §4.1 "Prompt termination", §8 boundary behavior).
    pub fn may_request_prompt_termination(session: &Session) -> bool {
        session.may_terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, State};

    #[test]
    fn p1_to_p3_and_p3_to_p1_are_forbidden() {
        assert!(ProcessNavigator::is_forbidden_transition(
            Some(ProcessId::P1),
            ProcessId::P3
        ));
        assert!(ProcessNavigator::is_forbidden_transition(
            Some(ProcessId::P3),
            ProcessId::P1
        ));
        assert!(!ProcessNavigator::is_forbidden_transition(
            Some(ProcessId::P2),
            ProcessId::P3
        ));
    }

    #[test]
    fn admissible_set_matches_spec_table() {
        assert_eq!(
            ProcessNavigator::admissible(None),
            vec![NextProcess::Run(ProcessId::P1)]
        );
        assert_eq!(
            ProcessNavigator::admissible(Some(ProcessId::P3)),
            vec![
                NextProcess::Run(ProcessId::P2),
                NextProcess::Run(ProcessId::P3),
                NextProcess::TerminateSchedule,
            ]
        );
    }

    #[test]
    fn least_run_schedule_breaks_ties_by_ascending_id() {
        let session = Session::new("s1", "p");
        assert_eq!(
            ProcessNavigator::least_run_schedule(&session),
            ScheduleId::Knowledge
        );
    }

    #[test]
    fn prompt_termination_refused_until_all_schedules_ran() {
        let mut session = Session::new("s1", "p");
        assert!(!ProcessNavigator::may_request_prompt_termination(&session));
        session.states.push(State {
            sequence: 1,
            schedule: ScheduleId::Production,
            process: ProcessId::P3,
            prev: None,
            next: None,
            files_hash: "h".into(),
            action_ids: vec![],
            diff_file: None,
            created_at: chrono::Utc::now(),
        });
        assert!(!ProcessNavigator::may_request_prompt_termination(&session));
    }
}
