//! Data model: Schedule, Process, State, Session, Note (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::action::ActionId;

/// One of the five named phases of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleId {
    Knowledge = 1,
    Plan = 2,
    Implement = 3,
    Scale = 4,
    Production = 5,
}

impl ScheduleId {
    pub const ALL: [ScheduleId; 5] = [
        ScheduleId::Knowledge,
        ScheduleId::Plan,
        ScheduleId::Implement,
        ScheduleId::Scale,
        ScheduleId::Production,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.number() == n)
    }

    pub fn default_role(self) -> crate::model_coordinator::Role {
        use crate::model_coordinator::Role;
        match self {
            ScheduleId::Knowledge => Role::Researcher,
            _ => Role::Coder,
        }
    }
}

/// One of three ordered steps inside a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessId {
    P1 = 1,
    P2 = 2,
    P3 = 3,
}

impl ProcessId {
    pub fn number(self) -> u8 {
        self as u8
    }

    /// The process's human name within its schedule, per spec.md §3's table.
    pub fn name(self, schedule: ScheduleId) -> &'static str {
        match (schedule, self) {
            (ScheduleId::Knowledge, ProcessId::P1) => "Research",
            (ScheduleId::Knowledge, ProcessId::P2) => "Crawl",
            (ScheduleId::Knowledge, ProcessId::P3) => "Retrieve",
            (ScheduleId::Plan, ProcessId::P1) => "Brainstorm",
            (ScheduleId::Plan, ProcessId::P2) => "Clarify",
            (ScheduleId::Plan, ProcessId::P3) => "Plan",
            (ScheduleId::Implement, ProcessId::P1) => "Implement",
            (ScheduleId::Implement, ProcessId::P2) => "Verify",
            (ScheduleId::Implement, ProcessId::P3) => "Feedback",
            (ScheduleId::Scale, ProcessId::P1) => "Scale",
            (ScheduleId::Scale, ProcessId::P2) => "Benchmark",
            (ScheduleId::Scale, ProcessId::P3) => "Optimize",
            (ScheduleId::Production, ProcessId::P1) => "Analyze",
            (ScheduleId::Production, ProcessId::P2) => "Systemize",
            (ScheduleId::Production, ProcessId::P3) => "Harmonize",
        }
    }

    /// Whether this process may request optional human consultation
    /// (Plan.Clarify) or demands it mandatorily (Implement.Feedback).
    pub fn consultation(self, schedule: ScheduleId) -> ConsultationRequirement {
        match (schedule, self) {
            (ScheduleId::Plan, ProcessId::P2) => ConsultationRequirement::Optional,
            (ScheduleId::Implement, ProcessId::P3) => ConsultationRequirement::Mandatory,
            _ => ConsultationRequirement::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsultationRequirement {
    None,
    Optional,
    Mandatory,
}

/// (schedule_id, process_id) pair identifying a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Process {
    pub schedule: ScheduleId,
    pub process: ProcessId,
}

impl Process {
    pub fn new(schedule: ScheduleId, process: ProcessId) -> Self {
        Self { schedule, process }
    }

    pub fn role(self) -> crate::model_coordinator::Role {
        use crate::model_coordinator::Role;
        // Production.Harmonize on UI-bearing workspaces prefers Vision for
        // analysis; the Agent decides this at dispatch time (spec.md §4.2),
        // so the static default here is the schedule's default role.
        if matches!(self.schedule, ScheduleId::Knowledge) {
            Role::Researcher
        } else {
            self.schedule.default_role()
        }
    }
}

/// A commit-like snapshot identified as `SSSS_S{s}P{p}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub sequence: u32,
    pub schedule: ScheduleId,
    pub process: ProcessId,
    pub prev: Option<u32>,
    pub next: Option<u32>,
    /// SHA-256 over a canonical ordering of the tracked file set.
    pub files_hash: String,
    pub action_ids: Vec<ActionId>,
    /// Diff-file name relative to the prior state, e.g. `0004.diff`.
    pub diff_file: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl State {
    pub fn id(&self) -> String {
        format_state_id(self.sequence, self.schedule, self.process)
    }
}

pub fn format_state_id(sequence: u32, schedule: ScheduleId, process: ProcessId) -> String {
    format!(
        "{:04}_S{}P{}",
        sequence,
        schedule.number(),
        process.number()
    )
}

/// Source of a Note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteSource {
    User,
    AiSubstitute,
    System,
}

/// Which of the three note streams a Note belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteStream {
    Orchestrator,
    Agent,
    Human,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub content: String,
    pub source: NoteSource,
    pub stream: NoteStream,
    pub reviewed: bool,
}

impl Note {
    pub fn new(content: impl Into<String>, source: NoteSource, stream: NoteStream) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            content: content.into(),
            source,
            stream,
            reviewed: false,
        }
    }
}

/// Aggregated statistics carried on the Session (spec.md §3 Session).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_actions: u64,
    pub total_states: u64,
    pub schedule_run_counts: std::collections::HashMap<String, u32>,
    pub estimated_tokens_used: u64,
    pub wall_time_secs: u64,
}

/// Ordered list of States, the initial prompt, accumulated notes, schedule
/// run counter, flow code, stats, and an optional suspension record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub prompt: String,
    pub states: Vec<State>,
    pub notes: Vec<Note>,
    pub flow_code: String,
    pub stats: SessionStats,
    pub suspension: Option<crate::errors::SuspensionError>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Workspace-relative paths ever created or edited in this session; the
    /// input to each State's `files_hash` (spec.md §4.5 "State recording").
    #[serde(default)]
    pub tracked_files: std::collections::BTreeSet<String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            states: Vec::new(),
            notes: Vec::new(),
            flow_code: String::new(),
            stats: SessionStats::default(),
            suspension: None,
            created_at: chrono::Utc::now(),
            tracked_files: std::collections::BTreeSet::new(),
        }
    }

    pub fn last_state(&self) -> Option<&State> {
        self.states.last()
    }

    /// The last-terminated process within the given schedule, if the
    /// schedule has run at all in this session (spec.md §4.1 navigation).
    pub fn last_process_in_schedule(&self, schedule: ScheduleId) -> Option<ProcessId> {
        self.states
            .iter()
            .rev()
            .find(|s| s.schedule == schedule)
            .map(|s| s.process)
    }

    pub fn schedules_run(&self) -> std::collections::HashSet<ScheduleId> {
        self.states.iter().map(|s| s.schedule).collect()
    }

    /// All five schedules have run at least once, and the most recently
    /// terminated schedule is Production (spec.md §4.1 "Prompt termination").
    pub fn may_terminate(&self) -> bool {
        let ran = self.schedules_run();
        let all_ran = ScheduleId::ALL.iter().all(|s| ran.contains(s));
        let last_is_production = self
            .last_state()
            .map(|s| s.schedule == ScheduleId::Production)
            .unwrap_or(false);
        all_ran && last_is_production
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension.is_some()
    }

    pub fn unreviewed_notes(&self) -> Vec<&Note> {
        self.notes.iter().filter(|n| !n.reviewed).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_id_formats_per_spec_grammar() {
        assert_eq!(
            format_state_id(12, ScheduleId::Implement, ProcessId::P2),
            "0012_S3P2"
        );
    }

    #[test]
    fn may_terminate_requires_all_five_and_production_last() {
        let mut session = Session::new("s1", "build a thing");
        for (seq, sched) in [
            (1, ScheduleId::Knowledge),
            (2, ScheduleId::Plan),
            (3, ScheduleId::Implement),
            (4, ScheduleId::Scale),
        ] {
            session.states.push(State {
                sequence: seq,
                schedule: sched,
                process: ProcessId::P3,
                prev: if seq == 1 { None } else { Some(seq - 1) },
                next: None,
                files_hash: "h".into(),
                action_ids: vec![],
                diff_file: None,
                created_at: chrono::Utc::now(),
            });
        }
        assert!(!session.may_terminate());

        session.states.push(State {
            sequence: 5,
            schedule: ScheduleId::Production,
            process: ProcessId::P3,
            prev: Some(4),
            next: None,
            files_hash: "h".into(),
            action_ids: vec![],
            diff_file: None,
            created_at: chrono::Utc::now(),
        });
        assert!(session.may_terminate());
    }

    #[test]
    fn last_process_in_schedule_tracks_revisits() {
        let mut session = Session::new("s1", "p");
        session.states.push(State {
            sequence: 1,
            schedule: ScheduleId::Plan,
            process: ProcessId::P1,
            prev: None,
            next: None,
            files_hash: "h".into(),
            action_ids: vec![],
            diff_file: None,
            created_at: chrono::Utc::now(),
        });
        session.states.push(State {
            sequence: 2,
            schedule: ScheduleId::Plan,
            process: ProcessId::P2,
            prev: Some(1),
            next: None,
            files_hash: "h".into(),
            action_ids: vec![],
            diff_file: None,
            created_at: chrono::Utc::now(),
        });
        assert_eq!(
            session.last_process_in_schedule(ScheduleId::Plan),
            Some(ProcessId::P2)
        );
        assert_eq!(session.last_process_in_schedule(ScheduleId::Scale), None);
    }
}
