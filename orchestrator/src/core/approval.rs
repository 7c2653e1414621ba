//! Approval state machine for the direct and plan-then-implement flows.
//!
//! The machine holds no memory between invocations. State is recomputed by
//! replaying the issue timeline (label events, comments, reactions) through a
//! pure transition table; the same snapshot always yields the same decision.

use serde::{Deserialize, Serialize};

use crate::core::commands::{Command, ReportMarker, has_marker, last_command, report_marker};
use crate::core::issue::{IssueContext, LabelAction, TimelineItem};
use crate::core::types::{Origin, RunOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Planning,
    PlanProposed,
    Implementing,
    Implemented,
    AwaitingApproval,
    BranchCreated,
    PrCreated,
    Cancelled,
    Failed,
}

impl Phase {
    /// A flow has ended; only a new trigger label starts another.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PrCreated | Self::Cancelled | Self::Failed)
    }

    /// A run or planning job is in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Planning | Self::Implementing | Self::Implemented)
    }

    /// The machine is waiting for a human decision.
    pub fn awaits_human(self) -> bool {
        matches!(
            self,
            Self::PlanProposed | Self::AwaitingApproval | Self::BranchCreated | Self::Failed
        )
    }

    fn accepts_new_flow(self) -> bool {
        self == Self::Idle || self.is_terminal()
    }
}

/// Which trigger label an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    Direct,
    Plan,
}

impl Flow {
    pub fn origin(self) -> Origin {
        match self {
            Self::Direct => Origin::Direct,
            Self::Plan => Origin::Planned,
        }
    }

    fn of(origin: Origin) -> Self {
        match origin {
            Origin::Direct => Self::Direct,
            Origin::Planned => Self::Plan,
        }
    }
}

/// Where a `Failed` phase came from; decides which retry command applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedIn {
    Planning,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalState {
    pub phase: Phase,
    pub origin: Option<Origin>,
    /// A planned run approved with `/approve-plan-single`.
    #[serde(default)]
    pub single: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<FailedIn>,
}

impl Default for ApprovalState {
    fn default() -> Self {
        Self::idle()
    }
}

impl ApprovalState {
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            origin: None,
            single: false,
            failed_in: None,
        }
    }

    fn with_phase(self, phase: Phase) -> Self {
        Self {
            phase,
            failed_in: None,
            ..self
        }
    }

    fn implementing(origin: Origin, single: bool) -> Self {
        Self {
            phase: Phase::Implementing,
            origin: Some(origin),
            single,
            failed_in: None,
        }
    }

    fn planning() -> Self {
        Self {
            phase: Phase::Planning,
            origin: Some(Origin::Planned),
            single: false,
            failed_in: None,
        }
    }

    fn failed(self, failed_in: FailedIn) -> Self {
        Self {
            phase: Phase::Failed,
            failed_in: Some(failed_in),
            ..self
        }
    }
}

/// Input to the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    TriggerAdded { flow: Flow },
    TriggerRemoved { flow: Flow },
    Command { command: Command },
    ThumbsUp,
    Report { marker: ReportMarker },
}

impl Event {
    fn is_human_signal(self) -> bool {
        matches!(self, Self::Command { .. } | Self::ThumbsUp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at: String,
    pub event: Event,
}

/// Instruction for the platform collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    StartRun {
        origin: Origin,
        /// Overrides the configured budget (`Some(1)` for single-attempt plans).
        #[serde(skip_serializing_if = "Option::is_none")]
        max_retries: Option<u32>,
    },
    StartPlanning,
    PostReport,
    CreateBranch {
        name: String,
    },
    CreatePullRequest {
        branch: String,
    },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Both trigger labels are on the issue.
    DualTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    Applied,
    Ignored,
    /// A start signal arrived while a job was in flight.
    Busy,
    Rejected { reason: RejectReason },
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: ApprovalState,
    pub disposition: Disposition,
    pub actions: Vec<Action>,
}

impl Step {
    fn applied(state: ApprovalState, actions: Vec<Action>) -> Self {
        Self {
            state,
            disposition: Disposition::Applied,
            actions,
        }
    }

    fn unchanged(state: ApprovalState, disposition: Disposition) -> Self {
        Self {
            state,
            disposition,
            actions: Vec::new(),
        }
    }
}

/// Outcome of evaluating an issue snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub issue: u64,
    /// The newest timeline event, if any.
    pub event: Option<TimedEvent>,
    pub prior: ApprovalState,
    pub state: ApprovalState,
    pub disposition: Disposition,
    pub actions: Vec<Action>,
}

/// Labels and identities the machine needs from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalSettings {
    pub direct_label: String,
    pub plan_label: String,
    pub bot_login: Option<String>,
    pub branch_prefix: String,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            direct_label: "hal9000".to_string(),
            plan_label: "hal9000-plan".to_string(),
            bot_login: None,
            branch_prefix: "hal9000/issue-".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalMachine {
    settings: ApprovalSettings,
}

impl ApprovalMachine {
    pub fn new(settings: ApprovalSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ApprovalSettings {
        &self.settings
    }

    pub fn branch_name(&self, issue: u64) -> String {
        format!("{}{issue}", self.settings.branch_prefix)
    }

    fn flow_for_label(&self, label: &str) -> Option<Flow> {
        if label == self.settings.direct_label {
            Some(Flow::Direct)
        } else if label == self.settings.plan_label {
            Some(Flow::Plan)
        } else {
            None
        }
    }

    fn label_for(&self, flow: Flow) -> &str {
        match flow {
            Flow::Direct => &self.settings.direct_label,
            Flow::Plan => &self.settings.plan_label,
        }
    }

    fn is_bot(&self, author: &str) -> bool {
        self.settings
            .bot_login
            .as_deref()
            .is_some_and(|bot| bot == author)
    }

    /// Derive machine events from the issue timeline.
    ///
    /// Comments with an orchestrator marker become report events (only from the
    /// bot login when one is configured); other bot comments are dropped. Human
    /// comments yield their last command token.
    pub fn events(&self, ctx: &IssueContext) -> Vec<TimedEvent> {
        ctx.timeline()
            .into_iter()
            .filter_map(|item| {
                let event = match item {
                    TimelineItem::Label(label) => {
                        let flow = self.flow_for_label(&label.label)?;
                        match label.action {
                            LabelAction::Added => Event::TriggerAdded { flow },
                            LabelAction::Removed => Event::TriggerRemoved { flow },
                        }
                    }
                    TimelineItem::Comment(comment) => {
                        if has_marker(&comment.body) {
                            let trusted = self.settings.bot_login.is_none()
                                || self.is_bot(&comment.author);
                            if !trusted {
                                return None;
                            }
                            Event::Report {
                                marker: report_marker(&comment.body)?,
                            }
                        } else if self.is_bot(&comment.author) {
                            return None;
                        } else {
                            Event::Command {
                                command: last_command(&comment.body)?,
                            }
                        }
                    }
                    TimelineItem::Reaction(reaction) => {
                        if !reaction.is_thumbs_up() || self.is_bot(&reaction.author) {
                            return None;
                        }
                        Event::ThumbsUp
                    }
                };
                Some(TimedEvent {
                    at: item.created_at().to_string(),
                    event,
                })
            })
            .collect()
    }

    /// The transition table.
    pub fn transition(&self, state: ApprovalState, event: Event, issue: u64) -> Step {
        use Phase as P;

        match event {
            Event::TriggerAdded { flow } => {
                if state.phase.accepts_new_flow() {
                    match flow {
                        Flow::Direct => Step::applied(
                            ApprovalState::implementing(Origin::Direct, false),
                            vec![Action::StartRun {
                                origin: Origin::Direct,
                                max_retries: None,
                            }],
                        ),
                        Flow::Plan => {
                            Step::applied(ApprovalState::planning(), vec![Action::StartPlanning])
                        }
                    }
                } else if state.phase.is_busy() {
                    Step::unchanged(state, Disposition::Busy)
                } else {
                    Step::unchanged(state, Disposition::Ignored)
                }
            }

            Event::TriggerRemoved { flow } => {
                let live = state.phase != P::Idle && !state.phase.is_terminal();
                if live && state.origin.map(Flow::of) == Some(flow) {
                    Step::applied(state.with_phase(P::Cancelled), vec![Action::Cancel])
                } else {
                    Step::unchanged(state, Disposition::Ignored)
                }
            }

            Event::Report { marker } => match (state.phase, marker) {
                (P::Planning, ReportMarker::PlanProposed) => {
                    Step::applied(state.with_phase(P::PlanProposed), Vec::new())
                }
                (P::Planning, ReportMarker::PlanFailed) => {
                    Step::applied(state.failed(FailedIn::Planning), Vec::new())
                }
                // The success report is both the result and its posting.
                (P::Implementing | P::Implemented, ReportMarker::RunSucceeded) => {
                    Step::applied(state.with_phase(P::AwaitingApproval), Vec::new())
                }
                (P::Implementing | P::Implemented, ReportMarker::RunFailed) => {
                    Step::applied(state.failed(FailedIn::Run), Vec::new())
                }
                _ => Step::unchanged(state, Disposition::Ignored),
            },

            Event::ThumbsUp => self.command(state, Command::Approve, issue),
            Event::Command { command } => self.command(state, command, issue),
        }
    }

    fn command(&self, state: ApprovalState, command: Command, issue: u64) -> Step {
        use Command as C;
        use Phase as P;

        let origin = state.origin.unwrap_or(Origin::Direct);
        match (state.phase, command) {
            (P::PlanProposed, C::RetryPlan) | (P::Failed, C::RetryPlan)
                if state.phase == P::PlanProposed || state.failed_in == Some(FailedIn::Planning) =>
            {
                Step::applied(ApprovalState::planning(), vec![Action::StartPlanning])
            }
            (P::PlanProposed, C::ApprovePlan) => Step::applied(
                ApprovalState::implementing(Origin::Planned, false),
                vec![Action::StartRun {
                    origin: Origin::Planned,
                    max_retries: None,
                }],
            ),
            (P::PlanProposed, C::ApprovePlanSingle) => Step::applied(
                ApprovalState::implementing(Origin::Planned, true),
                vec![Action::StartRun {
                    origin: Origin::Planned,
                    max_retries: Some(1),
                }],
            ),
            (P::AwaitingApproval, C::Retry) | (P::Failed, C::Retry)
                if state.phase == P::AwaitingApproval || state.failed_in == Some(FailedIn::Run) =>
            {
                Step::applied(
                    ApprovalState::implementing(origin, false),
                    vec![Action::StartRun {
                        origin,
                        max_retries: None,
                    }],
                )
            }
            (P::AwaitingApproval, C::Approve) => Step::applied(
                state.with_phase(P::BranchCreated),
                vec![Action::CreateBranch {
                    name: self.branch_name(issue),
                }],
            ),
            (P::BranchCreated, C::ApprovePr) => Step::applied(
                state.with_phase(P::PrCreated),
                vec![Action::CreatePullRequest {
                    branch: self.branch_name(issue),
                }],
            ),
            (phase, C::Retry | C::RetryPlan | C::ApprovePlan | C::ApprovePlanSingle)
                if phase.is_busy() =>
            {
                Step::unchanged(state, Disposition::Busy)
            }
            _ => Step::unchanged(state, Disposition::Ignored),
        }
    }

    /// Whether `event` would change `state`.
    fn is_valid(&self, state: ApprovalState, event: Event, issue: u64) -> bool {
        self.transition(state, event, issue).disposition == Disposition::Applied
    }

    /// Apply one batch of simultaneous events.
    ///
    /// While the machine waits for a human, the latest signal in the batch
    /// that is valid in the current phase wins and the rest are discarded.
    /// Otherwise the batch applies in order.
    fn step_batch(&self, state: ApprovalState, batch: &[TimedEvent], issue: u64) -> Step {
        if batch.len() > 1 && state.phase.awaits_human() {
            if let Some(winner) = batch
                .iter()
                .rev()
                .find(|timed| self.is_valid(state, timed.event, issue))
            {
                return self.transition(state, winner.event, issue);
            }
        }
        let mut step = Step::unchanged(state, Disposition::Ignored);
        for timed in batch {
            let next = self.transition(step.state, timed.event, issue);
            if step.disposition != Disposition::Applied {
                step.disposition = next.disposition;
            }
            step.state = next.state;
            step.actions.extend(next.actions);
        }
        step
    }

    /// Replay events from `Idle`, one batch at a time.
    ///
    /// A batch is a run of human signals sharing a timestamp; every other
    /// event is its own batch. Replaying a snapshot reaches the same states
    /// that evaluating each of its shorter prefixes did.
    pub fn replay(&self, events: &[TimedEvent], issue: u64) -> ApprovalState {
        batches(events).fold(ApprovalState::idle(), |state, batch| {
            self.step_batch(state, batch, issue).state
        })
    }

    /// Current state of the issue, reconciled against its labels.
    pub fn current_state(&self, ctx: &IssueContext) -> ApprovalState {
        let state = self.replay(&self.events(ctx), ctx.number);
        self.reconcile(ctx, state).0
    }

    /// Cancel a live flow whose trigger label is no longer on the issue.
    fn reconcile(&self, ctx: &IssueContext, state: ApprovalState) -> (ApprovalState, bool) {
        let live = state.phase != Phase::Idle && !state.phase.is_terminal();
        let label_gone = state
            .origin
            .is_some_and(|origin| !ctx.has_label(self.label_for(Flow::of(origin))));
        if live && label_gone {
            (state.with_phase(Phase::Cancelled), true)
        } else {
            (state, false)
        }
    }

    /// Replay everything but the newest batch, then apply the newest.
    ///
    /// The prior state is reconciled with the current labels first (unless
    /// the newest batch is the label's removal), so a flow whose label
    /// vanished silently is not cancelled again on every later evaluation.
    pub fn evaluate(&self, ctx: &IssueContext) -> Decision {
        let events = self.events(ctx);
        let all: Vec<&[TimedEvent]> = batches(&events).collect();
        let (history, newest) = match all.split_last() {
            Some((last, rest)) => (rest, Some(*last)),
            None => (&all[..], None),
        };
        let replayed = history.iter().fold(ApprovalState::idle(), |state, batch| {
            self.step_batch(state, batch, ctx.number).state
        });
        // A removal event in the newest batch accounts for the missing label.
        let removal_pending = newest.is_some_and(|batch| {
            batch.iter().any(|timed| {
                matches!(timed.event, Event::TriggerRemoved { flow }
                    if replayed.origin.map(Flow::of) == Some(flow))
            })
        });
        let prior = if removal_pending {
            replayed
        } else {
            self.reconcile(ctx, replayed).0
        };
        let event = newest.and_then(|batch| batch.last().cloned());

        if ctx.has_label(&self.settings.direct_label) && ctx.has_label(&self.settings.plan_label)
        {
            return Decision {
                issue: ctx.number,
                event,
                prior,
                state: prior,
                disposition: Disposition::Rejected {
                    reason: RejectReason::DualTrigger,
                },
                actions: Vec::new(),
            };
        }

        let step = match newest {
            Some(batch) => self.step_batch(prior, batch, ctx.number),
            None => Step::unchanged(prior, Disposition::Ignored),
        };

        let (state, cancelled) = self.reconcile(ctx, step.state);
        let (disposition, actions) = if cancelled {
            (Disposition::Applied, vec![Action::Cancel])
        } else {
            (step.disposition, step.actions)
        };

        Decision {
            issue: ctx.number,
            event,
            prior,
            state,
            disposition,
            actions,
        }
    }

    /// In-process transition when a run finishes: `Implementing` moves to
    /// `Implemented` (success) or `Failed`, and the report must be posted.
    pub fn run_finished(&self, state: ApprovalState, outcome: RunOutcome) -> Step {
        if state.phase != Phase::Implementing {
            return Step::unchanged(state, Disposition::Ignored);
        }
        let next = match outcome {
            RunOutcome::Success => state.with_phase(Phase::Implemented),
            RunOutcome::ExhaustedRetries => state.failed(FailedIn::Run),
        };
        Step::applied(next, vec![Action::PostReport])
    }

    /// In-process transition once the success report has been posted.
    pub fn report_posted(&self, state: ApprovalState) -> Step {
        if state.phase == Phase::Implemented {
            Step::applied(state.with_phase(Phase::AwaitingApproval), Vec::new())
        } else {
            Step::unchanged(state, Disposition::Ignored)
        }
    }
}

/// Split events into batches: runs of human signals with one timestamp.
fn batches(events: &[TimedEvent]) -> impl Iterator<Item = &[TimedEvent]> {
    events.chunk_by(|a, b| {
        a.event.is_human_signal() && b.event.is_human_signal() && a.at == b.at
    })
}
