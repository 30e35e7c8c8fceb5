//! Event logging for the pass pipeline.
//!
//! The pass reports every structural decision through an [`EventLog`]: loops
//! extracted, loops skipped together with the [`SkipReason`] code, the
//! canonicalisation steps a loop needed and the functions generated for it.
//! Tests assert on the log and the CLI renders it; nothing else depends on it.
//!
//! Recording goes through `&self` so that a log can be handed down the whole
//! pipeline by shared reference. [`DerivedStats`] folds a finished log into
//! counters.
//!
//! [`SkipReason`]: crate::transform::SkipReason
//!
//! # Example
//!
//! ```rust,ignore
//! use lambdaize::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::LoopExtracted)
//!     .at("main", "for.cond")
//!     .message("@extracted_0 (2 captures)");
//! log.record(EventKind::LoopSkipped).at("main", "while.cond").message("not-annotated");
//! assert_eq!(log.summary(), "1 loop extracted, 1 loop skipped");
//! ```

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    time::Duration,
};

/// What an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A loop was replaced by an extracted function and a driver call.
    LoopExtracted,
    /// A trampoline was generated for a typed extracted function.
    TrampolineCreated,
    /// A preheader block was inserted.
    PreheaderInserted,
    /// Several back edges were merged into one latch.
    LatchesUnified,
    /// Several loop exits were merged through a control-flow hub.
    ExitsUnified,
    /// An SSA value was demoted to a stack slot.
    ValueDemoted,
    /// A loop was left untouched; the message is the skip reason code.
    LoopSkipped,
    /// A module pass started.
    PassStarted,
    /// A module pass completed.
    PassCompleted,
    /// Free-form note.
    Info,
    /// Something worth a look that did not stop the pipeline, such as an
    /// annotated loop that could not be transformed.
    Warning,
    /// A pass failed; the message is the error.
    Error,
}

impl EventKind {
    /// Kinds in the order summaries list them.
    pub const ALL: [EventKind; 12] = [
        Self::LoopExtracted,
        Self::LoopSkipped,
        Self::TrampolineCreated,
        Self::PreheaderInserted,
        Self::LatchesUnified,
        Self::ExitsUnified,
        Self::ValueDemoted,
        Self::PassStarted,
        Self::PassCompleted,
        Self::Info,
        Self::Warning,
        Self::Error,
    ];

    /// Lower-case label, also used as the default message.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::LoopExtracted => "loop extracted",
            Self::TrampolineCreated => "trampoline created",
            Self::PreheaderInserted => "preheader inserted",
            Self::LatchesUnified => "latches unified",
            Self::ExitsUnified => "exits unified",
            Self::ValueDemoted => "value demoted",
            Self::LoopSkipped => "loop skipped",
            Self::PassStarted => "pass started",
            Self::PassCompleted => "pass completed",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns `true` for kinds that stand for a change of the IR.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::LoopExtracted
                | Self::TrampolineCreated
                | Self::PreheaderInserted
                | Self::LatchesUnified
                | Self::ExitsUnified
                | Self::ValueDemoted
        )
    }

    /// Returns `true` for kinds that belong in a per-loop summary.
    fn is_loop_outcome(&self) -> bool {
        self.is_transformation() || *self == Self::LoopSkipped
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One entry of an [`EventLog`].
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Host function, without the `@`.
    pub function: Option<String>,
    /// Block label inside `function`, usually the loop header.
    pub location: Option<String>,
    /// Detail. Skip events carry the reason code here.
    pub message: String,
    /// Name of the pass that recorded the event.
    pub pass: Option<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(function) = &self.function {
            write!(f, " @{function}")?;
            if let Some(location) = &self.location {
                write!(f, " %{location}")?;
            }
            f.write_str(":")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Pending event returned by [`EventLog::record`].
///
/// Setters consume and return the builder; the event lands in the log when
/// the builder goes out of scope, so a bare `log.record(kind);` is enough.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Event,
    message_set: bool,
}

impl EventBuilder<'_> {
    /// Places the event at `%location` in `@function`.
    pub fn at(mut self, function: impl Into<String>, location: impl Into<String>) -> Self {
        self.event.function = Some(function.into());
        self.event.location = Some(location.into());
        self
    }

    /// Places the event in `@function` without a block.
    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.event.function = Some(function.into());
        self
    }

    /// Replaces the default message (the kind's description).
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.event.message = message.into();
        self.message_set = true;
        self
    }

    /// Attributes the event to a pass.
    pub fn pass(mut self, name: impl Into<String>) -> Self {
        self.event.pass = Some(name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        if !self.message_set {
            self.event.message = self.event.kind.description().to_string();
        }
        let event = Event {
            kind: self.event.kind,
            function: self.event.function.take(),
            location: self.event.location.take(),
            message: std::mem::take(&mut self.event.message),
            pass: self.event.pass.take(),
        };
        self.log.events.push(event);
    }
}

/// Append-only record of a pipeline run.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts an event of `kind`; see [`EventBuilder`].
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            event: Event {
                kind,
                function: None,
                location: None,
                message: String::new(),
                pass: None,
            },
            message_set: false,
        }
    }

    /// Records an [`EventKind::Info`] note.
    pub fn info(&self, message: impl Into<String>) {
        self.record(EventKind::Info).message(message);
    }

    /// Appends a copy of every event of `other`, in order.
    pub fn merge(&self, other: &EventLog) {
        for event in other.iter() {
            self.events.push(event.clone());
        }
    }

    /// Events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, event)| event)
    }

    /// Events of one kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Events recorded for `@function`.
    pub fn filter_function<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.iter().filter(move |e| e.function.as_deref() == Some(function))
    }

    /// Returns `true` if an event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.filter_kind(kind).next().is_some()
    }

    /// Number of events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.filter_kind(kind).count()
    }

    /// Event counts per kind; kinds never recorded are absent.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for event in self.iter() {
            *counts.entry(event.kind).or_default() += 1;
        }
        counts
    }

    /// Skipped loops per reason code.
    #[must_use]
    pub fn skip_reasons(&self) -> BTreeMap<&str, usize> {
        let mut reasons = BTreeMap::new();
        for event in self.filter_kind(EventKind::LoopSkipped) {
            *reasons.entry(event.message.as_str()).or_default() += 1;
        }
        reasons
    }

    /// Number of distinct functions with at least one transformation event.
    #[must_use]
    pub fn functions_affected(&self) -> usize {
        self.iter()
            .filter(|e| e.kind.is_transformation())
            .filter_map(|e| e.function.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }

    /// One line naming the count of every loop outcome, e.g.
    /// `"2 loop extracted, 1 loop skipped, 3 value demoted"`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }
        let counts = self.count_by_kind();
        let parts: Vec<String> = EventKind::ALL
            .iter()
            .filter(|kind| kind.is_loop_outcome())
            .filter_map(|kind| counts.get(kind).map(|n| format!("{n} {kind}")))
            .collect();
        if parts.is_empty() {
            format!("{} events", self.len())
        } else {
            parts.join(", ")
        }
    }
}

/// Counters folded from an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct DerivedStats {
    /// Functions with at least one transformation.
    pub functions_transformed: usize,
    /// Loops replaced by a driver call.
    pub loops_extracted: usize,
    /// Loops left in place.
    pub loops_skipped: usize,
    /// Trampolines generated (typed style).
    pub trampolines: usize,
    /// Preheaders inserted.
    pub preheaders_inserted: usize,
    /// Latch unifications.
    pub latches_unified: usize,
    /// Exit hubs built.
    pub exit_hubs: usize,
    /// Values demoted to stack slots.
    pub values_demoted: usize,
    /// Warnings.
    pub warnings: usize,
    /// Pass failures.
    pub errors: usize,
    /// Wall-clock time of the run, if measured.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Folds `log` into counters.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);
        Self {
            functions_transformed: log.functions_affected(),
            loops_extracted: get(EventKind::LoopExtracted),
            loops_skipped: get(EventKind::LoopSkipped),
            trampolines: get(EventKind::TrampolineCreated),
            preheaders_inserted: get(EventKind::PreheaderInserted),
            latches_unified: get(EventKind::LatchesUnified),
            exit_hubs: get(EventKind::ExitsUnified),
            values_demoted: get(EventKind::ValueDemoted),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Attaches the measured run time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Human-readable one-liner; zero counters other than the extraction
    /// count are left out.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{} loops extracted", self.loops_extracted)];
        let optional = [
            (self.functions_transformed, "functions"),
            (self.loops_skipped, "skipped"),
            (self.values_demoted, "values demoted"),
            (self.preheaders_inserted, "preheaders"),
            (self.latches_unified, "latches unified"),
            (self.exit_hubs, "exit hubs"),
            (self.trampolines, "trampolines"),
            (self.warnings, "warnings"),
            (self.errors, "errors"),
        ];
        parts.extend(
            optional
                .iter()
                .filter(|(n, _)| *n > 0)
                .map(|(n, label)| format!("{n} {label}")),
        );
        if !self.total_time.is_zero() {
            parts.push(format!("{:.2?}", self.total_time));
        }
        parts.join(", ")
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
