use itertools::Itertools;
use once_cell::sync;
use regex::Regex;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use strum_macros::Display as StrumDisplay;

/// Breakpoint number, assigned by the engine.
pub type BreakpointId = u32;

/// Breakpoint place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// Line in a source file.
    Line { source: PathBuf, line: u32 },
    /// Entry of a method (function breakpoint).
    Method { class: String, method: String },
}

impl Location {
    pub fn is_method(&self) -> bool {
        matches!(self, Location::Method { .. })
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Line { source, line } => write!(f, "{}:{line}", source.display()),
            Location::Method { class, method } => write!(f, "{class}#{method}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum Comparator {
    /// Stop exactly at the n-th hit.
    Eq,
    /// Stop at every hit starting from the n-th.
    Ge,
    /// Stop at every n-th hit.
    Mod,
}

/// Compiled hit condition, the breakpoint stops when `hits <comparator> value` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitCondition {
    pub comparator: Comparator,
    pub value: u32,
}

impl HitCondition {
    pub const ALWAYS: HitCondition = HitCondition {
        comparator: Comparator::Ge,
        value: 0,
    };

    pub fn new(comparator: Comparator, value: u32) -> Self {
        Self { comparator, value }
    }

    /// Check the condition against the current hit counter.
    pub fn is_satisfied(&self, hits: u32) -> bool {
        match self.comparator {
            Comparator::Eq => hits == self.value,
            Comparator::Ge => hits >= self.value,
            Comparator::Mod => self.value != 0 && hits % self.value == 0,
        }
    }
}

impl Default for HitCondition {
    fn default() -> Self {
        Self::ALWAYS
    }
}

/// Breakpoint as known by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub location: Location,
    /// Expression evaluated by the engine at hit time.
    pub condition: Option<String>,
    pub hit_condition: HitCondition,
}

impl Breakpoint {
    pub fn new(id: BreakpointId, location: Location) -> Self {
        Self {
            id,
            location,
            condition: None,
            hit_condition: HitCondition::ALWAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HitConditionError {
    #[error("'{0}' is not a valid hit condition")]
    Invalid(String),
    #[error("Hit conditions using '{0}' are not supported")]
    Unsupported(String),
}

/// Compile a client hit condition (`[op]digits`).
///
/// An absent or empty condition compiles into [`HitCondition::ALWAYS`], the engine treats
/// `eq 0` as "never".
pub fn compile_hit_condition(condition: Option<&str>) -> Result<HitCondition, HitConditionError> {
    static HIT_RE: sync::Lazy<Regex> = sync::Lazy::new(|| {
        Regex::new(r"^(?P<op><=|<|>=|=>|>|===|==|=|%)?\s*(?P<value>[0-9]+)$").expect("must compile")
    });

    let Some(condition) = condition.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(HitCondition::ALWAYS);
    };

    let invalid = || HitConditionError::Invalid(condition.to_string());
    let captures = HIT_RE.captures(condition).ok_or_else(invalid)?;
    let value: u32 = captures["value"].parse().map_err(|_| invalid())?;

    match captures.name("op").map(|op| op.as_str()) {
        None | Some("=") | Some("==") | Some("===") => Ok(HitCondition::new(Comparator::Eq, value)),
        // "more than n" hits, first qualifying hit is n + 1
        Some(">") => Ok(HitCondition::new(Comparator::Ge, value.saturating_sub(1))),
        Some(">=") => Ok(HitCondition::new(Comparator::Ge, value)),
        Some("%") => Ok(HitCondition::new(Comparator::Mod, value)),
        Some(op) => Err(HitConditionError::Unsupported(op.to_string())),
    }
}

/// Normalize a client breakpoint condition, empty strings mean "no condition".
pub fn compile_condition(condition: Option<&str>) -> Option<String> {
    condition
        .filter(|c| !c.trim().is_empty())
        .map(ToOwned::to_owned)
}

/// Parse a function breakpoint name like `Foo::Bar#baz` or `Foo.baz`.
pub fn parse_method_identifier(name: &str) -> Option<Location> {
    static METHOD_RE: sync::Lazy<Regex> = sync::Lazy::new(|| {
        Regex::new(r"^(?P<class>[:\w]+)(?:\.|#)(?P<method>\w+)$").expect("must compile")
    });

    let captures = METHOD_RE.captures(name)?;
    Some(Location::Method {
        class: captures["class"].to_string(),
        method: captures["method"].to_string(),
    })
}

/// Reconciles a requested breakpoint set with the breakpoints that already exist.
///
/// Requested locations that match an existing breakpoint reuse it, so an unchanged line
/// keeps its id across requests. Whatever remains in the existing set after all requests
/// are processed is stale and must be deleted.
pub struct BreakpointDiff {
    verified: Vec<Breakpoint>,
    existing: Vec<Breakpoint>,
}

impl BreakpointDiff {
    pub fn new(existing: Vec<Breakpoint>) -> Self {
        Self {
            verified: vec![],
            existing,
        }
    }

    /// Return the breakpoint for a location: a breakpoint confirmed earlier in this request,
    /// an adopted pre-existing one, or a new one created with `add`.
    pub fn find_or_add<E>(
        &mut self,
        location: &Location,
        add: impl FnOnce(Location) -> Result<Breakpoint, E>,
    ) -> Result<Breakpoint, E> {
        if let Some(bp) = self.verified.iter().find(|bp| &bp.location == location) {
            return Ok(bp.clone());
        }

        let bp = match self
            .existing
            .iter()
            .position(|bp| &bp.location == location)
        {
            Some(pos) => self.existing.remove(pos),
            None => add(location.clone())?,
        };

        self.verified.push(bp.clone());
        Ok(bp)
    }

    /// Update the copy of a confirmed breakpoint (for example after a condition change).
    pub fn update(&mut self, bp: Breakpoint) {
        if let Some(verified) = self.verified.iter_mut().find(|v| v.id == bp.id) {
            *verified = bp;
        }
    }

    /// Consume the diff, returns confirmed and stale breakpoints.
    pub fn finish(self) -> (Vec<Breakpoint>, Vec<Breakpoint>) {
        (self.verified, self.existing)
    }

    /// Ids of breakpoints that will be removed.
    pub fn stale_ids(&self) -> Vec<BreakpointId> {
        self.existing.iter().map(|bp| bp.id).collect_vec()
    }
}
