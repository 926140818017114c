//! The routing-selector compiler and target resolver.
//!
//! Operators map `facility.severity` selectors to named targets in
//! `syslogconf.json`. Compilation turns each entry into a finder; resolution
//! reads the priority out of a packed record and folds it through the finder
//! list. The compile happens once per process and its outcome, error
//! included, is sticky.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use serde::Deserialize;
use snafu::{Snafu, ensure};

use crate::config::ConfLoader;
use crate::record::schema::{
    FORMER_MESSAGE_KEY, facility_name, is_facility, is_severity, severity_name,
};
use crate::record::{Message, RecordPriority};

/// Name of the routing table document inside the configuration folder.
pub const ROUTING_TABLE_NAME: &str = "syslogconf";

/// An error raised while compiling the routing table or resolving a record.
///
/// Compile errors are cloneable so the sticky shared compile can hand the
/// same error to every caller.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum RouterError {
    #[snafu(display("failed to read routing table {path}: {reason}"))]
    ReadTable { path: String, reason: String },

    #[snafu(display("routing table {path} is not valid JSON: {reason}"))]
    ParseTable { path: String, reason: String },

    #[snafu(display("empty selector"))]
    EmptySelector,

    #[snafu(display("empty target for selector {selector}"))]
    EmptyTarget { selector: String },

    #[snafu(display("wrong facility {token}"))]
    WrongFacility { token: String },

    #[snafu(display("wrong severity {token}"))]
    WrongSeverity { token: String },

    #[snafu(display("record cannot be resolved: {reason}"))]
    BadRecord { reason: String },
}

/// One entry of the operator routing table.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry {
    #[serde(rename = "Selector")]
    pub selector: String,
    #[serde(rename = "Target")]
    pub target: String,
}

impl RouteEntry {
    pub fn new(selector: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            target: target.into(),
        }
    }
}

/// Outcome of testing one finder against a facility/severity pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorMatch<'a> {
    /// The pair is not a recognized facility/severity combination.
    Unrecognized,
    /// Recognized, but this entry does not route it.
    Miss,
    /// Routed to the entry's target.
    Hit(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    /// Matches former-messages only: the pair `("data", "")`.
    Data,
    /// Facility must be in the set; severity only has to be valid.
    FacilityList,
    /// Severity must be in the set; facility only has to be valid.
    SeverityList,
    /// Facility must equal the single entry; severity must be in the set.
    FacilitySeverities,
}

/// A compiled routing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFinder {
    facilities: Vec<String>,
    severities: Vec<String>,
    target: String,
    kind: MatchKind,
}

impl TargetFinder {
    /// Compiles one routing entry. The selector is lowercased and stripped
    /// of spaces, the target trimmed, before either is checked.
    pub fn compile(entry: &RouteEntry) -> Result<Self, RouterError> {
        let selector = entry.selector.to_lowercase().replace(' ', "");
        let target = entry.target.trim().to_string();
        ensure!(!selector.is_empty(), EmptySelectorSnafu);
        ensure!(!target.is_empty(), EmptyTargetSnafu { selector });

        if selector == FORMER_MESSAGE_KEY {
            return Ok(Self {
                facilities: vec![selector],
                severities: Vec::new(),
                target,
                kind: MatchKind::Data,
            });
        }

        if let Some((facility, severities)) = selector.split_once('.') {
            ensure!(
                is_facility(facility),
                WrongFacilitySnafu { token: facility }
            );
            let facilities = vec![facility.to_string()];
            // A trailing dot with no severities is a plain facility match.
            if severities.is_empty() {
                return Ok(Self {
                    facilities,
                    severities: Vec::new(),
                    target,
                    kind: MatchKind::FacilityList,
                });
            }
            return Ok(Self {
                facilities,
                severities: severity_list(severities)?,
                target,
                kind: MatchKind::FacilitySeverities,
            });
        }

        // A bare list is classified by its first token.
        let first = selector.split(',').next().unwrap_or("");
        if is_severity(first) {
            Ok(Self {
                facilities: Vec::new(),
                severities: severity_list(&selector)?,
                target,
                kind: MatchKind::SeverityList,
            })
        } else {
            Ok(Self {
                facilities: facility_list(&selector)?,
                severities: Vec::new(),
                target,
                kind: MatchKind::FacilityList,
            })
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Tests the finder against a facility/severity pair.
    pub fn find(&self, facility: &str, severity: &str) -> SelectorMatch<'_> {
        match self.kind {
            MatchKind::Data => {
                if self.facilities.first().is_some_and(|f| f == facility) && severity.is_empty() {
                    return SelectorMatch::Hit(&self.target);
                }
                if !is_facility(facility) || !is_severity(severity) {
                    return SelectorMatch::Unrecognized;
                }
                SelectorMatch::Miss
            }
            MatchKind::FacilityList => {
                if !is_facility(facility) || !is_severity(severity) {
                    return SelectorMatch::Unrecognized;
                }
                if self.facilities.iter().any(|f| f == facility) {
                    SelectorMatch::Hit(&self.target)
                } else {
                    SelectorMatch::Miss
                }
            }
            MatchKind::SeverityList => {
                if !is_facility(facility) || !is_severity(severity) {
                    return SelectorMatch::Unrecognized;
                }
                if self.severities.iter().any(|s| s == severity) {
                    SelectorMatch::Hit(&self.target)
                } else {
                    SelectorMatch::Miss
                }
            }
            MatchKind::FacilitySeverities => {
                if !is_facility(facility) || !is_severity(severity) {
                    return SelectorMatch::Unrecognized;
                }
                if !self.facilities.first().is_some_and(|f| f == facility) {
                    return SelectorMatch::Miss;
                }
                if self.severities.iter().any(|s| s == severity) {
                    SelectorMatch::Hit(&self.target)
                } else {
                    SelectorMatch::Miss
                }
            }
        }
    }
}

fn severity_list(raw: &str) -> Result<Vec<String>, RouterError> {
    let mut severities: Vec<String> = Vec::new();
    for token in raw.split(',') {
        ensure!(is_severity(token), WrongSeveritySnafu { token });
        if !severities.iter().any(|s| s == token) {
            severities.push(token.to_string());
        }
    }
    Ok(severities)
}

fn facility_list(raw: &str) -> Result<Vec<String>, RouterError> {
    let mut facilities: Vec<String> = Vec::new();
    for token in raw.split(',') {
        ensure!(is_facility(token), WrongFacilitySnafu { token });
        if !facilities.iter().any(|f| f == token) {
            facilities.push(token.to_string());
        }
    }
    Ok(facilities)
}

/// The compiled routing table.
#[derive(Debug, Clone)]
pub struct Router {
    finders: Vec<TargetFinder>,
}

static SHARED: OnceCell<Result<Router, RouterError>> = OnceCell::new();

impl Router {
    /// Compiles a routing table. Any bad entry fails the whole table.
    pub fn from_entries(entries: &[RouteEntry]) -> Result<Self, RouterError> {
        let finders = entries
            .iter()
            .map(TargetFinder::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { finders })
    }

    /// Reads and compiles `syslogconf.json` from the configuration folder.
    pub fn from_conf_folder(conf: &ConfLoader) -> Result<Self, RouterError> {
        let path = conf.path_of(ROUTING_TABLE_NAME);
        let raw = std::fs::read(&path).map_err(|error| RouterError::ReadTable {
            path: path.display().to_string(),
            reason: error.to_string(),
        })?;
        let entries: Vec<RouteEntry> =
            serde_json::from_slice(&raw).map_err(|error| RouterError::ParseTable {
                path: path.display().to_string(),
                reason: error.to_string(),
            })?;
        Self::from_entries(&entries)
    }

    /// Compiles the routing table once per process. The outcome, compile
    /// error included, is sticky until restart.
    pub fn shared(conf: &ConfLoader) -> &'static Result<Router, RouterError> {
        SHARED.get_or_init(|| Router::from_conf_folder(conf))
    }

    /// Targets for one record: non-empty matches in declaration order,
    /// deduplicated. An empty result means the caller decides the default
    /// route.
    pub fn targets(&self, msg: &Message) -> Result<Vec<String>, RouterError> {
        let (facility, severity) = facility_severity(msg)?;
        let mut targets: Vec<String> = Vec::new();
        for finder in &self.finders {
            if let SelectorMatch::Hit(target) = finder.find(&facility, &severity) {
                if !targets.iter().any(|t| t == target) {
                    targets.push(target.to_string());
                }
            }
        }
        Ok(targets)
    }

    /// The deduplicated union of every entry's target.
    pub fn all_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for finder in &self.finders {
            if !targets.iter().any(|t| t == finder.target()) {
                targets.push(finder.target().to_string());
            }
        }
        targets
    }
}

/// Translates a record's priority into the facility/severity name pair the
/// finders match on. Former-messages yield the `("data", "")` sentinel; an
/// empty priority (the frame parsed without one) and unassigned codes yield
/// empty names, which no finder recognizes.
fn facility_severity(msg: &Message) -> Result<(String, String), RouterError> {
    match msg.record().priority() {
        Err(error) => Err(RouterError::BadRecord {
            reason: error.to_string(),
        }),
        Ok(RecordPriority::Former) => Ok((FORMER_MESSAGE_KEY.to_string(), String::new())),
        Ok(RecordPriority::Pri(raw)) => {
            if raw.is_empty() {
                return Ok((String::new(), String::new()));
            }
            let code: u8 = raw.parse().unwrap_or(0);
            let facility = facility_name(code / 8).unwrap_or("").to_string();
            let severity = severity_name(code % 8).unwrap_or("").to_string();
            Ok((facility, severity))
        }
    }
}
