//! Textual request grammars.
//!
//! Two small grammars are accepted:
//!
//! - selections: `VM1,VM4,VM6-VM9` (ranges expand by numeric suffix)
//! - composites: `VM1,VM2:lineal ; VM3-VM5:anillo ; VM6,VM7:bus`
//!
//! Both are parsed into structured requests before any planning happens.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use super::planner::validate_members;
use super::types::TopologyKind;

/// Largest range a single `VMi-VMj` token may expand to.
const MAX_RANGE_LEN: u64 = 4096;

static RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z_-]*?)(\d+)\s*-\s*(?:([A-Za-z_][A-Za-z_-]*?))?(\d+)$")
        .expect("Invalid range regex")
});

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("Invalid name regex"));

/// One `(subset, kind)` group of a composite request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequest {
    pub members: Vec<String>,
    pub kind: TopologyKind,
}

impl GroupRequest {
    pub fn new(kind: TopologyKind, members: Vec<String>) -> Self {
        GroupRequest { members, kind }
    }

    /// Member list and minimum-count checks for this group alone.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_members(self.kind, &self.members)
    }
}

impl fmt::Display for GroupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.members.join(","), self.kind)
    }
}

/// Several independently typed groups applied in one call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositeRequest {
    pub groups: Vec<GroupRequest>,
}

impl CompositeRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.groups.is_empty() {
            return Err(ValidationError::EmptySubset);
        }
        self.groups.iter().try_for_each(GroupRequest::validate)
    }

    /// Every VM named by any group, first occurrence order.
    pub fn vms(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.groups
            .iter()
            .flat_map(|g| g.members.iter())
            .filter(|vm| seen.insert(vm.as_str()))
            .cloned()
            .collect()
    }
}

impl FromStr for CompositeRequest {
    type Err = ValidationError;

    /// Parses `members:kind` groups separated by `;`, then validates them.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut groups = Vec::new();
        for chunk in input.split(';') {
            if chunk.trim().is_empty() {
                continue;
            }
            let (members, kind) = chunk
                .rsplit_once(':')
                .ok_or_else(|| ValidationError::syntax(chunk, "expected 'vm,vm:type'"))?;
            let kind: TopologyKind = kind.parse()?;
            let members = parse_selection(members)?;
            groups.push(GroupRequest::new(kind, members));
        }

        let request = CompositeRequest { groups };
        request.validate()?;
        Ok(request)
    }
}

impl fmt::Display for CompositeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.groups.iter().map(GroupRequest::to_string).collect();
        f.write_str(&parts.join(" ; "))
    }
}

/// Parses a comma separated VM selection, expanding `VMi-VMj` ranges.
///
/// Duplicates and empty selections are rejected.
pub fn parse_selection(input: &str) -> Result<Vec<String>, ValidationError> {
    let mut selected = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',').map(str::trim) {
        if token.is_empty() {
            continue;
        }
        for vm in expand_token(token)? {
            if !seen.insert(vm.clone()) {
                return Err(ValidationError::DuplicateVm(vm));
            }
            selected.push(vm);
        }
    }

    if selected.is_empty() {
        return Err(ValidationError::EmptySubset);
    }
    Ok(selected)
}

fn expand_token(token: &str) -> Result<Vec<String>, ValidationError> {
    if let Some(caps) = RANGE_PATTERN.captures(token) {
        let prefix = &caps[1];
        if let Some(end_prefix) = caps.get(3) {
            if end_prefix.as_str() != prefix {
                return Err(ValidationError::syntax(token, "range ends use different prefixes"));
            }
        }
        let width = caps[2].len();
        let start: u64 = caps[2]
            .parse()
            .map_err(|_| ValidationError::syntax(token, "range start is not a number"))?;
        let end: u64 = caps[4]
            .parse()
            .map_err(|_| ValidationError::syntax(token, "range end is not a number"))?;
        if start > end {
            return Err(ValidationError::syntax(token, "range start is after its end"));
        }
        if end - start >= MAX_RANGE_LEN {
            return Err(ValidationError::syntax(token, "range is too large"));
        }
        // Keep zero padding ("VM01-VM03") when the start was written padded
        let padded = width > 1 && caps[2].starts_with('0');
        return Ok((start..=end)
            .map(|i| {
                if padded {
                    format!("{}{:0width$}", prefix, i, width = width)
                } else {
                    format!("{}{}", prefix, i)
                }
            })
            .collect());
    }

    if !NAME_PATTERN.is_match(token) {
        return Err(ValidationError::syntax(token, "not a VM name"));
    }
    Ok(vec![token.to_string()])
}
