//! PEP 440 style version constraints (`==1.2`, `>=1,<2`).

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::PkglinkError;

/// Comparators, longest first so `===` wins over `==`.
pub const COMPARATORS: [&str; 8] = ["===", "==", "!=", "~=", ">=", "<=", ">", "<"];

/// Characters that start a comparator.
pub const COMPARATOR_CHARS: [char; 5] = ['=', '<', '>', '!', '~'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clause {
    pub op: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct VersionConstraint {
    pub clauses: Vec<Clause>,
}

impl VersionConstraint {
    /// `name@1.2` shorthand, pinned with `==`.
    pub fn pinned(version: &str) -> Result<Self, PkglinkError> {
        format!("=={}", version).parse()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|c| format!("{}{}", c.op, c.version))
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}

impl From<VersionConstraint> for String {
    fn from(value: VersionConstraint) -> Self {
        value.to_string()
    }
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '*' | '+' | '!' | '_' | '-')
}

impl FromStr for VersionConstraint {
    type Err = PkglinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut clauses = Vec::new();
        for raw in s.split(',') {
            let clause = raw.trim();
            if clause.is_empty() {
                return Err(PkglinkError::spec_parse(s, "empty version clause"));
            }

            let op = COMPARATORS
                .iter()
                .find(|op| clause.starts_with(*op))
                .ok_or_else(|| {
                    PkglinkError::spec_parse(clause, "version clause must start with a comparator")
                })?;

            let version = clause[op.len()..].trim();
            if version.is_empty() {
                return Err(PkglinkError::spec_parse(
                    clause,
                    format!("missing version after '{}'", op),
                ));
            }
            if let Some(bad) = version.chars().find(|c| !is_version_char(*c)) {
                return Err(PkglinkError::spec_parse(
                    clause,
                    format!("unexpected character '{}' in version", bad),
                ));
            }

            clauses.push(Clause {
                op: (*op).to_string(),
                version: version.to_string(),
            });
        }
        Ok(Self { clauses })
    }
}
