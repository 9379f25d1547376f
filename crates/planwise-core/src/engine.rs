//! The two engines the advisor understands

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Database engine a plan or connection belongs to.
///
/// Exactly two identifiers are recognized: `postgresql` and `mysql`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgresql,
    Mysql,
}

impl EngineKind {
    /// The stable engine identifier
    pub fn id(self) -> &'static str {
        match self {
            EngineKind::Postgresql => "postgresql",
            EngineKind::Mysql => "mysql",
        }
    }

    /// Quote an identifier for this engine, leaving plain names untouched
    pub fn quote_ident(self, ident: &str) -> String {
        let plain = !ident.is_empty()
            && ident
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !ident.starts_with(|c: char| c.is_ascii_digit());
        if plain {
            return ident.to_string();
        }
        match self {
            EngineKind::Postgresql => format!("\"{}\"", ident.replace('"', "\"\"")),
            EngineKind::Mysql => format!("`{}`", ident.replace('`', "``")),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// An engine identifier that is not one of the two supported ones
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown engine identifier '{0}' (expected 'postgresql' or 'mysql')")]
pub struct UnknownEngine(pub String);

impl FromStr for EngineKind {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" => Ok(EngineKind::Postgresql),
            "mysql" => Ok(EngineKind::Mysql),
            other => Err(UnknownEngine(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests;
