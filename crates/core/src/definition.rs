//! Import and export definitions
//!
//! Definitions are immutable descriptors produced by whatever discovers parts.
//! The engine only reads them: the contract name and required metadata decide
//! which exports can satisfy an import, and the prerequisite/recomposable flags
//! drive the satisfaction state machine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How many matching exports an import accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// Zero or one export
    ZeroOrOne,
    /// Exactly one export
    ExactlyOne,
    /// Any number of exports
    ZeroOrMore,
}

impl Cardinality {
    /// Check whether `count` matching exports satisfy this cardinality
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Cardinality::ZeroOrOne => count <= 1,
            Cardinality::ExactlyOne => count == 1,
            Cardinality::ZeroOrMore => true,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cardinality::ZeroOrOne => "zero-or-one",
            Cardinality::ExactlyOne => "exactly-one",
            Cardinality::ZeroOrMore => "zero-or-more",
        };
        f.write_str(name)
    }
}

/// A declared dependency requirement of a part
///
/// Two imports of the same part are distinguished by their importing member
/// name, so the definition itself can key per-part maps.
///
/// # Example
///
/// ```
/// use composer_core::{Cardinality, ImportDefinition};
///
/// let logger = ImportDefinition::new("logger", "app.Logger")
///     .with_cardinality(Cardinality::ZeroOrOne)
///     .recomposable();
/// assert!(logger.is_recomposable());
/// assert!(!logger.is_prerequisite());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportDefinition {
    member: String,
    contract_name: String,
    required_metadata: Vec<String>,
    cardinality: Cardinality,
    prerequisite: bool,
    recomposable: bool,
}

impl ImportDefinition {
    /// Create an `ExactlyOne`, non-prerequisite, non-recomposable import
    pub fn new(member: impl Into<String>, contract_name: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            contract_name: contract_name.into(),
            required_metadata: Vec::new(),
            cardinality: Cardinality::ExactlyOne,
            prerequisite: false,
            recomposable: false,
        }
    }

    /// Set the cardinality
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Mark as a prerequisite import (resolved before any non-prerequisite import)
    pub fn prerequisite(mut self) -> Self {
        self.prerequisite = true;
        self
    }

    /// Mark as recomposable (may be re-bound after the part is composed)
    pub fn recomposable(mut self) -> Self {
        self.recomposable = true;
        self
    }

    /// Require a metadata key on matching exports
    pub fn require_metadata(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if let Err(pos) = self.required_metadata.binary_search(&key) {
            self.required_metadata.insert(pos, key);
        }
        self
    }

    /// Name of the importing member
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Contract name this import is bound to
    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    /// Metadata keys an export must carry (sorted)
    pub fn required_metadata(&self) -> &[String] {
        &self.required_metadata
    }

    /// Cardinality constraint
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Whether this import is a prerequisite
    pub fn is_prerequisite(&self) -> bool {
        self.prerequisite
    }

    /// Whether this import may change after composition
    pub fn is_recomposable(&self) -> bool {
        self.recomposable
    }

    /// Whether the export definition satisfies this import's contract constraint
    ///
    /// Cardinality is not part of the constraint; it applies to the whole set
    /// of matching exports.
    pub fn is_constraint_satisfied_by(&self, export: &ExportDefinition) -> bool {
        export.contract_name() == self.contract_name
            && self
                .required_metadata
                .iter()
                .all(|key| export.metadata().contains_key(key))
    }
}

impl fmt::Display for ImportDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.member, self.contract_name, self.cardinality
        )
    }
}

/// Descriptor of a capability supplied by a part
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportDefinition {
    contract_name: String,
    metadata: BTreeMap<String, String>,
}

impl ExportDefinition {
    /// Create an export definition without metadata
    pub fn new(contract_name: impl Into<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Contract name
    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    /// All metadata
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Single metadata value
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

impl fmt::Display for ExportDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.contract_name)
    }
}
