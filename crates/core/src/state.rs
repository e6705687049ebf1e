//! Per-part import satisfaction state
//!
//! States are totally ordered. A part only moves forward through them, except
//! when a failed transition or a reverted transaction restores the value it
//! had before the change.
//!
//! ```text
//! NoImportsSatisfied → ImportsPreviewing → ImportsPreviewed
//!   → PreExportImportsSatisfying → PreExportImportsSatisfied
//!   → PostExportImportsSatisfying → PostExportImportsSatisfied
//!   → ComposedNotifying → Composed
//! ```
//!
//! The `...ing` states mark work in flight. Finding a part in one of them on
//! entry means the current call re-entered it through a cycle.

use std::fmt;

/// Satisfaction state of one part
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImportState {
    /// Nothing has been resolved yet
    #[default]
    NoImportsSatisfied = 0,
    /// Preview of the exactly-one imports is in progress
    ImportsPreviewing = 1,
    /// Exactly-one imports are known to be resolvable
    ImportsPreviewed = 2,
    /// Prerequisite imports are being resolved
    PreExportImportsSatisfying = 3,
    /// Prerequisite imports are resolved
    PreExportImportsSatisfied = 4,
    /// Remaining imports are being resolved
    PostExportImportsSatisfying = 5,
    /// All imports are resolved
    PostExportImportsSatisfied = 6,
    /// The part's composed callback is running
    ComposedNotifying = 7,
    /// Terminal state
    Composed = 8,
}

impl ImportState {
    /// All states in order
    pub const ALL: [ImportState; 9] = [
        ImportState::NoImportsSatisfied,
        ImportState::ImportsPreviewing,
        ImportState::ImportsPreviewed,
        ImportState::PreExportImportsSatisfying,
        ImportState::PreExportImportsSatisfied,
        ImportState::PostExportImportsSatisfying,
        ImportState::PostExportImportsSatisfied,
        ImportState::ComposedNotifying,
        ImportState::Composed,
    ];

    /// Numeric value of the state
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the state marks work in flight
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            ImportState::ImportsPreviewing
                | ImportState::PreExportImportsSatisfying
                | ImportState::PostExportImportsSatisfying
                | ImportState::ComposedNotifying
        )
    }

    /// Whether the part may take part in recomposition
    pub fn accepts_recomposition(self) -> bool {
        matches!(self, ImportState::ImportsPreviewed | ImportState::Composed)
    }

    /// Whether the part is fully composed
    pub fn is_composed(self) -> bool {
        self == ImportState::Composed
    }

    /// Name used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            ImportState::NoImportsSatisfied => "NoImportsSatisfied",
            ImportState::ImportsPreviewing => "ImportsPreviewing",
            ImportState::ImportsPreviewed => "ImportsPreviewed",
            ImportState::PreExportImportsSatisfying => "PreExportImportsSatisfying",
            ImportState::PreExportImportsSatisfied => "PreExportImportsSatisfied",
            ImportState::PostExportImportsSatisfying => "PostExportImportsSatisfying",
            ImportState::PostExportImportsSatisfied => "PostExportImportsSatisfied",
            ImportState::ComposedNotifying => "ComposedNotifying",
            ImportState::Composed => "Composed",
        }
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_numeric_values_follow_declaration_order() {
        for (i, state) in ImportState::ALL.iter().enumerate() {
            assert_eq!(state.as_u8() as usize, i);
        }
    }

    #[test]
    fn test_in_progress_states() {
        let in_progress: Vec<_> = ImportState::ALL
            .iter()
            .copied()
            .filter(|s| s.is_in_progress())
            .collect();
        assert_eq!(
            in_progress,
            vec![
                ImportState::ImportsPreviewing,
                ImportState::PreExportImportsSatisfying,
                ImportState::PostExportImportsSatisfying,
                ImportState::ComposedNotifying,
            ]
        );
    }

    #[test]
    fn test_recomposition_eligibility() {
        assert!(ImportState::ImportsPreviewed.accepts_recomposition());
        assert!(ImportState::Composed.accepts_recomposition());
        assert!(!ImportState::NoImportsSatisfied.accepts_recomposition());
        assert!(!ImportState::PostExportImportsSatisfied.accepts_recomposition());
    }

    #[test]
    fn test_default_is_initial_state() {
        assert_eq!(ImportState::default(), ImportState::NoImportsSatisfied);
        assert!(ImportState::Composed.is_composed());
    }

    proptest! {
        #[test]
        fn prop_ordering_matches_numeric_value(a in 0usize..9, b in 0usize..9) {
            let (sa, sb) = (ImportState::ALL[a], ImportState::ALL[b]);
            prop_assert_eq!(sa < sb, sa.as_u8() < sb.as_u8());
            prop_assert_eq!(sa == sb, a == b);
        }
    }
}
