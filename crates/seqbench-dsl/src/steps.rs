//! Fixed bidirectional mapping between step abbreviations and canonical
//! optimizer pass names.

use std::collections::HashMap;

use indexmap::IndexMap;
use thiserror::Error;

/// Characters with syntactic meaning in the notation. They can never name a step.
pub const RESERVED_CHARS: [char; 6] = ['[', ']', ':', '!', '*', '#'];

const STANDARD_STEPS: [(char, &str); 32] = [
    ('a', "SSATransform"),
    ('C', "ConditionalSimplifier"),
    ('c', "CommonSubexpressionEliminator"),
    ('D', "DeadCodeEliminator"),
    ('d', "VarDeclInitializer"),
    ('E', "EqualStoreEliminator"),
    ('e', "ExpressionInliner"),
    ('F', "FunctionSpecializer"),
    ('f', "BlockFlattener"),
    ('g', "FunctionGrouper"),
    ('h', "FunctionHoister"),
    ('I', "ForLoopConditionIntoBody"),
    ('i', "FullInliner"),
    ('j', "ExpressionJoiner"),
    ('L', "LoadResolver"),
    ('l', "CircularReferencesPruner"),
    ('M', "LoopInvariantCodeMotion"),
    ('m', "Rematerialiser"),
    ('n', "ControlFlowSimplifier"),
    ('O', "ForLoopConditionOutOfBody"),
    ('o', "ForLoopInitRewriter"),
    ('p', "UnusedFunctionParameterPruner"),
    ('r', "UnusedAssignEliminator"),
    ('S', "UnusedStoreEliminator"),
    ('s', "ExpressionSimplifier"),
    ('T', "LiteralRematerialiser"),
    ('t', "StructuralSimplifier"),
    ('U', "ConditionalUnsimplifier"),
    ('u', "UnusedPruner"),
    ('V', "SSAReverser"),
    ('v', "EquivalentFunctionCombiner"),
    ('x', "ExpressionSplitter"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogueError {
    #[error("'{0}' is reserved by the notation and cannot name a step")]
    ReservedAbbreviation(char),
    #[error("step abbreviation '{0}' is defined more than once")]
    DuplicateAbbreviation(char),
    #[error("pass name '{0}' is mapped from more than one abbreviation")]
    DuplicateName(String),
}

/// Abbreviation <-> pass-name table, kept in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCatalogue {
    by_abbreviation: IndexMap<char, String>,
    by_name: HashMap<String, char>,
}

impl StepCatalogue {
    /// The optimizer step table understood by the Yul optimizer.
    pub fn standard() -> Self {
        // The built-in table is known to be well formed.
        let mut catalogue = Self {
            by_abbreviation: IndexMap::with_capacity(STANDARD_STEPS.len()),
            by_name: HashMap::with_capacity(STANDARD_STEPS.len()),
        };
        for (abbreviation, name) in STANDARD_STEPS {
            catalogue.by_abbreviation.insert(abbreviation, name.to_string());
            catalogue.by_name.insert(name.to_string(), abbreviation);
        }
        catalogue
    }

    /// Build a catalogue from arbitrary pairs, e.g. for synthetic test steps.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, CatalogueError>
    where
        I: IntoIterator<Item = (char, S)>,
        S: Into<String>,
    {
        let mut by_abbreviation = IndexMap::new();
        let mut by_name = HashMap::new();
        for (abbreviation, name) in pairs {
            let name = name.into();
            if RESERVED_CHARS.contains(&abbreviation) || abbreviation.is_whitespace() {
                return Err(CatalogueError::ReservedAbbreviation(abbreviation));
            }
            if by_abbreviation.contains_key(&abbreviation) {
                return Err(CatalogueError::DuplicateAbbreviation(abbreviation));
            }
            if by_name.contains_key(&name) {
                return Err(CatalogueError::DuplicateName(name));
            }
            by_name.insert(name.clone(), abbreviation);
            by_abbreviation.insert(abbreviation, name);
        }
        Ok(Self {
            by_abbreviation,
            by_name,
        })
    }

    pub fn contains(&self, abbreviation: char) -> bool {
        self.by_abbreviation.contains_key(&abbreviation)
    }

    pub fn name_of(&self, abbreviation: char) -> Option<&str> {
        self.by_abbreviation.get(&abbreviation).map(String::as_str)
    }

    pub fn abbreviation_of(&self, name: &str) -> Option<char> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, &str)> {
        self.by_abbreviation
            .iter()
            .map(|(abbreviation, name)| (*abbreviation, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_abbreviation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_abbreviation.is_empty()
    }
}

impl Default for StepCatalogue {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_mapping_is_bidirectional() {
        let catalogue = StepCatalogue::standard();
        assert_eq!(catalogue.len(), 32);
        for (abbreviation, name) in catalogue.iter() {
            assert_eq!(catalogue.abbreviation_of(name), Some(abbreviation));
            assert_eq!(catalogue.name_of(abbreviation), Some(name));
        }
    }

    #[test]
    fn standard_lookups() {
        let catalogue = StepCatalogue::standard();
        assert_eq!(catalogue.name_of('x'), Some("ExpressionSplitter"));
        assert_eq!(catalogue.abbreviation_of("SSAReverser"), Some('V'));
        assert_eq!(catalogue.name_of('b'), None);
        assert_eq!(catalogue.abbreviation_of("NoSuchPass"), None);
    }

    #[test]
    fn iteration_keeps_declaration_order() {
        let catalogue = StepCatalogue::standard();
        let first: Vec<char> = catalogue.iter().take(3).map(|(a, _)| a).collect();
        assert_eq!(first, vec!['a', 'C', 'c']);
    }

    #[test]
    fn custom_catalogue_rejects_reserved_chars() {
        let err = StepCatalogue::from_pairs([('x', "X"), (':', "Colon")]).unwrap_err();
        assert_eq!(err, CatalogueError::ReservedAbbreviation(':'));
    }

    #[test]
    fn custom_catalogue_rejects_duplicates() {
        let err = StepCatalogue::from_pairs([('x', "X"), ('x', "Y")]).unwrap_err();
        assert_eq!(err, CatalogueError::DuplicateAbbreviation('x'));
        let err = StepCatalogue::from_pairs([('x', "X"), ('y', "X")]).unwrap_err();
        assert_eq!(err, CatalogueError::DuplicateName("X".into()));
    }
}
