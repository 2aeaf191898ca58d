#![allow(unused_assignments)]

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::ast::Span;

/// A notation that cannot be turned into a [`crate::ast::Sequence`].
///
/// Every variant is a `MalformedSequence`: fatal to that sequence only.
#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("Unknown step abbreviation '{abbreviation}'")]
    #[diagnostic(
        code(seqbench::parse::unknown_step),
        help("run `seqbench steps` to list the known abbreviations")
    )]
    UnknownStep {
        abbreviation: char,
        #[label("not a known step")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Found unmatched ']' at position {position}")]
    #[diagnostic(code(seqbench::parse::unmatched_close))]
    UnmatchedClose {
        position: usize,
        #[label("no group to close")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Unclosed group: reached end of input at nesting depth {depth}")]
    #[diagnostic(code(seqbench::parse::unclosed_group))]
    UnclosedGroup {
        depth: usize,
        #[label("this group is never closed")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Cleanup separator ':' appears more than once (first at position {first})")]
    #[diagnostic(
        code(seqbench::parse::duplicate_separator),
        help("a sequence has exactly one main list and one cleanup list")
    )]
    DuplicateSeparator {
        first: usize,
        #[label("second separator")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Cleanup separator ':' inside a group at depth {depth}")]
    #[diagnostic(
        code(seqbench::parse::separator_in_group),
        help("the separator is only allowed at the top level")
    )]
    SeparatorInGroup {
        depth: usize,
        #[label("separator inside group")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Misplaced '{marker}' for the {dialect} dialect")]
    #[diagnostic(code(seqbench::parse::misplaced_marker))]
    MisplacedMarker {
        marker: char,
        dialect: &'static str,
        #[help]
        hint: &'static str,
        #[label("unexpected marker")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Cleanup sequence marker ':' not present in the sequence")]
    #[diagnostic(
        code(seqbench::policy::missing_cleanup),
        help("append ':' (optionally followed by cleanup steps) to make the cleanup list explicit")
    )]
    MissingCleanupMarker,

    #[error("Cleanup sequence is supported only without nesting")]
    #[diagnostic(
        code(seqbench::policy::cleanup_with_groups),
        help("move the cleanup steps into the main list or drop the groups")
    )]
    CleanupWithGroups {
        #[label("non-empty cleanup list in a sequence with groups")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },
}

pub(crate) fn named_source(source: &str, name: &str) -> NamedSource<String> {
    NamedSource::new(name, source.to_owned())
}

pub(crate) fn source_span(span: Span) -> SourceSpan {
    (span.start, span.len()).into()
}

impl ParseError {
    /// Byte offset the error points at, when it has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            ParseError::UnknownStep { span, .. }
            | ParseError::UnmatchedClose { span, .. }
            | ParseError::UnclosedGroup { span, .. }
            | ParseError::DuplicateSeparator { span, .. }
            | ParseError::SeparatorInGroup { span, .. }
            | ParseError::MisplacedMarker { span, .. }
            | ParseError::CleanupWithGroups { span, .. } => Some(span.offset()),
            ParseError::MissingCleanupMarker => None,
        }
    }

    /// Stable machine-readable kind, used in reports and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::UnknownStep { .. } => "unknown_step",
            ParseError::UnmatchedClose { .. } => "unmatched_close",
            ParseError::UnclosedGroup { .. } => "unclosed_group",
            ParseError::DuplicateSeparator { .. } => "duplicate_separator",
            ParseError::SeparatorInGroup { .. } => "separator_in_group",
            ParseError::MisplacedMarker { .. } => "misplaced_marker",
            ParseError::MissingCleanupMarker => "missing_cleanup_marker",
            ParseError::CleanupWithGroups { .. } => "cleanup_with_groups",
        }
    }
}
