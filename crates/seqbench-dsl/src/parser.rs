#![allow(clippy::result_large_err)]

use crate::ast::*;
use crate::errors::{named_source, source_span, ParseError};
use crate::steps::StepCatalogue;

const DEFAULT_SOURCE_NAME: &str = "<notation>";

/// Options controlling how notation text is interpreted.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions<'a> {
    pub dialect: Dialect,
    pub catalogue: &'a StepCatalogue,
    /// Name shown in rendered diagnostics.
    pub source_name: &'a str,
}

impl<'a> ParseOptions<'a> {
    pub fn new(dialect: Dialect, catalogue: &'a StepCatalogue) -> Self {
        Self {
            dialect,
            catalogue,
            source_name: DEFAULT_SOURCE_NAME,
        }
    }
}

/// Extra constraints the prefix benchmark places on a well-formed sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkPolicy {
    /// The notation must spell the `:` separator explicitly.
    pub require_cleanup_marker: bool,
    /// Sequences containing groups must have an empty cleanup list.
    pub forbid_cleanup_with_groups: bool,
}

impl Default for BenchmarkPolicy {
    fn default() -> Self {
        Self {
            require_cleanup_marker: true,
            forbid_cleanup_with_groups: true,
        }
    }
}

impl BenchmarkPolicy {
    pub fn permissive() -> Self {
        Self {
            require_cleanup_marker: false,
            forbid_cleanup_with_groups: false,
        }
    }
}

/// Parse notation with the default dialect and the standard step table.
pub fn parse(notation: &str) -> Result<Sequence, ParseError> {
    let catalogue = StepCatalogue::standard();
    parse_with(notation, &ParseOptions::new(Dialect::default(), &catalogue))
}

/// An open `[` while scanning.
struct OpenGroup {
    start: usize,
    children: Vec<SequenceNode>,
    one_shot_flag: bool,
}

/// Parse notation in a single left-to-right pass, tracking nesting depth.
pub fn parse_with(notation: &str, options: &ParseOptions<'_>) -> Result<Sequence, ParseError> {
    let src = || named_source(notation, options.source_name);
    let dialect = options.dialect;

    let mut main: Vec<SequenceNode> = Vec::new();
    let mut cleanup: Option<Vec<SequenceNode>> = None;
    let mut separator: Option<usize> = None;
    let mut stack: Vec<OpenGroup> = Vec::new();

    let mut chars = notation.char_indices().peekable();
    while let Some((pos, ch)) = chars.next() {
        let span = Span::new(pos, pos + ch.len_utf8());
        match ch {
            '#' => {
                // Comment runs to end of line.
                while let Some(&(_, next)) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            c if c.is_whitespace() => {}
            '[' => stack.push(OpenGroup {
                start: pos,
                children: Vec::new(),
                one_shot_flag: false,
            }),
            ']' => {
                let Some(open) = stack.pop() else {
                    return Err(ParseError::UnmatchedClose {
                        position: pos,
                        span: source_span(span),
                        src: src(),
                    });
                };
                let mut end = span.end;
                let repeat_until_stable = match dialect {
                    Dialect::Solc => !open.one_shot_flag,
                    Dialect::Marker => match chars.peek() {
                        Some(&(marker_pos, '*')) => {
                            chars.next();
                            end = marker_pos + 1;
                            true
                        }
                        _ => false,
                    },
                };
                let group = SequenceNode::Group(Group {
                    children: open.children,
                    repeat_until_stable,
                    span: Span::new(open.start, end),
                });
                current_list(&mut stack, &mut main, &mut cleanup).push(group);
            }
            ':' => {
                if !stack.is_empty() {
                    return Err(ParseError::SeparatorInGroup {
                        depth: stack.len(),
                        span: source_span(span),
                        src: src(),
                    });
                }
                if let Some(first) = separator {
                    return Err(ParseError::DuplicateSeparator {
                        first,
                        span: source_span(span),
                        src: src(),
                    });
                }
                separator = Some(pos);
                cleanup = Some(Vec::new());
            }
            '!' => {
                let accepted = dialect == Dialect::Solc
                    && stack
                        .last()
                        .is_some_and(|open| open.children.is_empty() && !open.one_shot_flag);
                if !accepted {
                    return Err(misplaced(ch, dialect, span, src()));
                }
                if let Some(open) = stack.last_mut() {
                    open.one_shot_flag = true;
                }
            }
            '*' => return Err(misplaced(ch, dialect, span, src())),
            abbreviation => {
                if !options.catalogue.contains(abbreviation) {
                    return Err(ParseError::UnknownStep {
                        abbreviation,
                        span: source_span(span),
                        src: src(),
                    });
                }
                let leaf = SequenceNode::Leaf(Spanned::new(Step::new(abbreviation), span));
                current_list(&mut stack, &mut main, &mut cleanup).push(leaf);
            }
        }
    }

    if let Some(innermost) = stack.last() {
        return Err(ParseError::UnclosedGroup {
            depth: stack.len(),
            span: source_span(Span::new(innermost.start, innermost.start + 1)),
            src: src(),
        });
    }

    Ok(Sequence {
        main,
        cleanup,
        separator,
    })
}

fn current_list<'a>(
    stack: &'a mut [OpenGroup],
    main: &'a mut Vec<SequenceNode>,
    cleanup: &'a mut Option<Vec<SequenceNode>>,
) -> &'a mut Vec<SequenceNode> {
    if let Some(open) = stack.last_mut() {
        return &mut open.children;
    }
    match cleanup {
        Some(list) => list,
        None => main,
    }
}

fn misplaced(
    marker: char,
    dialect: Dialect,
    span: Span,
    src: miette::NamedSource<String>,
) -> ParseError {
    let hint = match (dialect, marker) {
        (Dialect::Solc, '!') => "the one-shot flag must be the first token inside a group",
        (Dialect::Solc, _) => "groups repeat until stable by default; use `[!...]` for one-shot",
        (Dialect::Marker, '*') => "the repeat marker must directly follow a closing ']'",
        (Dialect::Marker, _) => "groups run once by default; use `[...]*` to repeat until stable",
    };
    ParseError::MisplacedMarker {
        marker,
        dialect: dialect.as_str(),
        hint,
        span: source_span(span),
        src,
    }
}

/// Check the benchmark-specific constraints on an already parsed sequence.
pub fn check_policy(
    sequence: &Sequence,
    notation: &str,
    policy: BenchmarkPolicy,
) -> Result<(), ParseError> {
    if policy.require_cleanup_marker && !sequence.has_cleanup_marker() {
        return Err(ParseError::MissingCleanupMarker);
    }
    if policy.forbid_cleanup_with_groups && sequence.has_groups() {
        if let (Some(separator), Some(cleanup)) = (sequence.separator, &sequence.cleanup) {
            if !cleanup.is_empty() {
                let end = cleanup
                    .last()
                    .map(|node| node.span().end)
                    .unwrap_or(separator + 1);
                return Err(ParseError::CleanupWithGroups {
                    span: source_span(Span::new(separator, end)),
                    src: named_source(notation, DEFAULT_SOURCE_NAME),
                });
            }
        }
    }
    Ok(())
}
