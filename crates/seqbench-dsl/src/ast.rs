use std::fmt;

/// Byte range into the notation text, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A spanned AST node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// How the notation spells one-shot and repeat-until-stable groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Dialect {
    /// `[ab]` repeats until stable, `[!ab]` runs once.
    #[default]
    Solc,
    /// `[ab]` runs once, `[ab]*` repeats until stable.
    Marker,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Solc => "solc",
            Dialect::Marker => "marker",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "solc" => Ok(Dialect::Solc),
            "marker" => Ok(Dialect::Marker),
            other => Err(format!("unknown dialect '{other}' (expected solc or marker)")),
        }
    }
}

/// One atomic optimizer pass, identified by its abbreviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Step(char);

impl Step {
    /// Wrap an abbreviation. Catalogue membership is checked by the parser.
    pub fn new(abbreviation: char) -> Self {
        Self(abbreviation)
    }

    pub fn abbreviation(&self) -> char {
        self.0
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bracketed sub-sequence.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Group {
    pub children: Vec<SequenceNode>,
    /// Re-run all children until a full pass changes nothing.
    pub repeat_until_stable: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum SequenceNode {
    Leaf(Spanned<Step>),
    Group(Group),
}

impl SequenceNode {
    pub fn span(&self) -> Span {
        match self {
            SequenceNode::Leaf(step) => step.span,
            SequenceNode::Group(group) => group.span,
        }
    }

    fn collect_steps(&self, out: &mut Vec<Step>) {
        match self {
            SequenceNode::Leaf(step) => out.push(step.node),
            SequenceNode::Group(group) => {
                for child in &group.children {
                    child.collect_steps(out);
                }
            }
        }
    }

    fn contains_group(&self) -> bool {
        matches!(self, SequenceNode::Group(_))
    }

    fn write_notation(&self, dialect: Dialect, out: &mut String) {
        match self {
            SequenceNode::Leaf(step) => out.push(step.node.abbreviation()),
            SequenceNode::Group(group) => {
                out.push('[');
                if dialect == Dialect::Solc && !group.repeat_until_stable {
                    out.push('!');
                }
                for child in &group.children {
                    child.write_notation(dialect, out);
                }
                out.push(']');
                if dialect == Dialect::Marker && group.repeat_until_stable {
                    out.push('*');
                }
            }
        }
    }
}

/// A parsed pass sequence: the main list and the optional cleanup list.
///
/// `cleanup` is `None` when the notation has no `:` at all, and `Some(vec![])`
/// for an explicit empty cleanup list (`"abc:"`).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Sequence {
    pub main: Vec<SequenceNode>,
    pub cleanup: Option<Vec<SequenceNode>>,
    /// Byte offset of the `:` separator, if any.
    pub separator: Option<usize>,
}

impl Sequence {
    /// Leaves of the main list in order, each group visited once.
    pub fn main_steps(&self) -> Vec<Step> {
        let mut out = Vec::new();
        for node in &self.main {
            node.collect_steps(&mut out);
        }
        out
    }

    /// Leaves of the cleanup list in order.
    pub fn cleanup_steps(&self) -> Vec<Step> {
        let mut out = Vec::new();
        for node in self.cleanup.iter().flatten() {
            node.collect_steps(&mut out);
        }
        out
    }

    /// Static step order: main leaves then cleanup leaves, groups unrolled once.
    pub fn static_steps(&self) -> Vec<Step> {
        let mut out = self.main_steps();
        out.extend(self.cleanup_steps());
        out
    }

    pub fn has_groups(&self) -> bool {
        self.main
            .iter()
            .chain(self.cleanup.iter().flatten())
            .any(SequenceNode::contains_group)
    }

    pub fn has_cleanup_marker(&self) -> bool {
        self.cleanup.is_some()
    }

    /// Canonical notation for `dialect`: no whitespace, no comments.
    pub fn to_notation(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        for node in &self.main {
            node.write_notation(dialect, &mut out);
        }
        if let Some(cleanup) = &self.cleanup {
            out.push(':');
            for node in cleanup {
                node.write_notation(dialect, &mut out);
            }
        }
        out
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_notation(Dialect::Solc))
    }
}

/// Render a tree view, one node per line, for CLI output.
pub fn render_tree(sequence: &Sequence) -> String {
    fn walk(nodes: &[SequenceNode], depth: usize, out: &mut String) {
        for node in nodes {
            let indent = "  ".repeat(depth);
            match node {
                SequenceNode::Leaf(step) => {
                    out.push_str(&format!("{indent}{}\n", step.node));
                }
                SequenceNode::Group(group) => {
                    let kind = if group.repeat_until_stable {
                        "repeat-until-stable"
                    } else {
                        "once"
                    };
                    out.push_str(&format!("{indent}group ({kind})\n"));
                    walk(&group.children, depth + 1, out);
                }
            }
        }
    }

    let mut out = String::from("main\n");
    walk(&sequence.main, 1, &mut out);
    if let Some(cleanup) = &sequence.cleanup {
        out.push_str("cleanup\n");
        walk(cleanup, 1, &mut out);
    }
    out
}
