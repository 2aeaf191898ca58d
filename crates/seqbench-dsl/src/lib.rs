#![doc = include_str!("../README.md")]

pub mod ast;
pub mod errors;
pub mod parser;
pub mod steps;

pub use ast::{render_tree, Dialect, Group, Sequence, SequenceNode, Span, Spanned, Step};
pub use errors::ParseError;
pub use parser::{check_policy, parse, parse_with, BenchmarkPolicy, ParseOptions};
pub use steps::{CatalogueError, StepCatalogue};
