pub(crate) mod bench;
pub(crate) mod expand;
pub(crate) mod helpers;
pub(crate) mod parse;
pub(crate) mod prefixes;
pub(crate) mod steps;
