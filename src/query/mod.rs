//! Tree-query subsystem (C6-C11, §4.6-§4.11): parse a query source into
//! patterns/predicates/directives, validate and optimize it, execute it
//! against a syntax tree, and post-process the resulting matches.

pub mod compile_cache;
pub mod directives;
pub mod executor;
pub mod optimizer;
pub mod parser;
pub mod predicates;
pub mod regex_cache;
pub mod types;
pub mod validator;
