//! Identity header rewriting.
//!
//! Turns verified claims into backend-facing headers, replacing whatever
//! the client sent under the same names.

pub mod rules;

pub use rules::{compile, default_rule_configs, rewrite, RewriteRule, RewriteRuleConfig};
