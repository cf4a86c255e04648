use crate::rule::{Parameter, Rule};
use std::fmt;

/// Fixed entry points of the nat table, in render order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinRole {
    Prerouting,
    Input,
    Output,
    Postrouting,
}

impl BuiltinRole {
    pub const NAT: [BuiltinRole; 4] = [
        BuiltinRole::Prerouting,
        BuiltinRole::Input,
        BuiltinRole::Output,
        BuiltinRole::Postrouting,
    ];

    pub fn chain_name(self) -> &'static str {
        match self {
            BuiltinRole::Prerouting => "PREROUTING",
            BuiltinRole::Input => "INPUT",
            BuiltinRole::Output => "OUTPUT",
            BuiltinRole::Postrouting => "POSTROUTING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainKind {
    Builtin(BuiltinRole),
    Custom(String),
}

/// An ordered, named list of rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    kind: ChainKind,
    rules: Vec<Rule>,
}

impl Chain {
    /// Create a user-defined chain; it gets declared when attached to a table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            kind: ChainKind::Custom(name.into()),
            rules: vec![],
        }
    }

    pub(crate) fn builtin(role: BuiltinRole) -> Self {
        Self {
            kind: ChainKind::Builtin(role),
            rules: vec![],
        }
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            ChainKind::Builtin(role) => role.chain_name(),
            ChainKind::Custom(name) => name,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn push(&mut self, rule: Rule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Append an `-A <this chain> ...` rule
    pub fn append(&mut self, parameters: Vec<Parameter>) -> &mut Self {
        let rule = Rule::append(self.name(), parameters);
        self.push(rule)
    }

    /// Append an `-I <this chain> [index] ...` rule
    pub fn insert(&mut self, index: Option<u32>, parameters: Vec<Parameter>) -> &mut Self {
        let rule = Rule::insert(self.name(), index, parameters);
        self.push(rule)
    }

    pub fn build(&self, verbose: bool) -> Vec<String> {
        self.rules
            .iter()
            .flat_map(|rule| rule.build(verbose))
            .collect()
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_chain_uses_role_name() {
        let chain = Chain::builtin(BuiltinRole::Postrouting);
        assert_eq!(chain.name(), "POSTROUTING");
        assert!(matches!(chain.kind, ChainKind::Builtin(_)));
    }

    #[test]
    fn rules_keep_insertion_order_without_dedup() {
        let mut chain = Chain::new("MESH_OUTPUT");
        chain
            .push(Rule::verbatim("-A MESH_OUTPUT -j RETURN"))
            .append(vec![Parameter::jump("MESH_REDIRECT")])
            .push(Rule::verbatim("-A MESH_OUTPUT -j RETURN"));

        assert_eq!(
            chain.build(false),
            vec![
                "-A MESH_OUTPUT -j RETURN",
                "-A MESH_OUTPUT -j MESH_REDIRECT",
                "-A MESH_OUTPUT -j RETURN",
            ]
        );
        assert!(matches!(chain.kind, ChainKind::Custom(_)));
        assert_eq!(chain.to_string(), "MESH_OUTPUT");
    }

    #[test]
    fn empty_chain_builds_nothing() {
        assert!(Chain::new("EMPTY").build(true).is_empty());
    }
}
