// iptables-restore table blocks
use crate::chain::{BuiltinRole, Chain};
use crate::flags::Flag;

pub const COMMIT: &str = "COMMIT";

/// Render one `* <table> ... COMMIT` block.
///
/// Custom chains are declared up front, before any rule line, so a jump to
/// one of them is valid wherever it appears in the block.
fn render_table<'a>(
    name: &str,
    builtins: impl IntoIterator<Item = &'a Chain>,
    custom: &[Chain],
    verbose: bool,
) -> String {
    let table_line = format!("* {}", name);
    let mut new_chain_lines = vec![];
    let mut rule_lines = vec![];

    for chain in builtins {
        rule_lines.extend(chain.build(verbose));
    }

    for chain in custom {
        new_chain_lines.push(format!(
            "{} {}",
            Flag::NewChain.spelling(verbose),
            chain.name()
        ));
        rule_lines.extend(chain.build(verbose));
    }

    if verbose {
        if !new_chain_lines.is_empty() {
            new_chain_lines.insert(0, "# Custom Chains:".to_string());
        }

        if !rule_lines.is_empty() {
            rule_lines.insert(0, "# Rules:".to_string());
        }
    }

    let mut lines = vec![table_line];

    if !new_chain_lines.is_empty() {
        lines.push(new_chain_lines.join("\n"));
    }

    if !rule_lines.is_empty() {
        lines.push(rule_lines.join("\n"));
    }

    lines.push(COMMIT.to_string());

    if verbose {
        lines.join("\n\n")
    } else {
        lines.join("\n")
    }
}

/// The `nat` table: four built-in chains plus any attached custom chains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatTable {
    prerouting: Chain,
    input: Chain,
    output: Chain,
    postrouting: Chain,

    // custom chains, in attachment order
    chains: Vec<Chain>,
}

impl NatTable {
    pub const NAME: &'static str = "nat";

    pub fn new() -> Self {
        Self {
            prerouting: Chain::builtin(BuiltinRole::Prerouting),
            input: Chain::builtin(BuiltinRole::Input),
            output: Chain::builtin(BuiltinRole::Output),
            postrouting: Chain::builtin(BuiltinRole::Postrouting),
            chains: vec![],
        }
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn prerouting(&mut self) -> &mut Chain {
        &mut self.prerouting
    }

    pub fn input(&mut self) -> &mut Chain {
        &mut self.input
    }

    pub fn output(&mut self) -> &mut Chain {
        &mut self.output
    }

    pub fn postrouting(&mut self) -> &mut Chain {
        &mut self.postrouting
    }

    pub fn chain(&self, role: BuiltinRole) -> &Chain {
        match role {
            BuiltinRole::Prerouting => &self.prerouting,
            BuiltinRole::Input => &self.input,
            BuiltinRole::Output => &self.output,
            BuiltinRole::Postrouting => &self.postrouting,
        }
    }

    pub fn chain_mut(&mut self, role: BuiltinRole) -> &mut Chain {
        match role {
            BuiltinRole::Prerouting => &mut self.prerouting,
            BuiltinRole::Input => &mut self.input,
            BuiltinRole::Output => &mut self.output,
            BuiltinRole::Postrouting => &mut self.postrouting,
        }
    }

    /// Attach a custom chain; the table takes ownership of it
    pub fn add_chain(&mut self, chain: Chain) -> &mut Self {
        self.chains.push(chain);
        self
    }

    pub fn custom_chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn build(&self, verbose: bool) -> String {
        render_table(
            Self::NAME,
            BuiltinRole::NAT.into_iter().map(|role| self.chain(role)),
            &self.chains,
            verbose,
        )
    }
}

impl Default for NatTable {
    fn default() -> Self {
        Self::new()
    }
}
