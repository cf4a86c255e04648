use crate::flags::Flag;

/// One `<flag> <value>` pair of a rule, optionally negated with `!`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    flag: Flag,
    value: String,
    negate: bool,
}

impl Parameter {
    pub fn new(flag: Flag, value: impl Into<String>) -> Self {
        Self {
            flag,
            value: value.into(),
            negate: false,
        }
    }

    pub fn not(flag: Flag, value: impl Into<String>) -> Self {
        Self {
            negate: true,
            ..Self::new(flag, value)
        }
    }

    pub fn protocol(proto: &str) -> Self {
        Self::new(Flag::Protocol, proto)
    }

    pub fn jump(target: &str) -> Self {
        Self::new(Flag::Jump, target)
    }

    pub fn destination(addr: &str) -> Self {
        Self::new(Flag::Destination, addr)
    }

    pub fn out_interface(iface: &str) -> Self {
        Self::new(Flag::OutInterface, iface)
    }

    pub fn match_module(module: &str) -> Self {
        Self::new(Flag::Match, module)
    }

    pub fn destination_port(port: u16) -> Self {
        Self::new(Flag::DestinationPort, port.to_string())
    }

    pub fn to_ports(port: u16) -> Self {
        Self::new(Flag::ToPorts, port.to_string())
    }

    pub fn uid_owner(uid: u32) -> Self {
        Self::new(Flag::UidOwner, uid.to_string())
    }

    pub fn flag(&self) -> Flag {
        self.flag
    }

    pub fn build(&self, verbose: bool) -> String {
        let rendered = format!("{} {}", self.flag.spelling(verbose), self.value);
        if self.negate {
            format!("! {}", rendered)
        } else {
            rendered
        }
    }
}

/// Where a command rule lands in its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Append,
    /// Insert at a 1-based index, or at the head when `None`
    Insert(Option<u32>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    Verbatim(String),
    Command {
        position: Position,
        chain: String,
        parameters: Vec<Parameter>,
    },
}

/// A single entry of a chain. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    body: Body,
    comment: Option<String>,
}

impl Rule {
    /// Opaque ruleset text, rendered the same way in both modes
    pub fn verbatim(line: impl Into<String>) -> Self {
        Self {
            body: Body::Verbatim(line.into()),
            comment: None,
        }
    }

    pub fn append(chain: &str, parameters: Vec<Parameter>) -> Self {
        Self::command(Position::Append, chain, parameters)
    }

    pub fn insert(chain: &str, index: Option<u32>, parameters: Vec<Parameter>) -> Self {
        Self::command(Position::Insert(index), chain, parameters)
    }

    fn command(position: Position, chain: &str, parameters: Vec<Parameter>) -> Self {
        Self {
            body: Body::Command {
                position,
                chain: chain.to_string(),
                parameters,
            },
            comment: None,
        }
    }

    /// Attach a note that the verbose render emits as a `#` line above the rule
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn build(&self, verbose: bool) -> Vec<String> {
        let mut lines = Vec::with_capacity(2);

        if verbose && let Some(comment) = &self.comment {
            lines.push(format!("# {}", comment));
        }

        match &self.body {
            Body::Verbatim(line) => lines.push(line.clone()),
            Body::Command {
                position,
                chain,
                parameters,
            } => {
                let mut words = vec![];
                match position {
                    Position::Append => {
                        words.push(Flag::Append.spelling(verbose).to_string());
                        words.push(chain.clone());
                    }
                    Position::Insert(index) => {
                        words.push(Flag::Insert.spelling(verbose).to_string());
                        words.push(chain.clone());
                        if let Some(index) = index {
                            words.push(index.to_string());
                        }
                    }
                }
                words.extend(parameters.iter().map(|p| p.build(verbose)));
                lines.push(words.join(" "));
            }
        }

        lines
    }
}
