use std::fmt;

/// A directive of the iptables command line, independent of how it is spelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    NewChain,
    Append,
    Insert,
    Jump,
    Protocol,
    Source,
    Destination,
    InInterface,
    OutInterface,
    Match,
    SourcePort,
    DestinationPort,
    ToPorts,
    UidOwner,
    GidOwner,
}

impl Flag {
    pub const ALL: [Flag; 15] = [
        Flag::NewChain,
        Flag::Append,
        Flag::Insert,
        Flag::Jump,
        Flag::Protocol,
        Flag::Source,
        Flag::Destination,
        Flag::InInterface,
        Flag::OutInterface,
        Flag::Match,
        Flag::SourcePort,
        Flag::DestinationPort,
        Flag::ToPorts,
        Flag::UidOwner,
        Flag::GidOwner,
    ];

    /// Spelling of the directive: long form when `verbose`, short form otherwise
    pub fn spelling(self, verbose: bool) -> &'static str {
        let (short, long) = match self {
            Flag::NewChain => ("-N", "--new-chain"),
            Flag::Append => ("-A", "--append"),
            Flag::Insert => ("-I", "--insert"),
            Flag::Jump => ("-j", "--jump"),
            Flag::Protocol => ("-p", "--protocol"),
            Flag::Source => ("-s", "--source"),
            Flag::Destination => ("-d", "--destination"),
            Flag::InInterface => ("-i", "--in-interface"),
            Flag::OutInterface => ("-o", "--out-interface"),
            Flag::Match => ("-m", "--match"),
            Flag::SourcePort => ("--sport", "--source-port"),
            Flag::DestinationPort => ("--dport", "--destination-port"),
            Flag::ToPorts => ("--to-ports", "--to-ports"),
            Flag::UidOwner => ("--uid-owner", "--uid-owner"),
            Flag::GidOwner => ("--gid-owner", "--gid-owner"),
        };

        if verbose { long } else { short }
    }

    /// Resolve either spelling back to its directive
    pub fn from_spelling(spelling: &str) -> Option<Flag> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.spelling(false) == spelling || flag.spelling(true) == spelling)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spelling(false))
    }
}
