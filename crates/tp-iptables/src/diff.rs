use crate::flags::Flag;
use similar::TextDiff;

pub struct RulesetDiff {
    pub matches: bool,
    pub diff: Option<String>,
}

/// Compare two restore-format rulesets after reducing both to compact form
pub fn diff_ruleset(current: &str, desired: &str) -> RulesetDiff {
    let current = normalize(current);
    let desired = normalize(desired);

    if current == desired {
        RulesetDiff {
            matches: true,
            diff: None,
        }
    } else {
        RulesetDiff {
            matches: false,
            diff: Some(render_diff(&current, &desired)),
        }
    }
}

/// Drop comments and blank lines and rewrite long flags to their short form
pub fn normalize(ruleset: &str) -> String {
    let mut output = String::new();

    for line in ruleset.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let words: Vec<&str> = line
            .split_whitespace()
            .map(|word| {
                Flag::from_spelling(word)
                    .map(|flag| flag.spelling(false))
                    .unwrap_or(word)
            })
            .collect();

        output.push_str(&words.join(" "));
        output.push('\n');
    }

    output
}

fn render_diff(current: &str, desired: &str) -> String {
    TextDiff::from_lines(current, desired)
        .unified_diff()
        .context_radius(3)
        .header("current", "desired")
        .to_string()
}
