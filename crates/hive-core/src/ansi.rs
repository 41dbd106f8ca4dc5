use regex::Regex;
use std::sync::OnceLock;

fn escape_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // CSI sequences, OSC sequences (BEL or ST terminated), and two-byte escapes.
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
            .expect("valid regex")
    })
}

pub fn strip_ansi(input: &str) -> String {
    if !input.contains('\x1b') {
        return input.to_string();
    }
    escape_pattern().replace_all(input, "").into_owned()
}

/// Joins lines with `\n` after removing escape sequences.
pub fn strip_and_join(lines: &[String]) -> String {
    lines
        .iter()
        .map(|line| strip_ansi(line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn last_nonblank_line(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .rev()
        .map(|line| strip_ansi(line).trim_end().to_string())
        .find(|line| !line.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_and_osc_sequences() {
        let raw = "\x1b[1;32mok\x1b[0m \x1b]0;title\x07done";
        assert_eq!(strip_ansi(raw), "ok done");
    }

    #[test]
    fn last_nonblank_skips_trailing_empty_output() {
        let lines = vec![
            "first".to_string(),
            "\x1b[33mbuilding\x1b[0m  ".to_string(),
            "   ".to_string(),
        ];
        assert_eq!(last_nonblank_line(&lines).as_deref(), Some("building"));
        assert_eq!(last_nonblank_line(&[]), None);
    }
}
