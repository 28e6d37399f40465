//! # Batch progress parsing.
//!
//! Progress is a convention between the rig and its batch executable: the
//! job periodically prints its percentage to stdout as
//! `"<percent> [anything]\n"`. The parser is pluggable so rig types with a
//! different convention can substitute their own.

/// Derives a progress percentage from captured stdout.
pub trait ProgressParser: Send + Sync + 'static {
    /// Returns a percentage in `[1, 100]`, or -1 when stdout does not
    /// follow the convention.
    fn parse(&self, stdout: &str) -> i32;
}

/// Default convention: the first whitespace token of the last stdout line,
/// as an integer in `[1, 100]`.
pub struct StdoutTokenProgress;

impl ProgressParser for StdoutTokenProgress {
    fn parse(&self, stdout: &str) -> i32 {
        let Some(line) = stdout.lines().last() else {
            return -1;
        };
        let Some(token) = line.split_whitespace().next() else {
            return -1;
        };
        match token.parse::<i32>() {
            Ok(value) if (1..=100).contains(&value) => value,
            _ => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_token_of_last_line() {
        let parser = StdoutTokenProgress;
        assert_eq!(parser.parse("10\n20\n30\n"), 30);
        assert_eq!(parser.parse("45 processing frame 9\n"), 45);
    }

    #[test]
    fn out_of_range_and_junk_report_unknown() {
        let parser = StdoutTokenProgress;
        assert_eq!(parser.parse(""), -1);
        assert_eq!(parser.parse("\n"), -1);
        assert_eq!(parser.parse("done\n"), -1);
        assert_eq!(parser.parse("0\n"), -1);
        assert_eq!(parser.parse("101\n"), -1);
        assert_eq!(parser.parse("100\n"), 100);
    }
}
