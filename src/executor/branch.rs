use regex::Regex;
use std::sync::OnceLock;

static BRANCH_RE: OnceLock<Regex> = OnceLock::new();

fn branch_re() -> &'static Regex {
    BRANCH_RE.get_or_init(|| {
        // Blanks only between the marker and the token: a marker at end of line names nothing.
        Regex::new(r"Pushed to branch:[ \t]*(\S+)").expect("branch marker pattern is valid")
    })
}

/// Branch named by the first `Pushed to branch: <token>` line in executor output.
pub fn extract_branch(log: &str) -> Option<String> {
    branch_re()
        .captures(log)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_branch_token() {
        let log = "QA: PASS\nPushed to branch: feature/x\n✅ SUCCESS\n";
        assert_eq!(extract_branch(log).as_deref(), Some("feature/x"));
    }

    #[test]
    fn first_match_wins() {
        let log = "Pushed to branch: one\nPushed to branch: two\n";
        assert_eq!(extract_branch(log).as_deref(), Some("one"));
    }

    #[test]
    fn token_stops_at_whitespace() {
        assert_eq!(
            extract_branch("Pushed to branch: sow-agent/run-1 (3 files)").as_deref(),
            Some("sow-agent/run-1")
        );
    }

    #[test]
    fn absent_without_marker() {
        assert_eq!(extract_branch("done"), None);
        assert_eq!(extract_branch("Pushed to: main"), None);
    }

    #[test]
    fn marker_without_token_is_ignored() {
        assert_eq!(extract_branch("Pushed to branch:\nnext line"), None);
        assert_eq!(
            extract_branch("Pushed to branch:\nPushed to branch: real").as_deref(),
            Some("real")
        );
    }
}
