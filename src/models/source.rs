use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Known content sources. Declaration order is the fixed dedup priority:
/// when two sources report the same canonical URL the earlier one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    HackerNews,
    GeekNews,
    GitHub,
    ProductHunt,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::HackerNews,
        SourceKind::GeekNews,
        SourceKind::GitHub,
        SourceKind::ProductHunt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::HackerNews => "hackernews",
            SourceKind::GeekNews => "geeknews",
            SourceKind::GitHub => "github",
            SourceKind::ProductHunt => "producthunt",
        }
    }

    pub fn priority(&self) -> usize {
        *self as usize
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::HackerNews => "Hacker News",
            SourceKind::GeekNews => "GeekNews",
            SourceKind::GitHub => "GitHub Trending",
            SourceKind::ProductHunt => "Product Hunt",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hackernews" | "hn" => Ok(SourceKind::HackerNews),
            "geeknews" => Ok(SourceKind::GeekNews),
            "github" => Ok(SourceKind::GitHub),
            "producthunt" => Ok(SourceKind::ProductHunt),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_follows_declaration_order() {
        let priorities: Vec<usize> = SourceKind::ALL.iter().map(|s| s.priority()).collect();
        assert_eq!(priorities, vec![0, 1, 2, 3]);
    }

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!("HN".parse::<SourceKind>().unwrap(), SourceKind::HackerNews);
        assert_eq!("github".parse::<SourceKind>().unwrap(), SourceKind::GitHub);
        assert!("reddit".parse::<SourceKind>().is_err());
    }
}
