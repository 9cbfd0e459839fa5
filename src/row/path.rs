//! Header path grammar: `.`-separated segments, 1-based numeric indices,
//! `*` for wildcard-expanded repeated groups.

use crate::error::CompilerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Name(String),
    /// 1-based list index, as written in the header.
    Index(usize),
    Wildcard,
}

impl std::fmt::Display for PathSeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSeg::Name(n) => write!(f, "{}", n),
            PathSeg::Index(i) => write!(f, "{}", i),
            PathSeg::Wildcard => write!(f, "*"),
        }
    }
}

pub fn parse_path(header: &str) -> Result<Vec<PathSeg>, CompilerError> {
    let mut segs = Vec::new();
    for part in header.split('.') {
        if part.is_empty() {
            return Err(CompilerError::row(
                "R001",
                format!("Empty segment in header path '{}'", header),
            ));
        }
        if part == "*" {
            segs.push(PathSeg::Wildcard);
        } else if let Ok(n) = part.parse::<usize>() {
            if n == 0 {
                return Err(CompilerError::row(
                    "R001",
                    format!("Header path indices are 1-based, got 0 in '{}'", header),
                ));
            }
            segs.push(PathSeg::Index(n));
        } else {
            segs.push(PathSeg::Name(part.to_string()));
        }
    }
    Ok(segs)
}

pub fn render_path(segs: &[PathSeg]) -> String {
    segs.iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(".")
}
