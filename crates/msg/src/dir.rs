//! Message flow direction

use std::fmt;
use std::str::FromStr;

use crate::MsgError;

/// One of the two logical flows in a BGP session.
///
/// A pipeline is expressed left-to-right on the command line; `R` messages
/// travel towards the right end of the chain, `L` messages towards the left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dir {
    /// Towards the left end of the pipeline
    L,
    /// Towards the right end of the pipeline
    R,
}

impl Dir {
    /// Get the opposite direction
    #[inline]
    pub fn flip(self) -> Dir {
        match self {
            Dir::L => Dir::R,
            Dir::R => Dir::L,
        }
    }

    /// Single-letter name, as used in the JSON form
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Dir::L => "L",
            Dir::R => "R",
        }
    }
}

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dir {
    type Err = MsgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L" | "l" => Ok(Dir::L),
            "R" | "r" => Ok(Dir::R),
            _ => Err(MsgError::Format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip() {
        assert_eq!(Dir::L.flip(), Dir::R);
        assert_eq!(Dir::R.flip(), Dir::L);
    }

    #[test]
    fn test_parse() {
        assert_eq!("L".parse::<Dir>().unwrap(), Dir::L);
        assert_eq!("r".parse::<Dir>().unwrap(), Dir::R);
        assert!("X".parse::<Dir>().is_err());
    }
}
