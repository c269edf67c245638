use std::fmt;
use std::ops::Deref;

use ef_structure::NAIDX;

use crate::EnergyError;

/// Encoded nucleotide. `N` stands for every ambiguity code and never pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Base {
    A = 0,
    C = 1,
    G = 2,
    U = 3,
    N = 4,
}

impl Base {
    /// Number of distinct codes, i.e. the size of every base axis in the
    /// parameter tables.
    pub const COUNT: usize = 5;

    pub const ALL: [Base; Base::COUNT] = [Base::A, Base::C, Base::G, Base::U, Base::N];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Watson-Crick and GU wobble pairs.
    pub fn can_pair(self, other: Base) -> bool {
        matches!((self, other),
            (Base::A, Base::U) | (Base::U, Base::A) |
            (Base::G, Base::C) | (Base::C, Base::G) |
            (Base::G, Base::U) | (Base::U, Base::G))
    }

    /// Pairs that carry the terminal AU/GU penalty.
    pub fn is_weak_pair(self, other: Base) -> bool {
        matches!((self, other),
            (Base::A, Base::U) | (Base::U, Base::A) |
            (Base::G, Base::U) | (Base::U, Base::G))
    }
}

impl TryFrom<char> for Base {
    type Error = char;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c.to_ascii_uppercase() {
            'A' => Ok(Base::A),
            'C' => Ok(Base::C),
            'G' => Ok(Base::G),
            'U' | 'T' => Ok(Base::U),
            'N' | 'X' | 'R' | 'Y' | 'K' | 'M' | 'S' | 'W' |
            'B' | 'D' | 'H' | 'V' => Ok(Base::N),
            _ => Err(c),
        }
    }
}

impl From<Base> for char {
    fn from(b: Base) -> Self {
        match b {
            Base::A => 'A',
            Base::C => 'C',
            Base::G => 'G',
            Base::U => 'U',
            Base::N => 'N',
        }
    }
}

/// An encoded RNA sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NucleotideVec(pub Vec<Base>);

impl Deref for NucleotideVec {
    type Target = [Base];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<&str> for NucleotideVec {
    type Error = EnergyError;

    /// Positions in errors are 1-based.
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let bases = s.chars()
            .enumerate()
            .map(|(k, c)| Base::try_from(c)
                .map_err(|symbol| EnergyError::InvalidSequence { position: k + 1, symbol }))
            .collect::<Result<Vec<_>, _>>()?;
        if bases.len() >= NAIDX::MAX as usize {
            return Err(EnergyError::SequenceTooLong(bases.len()));
        }
        Ok(NucleotideVec(bases))
    }
}

impl fmt::Display for NucleotideVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.iter() {
            write!(f, "{}", char::from(b))?;
        }
        Ok(())
    }
}
