//! Nearest-neighbor parameter tables.
//!
//! The built-in set follows the Turner 2004 rules for stacking, loop
//! initiation, dangles and mismatches. The 1x1, 1x2 and 2x2 interior loop
//! tables are derived from the mismatch tables by rule. Complete
//! measured tables can be supplied as a JSON bundle, see
//! [`EnergyTables::from_json_str`].

use std::collections::BTreeMap;
use std::io::Read;

use log::debug;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::Base;
use crate::EnergyError;
use crate::INF;
use crate::MAXLOOP;

/// A dense table indexed by `K` bases, `Base::COUNT` values per axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<i32>", into = "Vec<i32>")]
pub struct BaseTable<const K: usize> {
    values: Vec<i32>,
}

impl<const K: usize> BaseTable<K> {
    pub const SIZE: usize = Base::COUNT.pow(K as u32);

    pub fn from_fn<F: Fn([Base; K]) -> i32>(f: F) -> Self {
        let values = (0..Self::SIZE)
            .map(|flat| {
                let mut key = [Base::A; K];
                let mut rest = flat;
                for slot in key.iter_mut().rev() {
                    *slot = Base::ALL[rest % Base::COUNT];
                    rest /= Base::COUNT;
                }
                f(key)
            })
            .collect();
        Self { values }
    }

    #[inline]
    pub fn get(&self, key: [Base; K]) -> i32 {
        let flat = key.iter().fold(0, |acc, b| acc * Base::COUNT + b.index());
        self.values[flat]
    }
}

impl<const K: usize> TryFrom<Vec<i32>> for BaseTable<K> {
    type Error = String;

    fn try_from(values: Vec<i32>) -> Result<Self, Self::Error> {
        if values.len() != Self::SIZE {
            return Err(format!("{}-base table has {} entries, expected {}",
                K, values.len(), Self::SIZE));
        }
        Ok(Self { values })
    }
}

impl<const K: usize> From<BaseTable<K>> for Vec<i32> {
    fn from(table: BaseTable<K>) -> Self {
        table.values
    }
}

/// Loop-size indexed table, entries 0..=MAXLOOP.
pub type LoopTable = [i32; MAXLOOP + 1];

/// Affine multiloop penalty `closing + branch·branches + unpaired·bases`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiloopParams {
    pub closing: i32,
    pub unpaired: i32,
    pub branch: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyTables {
    /// `[i, j, p, q]` for pair i·j enclosing p·q = (i+1)·(j-1).
    pub stack: BaseTable<4>,
    /// `[i, j, i+1, j-1]`
    pub hairpin_mismatch: BaseTable<4>,
    /// `[i, j, i+1, j-1]`, also applied to the inner pair read from inside.
    pub interior_mismatch: BaseTable<4>,
    pub interior_mismatch_23: BaseTable<4>,
    /// `[a, b, x, y]` for pair a·b, x 5' of a, y 3' of b.
    pub multi_mismatch: BaseTable<4>,
    pub exterior_mismatch: BaseTable<4>,
    /// `[a, b, x]`, x dangling 5' of a.
    pub dangle5: BaseTable<3>,
    /// `[a, b, y]`, y dangling 3' of b.
    pub dangle3: BaseTable<3>,
    /// `[i, i+1, p, j, j-1, q]`
    pub int11: BaseTable<6>,
    /// `[i, j, i+1, j-1, j-2, p, q]`, the single unpaired base comes first.
    pub int21: BaseTable<7>,
    /// `[i, p, j, q, i+1, i+2, j-1, j-2]`
    pub int22: BaseTable<8>,
    pub hairpin: LoopTable,
    pub bulge: LoopTable,
    pub interior: LoopTable,
    /// Bonus for special hairpins of size 4, keyed by the six bases i..=j.
    pub tetraloops: BTreeMap<String, i32>,
    pub multiloop: MultiloopParams,
    pub terminal_au: i32,
    /// Coefficient of the logarithmic loop extrapolation.
    pub prelog: f64,
    pub ninio: [i32; 3],
    pub max_ninio: i32,
    pub gu_bonus: i32,
    pub poly_c_triloop: i32,
    pub poly_c_intercept: i32,
    pub poly_c_slope: i32,
}

impl Default for EnergyTables {
    fn default() -> Self {
        EnergyTables::turner2004()
    }
}

/// Stacking energies by pair type, rows and columns CG GC GU UG AU UA.
/// The column is the inner pair read from inside the stack (q, p).
const STACK: [[i32; 6]; 6] = [
    [-240, -330, -210, -140, -210, -210],
    [-330, -340, -250, -150, -220, -240],
    [-210, -250,  130,  -50, -140, -130],
    [-140, -150,  -50,   30,  -60, -100],
    [-210, -220, -140,  -60, -110,  -90],
    [-210, -240, -130, -100,  -90, -130],
];

/// Rows CG GC GU UG AU UA, columns A C G U.
const DANGLE5: [[i32; 4]; 6] = [
    [-50, -30, -20, -10],
    [-20, -30,   0,   0],
    [-30, -30, -40, -20],
    [-30, -10, -20, -20],
    [-30, -30, -40, -20],
    [-30, -10, -20, -20],
];

const DANGLE3: [[i32; 4]; 6] = [
    [-110,  -40, -130,  -60],
    [-170,  -80, -170, -120],
    [ -70,  -10,  -70,  -10],
    [ -80,  -50,  -80,  -60],
    [ -70,  -10,  -70,  -10],
    [ -80,  -50,  -80,  -60],
];

const HAIRPIN: LoopTable = [
    INF, INF, INF, 540, 560, 570, 540, 600, 550, 640,
    650, 660, 670, 678, 686, 694, 701, 707, 713, 719,
    725, 730, 735, 740, 744, 749, 753, 757, 761, 765, 769,
];

const BULGE: LoopTable = [
    INF, 380, 280, 320, 360, 400, 440, 459, 470, 480,
    490, 500, 510, 519, 527, 534, 541, 548, 554, 560,
    565, 571, 576, 580, 585, 589, 594, 598, 602, 605, 609,
];

const INTERIOR: LoopTable = [
    INF, INF,  50, 160, 110, 200, 200, 210, 230, 240,
    250, 260, 270, 280, 290, 290, 300, 310, 310, 320,
    330, 330, 340, 340, 350, 350, 350, 360, 360, 370, 370,
];

const TETRALOOPS: [(&str, i32); 30] = [
    ("GGGGAC", -300), ("GGUGAC", -300), ("CGAAAG", -300), ("GGAGAC", -300),
    ("CGCAAG", -300), ("GGAAAC", -300), ("CGGAAG", -300), ("CUUCGG", -300),
    ("CGUGAG", -300), ("CGAAGG", -250), ("CUACGG", -250), ("GGCAAC", -250),
    ("CGCGAG", -250), ("UGAGAG", -250), ("CGAGAG", -200), ("AGAAAU", -200),
    ("CGUAAG", -200), ("CUAACG", -200), ("UGAAAG", -200), ("GGAAGC", -150),
    ("GGGAAC", -150), ("UGAAAA", -150), ("AGCAAU", -150), ("AGUAAU", -150),
    ("CGGGAG", -150), ("AGUGAU", -150), ("GGCGAC", -150), ("GGGAGC", -150),
    ("GUGAAC", -150), ("UGGAAA", -150),
];

/// Row of a canonical pair in the pair-type tables above.
fn pair_type(a: Base, b: Base) -> Option<usize> {
    match (a, b) {
        (Base::C, Base::G) => Some(0),
        (Base::G, Base::C) => Some(1),
        (Base::G, Base::U) => Some(2),
        (Base::U, Base::G) => Some(3),
        (Base::A, Base::U) => Some(4),
        (Base::U, Base::A) => Some(5),
        _ => None,
    }
}

fn dangle_value(table: &[[i32; 4]; 6], a: Base, b: Base, x: Base) -> i32 {
    match (pair_type(a, b), x) {
        (None, _) | (_, Base::N) => 0,
        (Some(t), x) => table[t][x.index()],
    }
}

fn weak(a: Base, b: Base) -> i32 {
    if a.is_weak_pair(b) { 1 } else { 0 }
}

fn hairpin_mismatch(a: Base, b: Base, x: Base, y: Base) -> i32 {
    if !a.can_pair(b) {
        return 0;
    }
    let base = if a.is_weak_pair(b) { -50 } else { -80 };
    let bonus = match (x, y) {
        (Base::U, Base::U) => -90,
        (Base::G, Base::A) | (Base::G, Base::G) => -80,
        _ => 0,
    };
    base + bonus
}

fn interior_mismatch(a: Base, b: Base, x: Base, y: Base) -> i32 {
    if !a.can_pair(b) {
        return 0;
    }
    let bonus = match (x, y) {
        (Base::G, Base::A) => -110,
        (Base::A, Base::G) => -80,
        (Base::U, Base::U) => -70,
        _ => 0,
    };
    70 * weak(a, b) + bonus
}

fn interior_mismatch_23(a: Base, b: Base, x: Base, y: Base) -> i32 {
    if !a.can_pair(b) {
        return 0;
    }
    let bonus = match (x, y) {
        (Base::G, Base::A) => -120,
        (Base::A, Base::G) => -80,
        (Base::U, Base::U) => -50,
        _ => 0,
    };
    70 * weak(a, b) + bonus
}

impl EnergyTables {
    /// The built-in parameter set.
    pub fn turner2004() -> Self {
        let both_pair = |a: Base, b: Base, c: Base, d: Base| a.can_pair(b) && c.can_pair(d);

        let stack = BaseTable::<4>::from_fn(|[a, b, c, d]| {
            match (pair_type(a, b), pair_type(d, c)) {
                (Some(outer), Some(inner)) => STACK[outer][inner],
                _ => INF,
            }
        });
        let dangle5 = BaseTable::<3>::from_fn(|[a, b, x]| dangle_value(&DANGLE5, a, b, x));
        let dangle3 = BaseTable::<3>::from_fn(|[a, b, y]| dangle_value(&DANGLE3, a, b, y));
        let multi_mismatch = BaseTable::<4>::from_fn(|[a, b, x, y]| {
            dangle_value(&DANGLE5, a, b, x) + dangle_value(&DANGLE3, a, b, y)
        });
        let exterior_mismatch = BaseTable::<4>::from_fn(|[a, b, x, y]| {
            let bonus = match (x, y) {
                (Base::G, Base::A) | (Base::U, Base::U) if a.can_pair(b) => -30,
                _ => 0,
            };
            dangle_value(&DANGLE5, a, b, x) + dangle_value(&DANGLE3, a, b, y) + bonus
        });

        let int11 = BaseTable::<6>::from_fn(|[a, x, c, b, y, d]| {
            if !both_pair(a, b, c, d) {
                return INF;
            }
            let core = if x == Base::G && y == Base::G { -140 } else { 50 };
            core + 70 * weak(a, b) + 70 * weak(c, d)
        });
        let int21 = BaseTable::<7>::from_fn(|[a, b, _x, _y1, _y2, c, d]| {
            if !both_pair(a, b, c, d) {
                return INF;
            }
            230 + 70 * weak(a, b) + 70 * weak(c, d)
        });
        let int22 = BaseTable::<8>::from_fn(|[a, c, b, d, x1, x2, y1, y2]| {
            if !both_pair(a, b, c, d) {
                return INF;
            }
            INTERIOR[4] + interior_mismatch(a, b, x1, y1) + interior_mismatch(d, c, y2, x2)
        });

        EnergyTables {
            stack,
            hairpin_mismatch: BaseTable::<4>::from_fn(|[a, b, x, y]| hairpin_mismatch(a, b, x, y)),
            interior_mismatch: BaseTable::<4>::from_fn(|[a, b, x, y]| interior_mismatch(a, b, x, y)),
            interior_mismatch_23: BaseTable::<4>::from_fn(|[a, b, x, y]| interior_mismatch_23(a, b, x, y)),
            multi_mismatch,
            exterior_mismatch,
            dangle5,
            dangle3,
            int11,
            int21,
            int22,
            hairpin: HAIRPIN,
            bulge: BULGE,
            interior: INTERIOR,
            tetraloops: TETRALOOPS.iter().map(|&(k, v)| (k.to_string(), v)).collect(),
            multiloop: MultiloopParams { closing: 340, unpaired: 0, branch: 40 },
            terminal_au: 50,
            prelog: 107.856,
            ninio: [0, 60, 60],
            max_ninio: 300,
            gu_bonus: -220,
            poly_c_triloop: 140,
            poly_c_intercept: 160,
            poly_c_slope: 30,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, EnergyError> {
        let tables: EnergyTables = serde_json::from_str(json)?;
        tables.validate()?;
        Ok(tables)
    }

    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, EnergyError> {
        let tables: EnergyTables = serde_json::from_reader(reader)?;
        tables.validate()?;
        Ok(tables)
    }

    pub fn to_json_string(&self) -> Result<String, EnergyError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Checks what serde cannot: tetraloop keys must be six nucleotides.
    /// Suspicious but usable values are only reported.
    fn validate(&self) -> Result<(), EnergyError> {
        debug!("Validating energy tables with {} special hairpins.", self.tetraloops.len());
        for key in self.tetraloops.keys() {
            if key.chars().count() != 6 {
                return Err(EnergyError::TableShape {
                    table: format!("tetraloops[{}]", key),
                    found: key.chars().count(),
                    expected: 6,
                });
            }
            if let Some((k, symbol)) = key.chars().enumerate()
                .find(|(_, c)| Base::try_from(*c).is_err()) {
                return Err(EnergyError::InvalidSequence { position: k + 1, symbol });
            }
        }
        if self.prelog.is_nan() || self.prelog <= 0.0 {
            warn!("Loop extrapolation coefficient {} is not positive; long loops get cheaper with size.", self.prelog);
        }
        if self.multiloop.closing < 0 || self.multiloop.branch < 0 {
            warn!("Negative multiloop penalties ({:?}) favor ever more branches.", self.multiloop);
        }
        Ok(())
    }
}
