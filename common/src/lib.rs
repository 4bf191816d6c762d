use itertools::Itertools;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use varisat::{CnfFormula, ExtendFormula, Lit, Solver, Var};

/// Represents a 2D coordinate on the board. `Ord` sorts row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Point {
    pub row: usize,
    pub col: usize,
}

/// The caller-visible state of a single cell, as captured in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Cell {
    /// Nothing is known about the cell.
    Hidden,
    /// Marked as a mine by the player. The cell is treated as an asserted
    /// mine: fixed in the constraint system and never re-queried.
    Flagged,
    /// Revealed with a neighbor-mine count.
    Revealed(u8),
    /// Revealed, but the count itself is unknown (a question mark). Holds a
    /// free unknown like `Hidden` and contributes no numeric constraint.
    Question,
}

impl Cell {
    /// Whether the solver should ask the engine about this cell.
    pub fn is_classifiable(self) -> bool {
        matches!(self, Cell::Hidden | Cell::Question)
    }

    /// Whether this cell holds a boolean unknown in the constraint system.
    pub fn holds_unknown(self) -> bool {
        matches!(self, Cell::Hidden | Cell::Flagged | Cell::Question)
    }
}

/// The adjacency rule in force for one solve call. It decides which cells a
/// revealed number ranges over, and in the `OddEven` case what the number
/// means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Variant {
    /// The 8 cells at Chebyshev distance 1.
    Standard,
    /// The 8 cells a knight's move away.
    Knight,
    /// The Standard 8 plus the orthogonal cells at distance 2.
    Manhattan,
    /// Standard reach, but the revealed number is the absolute difference
    /// between mine counts on the two checkerboard parities.
    OddEven,
    /// The orthogonal cells at distance 1 and 2.
    Cross,
}

const STANDARD_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

const KNIGHT_OFFSETS: [(isize, isize); 8] = [
    (-2, -1),
    (-2, 1),
    (-1, -2),
    (-1, 2),
    (1, -2),
    (1, 2),
    (2, -1),
    (2, 1),
];

const MANHATTAN_OFFSETS: [(isize, isize); 12] = [
    (-2, 0),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -2),
    (0, -1),
    (0, 1),
    (0, 2),
    (1, -1),
    (1, 0),
    (1, 1),
    (2, 0),
];

const CROSS_OFFSETS: [(isize, isize); 8] = [
    (-2, 0),
    (-1, 0),
    (0, -2),
    (0, -1),
    (0, 1),
    (0, 2),
    (1, 0),
    (2, 0),
];

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::Standard,
        Variant::Knight,
        Variant::Manhattan,
        Variant::OddEven,
        Variant::Cross,
    ];

    fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            Variant::Standard | Variant::OddEven => &STANDARD_OFFSETS,
            Variant::Knight => &KNIGHT_OFFSETS,
            Variant::Manhattan => &MANHATTAN_OFFSETS,
            Variant::Cross => &CROSS_OFFSETS,
        }
    }

    /// The largest value a revealed count can take under this rule.
    pub fn max_count(self) -> u8 {
        self.offsets().len() as u8
    }

    /// All valid neighbors of a point under this rule. Offsets falling
    /// outside the grid are dropped, never errors, so cells near edges
    /// simply have smaller neighbor sets.
    pub fn neighbors(self, at: Point, rows: usize, cols: usize) -> impl Iterator<Item = Point> {
        self.offsets().iter().filter_map(move |&(dr, dc)| {
            let nr = at.row as isize + dr;
            let nc = at.col as isize + dc;

            if nr >= 0 && nr < rows as isize && nc >= 0 && nc < cols as isize {
                Some(Point {
                    row: nr as usize,
                    col: nc as usize,
                })
            } else {
                None
            }
        })
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Variant::Standard => "Standard",
            Variant::Knight => "Knight",
            Variant::Manhattan => "Manhattan",
            Variant::OddEven => "OddEven",
            Variant::Cross => "Cross",
        };
        f.write_str(name)
    }
}

impl FromStr for Variant {
    type Err = SolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Standard" => Ok(Variant::Standard),
            "Knight" => Ok(Variant::Knight),
            "Manhattan" => Ok(Variant::Manhattan),
            "OddEven" => Ok(Variant::OddEven),
            "Cross" => Ok(Variant::Cross),
            other => Err(SolveError::InvalidVariant(other.to_string())),
        }
    }
}

/// An immutable snapshot of the board, as handed to the solver.
///
/// The surrounding application owns the live game document; a snapshot is
/// derived from it read-only before each solve call, so an in-flight solve
/// never observes edits.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Board {
    pub rows: usize,
    pub cols: usize,
    /// Cell states in row-major order: `cells[r][c]` is the state at (r, c).
    pub cells: Vec<Vec<Cell>>,
    /// The adjacency rule in force.
    pub variant: Variant,
    /// The total number of mines, when the puzzle declares one. `None`
    /// leaves the global count unconstrained.
    pub total_mines: Option<usize>,
}

impl Board {
    pub fn new(rows: usize, cols: usize, variant: Variant) -> Self {
        Board {
            rows,
            cols,
            cells: vec![vec![Cell::Hidden; cols]; rows],
            variant,
            total_mines: None,
        }
    }

    /// Deserializes a snapshot from bytes.
    pub fn deserialize(bts: &[u8]) -> Self {
        bcs::from_bytes(bts).unwrap()
    }

    /// Serializes the snapshot to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        bcs::to_bytes(self).unwrap()
    }

    /// Checks the snapshot against the input contract: dimensions of at
    /// least 1x1, rectangular rows, and revealed counts no larger than the
    /// variant's neighbor-set size.
    pub fn validate(&self) -> Result<(), SolveError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(SolveError::MalformedBoard(format!(
                "dimensions must be at least 1x1, got {}x{}",
                self.rows, self.cols
            )));
        }
        if self.cells.len() != self.rows {
            return Err(SolveError::MalformedBoard(format!(
                "snapshot has {} rows, expected {}",
                self.cells.len(),
                self.rows
            )));
        }
        for (r, row) in self.cells.iter().enumerate() {
            if row.len() != self.cols {
                return Err(SolveError::MalformedBoard(format!(
                    "row {} has {} cells, expected {}",
                    r,
                    row.len(),
                    self.cols
                )));
            }
            for (c, &cell) in row.iter().enumerate() {
                if let Cell::Revealed(number) = cell {
                    if number > self.variant.max_count() {
                        return Err(SolveError::MalformedBoard(format!(
                            "count {} at ({}, {}) exceeds the {} maximum of {}",
                            number,
                            r,
                            c,
                            self.variant,
                            self.variant.max_count()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Translates the visible snapshot into the formal constraint system the
    /// solver consumes. Expects a snapshot that passed `validate`.
    ///
    /// Every non-revealed cell becomes a boolean unknown. Each revealed
    /// number yields one constraint over the unknowns in its neighbor set; a
    /// constraint whose neighbor set is empty is kept rather than skipped,
    /// and the encoder resolves it uniformly (vacuous when the count is 0,
    /// unsatisfiable otherwise).
    pub fn constraints(&self) -> ConstraintSet {
        let mut variables = Vec::new();
        let mut asserted_mines = Vec::new();
        let mut queries = Vec::new();
        let mut counts = Vec::new();
        let mut parities = Vec::new();

        for (r, row) in self.cells.iter().enumerate() {
            for (c, &cell) in row.iter().enumerate() {
                let at = Point { row: r, col: c };

                match cell {
                    Cell::Hidden | Cell::Question => {
                        variables.push(at);
                        queries.push(at);
                    }
                    Cell::Flagged => {
                        variables.push(at);
                        asserted_mines.push(at);
                    }
                    Cell::Revealed(number) => {
                        if self.variant == Variant::OddEven {
                            let parity = (r + c) % 2;
                            let (same, opposite): (Vec<Point>, Vec<Point>) = self
                                .variant
                                .neighbors(at, self.rows, self.cols)
                                .filter(|&q| self.cells[q.row][q.col].holds_unknown())
                                .partition(|q| (q.row + q.col) % 2 == parity);
                            parities.push(ParityConstraint {
                                same,
                                opposite,
                                gap: number as usize,
                            });
                        } else {
                            let over: Vec<Point> = self
                                .variant
                                .neighbors(at, self.rows, self.cols)
                                .filter(|&q| self.cells[q.row][q.col].holds_unknown())
                                .collect();
                            counts.push(CountConstraint {
                                cells: over,
                                mines: number as usize,
                            });
                        }
                    }
                }
            }
        }

        // The global budget ranges over every unknown, flagged cells
        // included.
        let budget = self.total_mines.map(|mines| CountConstraint {
            cells: variables.clone(),
            mines,
        });

        ConstraintSet {
            variables,
            asserted_mines,
            queries,
            counts,
            parities,
            budget,
        }
    }
}

/// A single "exactly this many mines among these cells" constraint.
#[derive(Debug, Clone)]
pub struct CountConstraint {
    /// The unknown-holding cells this constraint ranges over.
    pub cells: Vec<Point>,
    /// The exact number of mines required among them.
    pub mines: usize,
}

/// The `OddEven` constraint form: the revealed number is the absolute
/// difference between mine counts on the two checkerboard parities of the
/// neighbor set.
#[derive(Debug, Clone)]
pub struct ParityConstraint {
    /// Neighbors sharing the revealed cell's checkerboard parity.
    pub same: Vec<Point>,
    /// Neighbors on the opposite parity.
    pub opposite: Vec<Point>,
    /// The required absolute difference between the two mine counts.
    pub gap: usize,
}

/// The full constraint system derived from one snapshot. Rebuilt fresh for
/// every solve call; no engine state survives between calls.
pub struct ConstraintSet {
    /// Every cell holding a boolean unknown, in row-major order.
    pub variables: Vec<Point>,
    /// Flagged cells, whose unknowns are pinned to true.
    pub asserted_mines: Vec<Point>,
    /// The cells to classify, in row-major order.
    pub queries: Vec<Point>,
    /// Count constraints from revealed cells under counting variants.
    pub counts: Vec<CountConstraint>,
    /// Parity-difference constraints from revealed cells under `OddEven`.
    pub parities: Vec<ParityConstraint>,
    /// The global cardinality constraint, when a mine budget is declared.
    pub budget: Option<CountConstraint>,
}

/// Cells proven safe and cells proven to be mines. A cell in neither set is
/// undetermined on current information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub safe: BTreeSet<Point>,
    pub mines: BTreeSet<Point>,
}

impl Verdict {
    /// True when nothing could be determined either way.
    pub fn is_empty(&self) -> bool {
        self.safe.is_empty() && self.mines.is_empty()
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn absorb(&mut self, other: Verdict) {
        self.safe.extend(other.safe);
        self.mines.extend(other.mines);
    }
}

/// The failure taxonomy of a solve call.
///
/// `Contradiction` and `Engine` carry the cells that were already classified
/// before the failure was detected; those verdicts remain valid.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// The variant name is not recognized. Rejected at the parse boundary,
    /// before any constraint work.
    #[error("unknown variant `{0}` (expected Standard, Knight, Manhattan, OddEven, or Cross)")]
    InvalidVariant(String),
    /// The snapshot violates the input contract. Rejected before the engine
    /// is engaged.
    #[error("malformed board: {0}")]
    MalformedBoard(String),
    /// The constraints admit no assignment at all: the revealed information
    /// is inconsistent with itself.
    #[error("board constraints are contradictory")]
    Contradiction { determined: Verdict },
    /// The SAT backend failed to evaluate a query. This is a genuine engine
    /// error, never a stand-in for unsatisfiability.
    #[error("sat engine failure: {source}")]
    Engine {
        determined: Verdict,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

// --- The certainty solver ---

/// Classifies every undetermined cell of `board` as provably safe, provably
/// a mine, or neither.
///
/// This is the whole surface a presentation layer needs: the snapshot is
/// checked against the input contract, translated into a constraint system,
/// and handed to the engine. The call is stateless and synchronous; a caller
/// abandoning one in flight simply drops the result.
pub fn solve(board: &Board) -> Result<Verdict, SolveError> {
    board.validate()?;
    let constraints = board.constraints();
    debug!(
        "solving {}x{} {} board: {} unknowns, {} count and {} parity constraints, budget {:?}",
        board.rows,
        board.cols,
        board.variant,
        constraints.variables.len(),
        constraints.counts.len(),
        constraints.parities.len(),
        board.total_mines
    );
    classify(&constraints)
}

/// Runs the assume-and-refute classification over every queried cell of a
/// constraint system.
///
/// The base system is encoded into the engine once; each per-cell test is a
/// scoped assumption rolled back after the query, so the two probes per cell
/// share the engine's learned state instead of rebuilding the formula. A
/// cell that cannot be a mine in any satisfying assignment is proven safe,
/// one that cannot be safe is proven a mine, and one that can be either is
/// left undetermined. Queries are independent of one another, which is what
/// allows splitting them across workers on native targets.
pub fn classify(constraints: &ConstraintSet) -> Result<Verdict, SolveError> {
    let verdict = classify_queries(constraints)?;
    debug!(
        "classified {} queried cells: {} provably safe, {} provably mines",
        constraints.queries.len(),
        verdict.safe.len(),
        verdict.mines.len()
    );
    Ok(verdict)
}

/// Number of queried cells each engine instance handles before the
/// remainder is handed to another worker.
#[cfg(not(target_arch = "wasm32"))]
const QUERY_CHUNK: usize = 16;

#[cfg(not(target_arch = "wasm32"))]
fn classify_queries(constraints: &ConstraintSet) -> Result<Verdict, SolveError> {
    use rayon::prelude::*;

    if constraints.queries.len() <= QUERY_CHUNK {
        return classify_cells(constraints, &constraints.queries);
    }

    let outcomes: Vec<Result<Verdict, SolveError>> = constraints
        .queries
        .par_chunks(QUERY_CHUNK)
        .map(|chunk| classify_cells(constraints, chunk))
        .collect();

    // Merge the chunk verdicts. On failure, whatever the surviving chunks
    // determined rides along with the first error.
    let mut verdict = Verdict::default();
    let mut failure: Option<SolveError> = None;
    for outcome in outcomes {
        match outcome {
            Ok(part) => verdict.absorb(part),
            Err(err) => failure = failure.or(Some(err)),
        }
    }

    match failure {
        None => Ok(verdict),
        Some(SolveError::Contradiction { mut determined }) => {
            determined.absorb(verdict);
            Err(SolveError::Contradiction { determined })
        }
        Some(SolveError::Engine {
            mut determined,
            source,
        }) => {
            determined.absorb(verdict);
            Err(SolveError::Engine { determined, source })
        }
        Some(other) => Err(other),
    }
}

#[cfg(target_arch = "wasm32")]
fn classify_queries(constraints: &ConstraintSet) -> Result<Verdict, SolveError> {
    classify_cells(constraints, &constraints.queries)
}

/// Classifies `cells` against a fresh engine holding the base system.
fn classify_cells(constraints: &ConstraintSet, cells: &[Point]) -> Result<Verdict, SolveError> {
    let mut solver = Solver::new();
    let mut var_map: BTreeMap<Point, Var> = BTreeMap::new();

    // 1. Allocate a SAT variable per unknown, in row-major order.
    for &point in &constraints.variables {
        var_map.insert(point, solver.new_var());
    }

    // 2. Encode the base system as CNF using batch operations.
    let mut formula = CnfFormula::new();

    for point in &constraints.asserted_mines {
        if let Some(&var) = var_map.get(point) {
            formula.add_clause(&[Lit::from_var(var, true)]);
        }
    }

    for constraint in constraints.counts.iter().chain(constraints.budget.iter()) {
        let lits: Vec<Lit> = constraint
            .cells
            .iter()
            .filter_map(|p| var_map.get(p).copied().map(|v| Lit::from_var(v, true)))
            .collect();
        encode_exactly_k(&mut formula, &mut solver, &lits, constraint.mines);
    }

    let to_lits = |points: &[Point]| -> Vec<Lit> {
        points
            .iter()
            .filter_map(|p| var_map.get(p).copied().map(|v| Lit::from_var(v, true)))
            .collect()
    };
    for constraint in &constraints.parities {
        encode_parity_gap(
            &mut formula,
            &to_lits(&constraint.same),
            &to_lits(&constraint.opposite),
            constraint.gap,
        );
    }

    solver.add_formula(&formula);

    // 3. The base system must admit at least one assignment before any
    //    per-cell question is worth asking.
    let consistent = solver.solve().map_err(|source| SolveError::Engine {
        determined: Verdict::default(),
        source: source.into(),
    })?;
    if !consistent {
        return Err(SolveError::Contradiction {
            determined: Verdict::default(),
        });
    }

    // 4. Probe each queried cell both ways under scoped assumptions.
    let mut verdict = Verdict::default();
    for &point in cells {
        // A queried cell without an unknown is unconstrained either way.
        let Some(&var) = var_map.get(&point) else {
            continue;
        };

        let mine_possible = match probe(&mut solver, Lit::from_var(var, true)) {
            Ok(sat) => sat,
            Err(source) => {
                return Err(SolveError::Engine {
                    determined: verdict,
                    source,
                });
            }
        };
        let safe_possible = match probe(&mut solver, Lit::from_var(var, false)) {
            Ok(sat) => sat,
            Err(source) => {
                return Err(SolveError::Engine {
                    determined: verdict,
                    source,
                });
            }
        };

        match (mine_possible, safe_possible) {
            (true, true) => {}
            (true, false) => {
                verdict.mines.insert(point);
            }
            (false, true) => {
                verdict.safe.insert(point);
            }
            // Refuted both ways means the base system itself has no
            // assignment, which the consistency check rules out. Treated as
            // a contradiction all the same.
            (false, false) => {
                return Err(SolveError::Contradiction {
                    determined: verdict,
                });
            }
        }
    }

    Ok(verdict)
}

/// One satisfiability probe of the base system plus a single assumption. The
/// assumption is scoped to this call and cleared before returning.
fn probe(
    solver: &mut Solver,
    assumption: Lit,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    solver.assume(&[assumption]);
    let result = solver.solve();
    solver.assume(&[]);
    result.map_err(Into::into)
}

// --- CNF encodings ---

/// Constraints up to this size use the naive combination encoding; anything
/// larger (in practice only the global budget) switches to the sequential
/// counter.
const NAIVE_ENCODING_LIMIT: usize = 10;

/// Encodes "exactly k of these literals are true".
fn encode_exactly_k(formula: &mut CnfFormula, solver: &mut Solver, lits: &[Lit], k: usize) {
    encode_at_most_k(formula, solver, lits, k);
    encode_at_least_k(formula, solver, lits, k);
}

/// Encodes "at most k of these literals are true".
fn encode_at_most_k(formula: &mut CnfFormula, solver: &mut Solver, lits: &[Lit], k: usize) {
    if k >= lits.len() {
        return; // Always satisfied.
    }
    if k == 0 {
        // Every literal must be false.
        for &lit in lits {
            formula.add_clause(&[!lit]);
        }
        return;
    }

    if lits.len() <= NAIVE_ENCODING_LIMIT {
        // Any k+1 of the literals must include a false one.
        for combo in lits.iter().copied().combinations(k + 1) {
            let clause: Vec<Lit> = combo.iter().map(|&lit| !lit).collect();
            formula.add_clause(&clause);
        }
    } else {
        encode_counter_at_most_k(formula, solver, lits, k);
    }
}

/// Encodes "at least k of these literals are true".
fn encode_at_least_k(formula: &mut CnfFormula, solver: &mut Solver, lits: &[Lit], k: usize) {
    if k == 0 {
        return; // Always satisfied.
    }
    if k > lits.len() {
        // Unsatisfiable as stated; the empty clause records that.
        formula.add_clause(&[]);
        return;
    }

    // At least k true literals is at most (n - k) false ones.
    let negated: Vec<Lit> = lits.iter().map(|&lit| !lit).collect();
    encode_at_most_k(formula, solver, &negated, lits.len() - k);
}

/// Sequential counter encoding of "at most k", for constraints too large for
/// the naive form. The auxiliary literal `reg[i][j]` reads "at least j+1
/// true literals among the first i+1".
fn encode_counter_at_most_k(formula: &mut CnfFormula, solver: &mut Solver, lits: &[Lit], k: usize) {
    let n = lits.len();
    debug_assert!(k >= 1 && k < n);

    let reg: Vec<Vec<Lit>> = (0..n - 1)
        .map(|_| {
            (0..k)
                .map(|_| Lit::from_var(solver.new_var(), true))
                .collect()
        })
        .collect();

    // The first literal seeds the counter.
    formula.add_clause(&[!lits[0], reg[0][0]]);
    for j in 1..k {
        formula.add_clause(&[!reg[0][j]]);
    }

    for i in 1..n - 1 {
        // Counts carry forward, stepping up where the literal is true.
        formula.add_clause(&[!lits[i], reg[i][0]]);
        formula.add_clause(&[!reg[i - 1][0], reg[i][0]]);
        for j in 1..k {
            formula.add_clause(&[!lits[i], !reg[i - 1][j - 1], reg[i][j]]);
            formula.add_clause(&[!reg[i - 1][j], reg[i][j]]);
        }
        // A true literal on top of a saturated counter is an overflow.
        formula.add_clause(&[!lits[i], !reg[i - 1][k - 1]]);
    }
    formula.add_clause(&[!lits[n - 1], !reg[n - 2][k - 1]]);
}

/// Encodes the parity-difference form: the absolute difference between the
/// number of true literals in `same` and in `opposite` equals `gap`.
///
/// Parity groups come from a single neighbor set, so enumerating the
/// assignments and blocking the violating ones outright stays small.
fn encode_parity_gap(formula: &mut CnfFormula, same: &[Lit], opposite: &[Lit], gap: usize) {
    assert!(
        same.len() + opposite.len() <= 16,
        "parity constraints span at most one neighbor set"
    );
    let all: Vec<Lit> = same.iter().chain(opposite.iter()).copied().collect();

    for mask in 0u32..(1u32 << all.len()) {
        let in_same = (mask & ((1u32 << same.len()) - 1)).count_ones() as isize;
        let in_opposite = (mask >> same.len()).count_ones() as isize;
        if (in_same - in_opposite).unsigned_abs() == gap {
            continue;
        }

        // Block this violating assignment.
        let clause: Vec<Lit> = all
            .iter()
            .enumerate()
            .map(|(i, &lit)| if (mask >> i) & 1 == 1 { !lit } else { lit })
            .collect();
        formula.add_clause(&clause);
    }
}
