use mineproof::*;
use rand::Rng;

// Demo defaults: a 10x10 board seeded with 10 mines.
const ROWS: usize = 10;
const COLS: usize = 10;
const MINES: usize = 10;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // --- 1. Configuration ---
    let variant = match std::env::args().nth(1) {
        Some(name) => name.parse::<Variant>()?,
        None => Variant::Standard,
    };
    let mut rng = rand::rng();

    println!("--- Certainty Solver Demo ({} rules) ---", variant);

    // --- 2. Scatter a hidden mine layout ---
    let mut mined = vec![vec![false; COLS]; ROWS];
    let mut placed = 0;
    while placed < MINES {
        let r = rng.random_range(0..ROWS);
        let c = rng.random_range(0..COLS);
        if !mined[r][c] {
            mined[r][c] = true;
            placed += 1;
        }
    }

    // --- 3. Reveal a random subset of the safe cells ---
    let mut board = Board::new(ROWS, COLS, variant);
    board.total_mines = Some(MINES);
    for r in 0..ROWS {
        for c in 0..COLS {
            if !mined[r][c] && rng.random_bool(0.5) {
                let at = Point { row: r, col: c };
                board.cells[r][c] = Cell::Revealed(observed(&mined, at, variant));
            }
        }
    }

    println!("Board as the player sees it:");
    print_board(&board);

    // --- 4. Solve ---
    let verdict = solve(&board)?;

    let unrevealed = board
        .cells
        .iter()
        .flatten()
        .filter(|cell| cell.is_classifiable())
        .count();

    if verdict.is_empty() {
        println!("No certain cells found among the {} unrevealed.", unrevealed);
        return Ok(());
    }

    println!(
        "Proved {} cells safe and {} cells mined (of {} unrevealed):",
        verdict.safe.len(),
        verdict.mines.len(),
        unrevealed
    );
    print_verdict(&board, &verdict);

    // --- 5. Honesty check against the hidden layout ---
    for point in &verdict.mines {
        assert!(
            mined[point.row][point.col],
            "solver called a safe cell a mine"
        );
    }
    for point in &verdict.safe {
        assert!(
            !mined[point.row][point.col],
            "solver called a mined cell safe"
        );
    }
    println!("Every verdict matches the hidden layout.");

    Ok(())
}

/// The number the board would show at `at` under the given rules.
fn observed(mined: &[Vec<bool>], at: Point, variant: Variant) -> u8 {
    let rows = mined.len();
    let cols = mined[0].len();

    if variant == Variant::OddEven {
        let mut same = 0i8;
        let mut opposite = 0i8;
        for q in variant.neighbors(at, rows, cols) {
            if mined[q.row][q.col] {
                if (q.row + q.col) % 2 == (at.row + at.col) % 2 {
                    same += 1;
                } else {
                    opposite += 1;
                }
            }
        }
        (same - opposite).unsigned_abs()
    } else {
        variant
            .neighbors(at, rows, cols)
            .filter(|q| mined[q.row][q.col])
            .count() as u8
    }
}

fn print_board(board: &Board) {
    // Print header
    print!("   ");
    for c in 0..board.cols {
        print!("{:^3}", c);
    }
    println!("\n  +{}", "---".repeat(board.cols));

    // Print rows
    for (r, row) in board.cells.iter().enumerate() {
        print!("{:^2}|", r);
        for cell in row {
            let display = match cell {
                Cell::Hidden => " ■ ".to_string(),
                Cell::Flagged => " ⚑ ".to_string(),
                Cell::Question => " ? ".to_string(),
                Cell::Revealed(n) => format!("{:^3}", n),
            };
            print!("{}", display);
        }
        println!();
    }
    println!();
}

/// The board again, with proven-safe cells drawn as S and proven mines as M.
fn print_verdict(board: &Board, verdict: &Verdict) {
    print!("   ");
    for c in 0..board.cols {
        print!("{:^3}", c);
    }
    println!("\n  +{}", "---".repeat(board.cols));

    for (r, row) in board.cells.iter().enumerate() {
        print!("{:^2}|", r);
        for (c, cell) in row.iter().enumerate() {
            let at = Point { row: r, col: c };
            let display = if verdict.safe.contains(&at) {
                " S ".to_string()
            } else if verdict.mines.contains(&at) {
                " M ".to_string()
            } else {
                match cell {
                    Cell::Hidden => " ■ ".to_string(),
                    Cell::Flagged => " ⚑ ".to_string(),
                    Cell::Question => " ? ".to_string(),
                    Cell::Revealed(n) => format!("{:^3}", n),
                }
            };
            print!("{}", display);
        }
        println!();
    }
    println!();
}
