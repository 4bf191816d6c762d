use mineproof as mp;
use wasm_bindgen::prelude::*;

// Cell codes shared with the JS side: -1 hidden, -2 flag, -3 question mark,
// 0.. a revealed count.

fn cell_to_code(cell: mp::Cell) -> i8 {
    match cell {
        mp::Cell::Hidden => -1,
        mp::Cell::Flagged => -2,
        mp::Cell::Question => -3,
        mp::Cell::Revealed(n) => n as i8,
    }
}

fn cell_from_code(code: i8) -> Result<mp::Cell, String> {
    match code {
        -1 => Ok(mp::Cell::Hidden),
        -2 => Ok(mp::Cell::Flagged),
        -3 => Ok(mp::Cell::Question),
        0..=12 => Ok(mp::Cell::Revealed(code as u8)),
        _ => Err(format!("unknown cell code {}", code)),
    }
}

#[wasm_bindgen]
pub fn create_board(rows: usize, cols: usize, variant: String) -> Result<Vec<u8>, String> {
    console_error_panic_hook::set_once();

    let variant = variant.parse::<mp::Variant>().map_err(|e| e.to_string())?;
    Ok(mp::Board::new(rows, cols, variant).serialize())
}

#[wasm_bindgen]
pub fn set_total_mines(bts: Vec<u8>, mines: Option<u32>) -> Vec<u8> {
    console_error_panic_hook::set_once();

    let mut board = mp::Board::deserialize(&bts);
    board.total_mines = mines.map(|m| m as usize);
    board.serialize()
}

#[wasm_bindgen]
pub fn set_cell(bts: Vec<u8>, row: usize, col: usize, code: i8) -> Result<Vec<u8>, String> {
    console_error_panic_hook::set_once();

    let mut board = mp::Board::deserialize(&bts);
    if row >= board.rows || col >= board.cols {
        return Err(format!("cell ({}, {}) is out of bounds", row, col));
    }
    board.cells[row][col] = cell_from_code(code)?;
    Ok(board.serialize())
}

#[wasm_bindgen]
pub fn get_cells(bts: Vec<u8>) -> Vec<i8> {
    console_error_panic_hook::set_once();

    let board = mp::Board::deserialize(&bts);
    board
        .cells
        .into_iter()
        .flatten()
        .map(cell_to_code)
        .collect()
}

/// Runs the solver and returns one code per cell, row-major: 0 undetermined
/// or not in question, 1 provably safe, 2 provably a mine.
#[wasm_bindgen]
pub fn solve_board(bts: Vec<u8>) -> Result<Vec<i8>, String> {
    console_error_panic_hook::set_once();

    let board = mp::Board::deserialize(&bts);
    let verdict = mp::solve(&board).map_err(|e| e.to_string())?;

    let mut codes = vec![0i8; board.rows * board.cols];
    for point in &verdict.safe {
        codes[point.row * board.cols + point.col] = 1;
    }
    for point in &verdict.mines {
        codes[point.row * board.cols + point.col] = 2;
    }
    Ok(codes)
}
