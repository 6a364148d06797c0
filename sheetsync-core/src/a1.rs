//! A1 range notation.
//!
//! Columns use bijective base-26: `A..Z` are 1..26, then `AA` is 27. There is
//! no zero digit, which is why this is not ordinary base-26.

/// Converts a 1-based column index into column letters (`1 -> "A"`, `27 -> "AA"`).
///
/// Index 0 has no representation and yields an empty string.
pub fn column_letters(index: u32) -> String {
    let mut n = index;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Converts column letters back into a 1-based index. Case-insensitive.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        acc.checked_mul(26)?.checked_add(c as u32 - 'A' as u32 + 1)
    })
}

/// The block starting at `A1` spanning `rows` x `cols`.
pub fn block_range(rows: usize, cols: usize) -> String {
    format!("A1:{}{}", column_letters(cols as u32), rows)
}

/// A single row, `A{row}:{last}{row}`.
pub fn row_range(row: usize, cols: usize) -> String {
    rows_range(row, row, cols)
}

/// Rows `first..=last` across `cols` columns.
pub fn rows_range(first: usize, last: usize, cols: usize) -> String {
    format!("A{}:{}{}", first, column_letters(cols as u32), last)
}

/// From row `first` down to the end of the sheet.
pub fn open_rows_range(first: usize, cols: usize) -> String {
    format!("A{}:{}", first, column_letters(cols as u32))
}

/// A whole column, e.g. `C:C`.
pub fn column_range(col: usize) -> String {
    let letters = column_letters(col as u32);
    format!("{}:{}", letters, letters)
}

/// Range spec that addresses every cell of a sheet.
pub const WHOLE_SHEET: &str = "";

/// A parsed rectangular range. Rows are 1-based; `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub first_col: u32,
    pub first_row: u32,
    pub last_col: Option<u32>,
    pub last_row: Option<u32>,
}

impl CellRange {
    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.first_row
            && col >= self.first_col
            && self.last_row.map_or(true, |r| row <= r)
            && self.last_col.map_or(true, |c| col <= c)
    }
}

/// Parses `A1:C10`, `A:A`, `A2:G`, `B3` or [`WHOLE_SHEET`].
pub fn parse_range(spec: &str) -> Option<CellRange> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Some(CellRange {
            first_col: 1,
            first_row: 1,
            last_col: None,
            last_row: None,
        });
    }

    let (start, end) = match spec.split_once(':') {
        Some((s, e)) => (s, Some(e)),
        None => (spec, None),
    };

    let (first_col, first_row) = parse_cell(start)?;
    let first_col = first_col?;
    let first_row = first_row.unwrap_or(1);

    let (last_col, last_row) = match end {
        // "A1:C" and "A:A" leave the rows open
        Some(e) => parse_cell(e)?,
        None => {
            let (_, row) = parse_cell(start)?;
            (Some(first_col), row)
        }
    };

    Some(CellRange {
        first_col,
        first_row,
        last_col,
        last_row,
    })
}

fn parse_cell(cell: &str) -> Option<(Option<u32>, Option<u32>)> {
    let split = cell
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(cell.len());
    let (letters, digits) = cell.split_at(split);
    let col = if letters.is_empty() {
        None
    } else {
        Some(column_index(letters)?)
    };
    let row = if digits.is_empty() {
        None
    } else {
        Some(digits.parse().ok()?)
    };
    if col.is_none() && row.is_none() {
        return None;
    }
    Some((col, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters_single() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(2), "B");
        assert_eq!(column_letters(26), "Z");
    }

    #[test]
    fn test_column_letters_bijective_boundaries() {
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(28), "AB");
        assert_eq!(column_letters(52), "AZ");
        assert_eq!(column_letters(53), "BA");
        assert_eq!(column_letters(702), "ZZ");
        assert_eq!(column_letters(703), "AAA");
        assert_eq!(column_letters(18278), "ZZZ");
    }

    #[test]
    fn test_column_letters_zero() {
        assert_eq!(column_letters(0), "");
    }

    #[test]
    fn test_column_index_inverts_letters() {
        for index in [1, 26, 27, 45, 702, 703, 16384] {
            assert_eq!(column_index(&column_letters(index)), Some(index));
        }
        assert_eq!(column_index("aa"), Some(27));
        assert_eq!(column_index(""), None);
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn test_range_builders() {
        assert_eq!(block_range(501, 3), "A1:C501");
        assert_eq!(row_range(4, 7), "A4:G4");
        assert_eq!(rows_range(2, 9, 30), "A2:AD9");
        assert_eq!(open_rows_range(5, 7), "A5:G");
        assert_eq!(column_range(1), "A:A");
    }

    #[test]
    fn test_parse_range_variants() {
        let r = parse_range("A1:C10").unwrap();
        assert_eq!((r.first_col, r.first_row), (1, 1));
        assert_eq!((r.last_col, r.last_row), (Some(3), Some(10)));

        let r = parse_range("A:A").unwrap();
        assert_eq!(r.last_col, Some(1));
        assert_eq!(r.last_row, None);
        assert!(r.contains(50_000, 1));
        assert!(!r.contains(1, 2));

        let r = parse_range("B5:G").unwrap();
        assert_eq!((r.first_col, r.first_row), (2, 5));
        assert_eq!(r.last_row, None);

        let r = parse_range("").unwrap();
        assert!(r.contains(1, 1) && r.contains(99, 99));

        assert!(parse_range("1A:??").is_none());
    }
}
