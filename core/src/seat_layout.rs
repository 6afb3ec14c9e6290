//! Seat layout bitmap codec.
//!
//! A hall's seating grid is a fixed 16×16 matrix of [`CellKind`] values packed
//! at 2 bits per cell into a 64-byte buffer. The buffer is what gets persisted
//! (as an opaque blob) on the hall.
//!
//! ```text
//! index  = row * 16 + col
//! offset = index * 2
//! byte   = offset >> 3
//! shift  = offset & 7
//! ```
//!
//! A `SeatLayout` is plain owned data with no interior synchronization; callers
//! that share one across tasks must provide their own exclusivity.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of rows in a hall grid
pub const ROWS: u8 = 16;
/// Number of columns in a hall grid
pub const COLUMNS: u8 = 16;
/// Encoded size of a grid in bytes
pub const LAYOUT_BYTES: usize = 64;

const CELL_BITS: usize = 2;
const CELL_MASK: u8 = 0b11;

/// Errors raised by the seat layout codec.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// Buffer is not exactly [`LAYOUT_BYTES`] long.
    #[error("Invalid layout: expected {LAYOUT_BYTES} bytes, got {len}")]
    InvalidLayout {
        /// Length of the rejected buffer
        len: usize,
    },

    /// Row or column outside the 16×16 grid.
    #[error("Seat position out of range: row {row}, column {column}")]
    OutOfRange {
        /// Requested row
        row: u8,
        /// Requested column
        column: u8,
    },
}

/// Kind of a single grid cell, with its fixed 2-bit code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    /// No seat (aisle, wall)
    #[default]
    Empty,
    /// Regular seat
    Standard,
    /// Premium seat
    Vip,
    /// Wheelchair-accessible space
    Disabled,
}

impl CellKind {
    /// 2-bit code of this kind
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Empty => 0b00,
            Self::Standard => 0b01,
            Self::Vip => 0b10,
            Self::Disabled => 0b11,
        }
    }

    /// Decodes a 2-bit code. Only the low two bits are considered.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & CELL_MASK {
            0b00 => Self::Empty,
            0b01 => Self::Standard,
            0b10 => Self::Vip,
            _ => Self::Disabled,
        }
    }

    /// Whether this cell holds a sellable seat
    #[must_use]
    pub const fn is_seat(self) -> bool {
        !matches!(self, Self::Empty)
    }
}

/// A 16×16 hall grid packed into 64 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeatLayout {
    cells: [u8; LAYOUT_BYTES],
}

impl SeatLayout {
    /// Creates an all-empty layout
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cells: [0; LAYOUT_BYTES],
        }
    }

    /// Decodes a layout from its persisted form.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidLayout`] unless `bytes` is exactly 64 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LayoutError> {
        let cells: [u8; LAYOUT_BYTES] = bytes
            .try_into()
            .map_err(|_| LayoutError::InvalidLayout { len: bytes.len() })?;
        Ok(Self { cells })
    }

    /// Encodes the layout into its persisted form
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; LAYOUT_BYTES] {
        self.cells
    }

    /// Borrow the encoded buffer
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; LAYOUT_BYTES] {
        &self.cells
    }

    /// Reads the kind of the cell at `(row, column)`.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::OutOfRange`] if either coordinate is 16 or more.
    pub fn get(&self, row: u8, column: u8) -> Result<CellKind, LayoutError> {
        let (byte, shift) = locate(row, column)?;
        Ok(CellKind::from_bits(self.cells[byte] >> shift))
    }

    /// Writes the kind of the cell at `(row, column)`, leaving every other cell intact.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::OutOfRange`] if either coordinate is 16 or more.
    pub fn set(&mut self, row: u8, column: u8, kind: CellKind) -> Result<(), LayoutError> {
        let (byte, shift) = locate(row, column)?;
        self.cells[byte] &= !(CELL_MASK << shift);
        self.cells[byte] |= kind.bits() << shift;
        Ok(())
    }

    /// Iterates every cell holding a seat, in row-major order.
    pub fn seats(&self) -> impl Iterator<Item = (u8, u8, CellKind)> + '_ {
        (0..ROWS)
            .flat_map(|row| (0..COLUMNS).map(move |column| (row, column)))
            .filter_map(|(row, column)| {
                let kind = self.cell(row, column);
                kind.is_seat().then_some((row, column, kind))
            })
    }

    /// Counts cells of the given kind
    #[must_use]
    pub fn count(&self, kind: CellKind) -> usize {
        (0..ROWS)
            .flat_map(|row| (0..COLUMNS).map(move |column| (row, column)))
            .filter(|&(row, column)| self.cell(row, column) == kind)
            .count()
    }

    // In-range access for internal iteration.
    fn cell(&self, row: u8, column: u8) -> CellKind {
        let offset = (usize::from(row) * usize::from(COLUMNS) + usize::from(column)) * CELL_BITS;
        CellKind::from_bits(self.cells[offset >> 3] >> (offset & 7))
    }
}

impl Default for SeatLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SeatLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeatLayout")
            .field("seats", &self.seats().count())
            .finish()
    }
}

impl TryFrom<&[u8]> for SeatLayout {
    type Error = LayoutError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

fn locate(row: u8, column: u8) -> Result<(usize, u32), LayoutError> {
    if row >= ROWS || column >= COLUMNS {
        return Err(LayoutError::OutOfRange { row, column });
    }
    let offset = (usize::from(row) * usize::from(COLUMNS) + usize::from(column)) * CELL_BITS;
    #[allow(clippy::cast_possible_truncation)] // offset & 7 < 8
    let shift = (offset & 7) as u32;
    Ok((offset >> 3, shift))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kind_strategy() -> impl Strategy<Value = CellKind> {
        prop_oneof![
            Just(CellKind::Empty),
            Just(CellKind::Standard),
            Just(CellKind::Vip),
            Just(CellKind::Disabled),
        ]
    }

    #[test]
    fn new_layout_is_empty() {
        let layout = SeatLayout::new();
        assert_eq!(layout.count(CellKind::Empty), 256);
        assert_eq!(layout.seats().count(), 0);
    }

    #[test]
    fn encoding_matches_bit_layout() {
        let mut layout = SeatLayout::new();
        layout.set(0, 0, CellKind::Standard).unwrap();
        layout.set(0, 1, CellKind::Vip).unwrap();
        layout.set(0, 3, CellKind::Disabled).unwrap();
        layout.set(15, 15, CellKind::Disabled).unwrap();

        let bytes = layout.to_bytes();
        assert_eq!(bytes[0], 0b1100_1001);
        assert_eq!(bytes[63], 0b1100_0000);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut layout = SeatLayout::new();
        assert_eq!(
            layout.get(16, 0),
            Err(LayoutError::OutOfRange { row: 16, column: 0 })
        );
        assert_eq!(
            layout.set(0, 16, CellKind::Vip),
            Err(LayoutError::OutOfRange { row: 0, column: 16 })
        );
        assert_eq!(layout, SeatLayout::new());
    }

    #[test]
    fn seats_iterate_row_major() {
        let mut layout = SeatLayout::new();
        layout.set(3, 1, CellKind::Vip).unwrap();
        layout.set(0, 9, CellKind::Standard).unwrap();
        let seats: Vec<_> = layout.seats().collect();
        assert_eq!(
            seats,
            vec![(0, 9, CellKind::Standard), (3, 1, CellKind::Vip)]
        );
        assert_eq!(layout.count(CellKind::Vip), 1);
    }

    proptest! {
        #[test]
        fn set_then_get_returns_kind(row in 0u8..16, column in 0u8..16, kind in kind_strategy()) {
            let mut layout = SeatLayout::new();
            layout.set(row, column, kind).unwrap();
            prop_assert_eq!(layout.get(row, column).unwrap(), kind);
        }

        #[test]
        fn set_leaves_other_cells_untouched(
            bytes in proptest::collection::vec(any::<u8>(), LAYOUT_BYTES),
            row in 0u8..16,
            column in 0u8..16,
            kind in kind_strategy(),
        ) {
            let before = SeatLayout::from_bytes(&bytes).unwrap();
            let mut after = before;
            after.set(row, column, kind).unwrap();
            for r in 0..ROWS {
                for c in 0..COLUMNS {
                    if (r, c) != (row, column) {
                        prop_assert_eq!(after.get(r, c).unwrap(), before.get(r, c).unwrap());
                    }
                }
            }
        }

        #[test]
        fn from_bytes_rejects_wrong_length(len in 0usize..200) {
            prop_assume!(len != LAYOUT_BYTES);
            let bytes = vec![0u8; len];
            prop_assert_eq!(SeatLayout::from_bytes(&bytes), Err(LayoutError::InvalidLayout { len }));
        }

        #[test]
        fn bytes_survive_decode(bytes in proptest::collection::vec(any::<u8>(), LAYOUT_BYTES)) {
            let layout = SeatLayout::from_bytes(&bytes).unwrap();
            prop_assert_eq!(SeatLayout::from_bytes(&layout.to_bytes()).unwrap(), layout);
            prop_assert_eq!(layout.to_bytes().to_vec(), bytes);
        }
    }
}
