//! Bounds checks against a freshly read cell count.

use crate::errors::RangeError;
use crate::model::CellRange;

/// `0 <= start < count` and `start < end <= count`.
pub fn validate_range(range: CellRange, count: usize) -> Result<CellRange, RangeError> {
    if range.end <= range.start {
        return Err(RangeError::Empty {
            start: range.start,
            end: range.end,
        });
    }
    if range.start >= count || range.end > count {
        return Err(RangeError::OutOfBounds {
            start: range.start,
            end: range.end,
            count,
        });
    }
    Ok(range)
}

pub fn validate_index(index: usize, count: usize) -> Result<usize, RangeError> {
    if index < count {
        Ok(index)
    } else {
        Err(RangeError::Index { index, count })
    }
}

/// Insert positions may equal `count` (append).
pub fn validate_position(position: Option<usize>, count: usize) -> Result<usize, RangeError> {
    let position = position.unwrap_or(count);
    if position <= count {
        Ok(position)
    } else {
        Err(RangeError::Position { position, count })
    }
}

/// Re-check after a suspension point: the range must still fit the live count.
pub fn ensure_still_fits(
    range: CellRange,
    count: usize,
    stage: &'static str,
) -> Result<(), RangeError> {
    if range.end > count {
        return Err(RangeError::Shifted {
            stage,
            start: range.start,
            end: range.end,
            count,
        });
    }
    Ok(())
}
