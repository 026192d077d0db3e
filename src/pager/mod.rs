//! Pagination cursor state machines.
//!
//! Both endpoints paginate through a 1-based `STARTPOSITION`, but the index
//! means different things: for the Code endpoint it indexes into the
//! submitted code array, for the Layer endpoint into the DB's global series
//! ordering. Either way the only acceptable cursor movement is strictly
//! forward; a `NEXTPOSITION` at or below the current position is a loop
//! hazard and fails the call before another request is issued.

use crate::error::{BojError, BojResult};

/// Series ceiling a single Layer request can return, before frequency
/// filtering. Responses at or above this size cannot be continued by
/// pagination; the layer path must be subdivided instead.
pub const LAYER_SERIES_CEILING: usize = 1250;

/// Cursor state for one Code-endpoint chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePagerState {
    /// Index of the chunk in the chunk plan
    pub chunk_index: usize,
    /// 1-based position into the submitted code array
    pub start_position: u64,
}

impl CodePagerState {
    /// Fresh cursor for chunk `chunk_index`.
    pub fn new(chunk_index: usize) -> Self {
        Self {
            chunk_index,
            start_position: 1,
        }
    }

    /// Cursor resuming from an explicit position.
    pub fn resumed(chunk_index: usize, start_position: u64) -> Self {
        Self {
            chunk_index,
            start_position: start_position.max(1),
        }
    }
}

/// Cursor state for a Layer-endpoint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPagerState {
    /// 1-based position into the DB's series ordering
    pub start_position: u64,
}

impl LayerPagerState {
    /// Cursor starting at `start_position` (clamped to 1).
    pub fn new(start_position: u64) -> Self {
        Self {
            start_position: start_position.max(1),
        }
    }
}

/// Advance a Code chunk cursor from a page's NEXTPOSITION.
///
/// Returns `Ok(true)` when another page must be fetched, `Ok(false)` when
/// the chunk is complete (absent or zero NEXTPOSITION), and
/// [`BojError::PaginationStalled`] when the cursor fails to move forward.
pub fn advance_code_position(
    state: &mut CodePagerState,
    next_position: Option<u64>,
) -> BojResult<bool> {
    match next_position {
        None | Some(0) => Ok(false),
        Some(next) if next <= state.start_position => Err(BojError::PaginationStalled {
            chunk_index: state.chunk_index,
            start: state.start_position,
            next_position: next,
        }),
        Some(next) => {
            state.start_position = next;
            Ok(true)
        }
    }
}

/// Advance a Layer cursor from a page's NEXTPOSITION.
///
/// Same monotonic rule as the Code cursor; the chunk index reported in a
/// stall is always 0 because Layer calls are a single stream.
pub fn advance_layer_position(
    state: &mut LayerPagerState,
    next_position: Option<u64>,
) -> BojResult<bool> {
    match next_position {
        None | Some(0) => Ok(false),
        Some(next) if next <= state.start_position => Err(BojError::PaginationStalled {
            chunk_index: 0,
            start: state.start_position,
            next_position: next,
        }),
        Some(next) => {
            state.start_position = next;
            Ok(true)
        }
    }
}
