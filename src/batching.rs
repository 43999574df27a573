// file: src/batching.rs
// description: Pads and reshapes flat generate() output into (batch, candidates, length).
// author: cipher-rc5

//! `generate` returns one row per returned sequence, `(batch * k, len)`. The
//! batch loop wants `(batch_size, k, len)`. A final short batch does not fill
//! `batch_size * len`-sized blocks, so with padding enabled the row dimension
//! is topped up with zero rows until it does.
//!
//! The zero rows are not tied to any input. After the reshape every leading
//! index is treated as one example, so a short batch yields `batch_size`
//! candidate lists whose tail (and sometimes whose grouping) is padding. This
//! mirrors how the candidate files have always been produced and is covered by
//! tests rather than corrected here.

use anyhow::Result;
use candle_core::Tensor;
use tracing::debug;

use crate::error::CandidateError;

/// Number of zero *elements* needed to make `total` a multiple of
/// `batch_size * seq_len`.
pub fn padding_elements(total: usize, batch_size: usize, seq_len: usize) -> usize {
    let target = batch_size * seq_len;
    if target == 0 {
        return 0;
    }
    (target - (total % target)) % target
}

/// Appends zero rows to `(rows, seq_len)` output so its size divides into
/// `batch_size * seq_len`.
pub fn pad_to_batch(outputs: &Tensor, batch_size: usize) -> Result<Tensor> {
    let (_, seq_len) = outputs.dims2()?;
    let pad = padding_elements(outputs.elem_count(), batch_size, seq_len);
    debug!(
        "Total size: {}, Target size: {}, Pad size: {}",
        outputs.elem_count(),
        batch_size * seq_len,
        pad
    );
    if pad == 0 {
        return Ok(outputs.clone());
    }
    let pad_rows = pad / seq_len;
    debug!("Padding tensor with {} elements ({} rows)", pad, pad_rows);
    let padded = outputs.pad_with_zeros(0, 0, pad_rows)?;
    debug!("New shape: {:?}", padded.dims());
    Ok(padded)
}

/// Reshapes `(rows, seq_len)` into `(batch_size, rows / batch_size, seq_len)`.
pub fn reshape_candidates(outputs: &Tensor, batch_size: usize) -> Result<Tensor> {
    let (rows, seq_len) = outputs.dims2()?;
    let total = outputs.elem_count();
    if batch_size == 0 || seq_len == 0 || rows % batch_size != 0 {
        return Err(CandidateError::Reshape {
            total,
            batch_size,
            seq_len,
        }
        .into());
    }
    let reshaped = outputs.reshape((batch_size, rows / batch_size, seq_len))?;
    debug!("Shape after reshaping: {:?}", reshaped.dims());
    Ok(reshaped)
}

/// Pads (when enabled) and reshapes, returning `batch_size` lists of token
/// rows.
pub fn split_candidates(
    outputs: &Tensor,
    batch_size: usize,
    use_padding: bool,
) -> Result<Vec<Vec<Vec<u32>>>> {
    debug!(
        "Original shape: {:?}, batch size: {}, last dimension: {}",
        outputs.dims(),
        batch_size,
        outputs.dims().last().copied().unwrap_or(0)
    );
    let outputs = if use_padding {
        pad_to_batch(outputs, batch_size)?
    } else {
        outputs.clone()
    };
    let reshaped = reshape_candidates(&outputs, batch_size)?;
    Ok(reshaped.to_vec3::<u32>()?)
}
