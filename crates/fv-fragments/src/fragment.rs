//! Split a buffer into `n` ordered fragments and put them back together.

use fv_core::{FvError, FvResult};

/// Length of every fragment except the short tail: `ceil(len / n)`.
pub fn fragment_size(len: usize, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    len.div_ceil(n)
}

/// Sizes `split` produces for a buffer of `len` bytes.
pub fn fragment_sizes(len: usize, n: usize) -> Vec<usize> {
    let size = fragment_size(len, n);
    (0..n)
        .map(|i| {
            let start = (i * size).min(len);
            let end = (start + size).min(len);
            end - start
        })
        .collect()
}

/// Split `buffer` into exactly `n` contiguous, non-overlapping slices.
///
/// Fails on an empty buffer or `n == 0`. When the buffer is short relative
/// to `n`, trailing slices are empty.
pub fn split(buffer: &[u8], n: usize) -> FvResult<Vec<&[u8]>> {
    if buffer.is_empty() {
        return Err(FvError::InvalidInput("cannot fragment an empty buffer".into()));
    }
    if n == 0 {
        return Err(FvError::InvalidInput(
            "fragment count must be positive".into(),
        ));
    }

    let size = fragment_size(buffer.len(), n);
    let mut fragments = Vec::with_capacity(n);
    for i in 0..n {
        let start = (i * size).min(buffer.len());
        let end = (start + size).min(buffer.len());
        fragments.push(&buffer[start..end]);
    }
    Ok(fragments)
}

/// Concatenate fragments in the order given.
///
/// The caller is responsible for ordering by fragment number.
pub fn reassemble<T: AsRef<[u8]>>(fragments: &[T]) -> Vec<u8> {
    let total = fragments.iter().map(|f| f.as_ref().len()).sum();
    let mut out = Vec::with_capacity(total);
    for fragment in fragments {
        out.extend_from_slice(fragment.as_ref());
    }
    out
}
