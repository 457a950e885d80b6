//! Partial-selection medians over caller-owned scratch.

/// Median of `values`, reordering them in place.
///
/// Uses `select_nth_unstable_by` (O(n) average), never a full sort. For even
/// lengths the upper middle element is returned. Empty input yields 0.
#[inline]
pub fn median_in_place(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Median across a frequency neighbourhood of `bin`, edges replicated.
///
/// `scratch` must hold at least `kernel` values; `kernel` is odd.
pub fn neighbourhood_median(row: &[f32], bin: usize, kernel: usize, scratch: &mut [f32]) -> f32 {
    debug_assert!(kernel % 2 == 1);
    debug_assert!(scratch.len() >= kernel);
    if row.is_empty() {
        return 0.0;
    }
    let half = (kernel / 2) as isize;
    let last = row.len() as isize - 1;
    for (k, slot) in scratch[..kernel].iter_mut().enumerate() {
        let idx = (bin as isize + k as isize - half).clamp(0, last);
        *slot = row[idx as usize];
    }
    median_in_place(&mut scratch[..kernel])
}
