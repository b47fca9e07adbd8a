//! Least-loaded placement of new connections.

/// Returns the index of the smallest load, preferring the lowest index on ties.
///
/// Returns `None` only for an empty input.
///
/// # Examples
///
/// ```rust
/// use fanout_core::least_loaded;
///
/// assert_eq!(least_loaded([3, 1, 1, 2]), Some(1));
/// assert_eq!(least_loaded(std::iter::empty::<usize>()), None);
/// ```
pub fn least_loaded<I>(loads: I) -> Option<usize>
where
    I: IntoIterator<Item = usize>,
{
    let mut best: Option<(usize, usize)> = None;
    for (index, load) in loads.into_iter().enumerate() {
        match best {
            Some((_, best_load)) if load >= best_load => {}
            _ => best = Some((index, load)),
        }
    }
    best.map(|(index, _)| index)
}
