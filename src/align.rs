/// Rounds the given size up to the heap alignment unit.
///
/// # Examples
///
/// ```rust
/// use tagalloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(1), 8);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::config::ALIGNMENT - 1) & !($crate::config::ALIGNMENT - 1)
  };
}

/// Overflow-checked form of [`align!`], for sizes that come straight from a
/// caller.
pub fn align_up(value: usize) -> Option<usize> {
  value
    .checked_add(crate::config::ALIGNMENT - 1)
    .map(|v| v & !(crate::config::ALIGNMENT - 1))
}
