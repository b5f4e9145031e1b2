use std::hash::Hash;
use std::collections::HashSet;

/// Returns the first item that was already seen earlier in `iter`.
pub fn first_duplicate<A>(iter: impl Iterator<Item=A>) -> Option<A>
where A: Eq + Hash {
    let mut seen = HashSet::<A>::new();
    for a in iter {
        if let Some(old) = seen.replace(a) {
            return Some(old);
        }
    }
    None
}
