use std::io;
use std::thread;

pub(crate) fn is_pow_of_two(val: usize) -> bool {
    if val == 0 {
        return false;
    }
    (val & (val - 1)) == 0
}

/// Spawn a named thread pinned to the given core. If the core does not exist or pinning
/// is not supported on this platform the thread still runs, just unpinned.
pub fn spawn_pinned<F, T>(core: usize, name: &str, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(move || {
        if let Some(ids) = core_affinity::get_core_ids() {
            if let Some(id) = ids.into_iter().find(|c| c.id == core) {
                core_affinity::set_for_current(id);
            }
        }
        f()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_powers_of_two() {
        assert_eq!(is_pow_of_two(0), false);
        assert_eq!(is_pow_of_two(1), true);
        assert_eq!(is_pow_of_two(2), true);
        assert_eq!(is_pow_of_two(3), false);
        assert_eq!(is_pow_of_two(4), true);
        assert_eq!(is_pow_of_two(8), true);
        assert_eq!(is_pow_of_two(15), false);
        assert_eq!(is_pow_of_two(16), true);
        assert_eq!(is_pow_of_two(20), false);
    }

    #[test]
    fn test_spawn_pinned() {
        let handle = spawn_pinned(0, "pin-test", || 7usize).unwrap();
        assert_eq!(handle.join().unwrap(), 7);
    }
}
