use crate::errors::{AppError, AppResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Keys with work in progress in this process. A key is owned by whoever holds its
/// [`InFlightGuard`] and is released when the guard drops, including on error or cancellation.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`. `None` means another task holds it.
    pub fn try_acquire(&self, key: &str) -> AppResult<Option<InFlightGuard>> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| AppError::Internal("in-flight registry mutex poisoned".to_string()))?;
        if !keys.insert(key.to_string()) {
            return Ok(None);
        }
        Ok(Some(InFlightGuard {
            keys: self.keys.clone(),
            key: key.to_string(),
        }))
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InFlight;

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let in_flight = InFlight::new();
        let first = in_flight.try_acquire("exp-1").expect("registry").expect("first");
        assert!(in_flight.try_acquire("exp-1").expect("registry").is_none());
        assert!(in_flight.try_acquire("exp-2").expect("registry").is_some());
        drop(first);
        assert!(in_flight.try_acquire("exp-1").expect("registry").is_some());
    }

    #[test]
    fn clones_share_one_registry() {
        let in_flight = InFlight::new();
        let other = in_flight.clone();
        let _guard = in_flight.try_acquire("owner-1|key").expect("registry").expect("guard");
        assert!(other.try_acquire("owner-1|key").expect("registry").is_none());
    }
}
