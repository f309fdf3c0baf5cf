use thiserror::Error;

/// Hard limits of the fixed-width on-disk record layout.
pub const MAX_SITES: u64 = 1 << 16;
pub const MAX_EVENTS: u64 = 1 << 32;
pub const MAX_IMTS: u64 = 1 << 8;

/// Post-hoc invariant checker for the storage format's capacity limits.
///
/// A violation is a configuration error in the user's model, not a
/// transient fault: the calculation must be restructured (fewer sites, a
/// split run), never retried.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverflowGuard;

impl OverflowGuard {
    pub fn check(
        num_sites: u64,
        num_events: u64,
        num_imts: u64,
    ) -> Result<(), CapacityError> {
        if num_sites > MAX_SITES {
            return Err(CapacityError::TooManySites {
                got: num_sites,
                limit: MAX_SITES,
            });
        }
        if num_events > MAX_EVENTS {
            return Err(CapacityError::TooManyEvents {
                got: num_events,
                limit: MAX_EVENTS,
            });
        }
        if num_imts > MAX_IMTS {
            return Err(CapacityError::TooManyImts {
                got: num_imts,
                limit: MAX_IMTS,
            });
        }
        Ok(())
    }
}

/// Fatal capacity violations of the record layout.
#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("the event based calculator is restricted to {limit} sites, got {got}")]
    TooManySites { got: u64, limit: u64 },
    #[error("the event based calculator is restricted to {limit} events, got {got}")]
    TooManyEvents { got: u64, limit: u64 },
    #[error("the event based calculator is restricted to {limit} intensity measure types, got {got}")]
    TooManyImts { got: u64, limit: u64 },
}
