use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::rupture::Rupture;

/// High-half multiplier of the event id layout.
pub const TWO32: u64 = 1 << 32;

/// One stochastic occurrence of a rupture under one realization.
///
/// `year` is zero until the deferred assignment pass runs; the authoritative
/// order of records is insertion order in the store, never `eid` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub eid: u64,
    pub serial: u32,
    pub grp_id: u16,
    pub year: u32,
    pub ses: u32,
    pub rlz: u16,
}

/// Deterministic, collision-free encoding of (rupture, realization,
/// occurrence) into a single u64.
///
/// The rupture serial occupies the high 32 bits, so any worker can mint
/// unique ids for its own ruptures without coordinating with other workers,
/// and any consumer can recover the owning rupture with a shift.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventCodec;

impl EventCodec {
    /// Pure bijection for `local_eid` in `[0, 2^32)`.
    pub fn encode(serial: u32, local_eid: u32) -> u64 {
        TWO32 * u64::from(serial) + u64::from(local_eid)
    }

    /// Exact inverse of `encode`.
    pub fn decode(eid: u64) -> (u32, u32) {
        ((eid >> 32) as u32, (eid & 0xffff_ffff) as u32)
    }

    /// Mints the event records of one rupture across the realizations
    /// associated with its source group.
    ///
    /// One event per (realization, occurrence); `local_eid` is
    /// `slot * multiplicity + occurrence` where `slot` enumerates the
    /// (gsim, realization) pairs in mapping order, so no two events of the
    /// same rupture collide in the low 32 bits. SES ordinals are drawn in
    /// `[1, num_ses]` from a generator seeded by the rupture serial:
    /// identical on every worker that sees the rupture.
    pub fn derive_events(
        rupture: &Rupture,
        rlzs_by_gsim: &BTreeMap<String, Vec<u16>>,
        num_ses: u32,
    ) -> Result<Vec<EventRecord>, CodecError> {
        let multiplicity = u64::from(rupture.multiplicity());
        let slots: u64 = rlzs_by_gsim.values().map(|rlzs| rlzs.len() as u64).sum();
        let requested = slots * multiplicity;
        if requested > TWO32 {
            return Err(CodecError::LocalEidCapacity {
                serial: rupture.serial(),
                requested,
            });
        }
        let mut rng = ChaCha8Rng::seed_from_u64(u64::from(rupture.serial()));
        let mut events = Vec::with_capacity(requested as usize);
        let mut slot: u64 = 0;
        for rlzs in rlzs_by_gsim.values() {
            for rlz in rlzs {
                for occurrence in 0..multiplicity {
                    let local_eid = (slot * multiplicity + occurrence) as u32;
                    events.push(EventRecord {
                        eid: Self::encode(rupture.serial(), local_eid),
                        serial: rupture.serial(),
                        grp_id: rupture.grp_id(),
                        year: 0,
                        ses: rng.random_range(1..=num_ses),
                        rlz: *rlz,
                    });
                }
                slot += 1;
            }
        }
        Ok(events)
    }

    /// Draws one year in `[1, investigation_time]` per distinct event id.
    ///
    /// The draw sequence is paired with the sorted distinct ids, so the
    /// mapping depends only on the seed and the id set, never on the order
    /// events were produced or stored.
    pub fn assign_years(
        eids: &[u64],
        seed: u64,
        investigation_time: u32,
    ) -> BTreeMap<u64, u32> {
        let mut distinct: Vec<u64> = eids.to_vec();
        distinct.sort_unstable();
        distinct.dedup();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        distinct
            .into_iter()
            .map(|eid| (eid, rng.random_range(1..=investigation_time)))
            .collect()
    }
}

/// Errors raised while minting event ids.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(
        "rupture {serial} requests {requested} local event ids, more than the 2^32 the id layout can hold"
    )]
    LocalEidCapacity { serial: u32, requested: u64 },
}
