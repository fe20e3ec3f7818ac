//! Process-wide list of live cells, used to wipe everything at once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::cell::{lock_slot, Slot};

// Lock order: LIVE first, then a cell's slot. Cells never take LIVE while
// holding their own slot.
static LIVE: Mutex<Vec<Weak<Slot>>> = Mutex::new(Vec::new());

fn live() -> MutexGuard<'static, Vec<Weak<Slot>>> {
    LIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn register(slot: &Arc<Slot>) {
    let mut live = live();
    live.retain(|slot| slot.strong_count() > 0);
    live.push(Arc::downgrade(slot));
}

/// Destroys every live [`SecureCell`](crate::SecureCell) in the process.
///
/// Each cell is released exactly as if its `destroy` had been called, so
/// later `expose` calls on it fail with
/// [`InvalidAccess::Destroyed`](crate::InvalidAccess::Destroyed). Cells
/// currently being exposed are waited for. Returns the number of cells
/// that were released by this call.
///
/// Meant for emergency shutdown paths such as the interrupt hook installed
/// by [`catch_interrupt`](crate::catch_interrupt).
pub fn purge() -> usize {
    let mut live = live();
    let mut purged = 0;

    for slot in live.drain(..).filter_map(|slot| slot.upgrade()) {
        let Some(enclave) = lock_slot(&slot).take() else {
            continue;
        };

        if let Err(err) = enclave.destroy() {
            log::warn!("failed to release secret memory during purge: {err}");
        }
        purged += 1;
    }

    purged
}
