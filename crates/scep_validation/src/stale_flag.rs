// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{atomic, Arc};

/// Whether a discovery document has been marked stale because an endpoint from it
/// proved unreachable. Can only be set; a stale document is replaced, never revived.
///
/// Internally mutable inside an `Arc` so that clones share the flag: a request that
/// resolved its endpoint from a document can mark that document stale without
/// waiting for anyone else to finish reading it.
#[derive(Default, Debug, Clone)]
pub struct StaleFlag(Arc<atomic::AtomicBool>);

// A slightly out-of-date read only means one more request goes to the old endpoint,
// fails, and is retried. A stale document can never be read as fresh.

impl StaleFlag {
    pub fn mark_stale(&self) {
        self.0.store(true, atomic::Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.0.load(atomic::Ordering::SeqCst)
    }
}

impl PartialEq for StaleFlag {
    fn eq(&self, other: &Self) -> bool {
        self.is_stale() == other.is_stale()
    }
}

impl Eq for StaleFlag {}

#[cfg(test)]
mod tests {
    use super::StaleFlag;

    #[test]
    fn staleness_is_shared_by_clones() {
        let flag = StaleFlag::default();
        let clone = flag.clone();
        assert!(!clone.is_stale());
        flag.mark_stale();
        assert!(clone.is_stale());
    }
}
