// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The contract between a pool and the subchannels it indexes

use log::debug;
use once_cell::sync::OnceCell;
use std::fmt;
use std::ptr;
use std::sync::{Arc, Weak};

use crate::args::{ChannelArgs, SUBCHANNEL_ENDPOINT};
use crate::key::SubchannelKey;
use crate::pool::SubchannelPool;

/// A strong reference to a subchannel
pub type SubchannelRef = Arc<dyn Subchannel>;
/// A weak handle of a subchannel, the only kind of reference a pool ever holds
pub type WeakSubchannel = Weak<dyn Subchannel>;

/// A pooled connection to one destination
///
/// Subchannels are reference counted through [Arc]. Pools only keep [Weak] handles to them so
/// that the last user dropping its [Arc] closes the connection, no matter how many pools index
/// it. A subchannel that became canonical in a pool must retract itself from that pool when it
/// is dropped:
///
/// ```ignore
/// impl Drop for MySubchannel {
///     fn drop(&mut self) {
///         self.registration.unregister(&*self);
///     }
/// }
/// ```
pub trait Subchannel: Send + Sync + 'static {
    /// The key this subchannel is pooled under
    fn key(&self) -> &SubchannelKey;

    /// The record of which pool, if any, this subchannel is registered in
    fn registration(&self) -> &PoolRegistration;
}

/// Whether the weak handle points at the given subchannel.
///
/// The allocation behind a [Weak] stays alive until the handle is dropped, so the address cannot
/// be reused by another subchannel while the handle sits in a map.
pub(crate) fn is_same(weak: &WeakSubchannel, subchannel: &dyn Subchannel) -> bool {
    ptr::addr_eq(weak.as_ptr(), subchannel as *const dyn Subchannel)
}

/// Whether both references point at the same subchannel
pub fn same_subchannel(a: &SubchannelRef, b: &SubchannelRef) -> bool {
    ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// The pool a subchannel was registered in
///
/// It is only set once the subchannel won its registration. A candidate that lost a
/// registration race is never attached, so dropping it cannot retract the winner.
#[derive(Default)]
pub struct PoolRegistration {
    pool: OnceCell<Arc<dyn SubchannelPool>>,
}

impl PoolRegistration {
    /// Create a new, detached [PoolRegistration]
    pub fn new() -> Self {
        Self::default()
    }

    // Return false if it was already attached
    pub(crate) fn attach(&self, pool: Arc<dyn SubchannelPool>) -> bool {
        self.pool.set(pool).is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.pool.get().is_some()
    }

    /// Retract `subchannel` from the pool it is registered in, if any.
    ///
    /// This should be called from the subchannel's `Drop`. It is a no-op when the pool entry
    /// already belongs to a newer subchannel.
    pub fn unregister(&self, subchannel: &dyn Subchannel) {
        if let Some(pool) = self.pool.get() {
            debug!("unregister subchannel {}", subchannel.key());
            pool.unregister_subchannel(subchannel.key(), subchannel);
        }
    }
}

impl fmt::Debug for PoolRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistration")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Return the pooled subchannel for `address` and `args`, creating it with `build` if there is
/// none.
///
/// - If `args` carry [SUBCHANNEL_ENDPOINT], the subchannel wraps an already connected endpoint
///   which cannot be shared. It is always built and returned without touching the pool.
/// - If a live subchannel is already pooled under the key it is returned and `build` is not
///   called.
/// - Otherwise the new subchannel is registered. If another one won the registration in the
///   meantime, the new subchannel is dropped and the winner is returned.
pub fn create_subchannel<F>(
    pool: &Arc<dyn SubchannelPool>,
    address: impl AsRef<[u8]>,
    args: &ChannelArgs,
    build: F,
) -> SubchannelRef
where
    F: FnOnce(SubchannelKey) -> SubchannelRef,
{
    let key = SubchannelKey::from_args(address, args);
    if args.contains(SUBCHANNEL_ENDPOINT) {
        debug!("subchannel {key} wraps an endpoint, not pooled");
        return build(key);
    }
    if let Some(found) = pool.find_subchannel(&key) {
        return found;
    }
    let subchannel = build(key.clone());
    // attach only after registering, a losing candidate must not unregister on drop
    let registered = pool.register_subchannel(&key, subchannel.clone());
    if same_subchannel(&registered, &subchannel) {
        subchannel.registration().attach(pool.clone());
    }
    registered
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A subchannel that unregisters itself when dropped and counts its drops
    pub(crate) struct TestSubchannel {
        pub key: SubchannelKey,
        pub registration: PoolRegistration,
        pub drops: Arc<AtomicUsize>,
        pub before_unregister: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl TestSubchannel {
        pub fn new(key: &SubchannelKey) -> Arc<Self> {
            Arc::new(TestSubchannel {
                key: key.clone(),
                registration: PoolRegistration::new(),
                drops: Arc::new(AtomicUsize::new(0)),
                before_unregister: Mutex::new(None),
            })
        }

        pub fn new_ref(key: &SubchannelKey) -> SubchannelRef {
            Self::new(key)
        }
    }

    impl Subchannel for TestSubchannel {
        fn key(&self) -> &SubchannelKey {
            &self.key
        }

        fn registration(&self) -> &PoolRegistration {
            &self.registration
        }
    }

    impl Drop for TestSubchannel {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = self.before_unregister.get_mut().take() {
                hook();
            }
            self.registration.unregister(&*self);
        }
    }

    #[test]
    fn test_is_same() {
        let key = SubchannelKey::new("a", "");
        let a = TestSubchannel::new_ref(&key);
        let b = TestSubchannel::new_ref(&key);
        let weak_a = Arc::downgrade(&a);
        assert!(is_same(&weak_a, a.as_ref()));
        assert!(!is_same(&weak_a, b.as_ref()));
        assert!(same_subchannel(&a, &a.clone()));
        assert!(!same_subchannel(&a, &b));
    }

    #[test]
    fn test_registration_detached() {
        let registration = PoolRegistration::new();
        assert!(!registration.is_attached());
        assert_eq!(
            format!("{registration:?}"),
            "PoolRegistration { attached: false }"
        );
        // dropping a detached subchannel touches no pool
        let key = SubchannelKey::new("a", "");
        let a = TestSubchannel::new(&key);
        let drops = a.drops.clone();
        drop(a);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
