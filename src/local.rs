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

//! A subchannel pool private to one channel

use log::debug;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::key::SubchannelKey;
use crate::pool::SubchannelPool;
use crate::subchannel::{is_same, Subchannel, SubchannelRef, WeakSubchannel};

/// A [SubchannelPool] owned by a single channel
///
/// Subchannels are still deduplicated, but only among the users of this channel. There is little
/// contention on such a pool, so a single lock over an ordinary map is enough.
#[derive(Default)]
pub struct LocalSubchannelPool {
    subchannels: Mutex<BTreeMap<SubchannelKey, WeakSubchannel>>,
}

impl LocalSubchannelPool {
    /// Create a new, empty [LocalSubchannelPool]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of entries, live or not yet unregistered
    pub fn len(&self) -> usize {
        self.subchannels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subchannels.lock().is_empty()
    }
}

impl SubchannelPool for LocalSubchannelPool {
    fn register_subchannel(
        &self,
        key: &SubchannelKey,
        candidate: SubchannelRef,
    ) -> SubchannelRef {
        let mut subchannels = self.subchannels.lock();
        match subchannels.get(key).and_then(|weak| weak.upgrade()) {
            Some(existing) => {
                // release the lock first, the candidate is dropped on return
                drop(subchannels);
                debug!("subchannel {key} already in local pool");
                existing
            }
            None => {
                subchannels.insert(key.clone(), Arc::downgrade(&candidate));
                candidate
            }
        }
    }

    fn unregister_subchannel(&self, key: &SubchannelKey, subchannel: &dyn Subchannel) {
        let mut subchannels = self.subchannels.lock();
        if subchannels
            .get(key)
            .is_some_and(|weak| is_same(weak, subchannel))
        {
            subchannels.remove(key);
        }
    }

    fn find_subchannel(&self, key: &SubchannelKey) -> Option<SubchannelRef> {
        let weak = self.subchannels.lock().get(key).cloned()?;
        weak.upgrade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subchannel::tests::TestSubchannel;
    use crate::args::ChannelArgs;
    use crate::subchannel::{create_subchannel, same_subchannel};

    #[test]
    fn test_register_find_unregister() {
        let pool = LocalSubchannelPool::new();
        let key = SubchannelKey::new("10.0.0.1:80", "");
        assert!(pool.find_subchannel(&key).is_none());

        let a = TestSubchannel::new_ref(&key);
        let registered = pool.register_subchannel(&key, a.clone());
        assert!(same_subchannel(&a, &registered));
        assert!(same_subchannel(&a, &pool.find_subchannel(&key).unwrap()));

        // a live registration wins over a new candidate
        let b = TestSubchannel::new_ref(&key);
        let registered = pool.register_subchannel(&key, b.clone());
        assert!(same_subchannel(&a, &registered));

        // b is not the registered one, nothing happens
        pool.unregister_subchannel(&key, b.as_ref());
        assert_eq!(pool.len(), 1);
        pool.unregister_subchannel(&key, a.as_ref());
        assert!(pool.is_empty());
        assert!(pool.find_subchannel(&key).is_none());
    }

    #[test]
    fn test_dead_entry_replaced() {
        let pool = LocalSubchannelPool::new();
        let key = SubchannelKey::new("10.0.0.1:80", "");
        // no registration attached: dropping a leaves a dead entry behind
        let a = TestSubchannel::new_ref(&key);
        pool.register_subchannel(&key, a.clone());
        drop(a);
        assert_eq!(pool.len(), 1);
        assert!(pool.find_subchannel(&key).is_none());

        let b = TestSubchannel::new_ref(&key);
        let registered = pool.register_subchannel(&key, b.clone());
        assert!(same_subchannel(&b, &registered));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_unregister_on_drop() {
        let pool: Arc<dyn SubchannelPool> = Arc::new(LocalSubchannelPool::new());
        let args = ChannelArgs::new();
        let key = SubchannelKey::from_args("10.0.0.1:80", &args);
        let a = create_subchannel(&pool, "10.0.0.1:80", &args, |k| {
            TestSubchannel::new_ref(&k)
        });
        assert!(a.registration().is_attached());
        assert!(same_subchannel(&a, &pool.find_subchannel(&key).unwrap()));
        drop(a);
        assert!(pool.find_subchannel(&key).is_none());
    }
}
