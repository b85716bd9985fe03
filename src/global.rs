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

//! The process wide subchannel pool
//!
//! The key space is split into shards. Each shard keeps two versions of an immutable [AvlMap]:
//! - the write map, the source of truth, which is only read and replaced under the write lock.
//! - the read map, a published snapshot of the write map, which is only replaced under the read
//!   lock.
//!
//! A lookup holds the read lock just long enough to clone the root of the read map and then walks
//! that snapshot without any lock. A mutation makes its decision and builds the new version under
//! the write lock, then takes the read lock only to publish it. So lookups never wait for the
//! decision logic of writers, only for the pointer swap.

use ahash::RandomState;
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::avl::AvlMap;
use crate::conf::{PoolConf, MAX_SHARDS};
use crate::key::SubchannelKey;
use crate::pool::SubchannelPool;
use crate::subchannel::{is_same, Subchannel, SubchannelRef, WeakSubchannel};

type SubchannelMap = AvlMap<SubchannelKey, WeakSubchannel>;

#[derive(Default)]
struct Shard {
    write_map: Mutex<SubchannelMap>,
    read_map: Mutex<SubchannelMap>,
}

impl Shard {
    // the caller holds the write lock, which guarantees `map` is the latest version
    fn publish(&self, map: &SubchannelMap) {
        let old = std::mem::replace(&mut *self.read_map.lock(), map.clone());
        // the replaced path is freed outside of the read lock
        drop(old);
    }

    fn snapshot(&self) -> SubchannelMap {
        self.read_map.lock().clone()
    }
}

/// The sharded [SubchannelPool] shared by every channel of the process
pub struct GlobalSubchannelPool {
    shards: Box<[Shard]>,
    hasher: RandomState,
}

impl GlobalSubchannelPool {
    /// Create a standalone [GlobalSubchannelPool].
    ///
    /// Most users want the process wide one, see [Self::init()] and [Self::instance()].
    /// A shard count that is not a power of two is rounded up to the next one.
    pub fn new(conf: &PoolConf) -> Self {
        let shards = conf.shards.clamp(1, MAX_SHARDS).next_power_of_two();
        if shards != conf.shards {
            warn!("{} shards requested, using {shards}", conf.shards);
        }
        GlobalSubchannelPool {
            shards: (0..shards).map(|_| Shard::default()).collect(),
            hasher: RandomState::new(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The number of entries visible to lookups, including the dead ones not yet unregistered.
    ///
    /// This walks every shard, it is meant for tests and debugging.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.snapshot().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.snapshot().is_empty())
    }

    #[inline]
    fn shard_index(&self, key: &SubchannelKey) -> usize {
        // the shard count is a power of two
        (self.hasher.hash_one(key) as usize) & (self.shards.len() - 1)
    }

    #[inline]
    fn shard(&self, key: &SubchannelKey) -> &Shard {
        &self.shards[self.shard_index(key)]
    }
}

impl SubchannelPool for GlobalSubchannelPool {
    fn register_subchannel(
        &self,
        key: &SubchannelKey,
        candidate: SubchannelRef,
    ) -> SubchannelRef {
        let shard = self.shard(key);
        let mut write_map = shard.write_map.lock();

        match write_map.get(key).map(|weak| weak.upgrade()) {
            Some(Some(existing)) => {
                // release the lock first, the candidate is dropped on return
                drop(write_map);
                debug!("subchannel {key} already registered, drop the new one");
                return existing;
            }
            Some(None) => debug!("replace dead subchannel {key}"),
            None => debug!("register subchannel {key} in shard {}", self.shard_index(key)),
        }

        *write_map = write_map.insert(key.clone(), Arc::downgrade(&candidate));
        shard.publish(&write_map);
        candidate
    }

    fn unregister_subchannel(&self, key: &SubchannelKey, subchannel: &dyn Subchannel) {
        let shard = self.shard(key);
        let mut write_map = shard.write_map.lock();

        match write_map.get(key) {
            Some(weak) if is_same(weak, subchannel) => {}
            Some(_) => {
                debug!("subchannel {key} was already replaced, skip unregistering");
                return;
            }
            None => {
                trace!("subchannel {key} not found, nothing to unregister");
                return;
            }
        }

        *write_map = write_map.remove(key);
        shard.publish(&write_map);
    }

    fn find_subchannel(&self, key: &SubchannelKey) -> Option<SubchannelRef> {
        let snapshot = self.shard(key).snapshot(); // read lock released here
        let found = snapshot.get(key)?.upgrade();
        if found.is_none() {
            trace!("subchannel {key} is being destroyed, treat as a miss");
        }
        found
    }
}

enum Lifecycle {
    Uninitialized,
    Running(Arc<GlobalSubchannelPool>),
    ShutDown,
}

// read on every channel setup, written only by init and shutdown
static GLOBAL: Lazy<RwLock<Lifecycle>> = Lazy::new(|| RwLock::new(Lifecycle::Uninitialized));

impl GlobalSubchannelPool {
    /// Initialize the process wide pool with the default [PoolConf].
    ///
    /// # Panics
    /// If the pool was already initialized, even if it was shut down since.
    pub fn init() {
        Self::init_with_conf(&PoolConf::default())
    }

    /// Initialize the process wide pool with the given [PoolConf].
    ///
    /// # Panics
    /// If the pool was already initialized, even if it was shut down since.
    pub fn init_with_conf(conf: &PoolConf) {
        let mut global = GLOBAL.write();
        match &*global {
            Lifecycle::Uninitialized => {}
            Lifecycle::Running(_) => panic!("global subchannel pool is already initialized"),
            Lifecycle::ShutDown => panic!("global subchannel pool cannot be initialized again"),
        }
        debug!("init global subchannel pool with {} shards", conf.shards);
        *global = Lifecycle::Running(Arc::new(Self::new(conf)));
    }

    /// Release the process wide pool.
    ///
    /// Subchannels are not affected: the pool never owned them. The ones still registered keep the
    /// pool alive until they unregister.
    ///
    /// # Panics
    /// If the pool is not running.
    pub fn shutdown() {
        let mut global = GLOBAL.write();
        match &*global {
            Lifecycle::Running(_) => {}
            Lifecycle::Uninitialized => panic!("global subchannel pool is not initialized"),
            Lifecycle::ShutDown => panic!("global subchannel pool is already shut down"),
        }
        debug!("shutdown global subchannel pool");
        *global = Lifecycle::ShutDown;
    }

    /// Return the process wide pool.
    ///
    /// # Panics
    /// If called before [Self::init()] or after [Self::shutdown()].
    pub fn instance() -> Arc<GlobalSubchannelPool> {
        match &*GLOBAL.read() {
            Lifecycle::Running(pool) => pool.clone(),
            Lifecycle::Uninitialized => panic!("global subchannel pool is not initialized"),
            Lifecycle::ShutDown => panic!("global subchannel pool is shut down"),
        }
    }
}
