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

#![allow(unused)]

use pingora_subchannel_pool::{
    ChannelArgs, PoolRegistration, Subchannel, SubchannelKey, SubchannelRef,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A fake connection that retracts itself from its pool when dropped
pub struct MockConnection {
    key: SubchannelKey,
    registration: PoolRegistration,
    // shared among all connections of a test to count how many are alive
    alive: Arc<AtomicUsize>,
}

impl MockConnection {
    pub fn new(key: SubchannelKey, alive: &Arc<AtomicUsize>) -> SubchannelRef {
        alive.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockConnection {
            key,
            registration: PoolRegistration::new(),
            alive: alive.clone(),
        })
    }
}

impl Subchannel for MockConnection {
    fn key(&self) -> &SubchannelKey {
        &self.key
    }

    fn registration(&self) -> &PoolRegistration {
        &self.registration
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.registration.unregister(&*self);
        self.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn addr(i: usize) -> String {
    format!("10.0.{}.{}:443", i / 256, i % 256)
}

/// The key of a channel to `addr(i)` without any settings
pub fn key(i: usize) -> SubchannelKey {
    SubchannelKey::from_args(addr(i), &ChannelArgs::new())
}
