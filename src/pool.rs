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

//! The interface shared by all subchannel pools

use log::{debug, warn};
use std::sync::Arc;

use crate::args::{ChannelArgs, USE_LOCAL_SUBCHANNEL_POOL};
use crate::global::GlobalSubchannelPool;
use crate::key::SubchannelKey;
use crate::local::LocalSubchannelPool;
use crate::subchannel::{Subchannel, SubchannelRef};

/// A pool that deduplicates subchannels by [SubchannelKey]
///
/// A pool never keeps a subchannel alive. It only indexes the subchannels which are alive
/// somewhere else.
pub trait SubchannelPool: Send + Sync {
    /// Register `candidate` under `key` and return the canonical subchannel for `key`.
    ///
    /// If a live subchannel is already registered under `key`, it is returned and `candidate` is
    /// dropped. Otherwise `candidate` becomes canonical, replacing any dead entry, and is
    /// returned.
    fn register_subchannel(&self, key: &SubchannelKey, candidate: SubchannelRef)
        -> SubchannelRef;

    /// Remove the entry of `key` if and only if it still refers to `subchannel`.
    ///
    /// This is called once the strong count of `subchannel` reached zero. By then the entry may
    /// have been taken over by a newer subchannel, which must stay registered.
    fn unregister_subchannel(&self, key: &SubchannelKey, subchannel: &dyn Subchannel);

    /// Return the live subchannel registered under `key`, if any
    fn find_subchannel(&self, key: &SubchannelKey) -> Option<SubchannelRef>;
}

/// Pick the pool a channel with the given [ChannelArgs] should use.
///
/// Channels asking for a local pool get their own private [LocalSubchannelPool]. All the others
/// share the process wide [GlobalSubchannelPool], which must have been initialized.
pub fn get_subchannel_pool(args: &ChannelArgs) -> Arc<dyn SubchannelPool> {
    match args.get_bool(USE_LOCAL_SUBCHANNEL_POOL) {
        Some(true) => {
            debug!("using a local subchannel pool");
            return Arc::new(LocalSubchannelPool::new());
        }
        None if args.contains(USE_LOCAL_SUBCHANNEL_POOL) => {
            warn!("{USE_LOCAL_SUBCHANNEL_POOL} is not a boolean, using the global subchannel pool")
        }
        _ => {}
    }
    GlobalSubchannelPool::instance()
}
