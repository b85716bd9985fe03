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

//! Subchannel pooling
//!
//! Many channels of a process may connect to the same destination with the same settings. The
//! subchannel pool makes sure they share one subchannel (physical connection) per
//! [SubchannelKey] instead of each opening its own.
//!
//! The pool only holds weak handles: a subchannel lives as long as some channel uses it and
//! retracts itself from the pool when the last user drops it.
//!
//! The [GlobalSubchannelPool] is optimized for lookups, which happen on every channel setup. It
//! is sharded and each shard publishes immutable [AvlMap] snapshots, so a lookup never waits for
//! a writer to make its decision.

#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::type_complexity)]

pub mod args;
pub mod avl;
mod conf;
mod global;
mod key;
mod local;
mod pool;
mod subchannel;

pub use args::ChannelArgs;
pub use avl::AvlMap;
pub use conf::{PoolConf, MAX_SHARDS};
pub use global::GlobalSubchannelPool;
pub use key::SubchannelKey;
pub use local::LocalSubchannelPool;
pub use pool::{get_subchannel_pool, SubchannelPool};
pub use subchannel::{
    create_subchannel, same_subchannel, PoolRegistration, Subchannel, SubchannelRef,
    WeakSubchannel,
};
