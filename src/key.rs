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

//! The identity of a subchannel

use std::fmt;
use std::sync::Arc;

use crate::args::ChannelArgs;

/// The key under which a subchannel is pooled.
///
/// Two subchannels are interchangeable when they connect to the same address with the same
/// connection level settings. The settings are reduced to an opaque fingerprint so that the key
/// stays cheap to compare and clone.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubchannelKey {
    // field order matters: the derived Ord compares the address first
    address: Arc<[u8]>,
    fingerprint: Arc<[u8]>,
}

impl SubchannelKey {
    /// Create a new [SubchannelKey] from the raw address and the settings fingerprint
    pub fn new(address: impl AsRef<[u8]>, fingerprint: impl AsRef<[u8]>) -> Self {
        SubchannelKey {
            address: Arc::from(address.as_ref()),
            fingerprint: Arc::from(fingerprint.as_ref()),
        }
    }

    /// Create a new [SubchannelKey] whose fingerprint is derived from the given [ChannelArgs]
    pub fn from_args(address: impl AsRef<[u8]>, args: &ChannelArgs) -> Self {
        Self::new(address, args.fingerprint())
    }

    /// The destination address
    pub fn address(&self) -> &[u8] {
        &self.address
    }

    /// The connection settings fingerprint
    pub fn fingerprint(&self) -> &[u8] {
        &self.fingerprint
    }
}

impl fmt::Display for SubchannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", String::from_utf8_lossy(&self.address))?;
        for b in self.fingerprint.iter() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SubchannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubchannelKey({self})")
    }
}
