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

//! Connection level settings of a channel

use std::collections::BTreeMap;

/// When set to `true`, the channel uses its own [crate::LocalSubchannelPool] instead of the
/// process wide one.
pub const USE_LOCAL_SUBCHANNEL_POOL: &str = "grpc.use_local_subchannel_pool";
/// Set when the subchannel wraps an already connected endpoint. Such subchannels are never
/// shared. The endpoint is part of the fingerprint, so their keys never match a pooled one.
pub const SUBCHANNEL_ENDPOINT: &str = "grpc.internal.subchannel_endpoint";

/// The value of a single channel arg
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl ArgValue {
    fn tag(&self) -> u8 {
        match self {
            ArgValue::Int(_) => b'i',
            ArgValue::Str(_) => b's',
            ArgValue::Bool(_) => b'b',
        }
    }
}

/// An ordered set of named connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelArgs {
    args: BTreeMap<String, ArgValue>,
}

impl ChannelArgs {
    /// Create an empty [ChannelArgs]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_int(&mut self, name: &str, value: i64) -> &mut Self {
        self.args.insert(name.to_string(), ArgValue::Int(value));
        self
    }

    pub fn set_str(&mut self, name: &str, value: &str) -> &mut Self {
        self.args
            .insert(name.to_string(), ArgValue::Str(value.to_string()));
        self
    }

    pub fn set_bool(&mut self, name: &str, value: bool) -> &mut Self {
        self.args.insert(name.to_string(), ArgValue::Bool(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.args.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.args.get(name) {
            Some(ArgValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.args.get(name) {
            Some(ArgValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Integers are accepted as booleans, anything non-zero being `true`.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.args.get(name) {
            Some(ArgValue::Bool(v)) => Some(*v),
            Some(ArgValue::Int(v)) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    /// Return the deterministic byte encoding of the settings that shape a connection.
    ///
    /// Args are visited in name order so two [ChannelArgs] holding the same settings always
    /// produce the same fingerprint, regardless of the order they were set in.
    /// [USE_LOCAL_SUBCHANNEL_POOL] only picks the pool and is left out.
    pub fn fingerprint(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in self
            .args
            .iter()
            .filter(|(name, _)| name.as_str() != USE_LOCAL_SUBCHANNEL_POOL)
        {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.push(value.tag());
            match value {
                ArgValue::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
                ArgValue::Str(v) => {
                    // length prefix so that a value can never bleed into the next name
                    out.extend_from_slice(&(v.len() as u64).to_be_bytes());
                    out.extend_from_slice(v.as_bytes());
                }
                ArgValue::Bool(v) => out.push(*v as u8),
            }
        }
        out
    }
}
