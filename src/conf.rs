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

//! Subchannel pool configurations

use log::{debug, trace};
use pingora_error::{Error, ErrorType::*, OrErr, Result};
use serde::{Deserialize, Serialize};
use std::fs;

const DEFAULT_SHARDS: usize = 64;
/// The largest supported shard count
pub const MAX_SHARDS: usize = 1 << 16;

/// The configuration of the [crate::GlobalSubchannelPool]
///
/// Configuration files are YAML. Unknown keys are ignored so this can be embedded in a larger
/// configuration file.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConf {
    /// Version
    pub version: usize,
    /// The number of independent shards the key space is split into. Must be a power of two, at
    /// most [MAX_SHARDS].
    ///
    /// Fewer shards mean more lock contention between unrelated keys, more shards mean more
    /// small trees to maintain.
    pub shards: usize,
}

impl Default for PoolConf {
    fn default() -> Self {
        PoolConf {
            version: 0,
            shards: DEFAULT_SHARDS,
        }
    }
}

impl PoolConf {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: PoolConf = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;

        trace!("Loaded conf: {conf:?}");
        conf.validate()
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap()
    }

    pub fn validate(self) -> Result<Self> {
        if !self.shards.is_power_of_two() {
            return Error::e_explain(
                InternalError,
                format!("shards must be a power of two, got {}", self.shards),
            );
        }
        if self.shards > MAX_SHARDS {
            return Error::e_explain(
                InternalError,
                format!("shards must be at most {MAX_SHARDS}, got {}", self.shards),
            );
        }
        Ok(self)
    }
}
