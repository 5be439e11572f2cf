// Copyright 2026 The fofta Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

use crate::poll::Retry;
use crate::table::LabelType;

/// Engine tunables.  Every field has a default, so a config file need
/// only name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct EngineConfig {
    /// How many times to re-check after a mutation before giving up.
    pub settle_timeout: u32,
    pub settle_interval_ms: u64,
    /// Type code for new dos partitions when the caller names none.
    pub default_type: String,
    /// Directories of symlinks searched for device aliases.
    pub alias_dirs: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_timeout: 10,
            settle_interval_ms: 1000,
            default_type: "83".into(),
            alias_dirs: ["id", "label", "partuuid", "path", "uuid"]
                .iter()
                .map(|kind| format!("/dev/disk/by-{}", kind))
                .collect(),
        }
    }
}

/// One config file.  Absent keys leave the current value alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ConfigFile {
    settle_timeout: Option<u32>,
    settle_interval_ms: Option<u64>,
    default_type: Option<String>,
    alias_dirs: Option<Vec<String>>,
}

impl EngineConfig {
    pub fn retry(&self) -> Retry {
        Retry::new(
            self.settle_timeout,
            Duration::from_millis(self.settle_interval_ms),
        )
    }

    /// Type code for a new partition on a `label` table.  Labels that
    /// ignore type codes get their own default.
    pub fn default_type_for(&self, label: LabelType) -> &str {
        let ops = label.ops();
        if ops.honors_type_codes {
            &self.default_type
        } else {
            ops.default_type
        }
    }

    /// Defaults, overridden by each of `paths` in turn.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut config = Self::default();
        for path in paths {
            let path = path.as_ref();
            let file: ConfigFile = serde_yaml::from_reader(
                OpenOptions::new()
                    .read(true)
                    .open(path)
                    .with_context(|| format!("opening config file {}", path.display()))?,
            )
            .with_context(|| format!("parsing config file {}", path.display()))?;
            config.merge(file);
        }
        Ok(config)
    }

    fn merge(&mut self, file: ConfigFile) {
        if let Some(v) = file.settle_timeout {
            self.settle_timeout = v;
        }
        if let Some(v) = file.settle_interval_ms {
            self.settle_interval_ms = v;
        }
        if let Some(v) = file.default_type {
            self.default_type = v;
        }
        if let Some(v) = file.alias_dirs {
            self.alias_dirs = v;
        }
    }
}
