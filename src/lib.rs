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

//! Partition table management for disks and disk images.
//!
//! The engine drives util-linux's `sfdisk` and `fdisk` and never trusts a
//! change until a fresh read of the table shows it.  Start with
//! [`Disk::open`].

pub mod blockdev;
pub mod chain;
pub mod cmdline;
pub mod commands;
pub mod config;
pub mod disk;
pub mod errors;
pub mod overlap;
pub mod poll;
pub mod reader;
pub mod table;
pub mod tool;
pub mod util;
pub mod writer;

#[cfg(test)]
mod testing;

pub use crate::blockdev::{classify, is_disk, Device, DeviceKind};
pub use crate::config::EngineConfig;
pub use crate::disk::{Disk, DiskRegistry};
pub use crate::errors::{Error, Result};
pub use crate::overlap::{overlapping, Hypothetical};
pub use crate::poll::Retry;
pub use crate::table::{Alias, DiskTable, LabelType, Partition};
pub use crate::tool::{PartitionTool, Sfdisk};
pub use crate::writer::NewPartition;
