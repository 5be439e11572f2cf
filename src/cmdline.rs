// Copyright 2019 CoreOS, Inc.
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

use clap::{Args, Parser};

use crate::table::LabelType;

// Args are listed in --help in the order declared in these structs/enums.
// Please keep the entire help text to 80 columns.

/// Partition table management for disks and disk images
#[derive(Debug, Parser)]
#[command(name = "fofta", version)]
#[command(args_conflicts_with_subcommands = true)]
#[command(disable_help_subcommand = true)]
#[command(help_expected = true)]
pub enum Cmd {
    /// Report whether a path names a disk or a partition
    Classify(ClassifyConfig),
    /// List whole disks known to the kernel
    List(ListConfig),
    /// Show a disk's partition table
    Show(ShowConfig),
    /// Print a disk's partition table as an sfdisk script
    Dump(ShowConfig),
    /// Create a partition
    Add(AddConfig),
    /// Delete a partition
    Delete(DeleteConfig),
    /// Delete every partition on a disk
    Wipe(ShowConfig),
    /// Write a new, empty partition table
    Label(LabelConfig),
    /// Set the disk identifier
    SetId(SetIdConfig),
}

#[derive(Debug, Clone, Default, Args)]
pub struct EngineOpts {
    /// YAML config file with engine settings
    ///
    /// Later files override earlier ones.  Command-line options override
    /// all files.
    #[arg(long, value_name = "path")]
    pub config_file: Vec<String>,
    /// How many times to check for a change before giving up
    #[arg(long, value_name = "count")]
    pub settle_timeout: Option<u32>,
}

#[derive(Debug, Parser)]
pub struct ClassifyConfig {
    /// Device node, alias symlink, or image file
    #[arg(value_name = "PATH")]
    pub path: String,
}

#[derive(Debug, Parser)]
pub struct ListConfig {}

#[derive(Debug, Parser)]
pub struct ShowConfig {
    #[command(flatten)]
    pub engine: EngineOpts,
    /// Disk device or image file
    #[arg(value_name = "DISK")]
    pub disk: String,
}

#[derive(Debug, Parser)]
pub struct AddConfig {
    #[command(flatten)]
    pub engine: EngineOpts,
    /// Partition number [default: next after the highest]
    #[arg(long, value_name = "N")]
    pub partno: Option<u32>,
    /// First sector
    #[arg(long, value_name = "SECTOR")]
    pub start: Option<u64>,
    /// Last sector, inclusive
    #[arg(long, value_name = "SECTOR", conflicts_with = "size_mib")]
    pub end: Option<u64>,
    /// Size in MiB
    #[arg(long, value_name = "MIB", conflicts_with = "end")]
    pub size_mib: Option<u64>,
    /// Partition type code (dos tables only)
    #[arg(long = "type", value_name = "CODE")]
    pub fstype: Option<String>,
    /// Disk device or image file
    #[arg(value_name = "DISK")]
    pub disk: String,
}

#[derive(Debug, Parser)]
pub struct DeleteConfig {
    #[command(flatten)]
    pub engine: EngineOpts,
    /// Disk device or image file
    #[arg(value_name = "DISK")]
    pub disk: String,
    /// Partition number
    #[arg(value_name = "N")]
    pub partno: u32,
}

#[derive(Debug, Parser)]
pub struct LabelConfig {
    #[command(flatten)]
    pub engine: EngineOpts,
    /// Disk device or image file
    #[arg(value_name = "DISK")]
    pub disk: String,
    /// Table type: dos or gpt
    #[arg(value_name = "TYPE")]
    pub label: LabelType,
}

#[derive(Debug, Parser)]
pub struct SetIdConfig {
    #[command(flatten)]
    pub engine: EngineOpts,
    /// Generate a random identifier
    #[arg(long, conflicts_with = "id")]
    pub random: bool,
    /// Disk device or image file
    #[arg(value_name = "DISK")]
    pub disk: String,
    /// 0x and 8 hex digits for dos, a UUID for gpt
    #[arg(value_name = "ID", required_unless_present = "random")]
    pub id: Option<String>,
}
