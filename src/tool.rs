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

//! The boundary between the engine and the operating system.

use std::fs::metadata;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::process::Command;

use crate::blockdev::{reread_partition_table, udev_settle};
use crate::errors::*;
use crate::table::LabelType;
use crate::util::{cmd_output, cmd_output_with_input};
use crate::writer::{fdisk_script, CreateRequest};
use crate::{runcmd, runcmd_output};

/// Everything the engine asks of the partitioning tools.  Implementations
/// report a nonzero exit as `Error::Tool` with the captured stderr.
pub trait PartitionTool: Send + Sync {
    /// `sfdisk --json` output.
    fn dump_json(&self, disk: &Path) -> Result<String>;
    /// `fdisk -l` output, in the C locale.
    fn geometry(&self, disk: &Path) -> Result<String>;
    /// Replace the whole table with an empty one.
    fn write_label(&self, disk: &Path, label: LabelType) -> Result<()>;
    fn create(&self, disk: &Path, req: &CreateRequest) -> Result<()>;
    fn set_type(&self, disk: &Path, partno: u32, fstype: &str) -> Result<()>;
    fn get_type(&self, disk: &Path, partno: u32) -> Result<String>;
    fn delete(&self, disk: &Path, partno: u32) -> Result<()>;
    fn delete_all(&self, disk: &Path) -> Result<()>;
    /// Write a disk identifier already in canonical form.
    fn set_identity(&self, disk: &Path, id: &str) -> Result<()>;
    /// Renumber partitions in on-disk order.
    fn reorder(&self, disk: &Path) -> Result<()>;
    /// Get the kernel and udev to pick up a changed table.
    fn rescan(&self, disk: &Path) -> Result<()>;

    fn node_visible(&self, node: &Path) -> bool {
        node.exists()
    }
}

/// The util-linux tools: sfdisk for reads, deletions and type codes,
/// fdisk for creation and identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sfdisk;

fn c_locale(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.env("LC_ALL", "C");
    cmd
}

fn is_block_device(path: &Path) -> bool {
    metadata(path).map_or(false, |m| m.file_type().is_block_device())
}

impl PartitionTool for Sfdisk {
    fn dump_json(&self, disk: &Path) -> Result<String> {
        runcmd_output!("sfdisk", "--json", disk)
    }

    fn geometry(&self, disk: &Path) -> Result<String> {
        cmd_output(c_locale("fdisk").arg("-l").arg(disk))
    }

    fn write_label(&self, disk: &Path, label: LabelType) -> Result<()> {
        cmd_output_with_input(
            c_locale("sfdisk").args(["--quiet", "--wipe", "always"]).arg(disk),
            Some(&format!("label: {}\n", label)),
        )
        .map(|_| ())
    }

    fn create(&self, disk: &Path, req: &CreateRequest) -> Result<()> {
        cmd_output_with_input(c_locale("fdisk").arg(disk), Some(&fdisk_script(req))).map(|_| ())
    }

    fn set_type(&self, disk: &Path, partno: u32, fstype: &str) -> Result<()> {
        runcmd!("sfdisk", "--part-type", disk, partno.to_string(), fstype)
    }

    fn get_type(&self, disk: &Path, partno: u32) -> Result<String> {
        Ok(runcmd_output!("sfdisk", "--part-type", disk, partno.to_string())?
            .trim()
            .to_string())
    }

    fn delete(&self, disk: &Path, partno: u32) -> Result<()> {
        runcmd!("sfdisk", "--delete", disk, partno.to_string())
    }

    fn delete_all(&self, disk: &Path) -> Result<()> {
        runcmd!("sfdisk", "--delete", disk)
    }

    fn set_identity(&self, disk: &Path, id: &str) -> Result<()> {
        // expert menu, change identifier, return, write
        cmd_output_with_input(
            c_locale("fdisk").arg(disk),
            Some(&format!("x\ni\n{}\nr\nw\n", id)),
        )
        .map(|_| ())
    }

    fn reorder(&self, disk: &Path) -> Result<()> {
        runcmd!("sfdisk", "--reorder", disk)
    }

    fn rescan(&self, disk: &Path) -> Result<()> {
        // image files have no kernel view to refresh
        if !is_block_device(disk) {
            return Ok(());
        }
        reread_partition_table(disk)?;
        if let Err(e) = udev_settle() {
            eprintln!("Waiting for udev: {}", e.detail());
        }
        Ok(())
    }
}
