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

//! A disk and the last snapshot taken of its partition table.
//!
//! Every mutating method refreshes the snapshot before returning, whether
//! it succeeded or not, so callers never act on a table that was only
//! attempted.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::blockdev::{classify, DeviceKind};
use crate::chain;
use crate::config::EngineConfig;
use crate::errors::*;
use crate::overlap::{self, Hypothetical};
use crate::reader::read_table;
use crate::table::{DiskTable, LabelType, Partition};
use crate::tool::PartitionTool;
use crate::writer::{plan_create, NewPartition, Writer};

pub struct Disk {
    path: PathBuf,
    block_device: bool,
    tool: Arc<dyn PartitionTool>,
    config: EngineConfig,
    table: DiskTable,
}

impl Disk {
    /// Open the disk at `path` (resolving symlinks) and read its table.
    pub fn open(path: &Path, tool: Arc<dyn PartitionTool>, config: EngineConfig) -> Result<Self> {
        let (path, block_device) = resolve(path)?;
        let table = read_table(tool.as_ref(), &path, &config.alias_dirs)?;
        Ok(Self {
            path,
            block_device,
            tool,
            config,
            table,
        })
    }

    /// Write a fresh, empty `label` table to the disk at `path`, then open
    /// it.  Whatever was there before is lost.
    pub fn open_with_label(
        path: &Path,
        label: LabelType,
        tool: Arc<dyn PartitionTool>,
        config: EngineConfig,
    ) -> Result<Self> {
        let (path, _) = resolve(path)?;
        eprintln!("Writing {} label to {}", label, path.display());
        tool.write_label(&path, label)?;
        if let Err(e) = tool.rescan(&path) {
            eprintln!("Rescanning {}: {}", path.display(), e.detail());
        }
        Self::open(&path, tool, config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &DiskTable {
        &self.table
    }

    pub fn label(&self) -> LabelType {
        self.table.label
    }

    pub fn identity(&self) -> &str {
        &self.table.identity
    }

    pub fn sector_size(&self) -> u64 {
        self.table.sector_size
    }

    pub fn size_in_sectors(&self) -> u64 {
        self.table.size_in_sectors
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.table.partitions
    }

    pub fn partition(&self, partno: u32) -> Option<&Partition> {
        self.table.partition(partno)
    }

    /// The partition whose node or any alias is `path`.
    pub fn find_partition_by_alias(&self, path: &Path) -> Option<&Partition> {
        self.table.partitions.iter().find(|p| p.answers_to(path))
    }

    /// Replace the snapshot with a fresh read.
    pub fn update(&mut self) -> Result<()> {
        self.table = read_table(self.tool.as_ref(), &self.path, &self.config.alias_dirs)?;
        if overlap::overlapping(&self.table, None) {
            eprintln!("Warning: partitions on {} overlap", self.path.display());
        }
        Ok(())
    }

    pub fn overlapping(&self, hypothetical: Option<&Hypothetical>) -> bool {
        overlap::overlapping(&self.table, hypothetical)
    }

    /// Serialize the current snapshot in sfdisk's script format.
    pub fn dump(&self) -> String {
        self.table.dump()
    }

    fn writer(&self) -> Writer<'_> {
        Writer::new(
            self.tool.as_ref(),
            &self.path,
            self.block_device,
            self.config.retry(),
        )
    }

    /// Run `op`, then refresh the snapshot no matter how `op` went.  An
    /// error from `op` takes precedence over one from the refresh.
    fn then_update<T>(&mut self, op: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        let refreshed = self.update();
        let value = result?;
        refreshed?;
        Ok(value)
    }

    /// Create a partition and return its number.
    pub fn add_partition(&mut self, new: &NewPartition) -> Result<u32> {
        // shape errors make no calls, but still leave a fresh snapshot
        if let Err(e) = new.validate() {
            return self.then_update(|_| Err(e));
        }
        self.update()?;
        let default_type = self.config.default_type_for(self.table.label).to_string();
        let req = plan_create(&self.table, new, &default_type)?;
        if new.fstype.is_some() && !req.set_type {
            eprintln!(
                "Warning: {} tables ignore type codes; partition #{} gets the default type",
                self.table.label, req.partno
            );
        }

        self.then_update(|disk| disk.writer().create(&req).map(|_| ()))?;
        if let Some((a, b)) = overlap::first_conflict(&self.table, None) {
            eprintln!(
                "Partition #{} overlaps on {}; deleting it again",
                req.partno,
                self.path.display()
            );
            self.then_update(|disk| disk.writer().delete(req.partno).map(|_| ()))?;
            return Err(Error::PartitionsOverlap {
                disk: self.path.clone(),
                detail: format!("partitions #{} and #{} overlap after creation", a, b),
            });
        }
        Ok(req.partno)
    }

    /// Delete partition `partno`.  Deleting a partition that doesn't exist
    /// does nothing.
    pub fn delete_partition(&mut self, partno: u32) -> Result<()> {
        self.update()?;
        if !chain::check_delete(&self.table, partno)? {
            eprintln!(
                "Partition #{} doesn't exist on {}; nothing to delete",
                partno,
                self.path.display()
            );
            return Ok(());
        }
        self.then_update(|disk| disk.writer().delete(partno).map(|_| ()))
    }

    pub fn delete_all_partitions(&mut self) -> Result<()> {
        self.then_update(|disk| disk.writer().delete_all())
    }

    /// Replace the table with an empty `label` one.
    pub fn write_label(&mut self, label: LabelType) -> Result<()> {
        eprintln!("Writing {} label to {}", label, self.path.display());
        self.then_update(|disk| {
            disk.tool.write_label(&disk.path, label)?;
            if let Err(e) = disk.tool.rescan(&disk.path) {
                eprintln!("Rescanning {}: {}", disk.path.display(), e.detail());
            }
            Ok(())
        })
    }

    /// Set the disk identifier, then read it back to make sure it took.
    pub fn set_identity(&mut self, id: &str) -> Result<()> {
        let wanted = self.table.label.ops().normalize_identity(id)?;
        eprintln!("Setting identifier of {} to {}", self.path.display(), wanted);
        let written = self.tool.set_identity(&self.path, &wanted);
        let refreshed = self.update();
        if let Err(e) = written {
            return Err(Error::IdentitySet {
                disk: self.path.clone(),
                wanted,
                found: e.detail(),
            });
        }
        refreshed?;
        if !self.table.identity.eq_ignore_ascii_case(&wanted) {
            return Err(Error::IdentitySet {
                disk: self.path.clone(),
                wanted,
                found: self.table.identity.clone(),
            });
        }
        Ok(())
    }

    /// Give the disk a new random identifier and return it.
    pub fn randomize_identity(&mut self) -> Result<String> {
        let id = match self.table.label {
            LabelType::Dos => format!("0x{:08x}", rand::random::<u32>()),
            LabelType::Gpt => uuid::Uuid::new_v4().to_string(),
        };
        self.set_identity(&id)?;
        Ok(self.table.identity.clone())
    }

    /// Type code of partition `partno`, straight from the tool.
    pub fn partition_type(&self, partno: u32) -> Result<String> {
        self.tool
            .get_type(&self.path, partno)
            .map_err(|e| Error::AttributeRead {
                disk: self.path.clone(),
                partno,
                attribute: "type",
                detail: e.detail(),
            })
    }

    pub fn set_partition_type(&mut self, partno: u32, fstype: &str) -> Result<()> {
        self.then_update(|disk| disk.writer().set_type(partno, fstype))
    }

    /// Renumber partitions to match their order on disk.
    pub fn reorder(&mut self) -> Result<()> {
        self.then_update(|disk| {
            disk.tool
                .reorder(&disk.path)
                .map_err(|e| Error::Reorder {
                    disk: disk.path.clone(),
                    detail: e.detail(),
                })?;
            if let Err(e) = disk.tool.rescan(&disk.path) {
                eprintln!("Rescanning {}: {}", disk.path.display(), e.detail());
            }
            Ok(())
        })
    }
}

fn resolve(path: &Path) -> Result<(PathBuf, bool)> {
    let device = classify(path)?;
    if device.kind != DeviceKind::Disk {
        return Err(Error::Misclassified {
            path: path.to_path_buf(),
            reason: "it is a partition, not a disk".into(),
        });
    }
    Ok((device.path, device.block_device))
}

impl fmt::Display for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)
    }
}

impl fmt::Debug for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disk")
            .field("path", &self.path)
            .field("block_device", &self.block_device)
            .field("table", &self.table)
            .finish()
    }
}

/// One shared `Disk` per device, so that everyone working on the same
/// disk sees the same snapshot.
pub struct DiskRegistry {
    tool: Arc<dyn PartitionTool>,
    config: EngineConfig,
    disks: Mutex<HashMap<PathBuf, Arc<Mutex<Disk>>>>,
}

impl DiskRegistry {
    pub fn new(tool: Arc<dyn PartitionTool>, config: EngineConfig) -> Self {
        Self {
            tool,
            config,
            disks: Mutex::new(HashMap::new()),
        }
    }

    /// The `Disk` for `path`, opening it on first use.  Aliases of the same
    /// device get the same instance.
    pub fn get(&self, path: &Path) -> Result<Arc<Mutex<Disk>>> {
        let (resolved, _) = resolve(path)?;
        let mut disks = self.disks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(disk) = disks.get(&resolved) {
            return Ok(disk.clone());
        }
        let disk = Arc::new(Mutex::new(Disk::open(
            &resolved,
            self.tool.clone(),
            self.config.clone(),
        )?));
        disks.insert(resolved, disk.clone());
        Ok(disk)
    }

    /// Drop the cached instance, e.g. after the device went away.
    pub fn forget(&self, path: &Path) -> bool {
        let resolved = classify(path).map_or_else(|_| path.to_path_buf(), |d| d.path);
        self.disks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&resolved)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.disks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
