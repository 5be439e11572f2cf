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

//! An in-memory partitioning tool, for exercising the engine without
//! touching real disks.

use serde_json::json;
use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Mutex, MutexGuard};

use crate::chain::SlotKind;
use crate::errors::*;
use crate::table::LabelType;
use crate::tool::PartitionTool;
use crate::writer::{CreateRequest, Extent, PartnoPrompt};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FakePartition {
    pub start: u64,
    pub size: u64,
    pub fstype: String,
}

impl FakePartition {
    fn end(&self) -> u64 {
        self.start + self.size - 1
    }
}

#[derive(Debug)]
pub(crate) struct FakeState {
    pub label: Option<LabelType>,
    pub identity: String,
    pub sectors: u64,
    pub sector_size: u64,
    /// What is on the disk.
    pub partitions: BTreeMap<u32, FakePartition>,
    /// What the last read returned.
    visible: BTreeMap<u32, FakePartition>,
    /// Reads after each mutation that still return the old table.
    pub lag: u32,
    stale_reads: u32,
    /// fdisk fails without creating anything.
    pub refuse_create: bool,
    /// Ignore requests carrying a default partition number prompt.
    pub refuse_default_partno: bool,
    pub refuse_delete: bool,
    pub fail_set_type: bool,
    /// Accept type writes but keep the old type.
    pub ignore_type: bool,
    pub fail_reorder: bool,
    /// Accept identifier writes but keep the old one.
    pub ignore_identity: bool,
    pub mutations: u32,
    pub rescans: u32,
    pub scripts: Vec<CreateRequest>,
}

pub(crate) struct FakeTool {
    state: Mutex<FakeState>,
}

fn failure(command: &str, stderr: &str) -> Error {
    Error::Tool {
        command: command.to_string(),
        status: ExitStatus::from_raw(1 << 8),
        stderr: stderr.to_string(),
    }
}

impl FakeTool {
    /// A disk of `sectors` 512-byte sectors with no label at all.
    pub fn blank(sectors: u64) -> Self {
        Self {
            state: Mutex::new(FakeState {
                label: None,
                identity: String::new(),
                sectors,
                sector_size: 512,
                partitions: BTreeMap::new(),
                visible: BTreeMap::new(),
                lag: 0,
                stale_reads: 0,
                refuse_create: false,
                refuse_default_partno: false,
                refuse_delete: false,
                fail_set_type: false,
                ignore_type: false,
                fail_reorder: false,
                ignore_identity: false,
                mutations: 0,
                rescans: 0,
                scripts: Vec::new(),
            }),
        }
    }

    pub fn labeled(label: LabelType, sectors: u64) -> Self {
        let tool = Self::blank(sectors);
        tool.state().relabel(label);
        tool
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

impl FakeState {
    fn relabel(&mut self, label: LabelType) {
        self.label = Some(label);
        self.identity = match label {
            LabelType::Dos => "0x0badcafe".into(),
            LabelType::Gpt => "6E1C5D0A-3B2F-4C8D-9A7E-1F0E2D3C4B5A".into(),
        };
        self.partitions.clear();
        self.mutated();
    }

    fn mutated(&mut self) {
        self.mutations += 1;
        self.stale_reads = self.lag;
    }

    fn label(&self, command: &str, disk: &Path) -> Result<LabelType> {
        self.label.ok_or_else(|| {
            failure(
                command,
                &format!(
                    "sfdisk: {}: does not contain a recognized partition table",
                    disk.display()
                ),
            )
        })
    }

    fn logicals(&self) -> impl Iterator<Item = (&u32, &FakePartition)> {
        self.partitions.range(5..)
    }

    fn extended(&self) -> Option<&FakePartition> {
        let ops = self.label?.ops();
        self.partitions
            .range(..5)
            .map(|(_, p)| p)
            .find(|p| ops.is_extended(&p.fstype))
    }

    /// Pick a partition number the way fdisk does when it doesn't ask.
    fn resolve_partno(&self, req: &CreateRequest) -> Option<u32> {
        match (req.partno_prompt, req.kind) {
            (PartnoPrompt::Explicit(n), _) => Some(n),
            (_, SlotKind::Logical) => Some(self.logicals().map(|(n, _)| n + 1).last().unwrap_or(5)),
            (PartnoPrompt::Default, _) | (PartnoPrompt::Absent, _) => {
                let max = match self.label? {
                    LabelType::Dos => 4,
                    LabelType::Gpt => 128,
                };
                (1..=max).find(|n| !self.partitions.contains_key(n))
            }
        }
    }

    fn resolve_start(&self, req: &CreateRequest) -> u64 {
        if let Some(start) = req.start {
            return start;
        }
        if req.kind == SlotKind::Logical {
            let after = self
                .logicals()
                .map(|(_, p)| p.end() + 1)
                .last()
                .or_else(|| self.extended().map(|e| e.start))
                .unwrap_or(2048);
            return after + 2048;
        }
        let after = self
            .partitions
            .range(..5)
            .map(|(_, p)| p.end() + 1)
            .max()
            .unwrap_or(2048);
        (after + 2047) / 2048 * 2048
    }

    fn resolve_end(&self, req: &CreateRequest, start: u64) -> u64 {
        match req.extent {
            Extent::End(end) => end,
            Extent::SizeMiB(mib) => start + mib * MIB / self.sector_size - 1,
            Extent::Default if req.kind == SlotKind::Logical => {
                self.extended().map_or(self.sectors - 1, |e| e.end())
            }
            Extent::Default => self
                .partitions
                .values()
                .map(|p| p.start)
                .filter(|s| *s > start)
                .min()
                .map_or(self.sectors - 1, |s| s - 1),
        }
    }
}

fn node(disk: &Path, partno: u32) -> String {
    format!("{}{}", disk.display(), partno)
}

impl PartitionTool for FakeTool {
    fn dump_json(&self, disk: &Path) -> Result<String> {
        let mut state = self.state();
        let label = state.label("sfdisk --json", disk)?;
        if state.stale_reads > 0 {
            state.stale_reads -= 1;
        } else {
            state.visible = state.partitions.clone();
        }
        let partitions: Vec<_> = state
            .visible
            .iter()
            .map(|(n, p)| {
                json!({
                    "node": node(disk, *n),
                    "start": p.start,
                    "size": p.size,
                    "type": p.fstype,
                })
            })
            .collect();
        Ok(json!({
            "partitiontable": {
                "label": label.to_string(),
                "id": state.identity,
                "device": disk.display().to_string(),
                "unit": "sectors",
                "sectorsize": state.sector_size,
                "partitions": partitions,
            }
        })
        .to_string())
    }

    fn geometry(&self, disk: &Path) -> Result<String> {
        let state = self.state();
        let mut out = format!(
            "Disk {}: {} MiB, {} bytes, {} sectors\n\
             Units: sectors of 1 * {} = {} bytes\n\
             Sector size (logical/physical): {} bytes / {} bytes\n",
            disk.display(),
            state.sectors * state.sector_size / MIB,
            state.sectors * state.sector_size,
            state.sectors,
            state.sector_size,
            state.sector_size,
            state.sector_size,
            state.sector_size,
        );
        if let Some(label) = state.label {
            out.push_str(&format!(
                "Disklabel type: {}\nDisk identifier: {}\n",
                label, state.identity
            ));
        }
        Ok(out)
    }

    fn write_label(&self, _disk: &Path, label: LabelType) -> Result<()> {
        self.state().relabel(label);
        Ok(())
    }

    fn create(&self, disk: &Path, req: &CreateRequest) -> Result<()> {
        let mut state = self.state();
        state.label("fdisk", disk)?;
        state.scripts.push(req.clone());
        if state.refuse_create {
            return Err(failure("fdisk", "Value out of range."));
        }
        if state.refuse_default_partno && req.partno_prompt == PartnoPrompt::Default {
            return Ok(());
        }
        let partno = state
            .resolve_partno(req)
            .ok_or_else(|| failure("fdisk", "No free partition available!"))?;
        if state.partitions.contains_key(&partno) {
            return Err(failure("fdisk", "Partition is already defined"));
        }
        let start = state.resolve_start(req);
        let end = state.resolve_end(req, start);
        let fstype = match (state.label, req.kind) {
            (Some(LabelType::Dos), SlotKind::Extended) => "5",
            (Some(LabelType::Dos), _) => "83",
            _ => crate::table::GPT_LINUX_DATA,
        }
        .to_string();
        state.partitions.insert(
            partno,
            FakePartition {
                start,
                size: end - start + 1,
                fstype,
            },
        );
        state.mutated();
        Ok(())
    }

    fn set_type(&self, disk: &Path, partno: u32, fstype: &str) -> Result<()> {
        let mut state = self.state();
        state.label("sfdisk --part-type", disk)?;
        if state.fail_set_type {
            return Err(failure("sfdisk --part-type", "failed to set partition type"));
        }
        let ignore = state.ignore_type;
        match state.partitions.get_mut(&partno) {
            Some(_) if ignore => (),
            Some(p) => p.fstype = fstype.to_string(),
            None => return Err(failure("sfdisk --part-type", "partition not found")),
        }
        state.mutated();
        Ok(())
    }

    fn get_type(&self, disk: &Path, partno: u32) -> Result<String> {
        let state = self.state();
        state.label("sfdisk --part-type", disk)?;
        state
            .partitions
            .get(&partno)
            .map(|p| p.fstype.clone())
            .ok_or_else(|| failure("sfdisk --part-type", "partition not found"))
    }

    fn delete(&self, disk: &Path, partno: u32) -> Result<()> {
        let mut state = self.state();
        let label = state.label("sfdisk --delete", disk)?;
        if state.refuse_delete {
            return Err(failure("sfdisk --delete", "failed to remove partition"));
        }
        let removed = state
            .partitions
            .remove(&partno)
            .ok_or_else(|| failure("sfdisk --delete", "partition not found"))?;
        if label == LabelType::Dos {
            if label.ops().is_extended(&removed.fstype) {
                // logicals go with their container
                state.partitions.retain(|n, _| *n < 5);
            } else if partno >= 5 {
                // later logicals shift down to keep the chain contiguous
                let later: Vec<u32> = state.partitions.range(partno..).map(|(n, _)| *n).collect();
                for n in later {
                    if let Some(p) = state.partitions.remove(&n) {
                        state.partitions.insert(n - 1, p);
                    }
                }
            }
        }
        state.mutated();
        Ok(())
    }

    fn delete_all(&self, disk: &Path) -> Result<()> {
        let mut state = self.state();
        state.label("sfdisk --delete", disk)?;
        state.partitions.clear();
        state.mutated();
        Ok(())
    }

    fn set_identity(&self, disk: &Path, id: &str) -> Result<()> {
        let mut state = self.state();
        state.label("fdisk", disk)?;
        if !state.ignore_identity {
            state.identity = id.to_string();
        }
        state.mutated();
        Ok(())
    }

    fn reorder(&self, disk: &Path) -> Result<()> {
        let mut state = self.state();
        state.label("sfdisk --reorder", disk)?;
        if state.fail_reorder {
            return Err(failure("sfdisk --reorder", "failed to write disklabel"));
        }
        let mut parts: Vec<FakePartition> = state.partitions.values().cloned().collect();
        parts.sort_by_key(|p| p.start);
        state.partitions = (1..).zip(parts).collect();
        state.mutated();
        Ok(())
    }

    fn rescan(&self, _disk: &Path) -> Result<()> {
        self.state().rescans += 1;
        Ok(())
    }
}
