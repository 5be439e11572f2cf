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

//! Turning a partition request into tool invocations, and confirming
//! that they took.
//!
//! Creation is two-phase: fdisk creates the slot, then sfdisk assigns the
//! type code.  A slot moves `Nonexistent -> Pending -> Exists`, or ends in
//! `Failed` if the poller never sees it.  Deletion runs the same machine
//! in reverse.

use std::path::Path;

use crate::chain::{self, SlotKind};
use crate::errors::*;
use crate::overlap::{self, Hypothetical};
use crate::poll::Retry;
use crate::reader;
use crate::table::{DiskTable, LabelType};
use crate::tool::PartitionTool;

const MIB: u64 = 1024 * 1024;

/// A caller's request for a new partition.  Unset fields are chosen from
/// the current table or left to the tool's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPartition {
    pub partno: Option<u32>,
    pub start: Option<u64>,
    /// Last sector, inclusive.  Mutually exclusive with `size_mib`.
    pub end: Option<u64>,
    pub size_mib: Option<u64>,
    pub fstype: Option<String>,
}

impl NewPartition {
    /// Checks that need nothing but the request itself.
    pub fn validate(&self) -> Result<()> {
        if self.end.is_some() && self.size_mib.is_some() {
            return Err(Error::InvalidRequest(
                "specify either an end sector or a size, not both".into(),
            ));
        }
        if self.size_mib == Some(0) {
            return Err(Error::InvalidRequest("size must be nonzero".into()));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(Error::StartEndInverted {
                    partno: self.partno.unwrap_or(0),
                    start,
                    end,
                });
            }
        }
        Ok(())
    }
}

/// How to answer fdisk's "Partition number" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnoPrompt {
    /// fdisk won't ask.
    Absent,
    /// Accept fdisk's suggestion.
    Default,
    Explicit(u32),
}

/// How to answer fdisk's "Last sector" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    End(u64),
    SizeMiB(u64),
    /// Rest of the free space.
    Default,
}

/// A validated creation, resolved against a specific table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub label: LabelType,
    pub partno: u32,
    pub kind: SlotKind,
    /// Whether fdisk will ask for the partition type (p/e/l).
    pub kind_prompt: bool,
    pub partno_prompt: PartnoPrompt,
    pub start: Option<u64>,
    pub extent: Extent,
    pub fstype: String,
    /// Whether the type code is applied in a second step.
    pub set_type: bool,
}

/// Resolve `new` against `table`: fill in defaults, apply the chain rules
/// and check the result against existing partitions.  Makes no external
/// calls.
pub fn plan_create(table: &DiskTable, new: &NewPartition, default_type: &str) -> Result<CreateRequest> {
    new.validate()?;
    if table.sector_size == 0 {
        return Err(Error::InvalidRequest(format!(
            "{} reports a sector size of zero",
            table.node.display()
        )));
    }
    let ops = table.label.ops();
    let partno = new.partno.unwrap_or_else(|| table.next_partno());
    let fstype = new
        .fstype
        .clone()
        .unwrap_or_else(|| default_type.to_string());
    let kind = chain::check_create(table, partno, &fstype)?;

    let mut start = new.start;
    let mut end = new.end;
    if kind != SlotKind::Logical {
        if start.is_none() && partno > 1 {
            start = table.partition(partno - 1).map(|p| p.end() + 1);
        }
        if end.is_none() && new.size_mib.is_none() {
            end = table
                .partition(partno + 1)
                .map(|p| p.start.saturating_sub(1));
        }
    }
    if let (Some(start), Some(mib)) = (start, new.size_mib) {
        end = Some(end_for_size(start, mib, table.sector_size)?);
    }
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(Error::StartEndInverted { partno, start, end });
        }
    }

    let (probable_start, probable_end) = probable_extent(table, kind, start, end, new.size_mib)?;
    let hypothetical = Hypothetical {
        partno: Some(partno),
        start: probable_start,
        end: probable_end,
        fstype: Some(fstype.clone()),
    };
    if let Some((a, b)) = overlap::first_conflict(table, Some(&hypothetical)) {
        return Err(Error::PartitionsOverlap {
            disk: table.node.clone(),
            detail: format!(
                "proposed partition #{} would overlap: #{} and #{}",
                partno, a, b
            ),
        });
    }

    let extent = match (end, new.size_mib) {
        (_, Some(mib)) if new.end.is_none() && start.is_none() => Extent::SizeMiB(mib),
        (Some(end), _) => Extent::End(end),
        (None, _) => Extent::Default,
    };

    let (kind_prompt, partno_prompt) = match ops.max_primary {
        Some(max_primary) => {
            let free_primaries = (1..=max_primary)
                .filter(|n| !table.has_partition(*n))
                .count();
            let partno_prompt = if kind == SlotKind::Logical || free_primaries == 1 {
                PartnoPrompt::Absent
            } else if partno == 1 {
                PartnoPrompt::Default
            } else {
                PartnoPrompt::Explicit(partno)
            };
            (free_primaries > 0, partno_prompt)
        }
        None => (
            false,
            if partno == 1 {
                PartnoPrompt::Default
            } else {
                PartnoPrompt::Explicit(partno)
            },
        ),
    };

    Ok(CreateRequest {
        label: table.label,
        partno,
        kind,
        kind_prompt,
        partno_prompt,
        start,
        extent,
        fstype,
        set_type: ops.honors_type_codes,
    })
}

/// Last sector of a `mib` MiB partition starting at `start`.
fn end_for_size(start: u64, mib: u64, sector_size: u64) -> Result<u64> {
    mib.checked_mul(MIB)
        .and_then(|bytes| bytes.checked_div(sector_size))
        .and_then(|sectors| start.checked_add(sectors))
        .and_then(|end| end.checked_sub(1))
        .ok_or_else(|| Error::InvalidRequest(format!("a size of {} MiB is out of range", mib)))
}

/// The sectors a new partition would cover once the tool has filled in
/// whatever the request leaves open.  Logicals stay inside their
/// container; anything else stops short of the next partition.
fn probable_extent(
    table: &DiskTable,
    kind: SlotKind,
    start: Option<u64>,
    end: Option<u64>,
    size_mib: Option<u64>,
) -> Result<(Option<u64>, Option<u64>)> {
    let ops = table.label.ops();
    let container = match kind {
        SlotKind::Logical => table.extended(),
        _ => None,
    };
    let start = start.unwrap_or_else(|| match container {
        Some(ext) => table
            .partitions
            .iter()
            .filter(|p| ops.is_logical(p.partno))
            .map(|p| p.end() + 1)
            .max()
            .unwrap_or(ext.start),
        None => table
            .partitions
            .iter()
            .filter(|p| !ops.is_logical(p.partno))
            .map(|p| p.end() + 1)
            .max()
            .unwrap_or(0),
    });
    if end.is_some() {
        return Ok((Some(start), end));
    }
    let limit = table
        .partitions
        .iter()
        .filter(|p| p.start > start && !ops.is_extended(&p.fstype))
        .map(|p| p.start - 1)
        .chain(container.map(|ext| ext.end()).filter(|e| *e >= start))
        .min();
    let end = match size_mib {
        Some(mib) => {
            let end = end_for_size(start, mib, table.sector_size)?;
            Some(limit.map_or(end, |limit| end.min(limit)))
        }
        None => limit,
    };
    Ok((Some(start), end))
}

/// fdisk keystrokes for `req`.  Empty lines accept fdisk's default.
pub fn fdisk_script(req: &CreateRequest) -> String {
    let mut script = String::from("n\n");
    if req.kind_prompt {
        script.push_str(match req.kind {
            SlotKind::Primary => "p\n",
            SlotKind::Extended => "e\n",
            SlotKind::Logical => "l\n",
        });
    }
    match req.partno_prompt {
        PartnoPrompt::Absent => (),
        PartnoPrompt::Default => script.push('\n'),
        PartnoPrompt::Explicit(n) => script.push_str(&format!("{}\n", n)),
    }
    match req.start {
        Some(start) => script.push_str(&format!("{}\n", start)),
        None => script.push('\n'),
    }
    match req.extent {
        Extent::End(end) => script.push_str(&format!("{}\n", end)),
        Extent::SizeMiB(mib) => script.push_str(&format!("+{}M\n", mib)),
        Extent::Default => script.push('\n'),
    }
    script.push_str("w\n");
    script
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Nonexistent,
    Pending,
    Exists,
    Failed,
}

/// Issues mutations against one disk and waits for them to become visible.
pub struct Writer<'a> {
    tool: &'a dyn PartitionTool,
    disk: &'a Path,
    block_device: bool,
    retry: Retry,
}

impl<'a> Writer<'a> {
    pub fn new(tool: &'a dyn PartitionTool, disk: &'a Path, block_device: bool, retry: Retry) -> Self {
        Self {
            tool,
            disk,
            block_device,
            retry,
        }
    }

    /// Create the slot described by `req`, then set its type.
    pub fn create(&self, req: &CreateRequest) -> Result<SlotState> {
        let (mut state, mut detail) = self.create_slot(req);
        if state == SlotState::Failed && req.partno_prompt == PartnoPrompt::Default {
            // fdisk's suggestion wasn't the slot we wanted; name it
            eprintln!(
                "Partition #{} did not appear on {}; retrying with explicit number",
                req.partno,
                self.disk.display()
            );
            let retry = CreateRequest {
                partno_prompt: PartnoPrompt::Explicit(req.partno),
                ..req.clone()
            };
            let (retried, retry_detail) = self.create_slot(&retry);
            state = retried;
            detail = retry_detail.or(detail);
        }
        if state != SlotState::Exists {
            return Err(Error::NotCreated {
                disk: self.disk.to_path_buf(),
                partno: req.partno,
                detail,
            });
        }

        if req.set_type {
            self.set_type(req.partno, &req.fstype)?;
        }
        Ok(state)
    }

    /// Returns where the slot ended up, and the tool's complaint if it
    /// had one.
    fn create_slot(&self, req: &CreateRequest) -> (SlotState, Option<String>) {
        eprintln!(
            "Creating partition #{} on {}",
            req.partno,
            self.disk.display()
        );
        // fdisk exits nonzero when only the reread failed, so the poll
        // has the final say
        let detail = self.tool.create(self.disk, req).err().map(|e| e.detail());
        if let Some(detail) = &detail {
            eprintln!("Creating partition #{}: {}", req.partno, detail);
        }
        self.nudge();
        (self.settle(req.partno, SlotState::Exists), detail)
    }

    /// Write the type code of partition `partno` and wait until a fresh
    /// read shows it.
    pub fn set_type(&self, partno: u32, fstype: &str) -> Result<()> {
        let attribute_write = |detail: String| Error::AttributeWrite {
            disk: self.disk.to_path_buf(),
            partno,
            attribute: "type",
            detail,
        };
        let written = self.tool.set_type(self.disk, partno, fstype);
        self.nudge();
        written.map_err(|e| attribute_write(e.detail()))?;
        let mut found = None;
        let what = format!(
            "type of partition #{} on {} to read {}",
            partno,
            self.disk.display(),
            fstype
        );
        let result = self.retry.pause_until_true(
            &what,
            || match reader::read_table(self.tool, self.disk, &[]) {
                Ok(table) => {
                    found = table.partition(partno).map(|p| p.fstype.clone());
                    found.as_deref().map_or(false, |t| same_type(t, fstype))
                }
                Err(_) => false,
            },
            Some(&mut || self.nudge()),
        );
        result.map_err(|_| {
            attribute_write(match found {
                Some(t) => format!("type still reads {}", t),
                None => "partition is gone".into(),
            })
        })
    }

    /// Delete partition `partno` with a single command.
    pub fn delete(&self, partno: u32) -> Result<SlotState> {
        eprintln!("Deleting partition #{} from {}", partno, self.disk.display());
        let detail = self.tool.delete(self.disk, partno).err().map(|e| e.detail());
        if let Some(detail) = &detail {
            eprintln!("Deleting partition #{}: {}", partno, detail);
        }
        self.nudge();
        match self.settle(partno, SlotState::Nonexistent) {
            SlotState::Nonexistent => Ok(SlotState::Nonexistent),
            _ => Err(Error::NotDeleted {
                disk: self.disk.to_path_buf(),
                partno,
                detail,
            }),
        }
    }

    /// Remove every partition and wait until none are visible.
    pub fn delete_all(&self) -> Result<()> {
        eprintln!("Deleting all partitions from {}", self.disk.display());
        self.tool.delete_all(self.disk)?;
        self.nudge();
        let mut leftover = None;
        let result = self.retry.pause_until_true(
            "partition table to empty",
            || match reader::read_table(self.tool, self.disk, &[]) {
                Ok(table) => {
                    leftover = table.partitions.first().map(|p| p.partno);
                    leftover.is_none()
                }
                Err(_) => false,
            },
            Some(&mut || self.nudge()),
        );
        match (result, leftover) {
            (Ok(()), _) => Ok(()),
            (Err(_), Some(partno)) => Err(Error::NotDeleted {
                disk: self.disk.to_path_buf(),
                partno,
                detail: None,
            }),
            (Err(e), None) => Err(e),
        }
    }

    /// Poll a pending slot until partition `partno` reaches `target`.
    /// Returns `target` or `Failed`.
    fn settle(&self, partno: u32, target: SlotState) -> SlotState {
        let want_present = target == SlotState::Exists;
        let what = format!(
            "partition #{} on {} to {}",
            partno,
            self.disk.display(),
            if want_present { "appear" } else { "vanish" }
        );
        match self.retry.pause_until_true(
            &what,
            || self.present(partno) == want_present,
            Some(&mut || self.nudge()),
        ) {
            Ok(()) => target,
            Err(e) => {
                eprintln!("{}", e);
                SlotState::Failed
            }
        }
    }

    /// Whether the partition is in the table and, for real devices, has
    /// a device node.
    fn present(&self, partno: u32) -> bool {
        match reader::read_table(self.tool, self.disk, &[]) {
            Ok(table) => table
                .partition(partno)
                .map_or(false, |p| !self.block_device || self.tool.node_visible(&p.node)),
            Err(_) => false,
        }
    }

    fn nudge(&self) {
        if let Err(e) = self.tool.rescan(self.disk) {
            eprintln!("Rescanning {}: {}", self.disk.display(), e.detail());
        }
    }
}

/// Type codes as the tools print them may differ from how they were
/// given in case and leading zeros.
fn same_type(a: &str, b: &str) -> bool {
    strip_type(a).eq_ignore_ascii_case(strip_type(b))
}

fn strip_type(t: &str) -> &str {
    t.trim_start_matches("0x").trim_start_matches('0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::test_table;

    fn dos(parts: &[(u32, u64, u64, &str)]) -> DiskTable {
        test_table(LabelType::Dos, parts)
    }

    fn sized(partno: u32, mib: u64) -> NewPartition {
        NewPartition {
            partno: Some(partno),
            size_mib: Some(mib),
            ..Default::default()
        }
    }

    #[test]
    fn request_shape() {
        NewPartition::default().validate().unwrap();
        let both = NewPartition {
            end: Some(4095),
            size_mib: Some(1),
            ..Default::default()
        };
        match both.validate() {
            Err(Error::InvalidRequest(_)) => (),
            other => panic!("unexpected {:?}", other),
        }
        let inverted = NewPartition {
            partno: Some(2),
            start: Some(4096),
            end: Some(4096),
            ..Default::default()
        };
        match inverted.validate() {
            Err(Error::StartEndInverted {
                partno: 2,
                start: 4096,
                end: 4096,
            }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn first_partition() {
        let req = plan_create(
            &dos(&[]),
            &NewPartition {
                start: Some(2048),
                end: Some(9999999),
                ..Default::default()
            },
            "83",
        )
        .unwrap();
        assert_eq!(req.partno, 1);
        assert_eq!(req.kind, SlotKind::Primary);
        assert_eq!(req.partno_prompt, PartnoPrompt::Default);
        assert_eq!(req.fstype, "83");
        assert!(req.set_type);
        assert_eq!(fdisk_script(&req), "n\np\n\n2048\n9999999\nw\n");
    }

    #[test]
    fn primary_defaults() {
        let table = dos(&[(1, 2048, 2099199, "83"), (3, 4196352, 6293503, "83")]);
        let req = plan_create(
            &table,
            &NewPartition {
                partno: Some(2),
                ..Default::default()
            },
            "83",
        )
        .unwrap();
        assert_eq!(req.start, Some(2099200));
        assert_eq!(req.extent, Extent::End(4196351));
        assert_eq!(req.partno_prompt, PartnoPrompt::Explicit(2));
        assert_eq!(fdisk_script(&req), "n\np\n2\n2099200\n4196351\nw\n");
    }

    #[test]
    fn sizes() {
        let table = dos(&[(1, 2048, 2099199, "83")]);
        let req = plan_create(
            &table,
            &NewPartition {
                size_mib: Some(1024),
                ..Default::default()
            },
            "83",
        )
        .unwrap();
        // start known, so the end is computed and checked
        assert_eq!(req.start, Some(2099200));
        assert_eq!(req.extent, Extent::End(2099200 + 2097152 - 1));

        let chain = dos(&[(1, 2048, 2099199, "83"), (2, 2099200, 20000000, "5")]);
        let req = plan_create(
            &chain,
            &NewPartition {
                partno: Some(5),
                size_mib: Some(512),
                ..Default::default()
            },
            "83",
        )
        .unwrap();
        assert_eq!(req.partno, 5);
        assert_eq!(req.kind, SlotKind::Logical);
        assert_eq!(req.partno_prompt, PartnoPrompt::Absent);
        assert_eq!(fdisk_script(&req), "n\nl\n\n+512M\nw\n");
    }

    #[test]
    fn extended_and_logicals() {
        let table = dos(&[
            (1, 2048, 2099199, "83"),
            (2, 2099200, 4196351, "83"),
            (3, 4196352, 6293503, "83"),
        ]);
        let req = plan_create(
            &table,
            &NewPartition {
                fstype: Some("5".into()),
                ..Default::default()
            },
            "83",
        )
        .unwrap();
        assert_eq!(req.partno, 4);
        assert_eq!(req.kind, SlotKind::Extended);
        // the last primary slot is selected without asking
        assert_eq!(req.partno_prompt, PartnoPrompt::Absent);
        assert_eq!(fdisk_script(&req), "n\ne\n6293504\n\nw\n");

        let full = dos(&[
            (1, 2048, 2099199, "83"),
            (2, 2099200, 4196351, "83"),
            (3, 4196352, 6293503, "83"),
            (4, 6293504, 33554431, "5"),
        ]);
        let req = plan_create(&full, &NewPartition::default(), "83").unwrap();
        assert_eq!(req.partno, 5);
        assert!(!req.kind_prompt);
        assert_eq!(fdisk_script(&req), "n\n\n\nw\n");
    }

    #[test]
    fn refusals_make_no_request() {
        let table = dos(&[(1, 2048, 2099199, "83")]);
        match plan_create(
            &table,
            &NewPartition {
                partno: Some(2),
                start: Some(1000000),
                end: Some(3000000),
                ..Default::default()
            },
            "83",
        ) {
            Err(Error::PartitionsOverlap { .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        match plan_create(
            &table,
            &NewPartition {
                partno: Some(3),
                ..Default::default()
            },
            "83",
        ) {
            Err(Error::MissingPriorPartition { missing: 2, .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        // computed end before the defaulted start
        let table = dos(&[(1, 2048, 2099199, "83"), (3, 2099200, 4196351, "83")]);
        match plan_create(
            &table,
            &NewPartition {
                partno: Some(2),
                ..Default::default()
            },
            "83",
        ) {
            Err(Error::StartEndInverted { partno: 2, .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn logicals_behind_a_later_primary() {
        let table = dos(&[
            (1, 2048, 4095, "83"),
            (2, 4096, 99999, "5"),
            (3, 100000, 200000, "83"),
            (5, 6144, 8191, "83"),
        ]);
        let req = plan_create(&table, &sized(6, 1), "83").unwrap();
        assert_eq!(req.kind, SlotKind::Logical);
        assert_eq!(fdisk_script(&req), "n\nl\n\n+1M\nw\n");
        let req = plan_create(
            &table,
            &NewPartition {
                start: Some(10240),
                ..sized(6, 1)
            },
            "83",
        )
        .unwrap();
        assert_eq!(req.extent, Extent::End(12287));
        plan_create(
            &table,
            &NewPartition {
                partno: Some(6),
                ..Default::default()
            },
            "83",
        )
        .unwrap();
        // still refused when it really runs into the primary
        match plan_create(
            &table,
            &NewPartition {
                start: Some(90000),
                ..sized(6, 10)
            },
            "83",
        ) {
            Err(Error::PartitionsOverlap { .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        // an unbounded primary stops short of the next partition
        let gpt = test_table(
            LabelType::Gpt,
            &[(1, 2048, 4095, "x"), (2, 100000, 200000, "x")],
        );
        plan_create(
            &gpt,
            &NewPartition {
                partno: Some(3),
                start: Some(4096),
                ..Default::default()
            },
            LabelType::Gpt.ops().default_type,
        )
        .unwrap();
    }

    #[test]
    fn sizes_out_of_range() {
        let table = dos(&[(1, 2048, 2099199, "83")]);
        match plan_create(&table, &sized(2, u64::MAX / 4), "83") {
            Err(Error::InvalidRequest(_)) => (),
            other => panic!("unexpected {:?}", other),
        }
        let mut zero = dos(&[(1, 2048, 2099199, "83")]);
        zero.sector_size = 0;
        match plan_create(&zero, &sized(2, 1), "83") {
            Err(Error::InvalidRequest(_)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn gpt_requests() {
        let table = test_table(LabelType::Gpt, &[(1, 2048, 4095, "x")]);
        let req = plan_create(
            &table,
            &NewPartition {
                fstype: Some("82".into()),
                start: Some(4096),
                end: Some(8191),
                ..Default::default()
            },
            LabelType::Gpt.ops().default_type,
        )
        .unwrap();
        assert_eq!(req.partno, 2);
        assert!(!req.set_type);
        assert!(!req.kind_prompt);
        assert_eq!(fdisk_script(&req), "n\n2\n4096\n8191\nw\n");
    }
}
