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

//! Ordering rules for dos primary, extended and logical partitions.
//!
//! Nothing is tracked here; every decision is derived from the set of
//! partition numbers in the current snapshot.

use crate::errors::*;
use crate::table::DiskTable;

/// What kind of slot a new partition will occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Primary,
    Extended,
    Logical,
}

/// Decide whether partition `partno` of type `fstype` may be created on
/// `table`, and what kind of slot it is.
pub fn check_create(table: &DiskTable, partno: u32, fstype: &str) -> Result<SlotKind> {
    let ops = table.label.ops();
    if partno == 0 || partno > ops.max_partno {
        return Err(Error::InvalidRequest(format!(
            "partition number {} out of range 1..={} for a {} table",
            partno, ops.max_partno, ops.name
        )));
    }
    let disk = || table.node.clone();
    if table.has_partition(partno) {
        return Err(Error::ExistentPriorPartition {
            disk: disk(),
            partno,
        });
    }
    let max_primary = match ops.max_primary {
        Some(max) => max,
        // no chain to speak of
        None => return Ok(SlotKind::Primary),
    };
    let wants_extended = ops.is_extended(fstype);

    if partno <= max_primary {
        if partno > 1 && !table.has_partition(partno - 1) {
            return Err(Error::MissingPriorPartition {
                disk: disk(),
                partno,
                missing: partno - 1,
            });
        }
        if !wants_extended {
            return Ok(SlotKind::Primary);
        }
        if let Some(ext) = table.extended() {
            return Err(Error::InvalidRequest(format!(
                "{} already has extended partition #{}",
                table.node.display(),
                ext.partno
            )));
        }
        return Ok(SlotKind::Extended);
    }

    if table.extended().is_none() {
        return Err(Error::NeedExtendedPartition {
            disk: disk(),
            partno,
        });
    }
    let first_logical = max_primary + 1;
    if partno > first_logical && !table.has_partition(partno - 1) {
        return Err(Error::MissingPriorPartition {
            disk: disk(),
            partno,
            missing: partno - 1,
        });
    }
    if wants_extended {
        return Err(Error::InvalidRequest(format!(
            "extended partition #{} must be a primary partition",
            partno
        )));
    }
    Ok(SlotKind::Logical)
}

/// Decide whether partition `partno` may be deleted.  Returns false if
/// there is nothing to delete.
pub fn check_delete(table: &DiskTable, partno: u32) -> Result<bool> {
    if !table.has_partition(partno) {
        return Ok(false);
    }
    if table.label.ops().is_logical(partno) && table.has_partition(partno + 1) {
        return Err(Error::ChainOrder {
            disk: table.node.clone(),
            partno,
        });
    }
    Ok(true)
}
