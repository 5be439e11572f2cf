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

//! Sector range conflict detection.

use crate::table::{DiskTable, LabelOps};

/// A partition that doesn't exist yet.  Unset fields are filled in from
/// the table's last partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hypothetical {
    pub partno: Option<u32>,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub fstype: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Extent<'a> {
    partno: u32,
    start: u64,
    end: u64,
    fstype: &'a str,
}

impl Extent<'_> {
    fn conflicts(&self, other: &Extent, ops: &LabelOps) -> bool {
        self.start <= other.end
            && self.end >= other.start
            && !ops.is_extended(self.fstype)
            && !ops.is_extended(other.fstype)
    }
}

/// Whether any two partitions of `table`, plus `hypothetical` if given,
/// occupy a common sector.  An extended container never conflicts with
/// anything, whatever range it covers.
pub fn overlapping(table: &DiskTable, hypothetical: Option<&Hypothetical>) -> bool {
    first_conflict(table, hypothetical).is_some()
}

/// The first conflicting pair of partition numbers, in table order.
pub fn first_conflict(table: &DiskTable, hypothetical: Option<&Hypothetical>) -> Option<(u32, u32)> {
    if table.partitions.len() <= 1 && hypothetical.is_none() {
        return None;
    }
    let ops = table.label.ops();
    let mut extents: Vec<Extent> = table
        .partitions
        .iter()
        .map(|p| Extent {
            partno: p.partno,
            start: p.start,
            end: p.end(),
            fstype: &p.fstype,
        })
        .collect();
    if let Some(h) = hypothetical {
        let last = table.partitions.last();
        extents.push(Extent {
            partno: h.partno.unwrap_or_else(|| table.next_partno()),
            start: h
                .start
                .unwrap_or_else(|| last.map_or(0, |p| p.end() + 1)),
            end: h.end.unwrap_or(u64::MAX),
            fstype: h.fstype.as_deref().unwrap_or(ops.default_type),
        });
    }
    for (i, a) in extents.iter().enumerate() {
        for b in &extents[i + 1..] {
            if a.conflicts(b, ops) {
                return Some((a.partno, b.partno));
            }
        }
    }
    None
}
