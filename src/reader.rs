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

use lazy_static::lazy_static;
use regex::Regex;
use std::fs::metadata;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use crate::blockdev::{aliases_for, get_sector_size_for_path};
use crate::errors::*;
use crate::table::{parse_sfdisk_json, DiskTable, Geometry};
use crate::tool::PartitionTool;

lazy_static! {
    static ref DISK_LINE: Regex =
        Regex::new(r"(?m)^Disk [^:]+:.*, (\d+) bytes, (\d+) sectors$").unwrap();
    static ref SECTOR_SIZE: Regex =
        Regex::new(r"(?m)^Sector size \(logical/physical\): (\d+) bytes").unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"(?m)^Disk identifier: (\S+)$").unwrap();
}

/// Take a fresh snapshot of `disk`: the structured dump, geometry and
/// identifier from a second tool, and every alias found in `alias_dirs`.
pub fn read_table(tool: &dyn PartitionTool, disk: &Path, alias_dirs: &[String]) -> Result<DiskTable> {
    let unreadable = |e: Error| Error::TableUnreadable {
        path: disk.to_path_buf(),
        detail: e.detail(),
    };
    let json = tool.dump_json(disk).map_err(unreadable)?;
    let raw = parse_sfdisk_json(disk, &json)?;
    let text = tool.geometry(disk).map_err(unreadable)?;
    let geometry = parse_geometry(disk, &text)?;
    raw.into_table(disk, &geometry, &|node| aliases_for(node, alias_dirs))
}

/// Whether the tools can make sense of the table on `disk`.
pub fn has_legible_table(tool: &dyn PartitionTool, disk: &Path) -> bool {
    tool.dump_json(disk)
        .and_then(|json| parse_sfdisk_json(disk, &json))
        .is_ok()
}

/// Parse `fdisk -l` output.
pub(crate) fn parse_geometry(disk: &Path, text: &str) -> Result<Geometry> {
    let caps = DISK_LINE
        .captures(text)
        .ok_or_else(|| Error::TableUnreadable {
            path: disk.to_path_buf(),
            detail: "no size in fdisk listing".into(),
        })?;
    let number = |digits: &str| -> Result<u64> {
        digits.parse().map_err(|_| Error::TableUnreadable {
            path: disk.to_path_buf(),
            detail: format!("fdisk reported an out-of-range number {}", digits),
        })
    };
    let size_in_bytes = number(&caps[1])?;
    let size_in_sectors = number(&caps[2])?;
    let sector_size = match SECTOR_SIZE.captures(text) {
        Some(caps) => number(&caps[1])?,
        None => fallback_sector_size(disk, size_in_bytes, size_in_sectors),
    };
    if sector_size == 0 {
        return Err(Error::TableUnreadable {
            path: disk.to_path_buf(),
            detail: "fdisk reported a sector size of zero".into(),
        });
    }
    Ok(Geometry {
        size_in_bytes,
        size_in_sectors,
        sector_size,
        identity: IDENTIFIER.captures(text).map(|c| c[1].to_string()),
    })
}

fn fallback_sector_size(disk: &Path, bytes: u64, sectors: u64) -> u64 {
    let is_block = metadata(disk).map_or(false, |m| m.file_type().is_block_device());
    if is_block {
        if let Ok(size) = get_sector_size_for_path(disk) {
            return size.get().into();
        }
    }
    if sectors > 0 {
        bytes / sectors
    } else {
        512
    }
}
