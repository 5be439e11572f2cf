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

//! Snapshot of a disk's partition table.
//!
//! A `DiskTable` is a read-through copy of what the kernel and the on-disk
//! label said at the moment it was read.  It is never patched in place;
//! callers replace it wholesale after every mutation.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::*;

/// GPT type GUID for "Linux filesystem data".
pub const GPT_LINUX_DATA: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelType {
    Dos,
    Gpt,
}

/// Per-label behavior.  Everything that differs between dos and gpt
/// tables is looked up here rather than branched on at each call site.
pub struct LabelOps {
    pub name: &'static str,
    pub max_partno: u32,
    /// Highest primary slot, if the label distinguishes primary from logical.
    pub max_primary: Option<u32>,
    /// Type codes that denote a container enclosing logical partitions.
    pub extended_types: &'static [&'static str],
    /// Whether a type code passed at creation time is applied.
    pub honors_type_codes: bool,
    pub default_type: &'static str,
    validate_identity: fn(&str) -> Option<String>,
}

static DOS_OPS: LabelOps = LabelOps {
    name: "dos",
    max_partno: 63,
    max_primary: Some(4),
    extended_types: &["5", "f", "85"],
    honors_type_codes: true,
    default_type: "83",
    validate_identity: dos_identity,
};

static GPT_OPS: LabelOps = LabelOps {
    name: "gpt",
    max_partno: 128,
    max_primary: None,
    extended_types: &[],
    honors_type_codes: false,
    default_type: GPT_LINUX_DATA,
    validate_identity: gpt_identity,
};

impl LabelType {
    pub fn ops(self) -> &'static LabelOps {
        match self {
            Self::Dos => &DOS_OPS,
            Self::Gpt => &GPT_OPS,
        }
    }
}

impl LabelOps {
    pub fn is_extended(&self, fstype: &str) -> bool {
        let fstype = fstype.trim_start_matches("0x");
        self.extended_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(fstype))
    }

    pub fn is_logical(&self, partno: u32) -> bool {
        matches!(self.max_primary, Some(max) if partno > max)
    }

    /// Validate a disk identifier and return it in the form the tools
    /// report it.
    pub fn normalize_identity(&self, id: &str) -> Result<String> {
        (self.validate_identity)(id).ok_or_else(|| Error::IdentityFormat(id.to_string()))
    }
}

/// "0x" followed by exactly eight hex digits.
fn dos_identity(id: &str) -> Option<String> {
    let digits = id.strip_prefix("0x")?;
    if digits.len() != 8 {
        return None;
    }
    hex::decode(digits).ok()?;
    Some(format!("0x{}", digits.to_ascii_lowercase()))
}

fn gpt_identity(id: &str) -> Option<String> {
    uuid::Uuid::parse_str(id)
        .ok()
        .map(|u| u.to_string().to_ascii_uppercase())
}

impl fmt::Display for LabelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ops().name)
    }
}

impl FromStr for LabelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dos" | "mbr" | "msdos" => Ok(Self::Dos),
            "gpt" => Ok(Self::Gpt),
            other => Err(Error::InvalidRequest(format!(
                "unsupported partition table type \"{}\"",
                other
            ))),
        }
    }
}

/// An alternate path to a device node, e.g. a symlink in /dev/disk/by-uuid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// Directory suffix: "id", "label", "partuuid", "path" or "uuid".
    pub kind: String,
    pub path: PathBuf,
}

impl Alias {
    /// Final path component, which for most alias kinds is the value itself.
    pub fn value(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

fn alias_value(aliases: &[Alias], kind: &str) -> Option<String> {
    aliases
        .iter()
        .find(|a| a.kind == kind)
        .and_then(Alias::value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub node: PathBuf,
    pub partno: u32,
    pub start: u64,
    pub size: u64,
    pub fstype: String,
    pub label: Option<String>,
    pub uuid: Option<String>,
    pub partuuid: Option<String>,
    pub aliases: Vec<Alias>,
    owner: PathBuf,
}

impl Partition {
    pub fn end(&self) -> u64 {
        (self.start + self.size).saturating_sub(1)
    }

    /// The disk this partition belongs to.
    pub fn owner(&self) -> &Path {
        &self.owner
    }

    pub fn alias(&self, kind: &str) -> Option<&Path> {
        self.aliases
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.path.as_path())
    }

    /// Whether `path` names this partition, directly or via an alias.
    pub fn answers_to(&self, path: &Path) -> bool {
        self.node == path || self.aliases.iter().any(|a| a.path == path)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node={} partno={} owner={} start={} size={} fstype={} label={} partuuid={} uuid={}",
            self.node.display(),
            self.partno,
            self.owner.display(),
            self.start,
            self.size,
            self.fstype,
            self.label.as_deref().unwrap_or("-"),
            self.partuuid.as_deref().unwrap_or("-"),
            self.uuid.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTable {
    pub node: PathBuf,
    pub label: LabelType,
    pub identity: String,
    pub sector_size: u64,
    pub size_in_sectors: u64,
    pub partitions: Vec<Partition>,
    pub aliases: Vec<Alias>,
}

impl DiskTable {
    pub fn partition(&self, partno: u32) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.partno == partno)
    }

    pub fn has_partition(&self, partno: u32) -> bool {
        self.partition(partno).is_some()
    }

    pub fn extended(&self) -> Option<&Partition> {
        let ops = self.label.ops();
        self.partitions.iter().find(|p| ops.is_extended(&p.fstype))
    }

    pub fn partnos(&self) -> Vec<u32> {
        self.partitions.iter().map(|p| p.partno).collect()
    }

    /// One past the highest partition number in use.
    pub fn next_partno(&self) -> u32 {
        self.partitions
            .iter()
            .map(|p| p.partno)
            .max()
            .map_or(1, |n| n + 1)
    }

    /// Serialize in sfdisk's script format, so the output can be fed back
    /// to `sfdisk` or diffed for debugging.
    pub fn dump(&self) -> String {
        let mut out = format!(
            "label: {}\nlabel-id: {}\ndevice: {}\nunit: sectors\n",
            self.label,
            self.identity,
            self.node.display()
        );
        if self.sector_size != 512 {
            out.push_str(&format!("sector-size: {}\n", self.sector_size));
        }
        out.push('\n');
        for p in &self.partitions {
            let node = p.node.display().to_string();
            out.push_str(&format!(
                "{:<10} : start={:>12}, size={:>12}, type={}",
                node, p.start, p.size, p.fstype
            ));
            if self.label == LabelType::Gpt {
                if let Some(partuuid) = &p.partuuid {
                    out.push_str(&format!(", uuid={}", partuuid));
                }
                if let Some(name) = &p.label {
                    out.push_str(&format!(", name=\"{}\"", name));
                }
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for DiskTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Disk={} label={} id={} sectors={}x{} partitions:{}",
            self.node.display(),
            self.label,
            self.identity,
            self.size_in_sectors,
            self.sector_size,
            self.partitions.len()
        )
    }
}

/// Geometry and identity as reported by `fdisk -l`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub size_in_bytes: u64,
    pub size_in_sectors: u64,
    pub sector_size: u64,
    pub identity: Option<String>,
}

/// `sfdisk --json` output.  Fields we rely on are mandatory; missing ones
/// make the whole table unreadable instead of surfacing later.
#[derive(Debug, Deserialize)]
struct SfdiskDump {
    partitiontable: RawTable,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTable {
    pub label: String,
    #[serde(default)]
    pub id: Option<String>,
    pub device: String,
    pub unit: String,
    #[serde(default)]
    pub sectorsize: Option<u64>,
    #[serde(default)]
    pub partitions: Vec<RawPartition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawPartition {
    pub node: String,
    pub start: u64,
    pub size: u64,
    #[serde(rename = "type")]
    pub fstype: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

pub(crate) fn parse_sfdisk_json(disk: &Path, json: &str) -> Result<RawTable> {
    let unreadable = |detail: String| Error::TableUnreadable {
        path: disk.to_path_buf(),
        detail,
    };
    let dump: SfdiskDump =
        serde_json::from_str(json).map_err(|e| unreadable(format!("parsing sfdisk output: {}", e)))?;
    let table = dump.partitiontable;
    if table.unit != "sectors" {
        return Err(unreadable(format!("unexpected unit \"{}\"", table.unit)));
    }
    table
        .label
        .parse::<LabelType>()
        .map_err(|e| unreadable(e.to_string()))?;
    Ok(table)
}

/// Partition number of `node`, given the node of its disk.  Handles both
/// `sda1` and `mmcblk0p1` styles, and image files such as `disk.img1`.
pub fn partno_from_node(disk: &Path, node: &str) -> Option<u32> {
    let disk = disk.to_string_lossy();
    if let Some(suffix) = node.strip_prefix(disk.as_ref()) {
        let suffix = suffix.strip_prefix('p').unwrap_or(suffix);
        if let Ok(n) = suffix.parse() {
            return Some(n);
        }
    }
    let digits: String = node
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

impl RawTable {
    /// Combine with the secondary geometry read and the alias scan into a
    /// finished snapshot.
    pub(crate) fn into_table(
        self,
        disk: &Path,
        geometry: &Geometry,
        aliases_for: &dyn Fn(&Path) -> Vec<Alias>,
    ) -> Result<DiskTable> {
        let label: LabelType = self.label.parse()?;
        let identity = geometry
            .identity
            .clone()
            .or(self.id)
            .unwrap_or_default();
        let sector_size = self.sectorsize.unwrap_or(geometry.sector_size);
        let mut partitions = Vec::with_capacity(self.partitions.len());
        for raw in self.partitions {
            let partno = partno_from_node(disk, &raw.node).ok_or_else(|| Error::TableUnreadable {
                path: disk.to_path_buf(),
                detail: format!("can't determine partition number of {}", raw.node),
            })?;
            let node = PathBuf::from(&raw.node);
            let aliases = aliases_for(&node);
            partitions.push(Partition {
                partno,
                start: raw.start,
                size: raw.size,
                fstype: raw.fstype,
                label: raw.name.or_else(|| alias_value(&aliases, "label")),
                uuid: alias_value(&aliases, "uuid"),
                partuuid: raw.uuid.or_else(|| alias_value(&aliases, "partuuid")),
                aliases,
                node,
                owner: disk.to_path_buf(),
            });
        }
        partitions.sort_by_key(|p| p.partno);
        Ok(DiskTable {
            node: disk.to_path_buf(),
            label,
            identity,
            sector_size,
            size_in_sectors: geometry.size_in_sectors,
            partitions,
            aliases: aliases_for(disk),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_partition(disk: &str, partno: u32, start: u64, end: u64, fstype: &str) -> Partition {
    Partition {
        node: PathBuf::from(format!("{}{}", disk, partno)),
        partno,
        start,
        size: end - start + 1,
        fstype: fstype.into(),
        label: None,
        uuid: None,
        partuuid: None,
        aliases: Vec::new(),
        owner: PathBuf::from(disk),
    }
}

#[cfg(test)]
pub(crate) fn test_table(label: LabelType, parts: &[(u32, u64, u64, &str)]) -> DiskTable {
    DiskTable {
        node: PathBuf::from("/dev/sdz"),
        label,
        identity: "0x12345678".into(),
        sector_size: 512,
        size_in_sectors: 33554432,
        partitions: parts
            .iter()
            .map(|(n, s, e, t)| test_partition("/dev/sdz", *n, *s, *e, t))
            .collect(),
        aliases: Vec::new(),
    }
}
