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

use lazy_static::lazy_static;
use nix::errno::Errno;
use regex::Regex;
use std::fs::{canonicalize, metadata, read_to_string, File, OpenOptions};
use std::num::NonZeroU32;
use std::os::raw::c_int;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::sleep;
use std::time::Duration;

use crate::errors::*;
use crate::runcmd;
use crate::table::Alias;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Disk,
    Partition,
}

/// A path after symlink resolution, together with what it turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub path: PathBuf,
    pub kind: DeviceKind,
    /// false for regular files acting as disk images
    pub block_device: bool,
}

lazy_static! {
    static ref SCSI_DISK: Regex = Regex::new(r"^(sd|hd|vd|xvd)[a-z]+$").unwrap();
    static ref SCSI_PART: Regex = Regex::new(r"^(sd|hd|vd|xvd)[a-z]+[0-9]+$").unwrap();
    static ref P_SUFFIXED_DISK: Regex =
        Regex::new(r"^(mmcblk[0-9]+|nvme[0-9]+n[0-9]+|loop[0-9]+|nbd[0-9]+)$").unwrap();
    static ref P_SUFFIXED_PART: Regex =
        Regex::new(r"^(mmcblk[0-9]+|nvme[0-9]+n[0-9]+|loop[0-9]+|nbd[0-9]+)p[0-9]+$").unwrap();
}

/// Decide from a kernel device name alone.  Returns None when the name
/// doesn't follow a convention we know.
pub fn classify_name(name: &str) -> Option<DeviceKind> {
    if SCSI_DISK.is_match(name) || P_SUFFIXED_DISK.is_match(name) {
        Some(DeviceKind::Disk)
    } else if SCSI_PART.is_match(name) || P_SUFFIXED_PART.is_match(name) || name.starts_with("zram")
    {
        // zram devices carry a filesystem or swap directly and are never
        // partitioned
        Some(DeviceKind::Partition)
    } else {
        None
    }
}

/// Resolve symlinks (e.g. /dev/disk/by-id/...) and decide whether `path`
/// names a disk or a partition.  Regular files are disk images.
pub fn classify(path: &Path) -> Result<Device> {
    if path.as_os_str().is_empty() || path == Path::new("/") {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    let resolved = canonicalize(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        _ => Error::io(format!("resolving {}", path.display()), e),
    })?;
    let file_type = metadata(&resolved)
        .map_err(|e| Error::io(format!("getting metadata for {}", resolved.display()), e))?
        .file_type();
    if file_type.is_file() {
        return Ok(Device {
            path: resolved,
            kind: DeviceKind::Disk,
            block_device: false,
        });
    }
    let misclassified = |reason: &str| Error::Misclassified {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if file_type.is_dir() {
        return Err(misclassified("it is a directory"));
    }
    if !file_type.is_block_device() {
        return Err(misclassified("not a block device or image file"));
    }
    let name = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| misclassified("no device name"))?;
    let kind = match classify_name(&name) {
        Some(kind) => kind,
        // device-mapper and friends: ask the kernel
        None if Path::new(&format!("/sys/class/block/{}/partition", name)).exists() => {
            DeviceKind::Partition
        }
        None if Path::new(&format!("/sys/class/block/{}", name)).exists() => DeviceKind::Disk,
        None => return Err(misclassified("unfamiliar device name")),
    };
    Ok(Device {
        path: resolved,
        kind,
        block_device: true,
    })
}

/// Convenience wrapper: true for a disk, false for a partition.
pub fn is_disk(path: &Path) -> Result<bool> {
    Ok(classify(path)?.kind == DeviceKind::Disk)
}

/// Every whole disk the kernel knows about, per /proc/partitions.
pub fn list_disks() -> Result<Vec<PathBuf>> {
    let contents = read_to_string("/proc/partitions")
        .map_err(|e| Error::io("reading /proc/partitions", e))?;
    let mut disks = Vec::new();
    for name in parse_proc_partitions(&contents) {
        let path = Path::new("/dev").join(name);
        if !path.exists() {
            continue;
        }
        // names we can't classify are skipped rather than failing the scan
        if let Ok(device) = classify(&path) {
            if device.kind == DeviceKind::Disk {
                disks.push(device.path);
            }
        }
    }
    Ok(disks)
}

fn parse_proc_partitions(contents: &str) -> Vec<&str> {
    contents
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("major"))
        .skip(1)
        .filter_map(|l| l.split_whitespace().nth(3))
        .collect()
}

/// Find every symlink in `dirs` (e.g. /dev/disk/by-uuid) pointing at
/// `node`.  The alias kind is the directory name without its "by-" prefix.
pub fn aliases_for(node: &Path, dirs: &[String]) -> Vec<Alias> {
    let target = match canonicalize(node) {
        Ok(t) => t,
        Err(_) => return Vec::new(),
    };
    let mut aliases = Vec::new();
    for dir in dirs {
        let kind = Path::new(dir)
            .file_name()
            .map(|n| n.to_string_lossy())
            .map(|n| n.strip_prefix("by-").unwrap_or(&n).to_string())
            .unwrap_or_default();
        let pattern = format!("{}/*", glob::Pattern::escape(dir));
        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            // dangling links are common while udev catches up
            if canonicalize(&entry).map_or(false, |p| p == target) {
                aliases.push(Alias {
                    kind: kind.clone(),
                    path: entry,
                });
            }
        }
    }
    aliases
}

/// Ask the kernel to reread the partition table of `device`.  Uses
/// partprobe, which copes with mounted partitions; falls back to the
/// BLKRRPART ioctl if partprobe isn't installed or fails.
pub fn reread_partition_table(device: &Path) -> Result<()> {
    if is_dm_device(device) {
        return kpartx_reread_partitions(device);
    }
    match runcmd!("partprobe", device) {
        Ok(()) => Ok(()),
        Err(err) => {
            eprintln!("partprobe {}: {}; trying ioctl", device.display(), err.detail());
            let file = File::open(device)
                .map_err(|e| Error::io(format!("opening {}", device.display()), e))?;
            ioctl_reread_partitions(&file)
        }
    }
}

fn is_dm_device(device: &Path) -> bool {
    let device = device.to_string_lossy();
    device.starts_with("/dev/mapper/") || device.starts_with("/dev/dm-")
}

fn ioctl_reread_partitions(file: &File) -> Result<()> {
    let fd = file.as_raw_fd();
    // Reread sometimes fails inexplicably.  Retry several times before
    // giving up.
    for retries in (0..20).rev() {
        match unsafe { ioctl::blkrrpart(fd) } {
            Ok(_) => break,
            Err(err) if retries == 0 => {
                let why = match err {
                    Errno::EINVAL => "device may not support partitions",
                    Errno::EBUSY => "device is in use",
                    _ => "ioctl failed",
                };
                return Err(Error::io(
                    format!("couldn't reread partition table: {}", why),
                    std::io::Error::from(err),
                ));
            }
            Err(_) => sleep(Duration::from_millis(100)),
        }
    }
    Ok(())
}

fn kpartx_reread_partitions(device: &Path) -> Result<()> {
    runcmd!("kpartx", "-u", device)
}

/// Get the logical sector size of a block device.
pub fn get_sector_size(file: &File) -> Result<NonZeroU32> {
    let fd = file.as_raw_fd();
    let mut size: c_int = 0;
    match unsafe { ioctl::blksszget(fd, &mut size) } {
        Ok(_) => {
            let size_u32: u32 = size.try_into().map_err(|_| {
                Error::InvalidRequest(format!("sector size {} doesn't fit in u32", size))
            })?;
            NonZeroU32::new(size_u32)
                .ok_or_else(|| Error::InvalidRequest("found sector size of zero".into()))
        }
        Err(e) => Err(Error::io("getting sector size", std::io::Error::from(e))),
    }
}

/// Get the sector size of the block device at a given path.
pub fn get_sector_size_for_path(device: &Path) -> Result<NonZeroU32> {
    let dev = OpenOptions::new()
        .read(true)
        .open(device)
        .map_err(|e| Error::io(format!("opening {}", device.display()), e))?;
    get_sector_size(&dev)
}

// create unsafe ioctl wrappers
#[allow(clippy::missing_safety_doc)]
mod ioctl {
    use super::c_int;
    use nix::{ioctl_none, ioctl_read_bad, request_code_none};
    ioctl_none!(blkrrpart, 0x12, 95);
    ioctl_read_bad!(blksszget, request_code_none!(0x12, 104), c_int);
}

/// Wait for udev to finish processing events, so that /dev nodes and
/// /dev/disk/by-* links reflect the new table.  A missing udev (e.g. inside
/// a container) is not an error; there is nothing to wait for.
pub fn udev_settle() -> Result<()> {
    if !Path::new("/run/udev/control").exists() {
        return Ok(());
    }

    // There's a potential window after rereading the partition table where
    // udevd hasn't yet received updates from the kernel, settle will return
    // immediately, and lsblk won't pick up partition labels.  Try to sleep
    // our way out of this.
    sleep(Duration::from_millis(200));

    let mut cmd = Command::new("udevadm");
    cmd.arg("settle");
    crate::util::cmd_output(&mut cmd).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn names() {
        for disk in [
            "sda", "sdb", "sdp", "sdaa", "vda", "xvdb", "mmcblk0", "mmcblk1", "mmcblk10",
            "nvme0n1", "loop5",
        ] {
            assert_eq!(classify_name(disk), Some(DeviceKind::Disk), "{}", disk);
        }
        for part in [
            "sda1",
            "sdb8",
            "sdc99",
            "sdp5",
            "mmcblk0p1",
            "mmcblk9p5",
            "mmcblk69p44",
            "nvme0n1p3",
            "loop5p1",
            "zram0",
        ] {
            assert_eq!(classify_name(part), Some(DeviceKind::Partition), "{}", part);
        }
        for dodgy in ["b0rk", "sj5a", "hx", "tty100", "vcsu999", "mmcblk", "sda1a"] {
            assert_eq!(classify_name(dodgy), None, "{}", dodgy);
        }
    }

    #[test]
    fn bogus_paths() {
        for bogus in ["", "/", "/dec/blah", "dev/xyz", "1234"] {
            match classify(Path::new(bogus)) {
                Err(Error::NotFound(_)) => (),
                other => panic!("{:?} classified as {:?}", bogus, other),
            }
        }
    }

    #[test]
    fn image_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        File::create(&image).unwrap();
        let link = dir.path().join("by-name");
        symlink(&image, &link).unwrap();

        let device = classify(&link).unwrap();
        assert_eq!(device.kind, DeviceKind::Disk);
        assert!(!device.block_device);
        assert_eq!(device.path, canonicalize(&image).unwrap());
        assert!(is_disk(&image).unwrap());

        match classify(dir.path()) {
            Err(Error::Misclassified { .. }) => (),
            other => panic!("directory classified as {:?}", other),
        }
        match classify(&dir.path().join("missing")) {
            Err(Error::NotFound(_)) => (),
            other => panic!("missing file classified as {:?}", other),
        }
    }

    #[test]
    fn alias_scan() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        let other = dir.path().join("other.img");
        File::create(&image).unwrap();
        File::create(&other).unwrap();
        let by_uuid = dir.path().join("by-uuid");
        let by_label = dir.path().join("by-label");
        std::fs::create_dir(&by_uuid).unwrap();
        std::fs::create_dir(&by_label).unwrap();
        symlink(&image, by_uuid.join("1234-ABCD")).unwrap();
        symlink(&other, by_uuid.join("5678-EF01")).unwrap();
        symlink(&image, by_label.join("boot")).unwrap();
        symlink(dir.path().join("gone"), by_label.join("dangling")).unwrap();

        let dirs = vec![
            by_uuid.to_string_lossy().into_owned(),
            by_label.to_string_lossy().into_owned(),
            dir.path().join("by-missing").to_string_lossy().into_owned(),
        ];
        let aliases = aliases_for(&image, &dirs);
        assert_eq!(
            aliases,
            vec![
                Alias {
                    kind: "uuid".into(),
                    path: by_uuid.join("1234-ABCD"),
                },
                Alias {
                    kind: "label".into(),
                    path: by_label.join("boot"),
                },
            ]
        );
        assert!(aliases_for(&dir.path().join("gone"), &dirs).is_empty());
    }

    #[test]
    fn proc_partitions() {
        let contents = "major minor  #blocks  name\n\
                        \n\
                        \x20  8        0    7761920 sda\n\
                        \x20  8        1     262144 sda1\n\
                        \x20179        0   15558144 mmcblk0\n";
        assert_eq!(
            parse_proc_partitions(contents),
            vec!["sda", "sda1", "mmcblk0"]
        );
    }
}
