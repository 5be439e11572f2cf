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

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::blockdev::{classify as classify_path, list_disks, DeviceKind};
use crate::cmdline::*;
use crate::config::EngineConfig;
use crate::disk::Disk;
use crate::tool::Sfdisk;
use crate::writer::NewPartition;

fn engine_config(opts: &EngineOpts) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_files(&opts.config_file)?;
    if let Some(timeout) = opts.settle_timeout {
        config.settle_timeout = timeout;
    }
    Ok(config)
}

fn open(disk: &str, opts: &EngineOpts) -> Result<Disk> {
    Disk::open(Path::new(disk), Arc::new(Sfdisk), engine_config(opts)?)
        .with_context(|| format!("opening {}", disk))
}

pub fn classify(config: ClassifyConfig) -> Result<()> {
    let device = classify_path(Path::new(&config.path))?;
    let kind = match device.kind {
        DeviceKind::Disk if !device.block_device => "image",
        DeviceKind::Disk => "disk",
        DeviceKind::Partition => "partition",
    };
    println!("{} {}", device.path.display(), kind);
    Ok(())
}

pub fn list(_config: ListConfig) -> Result<()> {
    for disk in list_disks().context("listing disks")? {
        println!("{}", disk.display());
    }
    Ok(())
}

pub fn show(config: ShowConfig) -> Result<()> {
    let disk = open(&config.disk, &config.engine)?;
    println!("{}", disk);
    for partition in disk.partitions() {
        println!("  {}", partition);
    }
    Ok(())
}

pub fn dump(config: ShowConfig) -> Result<()> {
    let disk = open(&config.disk, &config.engine)?;
    print!("{}", disk.dump());
    Ok(())
}

pub fn add(config: AddConfig) -> Result<()> {
    let mut disk = open(&config.disk, &config.engine)?;
    let partno = disk
        .add_partition(&NewPartition {
            partno: config.partno,
            start: config.start,
            end: config.end,
            size_mib: config.size_mib,
            fstype: config.fstype,
        })
        .with_context(|| format!("adding partition to {}", config.disk))?;
    match disk.partition(partno) {
        Some(p) => println!("{}", p.node.display()),
        None => println!("{}", partno),
    }
    Ok(())
}

pub fn delete(config: DeleteConfig) -> Result<()> {
    open(&config.disk, &config.engine)?
        .delete_partition(config.partno)
        .with_context(|| format!("deleting partition {} from {}", config.partno, config.disk))
}

pub fn wipe(config: ShowConfig) -> Result<()> {
    open(&config.disk, &config.engine)?
        .delete_all_partitions()
        .with_context(|| format!("deleting partitions from {}", config.disk))
}

pub fn label(config: LabelConfig) -> Result<()> {
    Disk::open_with_label(
        Path::new(&config.disk),
        config.label,
        Arc::new(Sfdisk),
        engine_config(&config.engine)?,
    )
    .with_context(|| format!("writing {} label to {}", config.label, config.disk))?;
    Ok(())
}

pub fn set_id(config: SetIdConfig) -> Result<()> {
    let mut disk = open(&config.disk, &config.engine)?;
    match &config.id {
        Some(id) if !config.random => disk
            .set_identity(id)
            .with_context(|| format!("setting identifier of {}", config.disk))?,
        _ => {
            disk.randomize_identity()
                .with_context(|| format!("setting identifier of {}", config.disk))?;
        }
    }
    println!("{}", disk.identity());
    Ok(())
}
