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

use anyhow::Result;
use clap::Parser;

use libfofta::{cmdline, commands};

use cmdline::*;

fn main() -> Result<()> {
    match Cmd::parse() {
        Cmd::Classify(c) => commands::classify(c),
        Cmd::List(c) => commands::list(c),
        Cmd::Show(c) => commands::show(c),
        Cmd::Dump(c) => commands::dump(c),
        Cmd::Add(c) => commands::add(c),
        Cmd::Delete(c) => commands::delete(c),
        Cmd::Wipe(c) => commands::wipe(c),
        Cmd::Label(c) => commands::label(c),
        Cmd::SetId(c) => commands::set_id(c),
    }
}
