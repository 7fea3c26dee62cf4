// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration of the UDF subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdfConfig {
	/// Directory the declared library file names resolve against. Only
	/// libraries inside this directory are ever opened.
	pub plugin_dir: PathBuf,

	/// Accept scalar functions that define neither an `_init` nor a
	/// `_deinit` symbol. Off by default: an exact-name lookup can bind an
	/// unrelated global from a system library, and a library written as a
	/// UDF defines at least one auxiliary symbol.
	#[serde(default)]
	pub allow_suspicious_udfs: bool,
}

impl UdfConfig {
	pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
		Self {
			plugin_dir: plugin_dir.into(),
			allow_suspicious_udfs: false,
		}
	}
}
