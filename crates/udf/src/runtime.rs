// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

use std::sync::Arc;

use opaldb_type::FunctionKind;
use tracing::debug;

use crate::{
	config::UdfConfig,
	descriptor::NativeBinding,
	library::{DlBackend, LibraryBackend, LibraryLoader},
	registry::UdfRegistry,
	resolve,
};

/// The UDF subsystem service object: configuration, library loader and
/// registry.
///
/// One instance is constructed at server start, handed by reference to
/// session workers, and shut down after they have quiesced. There is no
/// process-global state.
pub struct UdfRuntime {
	config: UdfConfig,
	loader: LibraryLoader,
	registry: UdfRegistry,
}

impl UdfRuntime {
	/// Runtime backed by the platform dynamic loader.
	pub fn new(config: UdfConfig) -> Self {
		Self::with_backend(config, Arc::new(DlBackend))
	}

	/// Runtime with a caller-supplied library backend (tests, embedded
	/// hosts).
	pub fn with_backend(config: UdfConfig, backend: Arc<dyn LibraryBackend>) -> Self {
		let loader = LibraryLoader::new(config.plugin_dir.clone(), backend);
		Self {
			config,
			loader,
			registry: UdfRegistry::new(),
		}
	}

	pub fn config(&self) -> &UdfConfig {
		&self.config
	}

	/// The registry, for query execution: `lookup` and `release` live
	/// there.
	pub fn registry(&self) -> &UdfRegistry {
		&self.registry
	}

	/// Shut the subsystem down. Every library closes exactly once, shared
	/// handles included. Callers must have quiesced first.
	pub fn shutdown(&self) {
		self.registry.shutdown();
		debug!("udf subsystem shut down");
	}

	/// Share an already-open handle for the library or open it, then
	/// resolve the entry points for `name`. Runs entirely outside the
	/// registry lock; a freshly opened handle whose resolution fails
	/// closes when the error drops it.
	pub(crate) fn bind(&self, name: &str, kind: FunctionKind, library_name: &str) -> crate::Result<NativeBinding> {
		let library = match self.registry.find_library(library_name) {
			Some(shared) => shared,
			None => self.loader.open(library_name)?,
		};
		let entry_points = resolve::resolve(&library, name, kind, self.config.allow_suspicious_udfs)?;
		Ok(NativeBinding {
			library,
			entry_points,
		})
	}
}
