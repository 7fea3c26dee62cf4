// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

//! Initial registry population from the persisted catalog.

use std::sync::Arc;

use tracing::{debug, error, instrument};

use crate::{
	UdfError,
	descriptor::UdfDescriptor,
	interface::FunctionRowProvider,
	runtime::UdfRuntime,
};

impl UdfRuntime {
	/// Load every registered function from the catalog at server start.
	///
	/// Row failures are never fatal: an invalid row is skipped, a
	/// function whose library cannot be opened is kept inert so DROP can
	/// still clean it up, and a function with missing or suspicious
	/// symbols is left out entirely. Returns the number of callable
	/// functions.
	#[instrument(name = "udf::bootstrap", level = "debug", skip_all)]
	pub fn bootstrap(&self, provider: &dyn FunctionRowProvider) -> crate::Result<usize> {
		let mut usable = 0;
		for row in provider.scan()? {
			if let Err(e) = row.validate() {
				error!(function = %row.name, error = %e, "invalid row in function catalog, skipping");
				continue;
			}

			let binding = match self.bind(&row.name, row.kind, &row.library) {
				Ok(binding) => Some(binding),
				Err(e @ UdfError::LibraryOpenFailed { .. }) => {
					// Keep the entry so it can still be dropped.
					error!(function = %row.name, error = %e, "cannot open library, function disabled");
					None
				}
				Err(e) => {
					error!(function = %row.name, error = %e, "cannot resolve function, skipping");
					continue;
				}
			};
			let loaded = binding.is_some();

			let descriptor = UdfDescriptor::new(
				row.name.clone(),
				row.return_type,
				row.kind,
				row.library,
				binding,
			);
			if let Err(e) = self.registry().insert(Arc::new(descriptor)) {
				error!(function = %row.name, error = %e, "duplicate row in function catalog, skipping");
				continue;
			}
			if loaded {
				usable += 1;
			}
		}
		debug!(functions = usable, "function catalog loaded");
		Ok(usable)
	}
}
