// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

//! Transactional CREATE FUNCTION and DROP FUNCTION.
//!
//! Both operations mutate the registry only after the catalog change has
//! committed, so the in-memory table and the persisted catalog never
//! diverge: a rollback, whether requested here or decided by the
//! transaction owner, leaves the registry exactly as it was.

use std::sync::Arc;

use tracing::{error, instrument, warn};

use crate::{
	UdfError,
	descriptor::UdfDescriptor,
	interface::{CatalogTransaction, FunctionRow, TransactionOutcome},
	runtime::UdfRuntime,
};

impl UdfRuntime {
	/// CREATE FUNCTION.
	///
	/// Exit points in order: syntactic validation, duplicate-name
	/// pre-check, library open, symbol resolution, catalog insert,
	/// commit. Only a committed insert reaches the registry; any earlier
	/// failure rolls the transaction back, and a newly opened unshared
	/// library closes when the failed binding drops.
	#[instrument(name = "udf::create", level = "debug", skip(self, txn), fields(function = %row.name))]
	pub fn create_function(&self, row: FunctionRow, txn: &mut dyn CatalogTransaction) -> crate::Result<()> {
		if let Err(e) = row.validate() {
			rollback(txn, &row.name);
			return Err(e);
		}

		// Cheap pre-check before any library work. Racing statements are
		// arbitrated by the catalog's unique key, not by this.
		if self.registry().contains(&row.name) {
			rollback(txn, &row.name);
			return Err(UdfError::DuplicateName {
				name: row.name,
			});
		}

		let binding = match self.bind(&row.name, row.kind, &row.library) {
			Ok(binding) => binding,
			Err(e) => {
				rollback(txn, &row.name);
				return Err(e);
			}
		};

		if let Err(e) = txn.insert_row(&row) {
			rollback(txn, &row.name);
			return Err(e);
		}

		match txn.finish(false)? {
			TransactionOutcome::Committed => {}
			TransactionOutcome::RolledBack => {
				return Err(UdfError::TransactionRolledBack {
					name: row.name,
				});
			}
		}

		let descriptor =
			UdfDescriptor::new(row.name, row.return_type, row.kind, row.library, Some(binding));
		if let Err(e) = self.registry().insert(Arc::new(descriptor)) {
			// The row committed, so only a racing create on a catalog
			// without a unique key can get here. Keep the existing entry.
			error!(error = %e, "function committed to the catalog but already present in the registry");
			return Err(e);
		}
		Ok(())
	}

	/// DROP FUNCTION.
	///
	/// The registry entry is retired only after the catalog delete has
	/// committed; on rollback the function stays fully live. An entry
	/// whose library never opened is droppable all the same, which is how
	/// a broken catalog row gets cleaned up. The library closes once the
	/// last descriptor resolved from it is finalized.
	#[instrument(name = "udf::drop", level = "debug", skip(self, txn))]
	pub fn drop_function(&self, name: &str, txn: &mut dyn CatalogTransaction) -> crate::Result<()> {
		if !self.registry().contains(name) {
			rollback(txn, name);
			return Err(UdfError::NameNotFound {
				name: name.to_string(),
			});
		}

		match txn.delete_row(name) {
			Ok(true) => {}
			Ok(false) => {
				// Registered but missing from the catalog: nothing to
				// commit, nothing to retire.
				rollback(txn, name);
				return Err(UdfError::NameNotFound {
					name: name.to_string(),
				});
			}
			Err(e) => {
				rollback(txn, name);
				return Err(e);
			}
		}

		match txn.finish(false)? {
			TransactionOutcome::Committed => {}
			TransactionOutcome::RolledBack => {
				return Err(UdfError::TransactionRolledBack {
					name: name.to_string(),
				});
			}
		}

		self.registry().retire(name)
	}
}

fn rollback(txn: &mut dyn CatalogTransaction, name: &str) {
	if let Err(e) = txn.finish(true) {
		warn!(function = %name, error = %e, "rollback of function statement failed");
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use opaldb_type::{FunctionKind, ReturnType};

	use crate::{
		UdfError,
		test_utils::{MemoryCatalog, aggregate_row, new_runtime, scalar_row},
	};

	#[test]
	fn test_create_commits_row_and_registers_function() {
		let (runtime, backend) = new_runtime(&[("udf_example.so", &["metaphon", "metaphon_init"])]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap();

		assert!(catalog.contains("metaphon"));
		let found = runtime.registry().lookup("metaphon", false).unwrap();
		assert_eq!(found.return_type, ReturnType::String);
		assert_eq!(found.kind, FunctionKind::Scalar);
		assert_eq!(backend.open_count("udf_example.so"), 1);
	}

	#[test]
	fn test_create_aggregate_resolves_clear_and_add() {
		let (runtime, _) = new_runtime(&[("udf_example.so", &["avgcost", "avgcost_clear", "avgcost_add"])]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		runtime.create_function(aggregate_row("avgcost", "udf_example.so"), &mut txn).unwrap();

		let found = runtime.registry().lookup("avgcost", false).unwrap();
		let entry = found.entry_points().unwrap();
		assert!(entry.clear.is_some());
		assert!(entry.add.is_some());
	}

	#[test]
	fn test_create_duplicate_name_leaves_catalog_untouched() {
		let (runtime, _) = new_runtime(&[("udf_example.so", &["metaphon", "metaphon_init"])]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap();

		let mut txn = catalog.begin();
		let err = runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap_err();
		assert!(matches!(err, UdfError::DuplicateName { .. }));
		assert_eq!(catalog.rows().len(), 1);
	}

	#[test]
	fn test_create_invalid_path_writes_nothing() {
		let (runtime, backend) = new_runtime(&[]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		let err = runtime.create_function(scalar_row("evil", "../evil.so"), &mut txn).unwrap_err();
		assert!(matches!(err, UdfError::InvalidLibraryPath { .. }));
		assert!(catalog.rows().is_empty());
		assert_eq!(backend.total_opens(), 0);
	}

	#[test]
	fn test_create_open_failure_reports_diagnostic_and_rolls_back() {
		let (runtime, _) = new_runtime(&[]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		let err = runtime.create_function(scalar_row("metaphon", "missing.so"), &mut txn).unwrap_err();
		assert!(matches!(err, UdfError::LibraryOpenFailed { .. }));
		assert!(catalog.rows().is_empty());
		assert!(!runtime.registry().contains("metaphon"));
	}

	#[test]
	fn test_create_missing_symbol_closes_fresh_library() {
		let (runtime, backend) = new_runtime(&[("udf_example.so", &["other_symbol"])]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		let err = runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap_err();
		assert!(matches!(err, UdfError::MissingSymbol { symbol } if symbol == "metaphon"));
		assert_eq!(backend.close_count("udf_example.so"), 1);
		assert!(catalog.rows().is_empty());
	}

	#[test]
	fn test_create_suspicious_scalar_rejected_without_override() {
		let (runtime, _) = new_runtime(&[("libc_like.so", &["strlen"])]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		let err = runtime.create_function(scalar_row("strlen", "libc_like.so"), &mut txn).unwrap_err();
		assert!(matches!(err, UdfError::SuspiciousUdf { .. }));
		assert!(catalog.rows().is_empty());
	}

	#[test]
	fn test_create_persistence_error_rolls_back() {
		let (runtime, _) = new_runtime(&[("udf_example.so", &["metaphon", "metaphon_init"])]);
		let catalog = MemoryCatalog::new();
		catalog.fail_next_write("disk full");

		let mut txn = catalog.begin();
		let err = runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap_err();
		assert!(matches!(err, UdfError::Persistence { reason } if reason == "disk full"));
		assert!(catalog.rows().is_empty());
		assert!(!runtime.registry().contains("metaphon"));
	}

	#[test]
	fn test_create_external_rollback_leaves_registry_unchanged() {
		let (runtime, _) = new_runtime(&[("udf_example.so", &["metaphon", "metaphon_init"])]);
		let catalog = MemoryCatalog::new();
		catalog.force_rollback(true);

		let mut txn = catalog.begin();
		let err = runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap_err();
		assert!(matches!(err, UdfError::TransactionRolledBack { .. }));
		assert!(catalog.rows().is_empty());
		assert!(!runtime.registry().contains("metaphon"));
	}

	#[test]
	fn test_drop_removes_row_and_registry_entry() {
		let (runtime, _) = new_runtime(&[("udf_example.so", &["metaphon", "metaphon_init"])]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap();

		let mut txn = catalog.begin();
		runtime.drop_function("metaphon", &mut txn).unwrap();
		assert!(!catalog.contains("metaphon"));
		assert!(!runtime.registry().contains("metaphon"));
	}

	#[test]
	fn test_drop_unknown_function_is_reported() {
		let (runtime, _) = new_runtime(&[]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		let err = runtime.drop_function("metaphon", &mut txn).unwrap_err();
		assert!(matches!(err, UdfError::NameNotFound { .. }));
	}

	#[test]
	fn test_drop_external_rollback_keeps_function_live() {
		let (runtime, _) = new_runtime(&[("udf_example.so", &["metaphon", "metaphon_init"])]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap();

		catalog.force_rollback(true);
		let mut txn = catalog.begin();
		let err = runtime.drop_function("metaphon", &mut txn).unwrap_err();
		assert!(matches!(err, UdfError::TransactionRolledBack { .. }));

		// Still present on both sides.
		assert!(catalog.contains("metaphon"));
		assert!(runtime.registry().lookup("metaphon", false).is_some());
	}

	#[test]
	fn test_drop_inert_entry_cleans_up_catalog_row() {
		// A function whose library vanished is registered inert at
		// bootstrap; DROP must still remove it and its row.
		let (runtime, _) = new_runtime(&[]);
		let catalog = MemoryCatalog::with_rows(vec![scalar_row("ghost", "gone.so")]);
		runtime.bootstrap(&catalog).unwrap();
		assert!(runtime.registry().contains("ghost"));

		let mut txn = catalog.begin();
		runtime.drop_function("ghost", &mut txn).unwrap();
		assert!(!catalog.contains("ghost"));
		assert!(!runtime.registry().contains("ghost"));
	}

	#[test]
	fn test_drop_while_in_use_keeps_descriptor_valid_until_release() {
		let (runtime, backend) = new_runtime(&[("udf_example.so", &["metaphon", "metaphon_init"])]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap();

		let held = runtime.registry().lookup("metaphon", true).unwrap();

		let mut txn = catalog.begin();
		runtime.drop_function("metaphon", &mut txn).unwrap();

		// Dropped for everyone else, alive for the holder.
		assert!(runtime.registry().lookup("metaphon", false).is_none());
		assert!(held.entry_points().is_some());
		assert_eq!(backend.close_count("udf_example.so"), 0);

		runtime.registry().release(&held);
		drop(held);
		assert_eq!(backend.close_count("udf_example.so"), 1);
	}

	#[test]
	fn test_name_reusable_while_old_descriptor_floats() {
		let (runtime, _) = new_runtime(&[
			("udf_example.so", &["metaphon", "metaphon_init"]),
			("udf_example2.so", &["metaphon", "metaphon_deinit"]),
		]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		runtime.create_function(scalar_row("metaphon", "udf_example.so"), &mut txn).unwrap();
		let held = runtime.registry().lookup("metaphon", true).unwrap();

		let mut txn = catalog.begin();
		runtime.drop_function("metaphon", &mut txn).unwrap();

		let mut txn = catalog.begin();
		runtime.create_function(scalar_row("metaphon", "udf_example2.so"), &mut txn).unwrap();

		let fresh = runtime.registry().lookup("metaphon", false).unwrap();
		assert_eq!(fresh.library_name, "udf_example2.so");
		assert_eq!(held.library_name, "udf_example.so");

		runtime.registry().release(&held);
	}

	#[test]
	fn test_shared_library_not_reopened_on_second_create() {
		let (runtime, backend) = new_runtime(&[("udf_example.so", &["f1", "f1_init", "f2", "f2_init"])]);
		let catalog = MemoryCatalog::new();

		let mut txn = catalog.begin();
		runtime.create_function(scalar_row("f1", "udf_example.so"), &mut txn).unwrap();
		let mut txn = catalog.begin();
		runtime.create_function(scalar_row("f2", "udf_example.so"), &mut txn).unwrap();

		assert_eq!(backend.open_count("udf_example.so"), 1);
		let f1 = runtime.registry().lookup("f1", false).unwrap();
		let f2 = runtime.registry().lookup("f2", false).unwrap();
		assert!(Arc::ptr_eq(f1.library().unwrap(), f2.library().unwrap()));
	}

	#[test]
	fn test_shared_library_closes_after_both_drops_either_order() {
		for order in [["f1", "f2"], ["f2", "f1"]] {
			let (runtime, backend) = new_runtime(&[("udf_example.so", &["f1", "f1_init", "f2", "f2_init"])]);
			let catalog = MemoryCatalog::new();

			let mut txn = catalog.begin();
			runtime.create_function(scalar_row("f1", "udf_example.so"), &mut txn).unwrap();
			let mut txn = catalog.begin();
			runtime.create_function(scalar_row("f2", "udf_example.so"), &mut txn).unwrap();

			let mut txn = catalog.begin();
			runtime.drop_function(order[0], &mut txn).unwrap();
			assert_eq!(backend.close_count("udf_example.so"), 0, "{order:?}");

			let mut txn = catalog.begin();
			runtime.drop_function(order[1], &mut txn).unwrap();
			assert_eq!(backend.close_count("udf_example.so"), 1, "{order:?}");
		}
	}
}
