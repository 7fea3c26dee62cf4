// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

//! Interfaces to the collaborators this subsystem does not implement: the
//! persisted function catalog and the transaction enclosing one CREATE or
//! DROP statement.

use opaldb_type::{FunctionKind, ReturnType};
use serde::{Deserialize, Serialize};

use crate::{UdfError, library::check_library_name};

/// Longest accepted function identifier, in characters.
pub const MAX_FUNCTION_NAME: usize = 64;

/// One row of the persisted function catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRow {
	pub name: String,
	pub return_type: ReturnType,
	/// Declared library file name, never a path.
	pub library: String,
	/// Absent in catalogs written before the kind column existed.
	#[serde(default)]
	pub kind: FunctionKind,
}

impl FunctionRow {
	/// Syntactic checks shared by CREATE and bootstrap: a non-empty name
	/// of bounded length and a bare library file name.
	pub fn validate(&self) -> crate::Result<()> {
		if self.name.is_empty() || self.name.chars().count() > MAX_FUNCTION_NAME {
			return Err(UdfError::InvalidFunctionName {
				name: self.name.clone(),
			});
		}
		check_library_name(&self.library)
	}
}

/// Ordered source of catalog rows, consumed once at startup.
pub trait FunctionRowProvider {
	fn scan(&self) -> crate::Result<Vec<FunctionRow>>;
}

/// Outcome of the transaction enclosing one CREATE or DROP statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
	Committed,
	RolledBack,
}

/// Write access to the persisted function catalog, scoped to the
/// transaction of one CREATE or DROP statement. The implementation owns
/// the commit decision; this subsystem only decides which registry
/// mutation corresponds to which outcome.
pub trait CatalogTransaction {
	/// Stage the insert of one catalog row.
	fn insert_row(&mut self, row: &FunctionRow) -> crate::Result<()>;

	/// Stage the delete of the row for `name`. Ok(false) when no such row
	/// exists.
	fn delete_row(&mut self, name: &str) -> crate::Result<bool>;

	/// Commit or roll back. `rollback = true` forces a rollback; the
	/// implementation may also roll back on its own even when commit was
	/// requested.
	fn finish(&mut self, rollback: bool) -> crate::Result<TransactionOutcome>;
}

#[cfg(test)]
mod tests {
	use opaldb_type::{FunctionKind, ReturnType};

	use super::FunctionRow;
	use crate::UdfError;

	fn row(name: &str, library: &str) -> FunctionRow {
		FunctionRow {
			name: name.to_string(),
			return_type: ReturnType::Integer,
			library: library.to_string(),
			kind: FunctionKind::Scalar,
		}
	}

	#[test]
	fn test_validate_accepts_plain_names() {
		row("metaphon", "udf_example.so").validate().unwrap();
	}

	#[test]
	fn test_validate_rejects_empty_name() {
		assert!(matches!(row("", "udf_example.so").validate(), Err(UdfError::InvalidFunctionName { .. })));
	}

	#[test]
	fn test_validate_rejects_overlong_name() {
		let name = "f".repeat(65);
		assert!(matches!(row(&name, "udf_example.so").validate(), Err(UdfError::InvalidFunctionName { .. })));
	}

	#[test]
	fn test_validate_rejects_library_path() {
		assert!(matches!(
			row("metaphon", "../udf_example.so").validate(),
			Err(UdfError::InvalidLibraryPath { .. })
		));
	}
}
