// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

//! Entry point resolution by naming convention.

use opaldb_type::FunctionKind;
use tracing::warn;

use crate::{
	UdfError,
	library::{LibraryHandle, SymbolPtr},
};

/// Resolved native entry points of one registered function.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
	pub call: SymbolPtr,
	pub init: Option<SymbolPtr>,
	pub deinit: Option<SymbolPtr>,
	/// Aggregate only.
	pub clear: Option<SymbolPtr>,
	/// Aggregate only.
	pub add: Option<SymbolPtr>,
}

/// Resolve the entry points for `name` against an open library.
///
/// The call symbol is the function name itself. Aggregates additionally
/// require `<name>_clear` and `<name>_add`. `<name>_init` and
/// `<name>_deinit` are optional, but a scalar function defining neither is
/// rejected unless `allow_suspicious` is set: an exact-name lookup can
/// bind a random global from, say, libc, and a library actually written as
/// a UDF defines at least one auxiliary symbol.
pub fn resolve(
	library: &LibraryHandle,
	name: &str,
	kind: FunctionKind,
	allow_suspicious: bool,
) -> crate::Result<EntryPoints> {
	let Some(call) = library.symbol(name) else {
		return Err(UdfError::MissingSymbol {
			symbol: name.to_string(),
		});
	};

	let mut clear = None;
	let mut add = None;
	if kind == FunctionKind::Aggregate {
		let symbol = format!("{name}_clear");
		clear = match library.symbol(&symbol) {
			Some(ptr) => Some(ptr),
			None => {
				return Err(UdfError::MissingSymbol {
					symbol,
				});
			}
		};
		let symbol = format!("{name}_add");
		add = match library.symbol(&symbol) {
			Some(ptr) => Some(ptr),
			None => {
				return Err(UdfError::MissingSymbol {
					symbol,
				});
			}
		};
	}

	let deinit = library.symbol(&format!("{name}_deinit"));
	let init = library.symbol(&format!("{name}_init"));

	if init.is_none() && deinit.is_none() && kind != FunctionKind::Aggregate {
		if !allow_suspicious {
			return Err(UdfError::SuspiciousUdf {
				name: name.to_string(),
			});
		}
		warn!(function = %name, library = %library.name(), "no auxiliary symbol found, accepting anyway");
	}

	Ok(EntryPoints {
		call,
		init,
		deinit,
		clear,
		add,
	})
}

#[cfg(test)]
mod tests {
	use opaldb_type::FunctionKind;

	use super::resolve;
	use crate::{UdfError, test_utils::fake_library};

	#[test]
	fn test_scalar_with_init_resolves() {
		let lib = fake_library("udf_example.so", &["metaphon", "metaphon_init"]);
		let entry = resolve(&lib, "metaphon", FunctionKind::Scalar, false).unwrap();
		assert!(entry.init.is_some());
		assert!(entry.deinit.is_none());
		assert!(entry.clear.is_none());
		assert!(entry.add.is_none());
	}

	#[test]
	fn test_scalar_with_only_deinit_resolves() {
		let lib = fake_library("udf_example.so", &["metaphon", "metaphon_deinit"]);
		let entry = resolve(&lib, "metaphon", FunctionKind::Scalar, false).unwrap();
		assert!(entry.init.is_none());
		assert!(entry.deinit.is_some());
	}

	#[test]
	fn test_missing_call_symbol_is_named() {
		let lib = fake_library("udf_example.so", &["metaphon_init"]);
		let err = resolve(&lib, "metaphon", FunctionKind::Scalar, false).unwrap_err();
		assert!(matches!(err, UdfError::MissingSymbol { symbol } if symbol == "metaphon"));
	}

	#[test]
	fn test_scalar_without_auxiliary_symbol_is_suspicious() {
		let lib = fake_library("libc.so.6", &["strlen"]);
		let err = resolve(&lib, "strlen", FunctionKind::Scalar, false).unwrap_err();
		assert!(matches!(err, UdfError::SuspiciousUdf { name } if name == "strlen"));
	}

	#[test]
	fn test_suspicious_override_accepts_bare_scalar() {
		let lib = fake_library("libc.so.6", &["strlen"]);
		let entry = resolve(&lib, "strlen", FunctionKind::Scalar, true).unwrap();
		assert!(entry.init.is_none());
		assert!(entry.deinit.is_none());
	}

	#[test]
	fn test_aggregate_requires_clear_and_add() {
		let lib = fake_library("udf_example.so", &["avgcost", "avgcost_clear"]);
		let err = resolve(&lib, "avgcost", FunctionKind::Aggregate, false).unwrap_err();
		assert!(matches!(err, UdfError::MissingSymbol { symbol } if symbol == "avgcost_add"));
	}

	#[test]
	fn test_aggregate_without_auxiliary_symbol_resolves() {
		// The mandatory _clear/_add pair already proves the library is a
		// UDF; the suspicious heuristic does not apply.
		let lib = fake_library("udf_example.so", &["avgcost", "avgcost_clear", "avgcost_add"]);
		let entry = resolve(&lib, "avgcost", FunctionKind::Aggregate, false).unwrap();
		assert!(entry.clear.is_some());
		assert!(entry.add.is_some());
		assert!(entry.init.is_none());
		assert!(entry.deinit.is_none());
	}
}
