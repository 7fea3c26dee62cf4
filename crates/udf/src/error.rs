// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

/// Errors produced by the UDF runtime.
///
/// Bootstrap treats every per-row error as non-fatal and keeps going;
/// `create_function` and `drop_function` treat every error as fatal to the
/// one statement and leave both the registry and the catalog untouched.
#[derive(Debug, thiserror::Error)]
pub enum UdfError {
	#[error("invalid function name: {name}")]
	InvalidFunctionName {
		name: String,
	},

	#[error("shared library name must not contain a path: {path}")]
	InvalidLibraryPath {
		path: String,
	},

	#[error("cannot open shared library {path}: {reason}")]
	LibraryOpenFailed {
		path: String,
		reason: String,
	},

	#[error("cannot find symbol {symbol} in library")]
	MissingSymbol {
		symbol: String,
	},

	#[error("function {name} defines no auxiliary symbol")]
	SuspiciousUdf {
		name: String,
	},

	#[error("function {name} already exists")]
	DuplicateName {
		name: String,
	},

	#[error("function {name} does not exist")]
	NameNotFound {
		name: String,
	},

	#[error("statement for function {name} was rolled back")]
	TransactionRolledBack {
		name: String,
	},

	#[error("function catalog failure: {reason}")]
	Persistence {
		reason: String,
	},
}
