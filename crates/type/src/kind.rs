// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Value category a user defined function returns.
///
/// The numeric codes are the ones persisted in the function catalog; code 3
/// is reserved for row-valued results, which a UDF cannot produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnType {
	String,
	Real,
	Integer,
	Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown return type code {code}")]
pub struct UnknownReturnType {
	pub code: i64,
}

impl ReturnType {
	pub fn code(&self) -> i64 {
		match self {
			ReturnType::String => 0,
			ReturnType::Real => 1,
			ReturnType::Integer => 2,
			ReturnType::Decimal => 4,
		}
	}

	pub fn from_code(code: i64) -> Result<Self, UnknownReturnType> {
		match code {
			0 => Ok(ReturnType::String),
			1 => Ok(ReturnType::Real),
			2 => Ok(ReturnType::Integer),
			4 => Ok(ReturnType::Decimal),
			_ => Err(UnknownReturnType {
				code,
			}),
		}
	}
}

impl Display for ReturnType {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let label = match self {
			ReturnType::String => "String",
			ReturnType::Real => "Real",
			ReturnType::Integer => "Integer",
			ReturnType::Decimal => "Decimal",
		};
		f.write_str(label)
	}
}

/// Kind of a user defined function. Controls which native entry points are
/// mandatory when the function is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
	Scalar,
	Aggregate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown function kind code {code}")]
pub struct UnknownFunctionKind {
	pub code: i64,
}

impl FunctionKind {
	pub fn code(&self) -> i64 {
		match self {
			FunctionKind::Scalar => 1,
			FunctionKind::Aggregate => 2,
		}
	}

	pub fn from_code(code: i64) -> Result<Self, UnknownFunctionKind> {
		match code {
			1 => Ok(FunctionKind::Scalar),
			2 => Ok(FunctionKind::Aggregate),
			_ => Err(UnknownFunctionKind {
				code,
			}),
		}
	}
}

// Catalogs written before the kind column existed mean scalar.
impl Default for FunctionKind {
	fn default() -> Self {
		FunctionKind::Scalar
	}
}

impl Display for FunctionKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let label = match self {
			FunctionKind::Scalar => "Scalar",
			FunctionKind::Aggregate => "Aggregate",
		};
		f.write_str(label)
	}
}
