// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

#![cfg_attr(not(debug_assertions), deny(warnings))]

pub use kind::{FunctionKind, ReturnType, UnknownFunctionKind, UnknownReturnType};

mod kind;
