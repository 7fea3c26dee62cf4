// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

use std::sync::{
	Arc,
	atomic::{AtomicU64, Ordering},
};

use opaldb_type::{FunctionKind, ReturnType};

use crate::{library::LibraryHandle, resolve::EntryPoints};

/// Process-unique identity of one descriptor.
///
/// Stays stable across the retire transition, so a retiring descriptor can
/// be indexed without touching its name and without any key collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(u64);

impl DescriptorId {
	fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}

/// Resolved native binding of a descriptor. Absent when the library could
/// not be opened; the entry is then visible to DROP but not to queries.
#[derive(Debug)]
pub struct NativeBinding {
	pub library: Arc<LibraryHandle>,
	pub entry_points: EntryPoints,
}

/// In-memory record of one registered function.
#[derive(Debug)]
pub struct UdfDescriptor {
	id: DescriptorId,
	pub name: String,
	pub return_type: ReturnType,
	pub kind: FunctionKind,
	/// Declared library file name, as stored in the catalog.
	pub library_name: String,
	binding: Option<NativeBinding>,
}

impl UdfDescriptor {
	pub fn new(
		name: String,
		return_type: ReturnType,
		kind: FunctionKind,
		library_name: String,
		binding: Option<NativeBinding>,
	) -> Self {
		Self {
			id: DescriptorId::next(),
			name,
			return_type,
			kind,
			library_name,
			binding,
		}
	}

	pub fn id(&self) -> DescriptorId {
		self.id
	}

	pub fn binding(&self) -> Option<&NativeBinding> {
		self.binding.as_ref()
	}

	pub fn entry_points(&self) -> Option<&EntryPoints> {
		self.binding.as_ref().map(|b| &b.entry_points)
	}

	pub fn library(&self) -> Option<&Arc<LibraryHandle>> {
		self.binding.as_ref().map(|b| &b.library)
	}

	/// False when the library failed to open and the entry is inert.
	pub fn is_loaded(&self) -> bool {
		self.binding.is_some()
	}
}
