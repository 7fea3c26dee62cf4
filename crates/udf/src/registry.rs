// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

//! The concurrent function registry.
//!
//! One reader/writer lock serializes all mutation; plain lookups run
//! concurrently with each other. No library is opened or closed while the
//! lock is held.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use crate::{
	UdfError,
	descriptor::{DescriptorId, UdfDescriptor},
	library::LibraryHandle,
};

struct Slot {
	descriptor: Arc<UdfDescriptor>,
	/// Holders of this slot: the live name binding counts as one, plus
	/// one per outstanding mark-used lookup.
	references: u32,
}

#[derive(Default)]
struct RegistryInner {
	/// Live entries, exactly one per function name.
	named: HashMap<String, DescriptorId>,
	/// Every descriptor the registry keeps alive, live or retiring. A
	/// descriptor is in `named` XOR retiring, never both.
	slots: HashMap<DescriptorId, Slot>,
}

/// Concurrent name-indexed table of registered functions.
///
/// Removal is deferred: `retire` detaches a descriptor from its name but
/// the slot floats under the descriptor's identity until the last holder
/// calls `release`. An in-flight call therefore never observes a dangling
/// entry point, and the name is immediately free for reuse.
pub struct UdfRegistry {
	inner: RwLock<RegistryInner>,
}

impl UdfRegistry {
	pub fn new() -> Self {
		Self {
			inner: RwLock::new(RegistryInner::default()),
		}
	}

	/// Find the live entry for `name`.
	///
	/// Entries whose library failed to open are reported absent. With
	/// `mark_used` the caller takes one reference, to be returned through
	/// [`UdfRegistry::release`] once the bound expression is gone; without
	/// it this is a plain concurrent read, good enough while parsing.
	#[instrument(name = "udf::registry::lookup", level = "trace", skip(self))]
	pub fn lookup(&self, name: &str, mark_used: bool) -> Option<Arc<UdfDescriptor>> {
		if mark_used {
			let mut inner = self.inner.write();
			let id = *inner.named.get(name)?;
			let slot = inner.slots.get_mut(&id)?;
			if !slot.descriptor.is_loaded() {
				return None;
			}
			slot.references += 1;
			Some(slot.descriptor.clone())
		} else {
			let inner = self.inner.read();
			let id = inner.named.get(name)?;
			let slot = inner.slots.get(id)?;
			if !slot.descriptor.is_loaded() {
				return None;
			}
			Some(slot.descriptor.clone())
		}
	}

	/// Name presence check that, unlike `lookup`, also sees entries whose
	/// library failed to open.
	pub fn contains(&self, name: &str) -> bool {
		self.inner.read().named.contains_key(name)
	}

	/// True when no function is registered at all. Expression resolution
	/// uses this to skip the lookup entirely.
	pub fn is_empty(&self) -> bool {
		self.inner.read().named.is_empty()
	}

	/// Install a freshly created descriptor under its name with one
	/// reference, the registry's own.
	pub fn insert(&self, descriptor: Arc<UdfDescriptor>) -> crate::Result<()> {
		let mut inner = self.inner.write();
		if inner.named.contains_key(&descriptor.name) {
			return Err(UdfError::DuplicateName {
				name: descriptor.name.clone(),
			});
		}
		let id = descriptor.id();
		inner.named.insert(descriptor.name.clone(), id);
		inner.slots.insert(id, Slot {
			descriptor,
			references: 1,
		});
		Ok(())
	}

	/// Give back a reference taken with `lookup(…, mark_used = true)`.
	///
	/// The last release of a retired descriptor removes its slot; the
	/// library closes once no other descriptor references it.
	#[instrument(name = "udf::registry::release", level = "trace", skip_all, fields(function = %descriptor.name))]
	pub fn release(&self, descriptor: &Arc<UdfDescriptor>) {
		// The slot is detached under the lock but dropped after it, so a
		// library close never runs in the locked section.
		let _removed = {
			let mut inner = self.inner.write();
			let id = descriptor.id();
			let references = {
				let Some(slot) = inner.slots.get_mut(&id) else {
					warn!(function = %descriptor.name, "release of a descriptor the registry does not hold");
					return;
				};
				slot.references -= 1;
				slot.references
			};
			if references == 0 {
				// Zero is only reachable after retire(): the name
				// binding itself holds a reference until then.
				debug_assert!(inner.named.get(descriptor.name.as_str()) != Some(&id));
				debug!(function = %descriptor.name, "removed retired function after last release");
				inner.slots.remove(&id)
			} else {
				None
			}
		};
	}

	/// Detach `name` from lookup and drop the registry's reference.
	///
	/// With no outstanding holders the descriptor goes immediately;
	/// otherwise its slot floats under the descriptor's identity until the
	/// last `release`. Either way the name can be redefined right away.
	#[instrument(name = "udf::registry::retire", level = "debug", skip(self))]
	pub fn retire(&self, name: &str) -> crate::Result<()> {
		// As in release(), the removed slot drops after the lock.
		let _removed = {
			let mut inner = self.inner.write();
			let Some(id) = inner.named.remove(name) else {
				return Err(UdfError::NameNotFound {
					name: name.to_string(),
				});
			};
			let references = {
				let Some(slot) = inner.slots.get_mut(&id) else {
					debug_assert!(false, "name index pointed at a missing slot");
					return Ok(());
				};
				slot.references -= 1;
				slot.references
			};
			if references == 0 {
				debug!(function = %name, "retired function");
				inner.slots.remove(&id)
			} else {
				debug!(function = %name, references, "function in use, deferring removal to the last release");
				None
			}
		};
		Ok(())
	}

	/// Find a live handle for a declared library file name.
	///
	/// Only the function name is indexed, so this walks every slot,
	/// retiring ones included: a retiring descriptor still holds its
	/// library open and sharing that handle is correct. The table holds
	/// tens of entries and the scan runs on create, drop and bootstrap
	/// only, never on the query lookup path.
	pub fn find_library(&self, library_name: &str) -> Option<Arc<LibraryHandle>> {
		let inner = self.inner.read();
		inner.slots.values().find_map(|slot| {
			let binding = slot.descriptor.binding()?;
			(slot.descriptor.library_name == library_name).then(|| binding.library.clone())
		})
	}

	/// Drop every descriptor. Each library closes exactly once, when the
	/// last descriptor sharing it is dropped. Callers must have quiesced;
	/// outstanding references are abandoned.
	pub fn shutdown(&self) {
		let removed: Vec<Slot> = {
			let mut inner = self.inner.write();
			inner.named.clear();
			inner.slots.drain().map(|(_, slot)| slot).collect()
		};
		if !removed.is_empty() {
			debug!(functions = removed.len(), "function registry shut down");
		}
	}
}

impl Default for UdfRegistry {
	fn default() -> Self {
		Self::new()
	}
}
