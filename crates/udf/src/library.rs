// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

//! Shared library loading.
//!
//! The platform loader sits behind [`LibraryBackend`] so the rest of the
//! subsystem, and its tests, never touch `dlopen` directly. One
//! [`LibraryHandle`] is shared by every function resolved from the same
//! file and closes when the last of them is gone.

use std::{
	ffi::c_void,
	fmt,
	path::{Path, PathBuf},
	sync::Arc,
};

use libloading::Library;
use tracing::debug;

use crate::UdfError;

/// Address of a native entry point.
///
/// The runtime only stores and hands out these addresses; invoking them is
/// the expression evaluator's business.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SymbolPtr(*const c_void);

// SAFETY: an entry point addresses immutable code; sharing the address
// across threads is sound.
unsafe impl Send for SymbolPtr {}
unsafe impl Sync for SymbolPtr {}

impl SymbolPtr {
	pub fn new(ptr: *const c_void) -> Self {
		Self(ptr)
	}

	pub fn as_ptr(&self) -> *const c_void {
		self.0
	}
}

impl fmt::Debug for SymbolPtr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SymbolPtr({:p})", self.0)
	}
}

/// One loaded native library.
pub trait NativeLibrary: Send + Sync {
	/// Resolve `name` to an address, exact match only.
	fn symbol(&self, name: &str) -> Option<SymbolPtr>;
}

/// Opens native libraries by absolute path.
pub trait LibraryBackend: Send + Sync {
	/// Errors carry the raw loader diagnostic.
	fn open(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, String>;
}

/// Production backend over the platform dynamic loader.
pub struct DlBackend;

impl LibraryBackend for DlBackend {
	fn open(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, String> {
		// SAFETY: library constructors run on open. The path has already
		// been confined to the approved plugin directory.
		let library = unsafe { Library::new(path) }.map_err(|e| e.to_string())?;
		Ok(Box::new(DlLibrary {
			library,
		}))
	}
}

struct DlLibrary {
	library: Library,
}

impl NativeLibrary for DlLibrary {
	fn symbol(&self, name: &str) -> Option<SymbolPtr> {
		// SAFETY: the address is stored opaquely and never dereferenced
		// by the runtime.
		unsafe { self.library.get::<*const c_void>(name.as_bytes()).ok().map(|sym| SymbolPtr(*sym)) }
	}
}

/// One opened shared library, shared by every descriptor resolved from it.
/// Dropping the last reference closes it.
pub struct LibraryHandle {
	name: String,
	library: Box<dyn NativeLibrary>,
}

impl LibraryHandle {
	pub(crate) fn new(name: String, library: Box<dyn NativeLibrary>) -> Self {
		Self {
			name,
			library,
		}
	}

	/// Declared file name, as stored in the catalog.
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn symbol(&self, symbol: &str) -> Option<SymbolPtr> {
		self.library.symbol(symbol)
	}
}

impl Drop for LibraryHandle {
	fn drop(&mut self) {
		debug!(library = %self.name, "closing shared library");
	}
}

impl fmt::Debug for LibraryHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LibraryHandle").field("name", &self.name).finish()
	}
}

/// Reject any declared library name that could escape the plugin
/// directory: separators, dot components and drive prefixes.
pub fn check_library_name(name: &str) -> crate::Result<()> {
	let escapes = name.is_empty()
		|| name == "."
		|| name == ".."
		|| name.contains('/')
		|| name.contains('\\')
		|| name.contains(':');
	if escapes {
		return Err(UdfError::InvalidLibraryPath {
			path: name.to_string(),
		});
	}
	Ok(())
}

/// Opens shared libraries from the approved plugin directory.
///
/// The loader never consults the registry and never runs under its lock;
/// callers share already-open handles via `UdfRegistry::find_library`
/// before coming here.
pub struct LibraryLoader {
	plugin_dir: PathBuf,
	backend: Arc<dyn LibraryBackend>,
}

impl LibraryLoader {
	pub fn new(plugin_dir: PathBuf, backend: Arc<dyn LibraryBackend>) -> Self {
		Self {
			plugin_dir,
			backend,
		}
	}

	/// Open `name` from the plugin directory.
	pub fn open(&self, name: &str) -> crate::Result<Arc<LibraryHandle>> {
		check_library_name(name)?;
		let path = self.plugin_dir.join(name);
		let library = self.backend.open(&path).map_err(|reason| UdfError::LibraryOpenFailed {
			path: name.to_string(),
			reason,
		})?;
		debug!(library = %name, "opened shared library");
		Ok(Arc::new(LibraryHandle::new(name.to_string(), library)))
	}
}
