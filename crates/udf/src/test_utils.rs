// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 OpalDB

//! Test doubles: an in-memory library backend and an in-memory function
//! catalog with scripted commit outcomes.

use std::{
	collections::HashMap,
	ffi::c_void,
	hash::{DefaultHasher, Hash, Hasher},
	path::{Path, PathBuf},
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
};

use opaldb_type::{FunctionKind, ReturnType};
use parking_lot::Mutex;

use crate::{
	UdfError,
	config::UdfConfig,
	descriptor::NativeBinding,
	interface::{CatalogTransaction, FunctionRow, FunctionRowProvider, TransactionOutcome},
	library::{LibraryBackend, LibraryHandle, NativeLibrary, SymbolPtr},
	resolve,
	runtime::UdfRuntime,
};

/// A distinct, stable, never-dereferenced address per (library, symbol).
fn symbol_address(library: &str, symbol: &str) -> SymbolPtr {
	let mut hasher = DefaultHasher::new();
	library.hash(&mut hasher);
	symbol.hash(&mut hasher);
	SymbolPtr::new(((hasher.finish() as usize) | 1) as *const c_void)
}

struct FakeLibraryState {
	symbols: Vec<String>,
	opens: usize,
	last_path: Option<PathBuf>,
	closes: Arc<AtomicUsize>,
}

/// In-memory [`LibraryBackend`]: libraries are declared up front with
/// their exported symbols, opens and closes are counted per file name.
#[derive(Default)]
pub struct FakeBackend {
	libraries: Mutex<HashMap<String, FakeLibraryState>>,
}

impl FakeBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_library(self, name: &str, symbols: &[&str]) -> Self {
		self.libraries.lock().insert(name.to_string(), FakeLibraryState {
			symbols: symbols.iter().map(|s| s.to_string()).collect(),
			opens: 0,
			last_path: None,
			closes: Arc::new(AtomicUsize::new(0)),
		});
		self
	}

	pub fn open_count(&self, name: &str) -> usize {
		self.libraries.lock().get(name).map(|state| state.opens).unwrap_or(0)
	}

	pub fn total_opens(&self) -> usize {
		self.libraries.lock().values().map(|state| state.opens).sum()
	}

	pub fn close_count(&self, name: &str) -> usize {
		self.libraries.lock().get(name).map(|state| state.closes.load(Ordering::SeqCst)).unwrap_or(0)
	}

	/// Absolute path the backend was most recently asked to open for
	/// `name`.
	pub fn opened_path(&self, name: &str) -> Option<PathBuf> {
		self.libraries.lock().get(name).and_then(|state| state.last_path.clone())
	}
}

impl LibraryBackend for FakeBackend {
	fn open(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, String> {
		let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
		let mut libraries = self.libraries.lock();
		let Some(state) = libraries.get_mut(&file_name) else {
			return Err(format!("{}: cannot open shared object file: No such file or directory", path.display()));
		};
		state.opens += 1;
		state.last_path = Some(path.to_path_buf());
		Ok(Box::new(FakeLibrary {
			name: file_name,
			symbols: state.symbols.clone(),
			closes: state.closes.clone(),
		}))
	}
}

struct FakeLibrary {
	name: String,
	symbols: Vec<String>,
	closes: Arc<AtomicUsize>,
}

impl NativeLibrary for FakeLibrary {
	fn symbol(&self, name: &str) -> Option<SymbolPtr> {
		self.symbols.iter().any(|s| s == name).then(|| symbol_address(&self.name, name))
	}
}

impl Drop for FakeLibrary {
	fn drop(&mut self) {
		self.closes.fetch_add(1, Ordering::SeqCst);
	}
}

/// A standalone fake [`LibraryHandle`] exporting `symbols`.
pub fn fake_library(name: &str, symbols: &[&str]) -> LibraryHandle {
	LibraryHandle::new(name.to_string(), Box::new(FakeLibrary {
		name: name.to_string(),
		symbols: symbols.iter().map(|s| s.to_string()).collect(),
		closes: Arc::new(AtomicUsize::new(0)),
	}))
}

/// A binding for `function` against its own single-function library.
pub fn fake_binding(library: &str, function: &str) -> NativeBinding {
	let init = format!("{function}_init");
	binding_from(&Arc::new(fake_library(library, &[function, &init])), function)
}

/// A binding for `function` resolved against an existing handle.
pub fn binding_from(library: &Arc<LibraryHandle>, function: &str) -> NativeBinding {
	let entry_points = resolve::resolve(library, function, FunctionKind::Scalar, true).unwrap();
	NativeBinding {
		library: library.clone(),
		entry_points,
	}
}

pub fn scalar_row(name: &str, library: &str) -> FunctionRow {
	FunctionRow {
		name: name.to_string(),
		return_type: ReturnType::String,
		library: library.to_string(),
		kind: FunctionKind::Scalar,
	}
}

pub fn aggregate_row(name: &str, library: &str) -> FunctionRow {
	FunctionRow {
		name: name.to_string(),
		return_type: ReturnType::Real,
		library: library.to_string(),
		kind: FunctionKind::Aggregate,
	}
}

/// Runtime over a [`FakeBackend`] pre-seeded with `libraries`.
pub fn new_runtime(libraries: &[(&str, &[&str])]) -> (UdfRuntime, Arc<FakeBackend>) {
	runtime_with_config(UdfConfig::new("/opt/opaldb/plugins"), libraries)
}

/// Same as [`new_runtime`] but with the suspicious-UDF override on.
pub fn new_suspicious_runtime(libraries: &[(&str, &[&str])]) -> (UdfRuntime, Arc<FakeBackend>) {
	let mut config = UdfConfig::new("/opt/opaldb/plugins");
	config.allow_suspicious_udfs = true;
	runtime_with_config(config, libraries)
}

fn runtime_with_config(config: UdfConfig, libraries: &[(&str, &[&str])]) -> (UdfRuntime, Arc<FakeBackend>) {
	let mut backend = FakeBackend::new();
	for (name, symbols) in libraries {
		backend = backend.with_library(name, symbols);
	}
	let backend = Arc::new(backend);
	(UdfRuntime::with_backend(config, backend.clone()), backend)
}

enum Change {
	Inserted(String),
	Deleted(FunctionRow),
}

/// In-memory stand-in for the persisted function catalog.
///
/// Writes apply immediately under one mutex and are undone on rollback,
/// the way an engine with immediate writes and an undo log behaves; the
/// name column is unique. `force_rollback` scripts the "externally
/// requested rollback" that overrides a nominally successful commit.
#[derive(Default)]
pub struct MemoryCatalog {
	rows: Mutex<Vec<FunctionRow>>,
	force_rollback: AtomicBool,
	fail_next_write: Mutex<Option<String>>,
}

impl MemoryCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_rows(rows: Vec<FunctionRow>) -> Self {
		Self {
			rows: Mutex::new(rows),
			..Self::default()
		}
	}

	pub fn begin(&self) -> MemoryTransaction<'_> {
		MemoryTransaction {
			catalog: self,
			undo: Vec::new(),
		}
	}

	pub fn rows(&self) -> Vec<FunctionRow> {
		self.rows.lock().clone()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.rows.lock().iter().any(|row| row.name == name)
	}

	pub fn force_rollback(&self, on: bool) {
		self.force_rollback.store(on, Ordering::SeqCst);
	}

	pub fn fail_next_write(&self, reason: &str) {
		*self.fail_next_write.lock() = Some(reason.to_string());
	}
}

impl FunctionRowProvider for MemoryCatalog {
	fn scan(&self) -> crate::Result<Vec<FunctionRow>> {
		Ok(self.rows())
	}
}

pub struct MemoryTransaction<'a> {
	catalog: &'a MemoryCatalog,
	undo: Vec<Change>,
}

impl MemoryTransaction<'_> {
	fn undo_all(&mut self) {
		let mut rows = self.catalog.rows.lock();
		for change in self.undo.drain(..).rev() {
			match change {
				Change::Inserted(name) => rows.retain(|row| row.name != name),
				Change::Deleted(row) => rows.push(row),
			}
		}
	}
}

impl CatalogTransaction for MemoryTransaction<'_> {
	fn insert_row(&mut self, row: &FunctionRow) -> crate::Result<()> {
		if let Some(reason) = self.catalog.fail_next_write.lock().take() {
			return Err(UdfError::Persistence {
				reason,
			});
		}
		let mut rows = self.catalog.rows.lock();
		if rows.iter().any(|existing| existing.name == row.name) {
			return Err(UdfError::Persistence {
				reason: format!("duplicate key {}", row.name),
			});
		}
		rows.push(row.clone());
		self.undo.push(Change::Inserted(row.name.clone()));
		Ok(())
	}

	fn delete_row(&mut self, name: &str) -> crate::Result<bool> {
		let mut rows = self.catalog.rows.lock();
		match rows.iter().position(|row| row.name == name) {
			Some(index) => {
				let row = rows.remove(index);
				self.undo.push(Change::Deleted(row));
				Ok(true)
			}
			None => Ok(false),
		}
	}

	fn finish(&mut self, rollback: bool) -> crate::Result<TransactionOutcome> {
		if rollback || self.catalog.force_rollback.load(Ordering::SeqCst) {
			self.undo_all();
			Ok(TransactionOutcome::RolledBack)
		} else {
			self.undo.clear();
			Ok(TransactionOutcome::Committed)
		}
	}
}

// A transaction dropped without finish() rolls back.
impl Drop for MemoryTransaction<'_> {
	fn drop(&mut self) {
		self.undo_all();
	}
}
