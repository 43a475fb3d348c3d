//! In-memory Document Engine over a real temporary project tree.
//!
//! Each document exists on disk as a placeholder file holding only an id, so
//! the scanner finds it and a rename on disk carries it along. Its references
//! live in memory and follow the same path rules as the real engine scripts.
#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use blendref::engine::{DocumentEngine, Project};
use blendref::error::Error;
use blendref::paths::{self, RebaseDecision};
use blendref::protocol::{
    BrokenNameEntry, BrokenNames, Envelope, FailedNameRemap, ImageEntry, LibraryEntry, NameRemap, NamesRemapped,
    Rebased, RebasedPath, Relinked, Relocated, SceneEntry, Scanned, Scenes, Updated, UpdatedPath,
};
use blendref::references::owner_dir;
use blendref::scanner::ScanRules;
use blendref::types::{ReferenceKind, SkippedRebase};

/// Placeholder file contents before the document id.
const ID_PREFIX: &str = "fake-document:";

/// One stored reference inside a fake document.
#[derive(Debug, Clone)]
pub struct FakeRef {
    /// Collections the document expects the library to provide.
    pub collections: Vec<String>,
    pub kind: ReferenceKind,
    pub name: String,
    pub stored: String,
}

/// A fake document's contents.
#[derive(Debug, Clone, Default)]
pub struct FakeDoc {
    /// Collections this document provides when linked as a library.
    pub provides: Vec<String>,
    pub refs: Vec<FakeRef>,
}

/// Ways to make the fake misbehave.
#[derive(Debug, Default)]
pub struct Faults {
    /// Documents whose path update succeeds without rewriting anything.
    pub noop_update: BTreeSet<PathBuf>,
    /// Create this file when an unreachable update fires, to block a rollback.
    pub occupy_on_unreachable: Option<PathBuf>,
    /// Documents whose relocation is refused.
    pub refuse_relocate: BTreeSet<PathBuf>,
    /// Documents whose scan is refused.
    pub refuse_scan: BTreeSet<PathBuf>,
    /// Documents whose path update is refused.
    pub refuse_update: BTreeSet<PathBuf>,
    /// Documents whose named-item check cannot be reached.
    pub unreachable_names: BTreeSet<PathBuf>,
    /// Documents whose scan cannot be reached.
    pub unreachable_scan: BTreeSet<PathBuf>,
    /// Documents whose path update cannot be reached.
    pub unreachable_update: BTreeSet<PathBuf>,
}

#[derive(Default)]
pub struct FakeEngine {
    calls: RefCell<Vec<String>>,
    docs: RefCell<BTreeMap<u32, FakeDoc>>,
    faults: RefCell<Faults>,
}

fn ok<T>(payload: T) -> Envelope<T> {
    Envelope { error: None, errors: Vec::new(), payload, success: true, warnings: Vec::new() }
}

fn refused<T: Default>(message: &str) -> Envelope<T> {
    Envelope { error: Some(message.to_string()), errors: Vec::new(), payload: T::default(), success: false, warnings: Vec::new() }
}

fn unreachable(operation: &str) -> Error {
    Error::EngineTimeout { operation: operation.to_string(), seconds: 60 }
}

/// Write a placeholder document file carrying `id`.
fn write_placeholder(path: &Path, id: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("{ID_PREFIX}{id}")).unwrap();
}

/// Id stored in the placeholder at `path`, if it is one.
fn id_of(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.strip_prefix(ID_PREFIX)?.parse().ok()
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document on disk holding image references `(name, stored)`.
    pub fn add_document(&self, path: &Path, images: &[(&str, &str)]) {
        let mut docs = self.docs.borrow_mut();
        let id = u32::try_from(docs.len()).unwrap();
        write_placeholder(path, id);
        let refs = images
            .iter()
            .map(|(name, stored)| FakeRef {
                collections: Vec::new(),
                kind: ReferenceKind::Image,
                name: (*name).to_string(),
                stored: (*stored).to_string(),
            })
            .collect();
        docs.insert(id, FakeDoc { provides: Vec::new(), refs });
    }

    /// Add a library reference that expects `collections`.
    pub fn link_library(&self, document: &Path, name: &str, stored: &str, collections: &[&str]) {
        let mut docs = self.docs.borrow_mut();
        let doc = docs.get_mut(&id_of(document).expect("document registered")).unwrap();
        doc.refs.push(FakeRef {
            collections: collections.iter().map(|c| (*c).to_string()).collect(),
            kind: ReferenceKind::Library,
            name: name.to_string(),
            stored: stored.to_string(),
        });
    }

    pub fn set_provides(&self, document: &Path, collections: &[&str]) {
        let mut docs = self.docs.borrow_mut();
        docs.get_mut(&id_of(document).expect("document registered")).unwrap().provides =
            collections.iter().map(|c| (*c).to_string()).collect();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn faults(&self) -> RefMut<'_, Faults> {
        self.faults.borrow_mut()
    }

    /// Collections each library reference of a document expects, in order.
    pub fn expected_collections(&self, document: &Path) -> Vec<Vec<String>> {
        let Some(id) = id_of(document) else { return Vec::new() };
        self.docs
            .borrow()
            .get(&id)
            .map(|d| d.refs.iter().filter(|r| r.kind == ReferenceKind::Library).map(|r| r.collections.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_document(&self, path: &Path) -> bool {
        id_of(path).is_some_and(|id| self.docs.borrow().contains_key(&id))
    }

    /// Stored paths of a document, in order.
    pub fn stored_paths(&self, document: &Path) -> Vec<String> {
        let Some(id) = id_of(document) else { return Vec::new() };
        self.docs
            .borrow()
            .get(&id)
            .map(|d| d.refs.iter().map(|r| r.stored.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, operation: &str, document: &Path) {
        self.calls.borrow_mut().push(format!("{operation} {}", document.display()));
    }

    /// Rebase every relative reference of `doc` from `old_dir` to `new_dir`.
    fn rebase_doc(doc: &mut FakeDoc, old_dir: &Path, new_dir: &Path, co_moved: &BTreeSet<PathBuf>, apply: bool) -> Rebased {
        let mut rebased = Rebased::default();
        for reference in &mut doc.refs {
            match paths::decide_rebase(&reference.stored, old_dir, new_dir, co_moved) {
                RebaseDecision::Keep => {},
                RebaseDecision::Rebase(new_path) => {
                    let entry = RebasedPath { name: reference.name.clone(), new_path: new_path.clone(), old_path: reference.stored.clone() };
                    match reference.kind {
                        ReferenceKind::Image => rebased.rebased_images.push(entry),
                        ReferenceKind::Library | ReferenceKind::NamedCollection => rebased.rebased_libraries.push(entry),
                    }
                    if apply {
                        reference.stored = new_path;
                    }
                },
                RebaseDecision::Skip(reason) => rebased.skipped.push(SkippedRebase {
                    name: reference.name.clone(),
                    reason,
                    stored_path: reference.stored.clone(),
                }),
            }
        }
        rebased
    }
}

impl DocumentEngine for FakeEngine {
    fn apply_remap(&self, document: &Path, remap: &BTreeMap<String, String>) -> Result<Envelope<Relinked>, Error> {
        self.record("relink_paths", document);
        let mut docs = self.docs.borrow_mut();
        let Some(doc) = id_of(document).and_then(|id| docs.get_mut(&id)) else { return Ok(refused("not a document")) };
        let mut relinked = Relinked::default();
        for reference in &mut doc.refs {
            if let Some(new) = remap.get(&reference.stored) {
                reference.stored = new.clone();
                match reference.kind {
                    ReferenceKind::Image => relinked.relinked_textures += 1,
                    ReferenceKind::Library | ReferenceKind::NamedCollection => relinked.relinked_libraries += 1,
                }
            }
        }
        relinked.total_relinked = relinked.relinked_textures + relinked.relinked_libraries;
        Ok(ok(relinked))
    }

    fn extract_references(&self, document: &Path) -> Result<Envelope<Scanned>, Error> {
        self.record("scan_references", document);
        if self.faults.borrow().unreachable_scan.contains(document) {
            return Err(unreachable("scan_references"));
        }
        if self.faults.borrow().refuse_scan.contains(document) {
            return Ok(refused("file is corrupt"));
        }
        let docs = self.docs.borrow();
        let Some(doc) = id_of(document).and_then(|id| docs.get(&id)) else { return Ok(refused("not a document")) };

        let dir = owner_dir(document);
        let mut scanned = Scanned::default();
        for reference in &doc.refs {
            let resolved = paths::resolve(&reference.stored, &dir);
            match reference.kind {
                ReferenceKind::Image => scanned.images.push(ImageEntry {
                    exists: resolved.exists(),
                    filepath: reference.stored.clone(),
                    is_relative: paths::is_relative(&reference.stored),
                    name: reference.name.clone(),
                    packed: false,
                    resolved: Some(resolved.display().to_string()),
                    size: Some([1024, 1024]),
                    users: 1,
                }),
                ReferenceKind::Library | ReferenceKind::NamedCollection => scanned.libraries.push(LibraryEntry {
                    collections: reference.collections.clone(),
                    exists: resolved.exists(),
                    filepath: reference.stored.clone(),
                    is_relative: paths::is_relative(&reference.stored),
                    name: reference.name.clone(),
                    objects: Vec::new(),
                    resolved: Some(resolved.display().to_string()),
                }),
            }
        }
        Ok(ok(scanned))
    }

    fn list_scenes(&self, document: &Path) -> Result<Envelope<Scenes>, Error> {
        self.record("list_scenes", document);
        if !self.has_document(document) {
            return Ok(refused("not a document"));
        }
        Ok(ok(Scenes {
            scenes: vec![
                SceneEntry { is_active: true, name: "Scene".to_string() },
                SceneEntry { is_active: false, name: "Layout".to_string() },
            ],
        }))
    }

    fn rebase_internal(
        &self,
        document: &Path,
        old_dir: &Path,
        new_dir: &Path,
        moved_files: &[PathBuf],
        dry_run: bool,
    ) -> Result<Envelope<Rebased>, Error> {
        self.record("rebase_blend_paths", document);
        let mut docs = self.docs.borrow_mut();
        let Some(doc) = id_of(document).and_then(|id| docs.get_mut(&id)) else { return Ok(refused("not a document")) };
        let co_moved: BTreeSet<PathBuf> = moved_files.iter().cloned().collect();
        Ok(ok(Self::rebase_doc(doc, old_dir, new_dir, &co_moved, !dry_run)))
    }

    fn relocate(&self, old_path: &Path, new_path: &Path, delete_old: bool, dry_run: bool) -> Result<Envelope<Relocated>, Error> {
        self.record("move_scene", old_path);
        if self.faults.borrow().refuse_relocate.contains(old_path) {
            return Ok(refused("cannot save to destination"));
        }
        let mut docs = self.docs.borrow_mut();
        let Some(id) = id_of(old_path).filter(|id| docs.contains_key(id)) else { return Ok(refused("not a document")) };
        let mut doc = docs[&id].clone();
        let rebased = Self::rebase_doc(&mut doc, &owner_dir(old_path), &owner_dir(new_path), &BTreeSet::new(), true);
        if dry_run {
            return Ok(ok(Relocated { file_moved: false, old_deleted: false, rebased }));
        }

        if delete_old {
            write_placeholder(new_path, id);
            fs::remove_file(old_path).unwrap();
            docs.insert(id, doc);
        } else {
            let copy = u32::try_from(docs.len()).unwrap();
            write_placeholder(new_path, copy);
            docs.insert(copy, doc);
        }
        Ok(ok(Relocated { file_moved: true, old_deleted: delete_old, rebased }))
    }

    fn remap_names(&self, document: &Path, remappings: &[NameRemap]) -> Result<Envelope<NamesRemapped>, Error> {
        self.record("fix_collection_names", document);
        let mut docs = self.docs.borrow_mut();
        let Some(id) = id_of(document).filter(|id| docs.contains_key(id)) else { return Ok(refused("not a document")) };
        let dir = owner_dir(document);
        let mut result = NamesRemapped::default();
        for remap in remappings {
            let library = id_of(&paths::resolve(&remap.library_filepath, &dir)).and_then(|lib| docs.get(&lib));
            if !library.is_some_and(|l| l.provides.contains(&remap.new_collection_name)) {
                result.failed_remappings.push(FailedNameRemap {
                    error: None,
                    errors: vec![format!("Collection '{}' not found in library", remap.new_collection_name)],
                    new_name: remap.new_collection_name.clone(),
                    old_name: remap.old_collection_name.clone(),
                });
                continue;
            }
            let doc = docs.get_mut(&id).unwrap();
            for reference in doc.refs.iter_mut().filter(|r| r.name == remap.library_name && r.stored == remap.library_filepath) {
                for wanted in &mut reference.collections {
                    if *wanted == remap.old_collection_name {
                        *wanted = remap.new_collection_name.clone();
                    }
                }
            }
            result.total_remapped += 1;
        }
        Ok(ok(result))
    }

    fn update_paths(&self, document: &Path, old_path: &Path, new_path: &Path) -> Result<Envelope<Updated>, Error> {
        self.record("update_blend_paths", document);
        {
            let faults = self.faults.borrow();
            if faults.noop_update.contains(document) {
                return Ok(ok(Updated::default()));
            }
            if faults.unreachable_update.contains(document) {
                if let Some(occupy) = &faults.occupy_on_unreachable {
                    fs::create_dir_all(occupy.parent().unwrap()).unwrap();
                    fs::write(occupy, b"someone else's file").unwrap();
                }
                return Err(unreachable("update_blend_paths"));
            }
            if faults.refuse_update.contains(document) {
                return Ok(refused("document is read-only"));
            }
        }

        let mut docs = self.docs.borrow_mut();
        let Some(doc) = id_of(document).and_then(|id| docs.get_mut(&id)) else { return Ok(refused("not a document")) };
        let dir = owner_dir(document);
        let mut updated = Updated::default();
        for reference in &mut doc.refs {
            if paths::resolve(&reference.stored, &dir) != old_path {
                continue;
            }
            let new = if paths::is_relative(&reference.stored) {
                paths::make_relative(new_path, &dir)
            } else {
                new_path.display().to_string()
            };
            updated.changes.push(UpdatedPath {
                kind: reference.kind,
                name: reference.name.clone(),
                new: new.clone(),
                old: reference.stored.clone(),
            });
            reference.stored = new;
        }
        updated.changes_count = updated.changes.len();
        Ok(ok(updated))
    }

    fn validate_names(&self, document: &Path) -> Result<Envelope<BrokenNames>, Error> {
        self.record("validate_collection_names", document);
        if self.faults.borrow().unreachable_names.contains(document) {
            return Err(unreachable("validate_collection_names"));
        }
        let docs = self.docs.borrow();
        let Some(doc) = id_of(document).and_then(|id| docs.get(&id)) else { return Ok(refused("not a document")) };

        let dir = owner_dir(document);
        let mut broken = BrokenNames::default();
        for reference in doc.refs.iter().filter(|r| r.kind == ReferenceKind::Library) {
            let target = paths::resolve(&reference.stored, &dir);
            let Some(library) = id_of(&target).and_then(|id| docs.get(&id)) else { continue };
            for wanted in &reference.collections {
                if !library.provides.contains(wanted) {
                    broken.broken_collection_refs.push(BrokenNameEntry {
                        available_collections: library.provides.clone(),
                        collection_name: wanted.clone(),
                        library_filepath: reference.stored.clone(),
                        library_name: reference.name.clone(),
                        resolved_library_path: Some(target.display().to_string()),
                    });
                }
            }
        }
        Ok(ok(broken))
    }
}

/// A temporary project: root directory, default rules, fake engine.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub engine: FakeEngine,
    pub rules: ScanRules,
}

impl Fixture {
    pub fn new() -> Self {
        Self { dir: tempfile::tempdir().unwrap(), engine: FakeEngine::new(), rules: ScanRules::default() }
    }

    /// Absolute path under the root.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn project(&self) -> Project<'_> {
        Project { engine: &self.engine, root: self.dir.path(), rules: &self.rules }
    }

    /// Write a placeholder asset.
    pub fn asset(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, rel.as_bytes()).unwrap();
        path
    }
}

/// A small studio layout:
///
/// ```text
/// textures/wood.png
/// props/chair.blend    image "wood" -> //../textures/wood.png
/// scenes/shot.blend    image "wood" -> //../textures/wood.png
///                      library "chair" -> //../props/chair.blend
/// ```
pub fn studio() -> Fixture {
    let fx = Fixture::new();
    fx.asset("textures/wood.png");
    fx.engine.add_document(&fx.path("props/chair.blend"), &[("wood", "//../textures/wood.png")]);
    fx.engine.add_document(&fx.path("scenes/shot.blend"), &[("wood", "//../textures/wood.png")]);
    fx.engine
        .link_library(&fx.path("scenes/shot.blend"), "chair", "//../props/chair.blend", &[]);
    fx
}
