mod common;

use std::{
    fs,
    io::Write,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use common::*;
use minijvm::{
    DecodeError, LoadError, Runtime, RuntimeConfig,
    class::{ClassWriter, MethodBody},
    runtime::{ClassPath, MemoryClassPath, Variable, instructions as inst},
};

/// Counts how often a class is read through it.
#[derive(Debug)]
struct CountingClassPath {
    inner: MemoryClassPath,
    reads: Arc<AtomicUsize>,
}

impl ClassPath for CountingClassPath {
    fn read_class(&self, name: &str) -> Result<Option<Vec<u8>>, LoadError> {
        let bytes = self.inner.read_class(name)?;
        if bytes.is_some() {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(bytes)
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("minijvm-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_loading_twice_returns_the_same_class() {
    let mut inner = MemoryClassPath::new();
    inner.insert_class("Counted", class("Counted"));
    let reads = Arc::new(AtomicUsize::new(0));
    let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    runtime.add_class_path(Box::new(CountingClassPath {
        inner,
        reads: Arc::clone(&reads),
    }));

    let first = runtime.load_class("Counted").unwrap();
    let second = runtime.load_class("Counted").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert!(runtime.method_area().contains("Counted"));
}

#[test]
fn test_missing_class() {
    let (mut runtime, _) = runtime(vec![]);
    let err = runtime.load_class("does/not/Exist").unwrap_err();
    assert!(matches!(err, LoadError::NotFound(name) if name == "does/not/Exist"));
}

#[test]
fn test_bad_magic_is_a_decode_error() {
    let mut bytes = class("Broken").to_bytes();
    bytes[3] = 0xBF;
    let mut classes = MemoryClassPath::new();
    classes.insert("Broken", bytes);
    let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    runtime.add_class_path(Box::new(classes));

    match runtime.load_class("Broken").unwrap_err() {
        LoadError::Decode { name, source } => {
            assert_eq!(name, "Broken");
            assert_eq!(source, DecodeError::BadMagic(0xCAFE_BABF));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!runtime.method_area().contains("Broken"));
}

#[test]
fn test_missing_superclass_is_wrapped() {
    let (mut runtime, _) = runtime(vec![("Orphan", ClassWriter::new("Orphan", Some("Ghost")))]);
    let err = runtime.load_class("Orphan").unwrap_err();
    assert!(matches!(err, LoadError::Super { .. }));
    assert!(matches!(err.innermost(), LoadError::NotFound(name) if name == "Ghost"));
}

#[test]
fn test_superclass_cycle_is_detected() {
    let (mut runtime, _) = runtime(vec![
        ("CycleA", ClassWriter::new("CycleA", Some("CycleB"))),
        ("CycleB", ClassWriter::new("CycleB", Some("CycleA"))),
    ]);
    let err = runtime.load_class("CycleA").unwrap_err();
    assert!(matches!(err.innermost(), LoadError::Circularity(name) if name == "CycleA"));
    assert!(!runtime.method_area().contains("CycleA"));
    assert!(!runtime.method_area().contains("CycleB"));
}

#[test]
fn test_directory_class_path() {
    let dir = scratch_dir("dir");
    fs::create_dir_all(dir.join("pkg")).unwrap();
    let mut writer = ClassWriter::new("pkg/Answer", Some("java/lang/Object"));
    writer.add_method(
        STATIC,
        "get",
        "()I",
        Some(MethodBody::new(1, 0, vec![inst::BIPUSH, 42, inst::IRETURN])),
    );
    fs::write(dir.join("pkg/Answer.class"), writer.to_bytes()).unwrap();

    let config = RuntimeConfig {
        class_path: vec![dir.clone()],
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::new(config).unwrap();
    let result = runtime.invoke_static("pkg/Answer", "get", "()I", &[]).unwrap();
    assert_eq!(result, vec![Variable::int(42)]);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_jar_class_path() {
    let dir = scratch_dir("jar");
    let jar = dir.join("lib.jar");
    {
        let file = fs::File::create(&jar).unwrap();
        let mut archive = zip::ZipWriter::new(file);
        archive
            .start_file("lib/Packed.class", zip::write::SimpleFileOptions::default())
            .unwrap();
        archive.write_all(&class("lib/Packed").to_bytes()).unwrap();
        archive.finish().unwrap();
    }

    let config = RuntimeConfig {
        class_path: vec![jar],
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::new(config).unwrap();
    let class = runtime.load_class("lib/Packed").unwrap();
    assert_eq!(class.name(), "lib/Packed");
    assert_eq!(class.super_name(), Some("java/lang/Object"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_bootstrap_classes_can_be_disabled() {
    let config = RuntimeConfig {
        bootstrap_classes: false,
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::new(config).unwrap();
    assert!(matches!(
        runtime.load_class("java/lang/Object"),
        Err(LoadError::NotFound(_))
    ));
}
