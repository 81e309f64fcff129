use std::{
    collections::HashMap,
    fmt::Debug,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use log::debug;
use parking_lot::Mutex;
use zip::{ZipArchive, result::ZipError};

use crate::{class::ClassWriter, error::LoadError};

/// Somewhere class bytes can come from. `Ok(None)` means "not here, try the
/// next entry"; errors abort the load.
pub trait ClassPath: Debug {
    fn read_class(&self, name: &str) -> Result<Option<Vec<u8>>, LoadError>;
}

/// Opens a class path entry: `.jar` and `.zip` files are archives, anything
/// else is a directory root.
pub fn open_class_path(path: impl AsRef<Path>) -> Result<Box<dyn ClassPath>, LoadError> {
    let path = path.as_ref();
    let is_archive = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("zip"));
    if is_archive {
        Ok(Box::new(JarClassPath::open(path)?))
    } else {
        Ok(Box::new(DirClassPath::new(path)))
    }
}

/// `<base>/<package>/<Name>.class`
#[derive(Debug)]
pub struct DirClassPath {
    base_path: PathBuf,
}

impl DirClassPath {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

impl ClassPath for DirClassPath {
    fn read_class(&self, name: &str) -> Result<Option<Vec<u8>>, LoadError> {
        let path = self.base_path.join(format!("{name}.class"));
        match fs::read(&path) {
            Ok(bytes) => {
                debug!("read {} bytes from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(LoadError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

#[derive(Debug)]
pub struct JarClassPath {
    path: PathBuf,
    zip_file: Mutex<ZipArchive<File>>,
}

impl JarClassPath {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LoadError> {
        let path = path.into();
        let name = path.display().to_string();
        let file = File::open(&path).map_err(|source| LoadError::Io {
            name: name.clone(),
            source,
        })?;
        let archive =
            ZipArchive::new(file).map_err(|source| LoadError::Archive { name, source })?;
        Ok(Self {
            path,
            zip_file: Mutex::new(archive),
        })
    }
}

impl ClassPath for JarClassPath {
    fn read_class(&self, name: &str) -> Result<Option<Vec<u8>>, LoadError> {
        let mut archive = self.zip_file.lock();
        let mut class_file = match archive.by_name(&format!("{name}.class")) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(source) => {
                return Err(LoadError::Archive {
                    name: name.to_string(),
                    source,
                });
            }
        };
        let mut content = Vec::with_capacity(class_file.size() as usize);
        class_file
            .read_to_end(&mut content)
            .map_err(|source| LoadError::Io {
                name: name.to_string(),
                source,
            })?;
        debug!("read {name} from {}", self.path.display());
        Ok(Some(content))
    }
}

/// Class bytes held in memory, used for the bootstrap library and by
/// embedders that assemble classes themselves.
#[derive(Debug, Default)]
pub struct MemoryClassPath {
    classes: HashMap<String, Vec<u8>>,
}

impl MemoryClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> &mut Self {
        self.classes.insert(name.into(), bytes);
        self
    }

    pub fn insert_class(&mut self, name: &str, writer: ClassWriter) -> &mut Self {
        self.insert(name, writer.to_bytes())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassPath for MemoryClassPath {
    fn read_class(&self, name: &str) -> Result<Option<Vec<u8>>, LoadError> {
        Ok(self.classes.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_class_path_missing_file_is_none() {
        let dir = std::env::temp_dir().join("minijvm-classpath-test");
        fs::create_dir_all(dir.join("pkg")).unwrap();
        fs::write(dir.join("pkg/Present.class"), [0xca, 0xfe]).unwrap();

        let class_path = DirClassPath::new(&dir);
        assert_eq!(
            class_path.read_class("pkg/Present").unwrap(),
            Some(vec![0xca, 0xfe])
        );
        assert!(class_path.read_class("pkg/Absent").unwrap().is_none());
    }

    #[test]
    fn test_open_picks_backend_by_extension() {
        let missing = std::env::temp_dir().join("minijvm-missing.jar");
        assert!(matches!(
            open_class_path(&missing),
            Err(LoadError::Io { .. })
        ));
        assert!(open_class_path(std::env::temp_dir()).is_ok());
    }
}
