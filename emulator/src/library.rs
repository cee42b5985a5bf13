//! Playback files stored as `<name>.dat` in one directory.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use interrupter_core::playback::{LibraryError, PlaybackLibrary};

const EXTENSION: &str = "dat";

#[derive(Clone, Debug)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names are bare file stems; anything that could leave the directory is
    /// rejected.
    fn path_for(&self, name: &str) -> Result<PathBuf, LibraryError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(LibraryError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(format!("{name}.{EXTENSION}")))
    }
}

impl PlaybackLibrary for DirectoryLibrary {
    type Stream = BufReader<File>;

    fn list(&self) -> Result<Vec<String>, LibraryError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, name: &str) -> Result<Self::Stream, LibraryError> {
        let path = self.path_for(name)?;
        match File::open(&path) {
            Ok(file) => Ok(BufReader::new(file)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(LibraryError::NotFound(name.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn library_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, DirectoryLibrary) {
        let dir = tempfile::tempdir().expect("temp dir");
        for (name, bytes) in files {
            fs::write(dir.path().join(name), bytes).expect("write fixture");
        }
        let library = DirectoryLibrary::new(dir.path());
        (dir, library)
    }

    #[test]
    fn lists_dat_files_without_extension() {
        let (_dir, library) = library_with(&[
            ("zelda.dat", b""),
            ("mario.dat", b""),
            ("notes.txt", b""),
        ]);
        assert_eq!(library.list().expect("list"), ["mario", "zelda"]);
    }

    #[test]
    fn opens_by_name() {
        let (_dir, library) = library_with(&[("scale.dat", &[0, 0, 0x90, 60, 100])]);
        let mut bytes = Vec::new();
        library
            .open("scale")
            .expect("file exists")
            .read_to_end(&mut bytes)
            .expect("read");
        assert_eq!(bytes, [0, 0, 0x90, 60, 100]);
    }

    #[test]
    fn missing_and_escaping_names_are_rejected() {
        let (_dir, library) = library_with(&[]);
        assert_eq!(
            library.open("absent").map(|_| ()),
            Err(LibraryError::NotFound("absent".into()))
        );
        assert_eq!(
            library.open("../etc/passwd").map(|_| ()),
            Err(LibraryError::InvalidName("../etc/passwd".into()))
        );
    }

    #[test]
    fn unreadable_directory_is_an_io_error() {
        let library = DirectoryLibrary::new("/nonexistent/playback");
        assert_eq!(
            library.list(),
            Err(LibraryError::Io(io::ErrorKind::NotFound))
        );
    }
}
